//! Tab Manager (§4.7 L5): groups terminals into orderable, pinnable tabs,
//! and auto-removes a tab shortly after its terminal exits unless pinned.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::backend::SpawnOptions;
use crate::event_bus::{EventBus, TypedEvent};
use crate::terminal_manager::{TerminalManager, TerminalManagerError, TerminalManagerEvent};

/// Delay before a tab is auto-removed after its terminal exits, unless
/// pinned (§4.7). Short enough that a crashed shell's final output is
/// still visible for a beat, long enough not to feel laggy.
const AUTO_REMOVE_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, thiserror::Error)]
pub enum TabManagerError {
    #[error("tab {0} not found")]
    NotFound(String),

    #[error("reorder ids do not match the current tab set")]
    InvalidReorder,

    #[error("tab manager has been disposed")]
    Disposed,

    #[error(transparent)]
    Terminal(#[from] TerminalManagerError),
}

#[derive(Debug, Clone)]
pub struct Tab {
    pub id: String,
    pub terminal_id: String,
    pub title: String,
    pub order: u32,
    pub pinned: bool,
    pub modified: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub last_active_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone)]
pub enum TabManagerEvent {
    TabCreated(Tab),
    TabRemoved { id: String },
    TabActivated { id: String },
    TabReordered { ids: Vec<String> },
    TabPinChanged { id: String, pinned: bool },
    TabTitleChanged { id: String, title: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TabManagerEventKind {
    TabCreated,
    TabRemoved,
    TabActivated,
    TabReordered,
    TabPinChanged,
    TabTitleChanged,
}

impl TypedEvent for TabManagerEvent {
    type Kind = TabManagerEventKind;

    fn kind(&self) -> Self::Kind {
        match self {
            TabManagerEvent::TabCreated(_) => TabManagerEventKind::TabCreated,
            TabManagerEvent::TabRemoved { .. } => TabManagerEventKind::TabRemoved,
            TabManagerEvent::TabActivated { .. } => TabManagerEventKind::TabActivated,
            TabManagerEvent::TabReordered { .. } => TabManagerEventKind::TabReordered,
            TabManagerEvent::TabPinChanged { .. } => TabManagerEventKind::TabPinChanged,
            TabManagerEvent::TabTitleChanged { .. } => TabManagerEventKind::TabTitleChanged,
        }
    }
}

struct TabEntry {
    tab: RwLock<Tab>,
}

#[derive(Debug, Clone, Default)]
pub struct TabManagerStats {
    pub total: usize,
    pub pinned: usize,
    pub active: Option<String>,
    pub oldest_created_at: Option<chrono::DateTime<chrono::Utc>>,
    pub newest_created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Groups terminals into user-facing tabs. One tab per terminal instance;
/// closing all terminals but pinned ones leaves the pinned tabs' terminals
/// running.
pub struct TabManager {
    terminals: Arc<TerminalManager>,
    tabs: Arc<dashmap::DashMap<String, Arc<TabEntry>>>,
    active: Arc<RwLock<Option<String>>>,
    next_order: AtomicU32,
    disposed: AtomicBool,
    events: Arc<EventBus<TabManagerEvent>>,
}

impl TabManager {
    pub fn new(terminals: Arc<TerminalManager>) -> Self {
        let manager = Self {
            terminals,
            tabs: Arc::new(dashmap::DashMap::new()),
            active: Arc::new(RwLock::new(None)),
            next_order: AtomicU32::new(0),
            disposed: AtomicBool::new(false),
            events: Arc::new(EventBus::new()),
        };
        manager.wire_terminal_events();
        manager
    }

    pub fn events(&self) -> &EventBus<TabManagerEvent> {
        &self.events
    }

    pub async fn create(
        &self,
        opts: &SpawnOptions,
        title: Option<String>,
    ) -> Result<Tab, TabManagerError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(TabManagerError::Disposed);
        }
        let state = self.terminals.create(opts, title).await?;
        let now = chrono::Utc::now();
        let tab = Tab {
            id: uuid::Uuid::new_v4().to_string(),
            terminal_id: state.id,
            title: state.title,
            order: self.next_order.fetch_add(1, Ordering::SeqCst),
            pinned: false,
            modified: false,
            created_at: now,
            last_active_at: now,
        };

        self.tabs.insert(
            tab.id.clone(),
            Arc::new(TabEntry {
                tab: RwLock::new(tab.clone()),
            }),
        );

        if self.active.read().is_none() {
            *self.active.write() = Some(tab.id.clone());
        }

        self.events.emit(TabManagerEvent::TabCreated(tab.clone()));
        Ok(tab)
    }

    pub fn remove(&self, id: &str) -> Result<(), TabManagerError> {
        let entry = self.get_entry(id)?;
        let terminal_id = entry.tab.read().terminal_id.clone();
        self.terminals.close(&terminal_id).ok();
        self.tabs.remove(id);

        if self.active.read().as_deref() == Some(id) {
            let next = self
                .tabs
                .iter()
                .max_by_key(|e| e.tab.read().last_active_at)
                .map(|e| e.key().clone());
            *self.active.write() = next;
        }

        self.events.emit(TabManagerEvent::TabRemoved { id: id.to_string() });
        Ok(())
    }

    pub fn activate(&self, id: &str) -> Result<(), TabManagerError> {
        let entry = self.get_entry(id)?;
        if self.active.read().as_deref() == Some(id) {
            return Ok(());
        }
        *self.active.write() = Some(id.to_string());
        {
            let mut tab = entry.tab.write();
            tab.last_active_at = chrono::Utc::now();
            tab.modified = false;
        }
        self.events.emit(TabManagerEvent::TabActivated { id: id.to_string() });
        Ok(())
    }

    /// Update a tab's title and emit `TabTitleChanged` (§4.7, per-instance
    /// `title_changed` subscription). A host wires this to whatever
    /// renderer-level signal reports a new title for the underlying
    /// terminal.
    pub fn set_title(&self, id: &str, title: String) -> Result<(), TabManagerError> {
        let entry = self.get_entry(id)?;
        entry.tab.write().title = title.clone();
        self.events
            .emit(TabManagerEvent::TabTitleChanged { id: id.to_string(), title });
        Ok(())
    }

    /// Activate a tab in response to a renderer-reported focus signal
    /// (§4.7, per-instance `focus` subscription). A no-op if the tab is
    /// already active, same as [`TabManager::activate`].
    pub fn focus(&self, id: &str) -> Result<(), TabManagerError> {
        self.activate(id)
    }

    /// Reorder tabs by `order` index, in the order ids are given (§4.7).
    /// `ids` must be exactly the current tab set (as a multiset); a subset,
    /// superset, or duplicate is rejected without reassigning any order.
    pub fn reorder(&self, ids: &[String]) -> Result<(), TabManagerError> {
        let current: std::collections::HashSet<String> =
            self.tabs.iter().map(|e| e.key().clone()).collect();
        let candidate: std::collections::HashSet<&str> = ids.iter().map(String::as_str).collect();
        if candidate.len() != ids.len()
            || candidate.len() != current.len()
            || !candidate.iter().all(|id| current.contains(*id))
        {
            return Err(TabManagerError::InvalidReorder);
        }

        for (index, id) in ids.iter().enumerate() {
            let entry = self.get_entry(id)?;
            entry.tab.write().order = index as u32;
        }
        self.events
            .emit(TabManagerEvent::TabReordered { ids: ids.to_vec() });
        Ok(())
    }

    pub fn toggle_pin(&self, id: &str) -> Result<bool, TabManagerError> {
        let entry = self.get_entry(id)?;
        let pinned = {
            let mut tab = entry.tab.write();
            tab.pinned = !tab.pinned;
            tab.pinned
        };
        self.events.emit(TabManagerEvent::TabPinChanged {
            id: id.to_string(),
            pinned,
        });
        Ok(pinned)
    }

    pub fn close_all_except_pinned(&self) -> Result<(), TabManagerError> {
        let unpinned: Vec<String> = self
            .tabs
            .iter()
            .filter(|e| !e.tab.read().pinned)
            .map(|e| e.key().clone())
            .collect();
        for id in unpinned {
            self.remove(&id)?;
        }
        Ok(())
    }

    pub fn close_all(&self) -> Result<(), TabManagerError> {
        let ids: Vec<String> = self.tabs.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.remove(&id)?;
        }
        Ok(())
    }

    /// Linear scan over every tab's title (§4.7). Case-insensitive
    /// substring match by default; pass `exact=true` for an exact,
    /// case-sensitive match instead.
    pub fn find_by_title(&self, q: &str, exact: bool) -> Vec<Tab> {
        if exact {
            self.tabs
                .iter()
                .filter(|e| e.tab.read().title == q)
                .map(|e| e.tab.read().clone())
                .collect()
        } else {
            let q = q.to_lowercase();
            self.tabs
                .iter()
                .filter(|e| e.tab.read().title.to_lowercase().contains(&q))
                .map(|e| e.tab.read().clone())
                .collect()
        }
    }

    pub fn get(&self, id: &str) -> Option<Tab> {
        self.tabs.get(id).map(|e| e.tab.read().clone())
    }

    pub fn all(&self) -> Vec<Tab> {
        let mut tabs: Vec<Tab> = self.tabs.iter().map(|e| e.tab.read().clone()).collect();
        tabs.sort_by_key(|t| t.order);
        tabs
    }

    pub fn stats(&self) -> TabManagerStats {
        let created_ats: Vec<chrono::DateTime<chrono::Utc>> =
            self.tabs.iter().map(|e| e.tab.read().created_at).collect();
        TabManagerStats {
            total: self.tabs.len(),
            pinned: self.tabs.iter().filter(|e| e.tab.read().pinned).count(),
            active: self.active.read().clone(),
            oldest_created_at: created_ats.iter().min().copied(),
            newest_created_at: created_ats.iter().max().copied(),
        }
    }

    /// Remove every tab and its terminal, clear the active slot, and detach
    /// every listener registered on this manager's own bus (§4.7). Idempotent.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        let ids: Vec<String> = self.tabs.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            let _ = self.remove(&id);
        }
        *self.active.write() = None;
        self.events.remove_all(None);
    }

    fn get_entry(&self, id: &str) -> Result<Arc<TabEntry>, TabManagerError> {
        self.tabs
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| TabManagerError::NotFound(id.to_string()))
    }

    fn wire_terminal_events(&self) {
        let tabs = self.tabs.clone();
        let active = self.active.clone();
        self.terminals.events().on(
            crate::terminal_manager::TerminalManagerEventKind::TerminalData,
            move |ev| {
                if let TerminalManagerEvent::TerminalData { id: terminal_id, .. } = ev {
                    for entry in tabs.iter() {
                        if &entry.tab.read().terminal_id != terminal_id {
                            continue;
                        }
                        let mut tab = entry.tab.write();
                        tab.last_active_at = chrono::Utc::now();
                        if active.read().as_deref() != Some(entry.key().as_str()) {
                            tab.modified = true;
                        }
                        break;
                    }
                }
            },
        );

        let tabs = self.tabs.clone();
        let events = self.events.clone();
        self.terminals.events().on(
            crate::terminal_manager::TerminalManagerEventKind::TerminalExit,
            move |ev| {
                if let TerminalManagerEvent::TerminalExit { id: terminal_id, .. } = ev {
                    let tab_id = tabs
                        .iter()
                        .find(|e| &e.tab.read().terminal_id == terminal_id)
                        .map(|e| e.key().clone());

                    if let Some(tab_id) = tab_id {
                        let pinned = tabs.get(&tab_id).map(|e| e.tab.read().pinned).unwrap_or(false);
                        if pinned {
                            return;
                        }

                        let tabs = tabs.clone();
                        let events = events.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(AUTO_REMOVE_DELAY).await;
                            if tabs.remove(&tab_id).is_some() {
                                events.emit(TabManagerEvent::TabRemoved { id: tab_id });
                            }
                        });
                    }
                }
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process_manager::ProcessManager;

    fn subprocess_opts() -> SpawnOptions {
        SpawnOptions {
            shell: Some("/bin/sh".to_string()),
            ..Default::default()
        }
    }

    fn make_manager() -> TabManager {
        let processes = Arc::new(ProcessManager::new());
        let terminals = Arc::new(TerminalManager::new(processes));
        TabManager::new(terminals)
    }

    #[tokio::test]
    async fn create_assigns_increasing_order() {
        let manager = make_manager();
        let a = manager.create(&subprocess_opts(), None).await.unwrap();
        let b = manager.create(&subprocess_opts(), None).await.unwrap();
        assert!(a.order < b.order);
        manager.close_all().unwrap();
    }

    #[tokio::test]
    async fn pin_survives_close_all_except_pinned() {
        let manager = make_manager();
        let pinned = manager.create(&subprocess_opts(), None).await.unwrap();
        let unpinned = manager.create(&subprocess_opts(), None).await.unwrap();

        manager.toggle_pin(&pinned.id).unwrap();
        manager.close_all_except_pinned().unwrap();

        assert!(manager.get(&pinned.id).is_some());
        assert!(manager.get(&unpinned.id).is_none());

        manager.close_all().unwrap();
    }

    #[tokio::test]
    async fn activating_background_tab_clears_modified() {
        let manager = make_manager();
        let active = manager.create(&subprocess_opts(), None).await.unwrap();
        let background = manager.create(&subprocess_opts(), None).await.unwrap();

        // `active` stays the first-created tab; simulate output landing on
        // the backgrounded one.
        assert!(manager
            .terminals
            .send_data(&background.terminal_id, b"hi\n"));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert!(manager.get(&background.id).unwrap().modified);

        manager.activate(&background.id).unwrap();
        assert!(!manager.get(&background.id).unwrap().modified);
        assert_eq!(manager.get(&active.id).unwrap().id, active.id);

        manager.close_all().unwrap();
    }

    #[tokio::test]
    async fn reorder_updates_all_order() {
        let manager = make_manager();
        let a = manager.create(&subprocess_opts(), None).await.unwrap();
        let b = manager.create(&subprocess_opts(), None).await.unwrap();

        manager.reorder(&[b.id.clone(), a.id.clone()]).unwrap();

        let ordered = manager.all();
        assert_eq!(ordered[0].id, b.id);
        assert_eq!(ordered[1].id, a.id);

        manager.close_all().unwrap();
    }

    #[tokio::test]
    async fn reorder_rejects_a_mismatched_id_set() {
        let manager = make_manager();
        let a = manager.create(&subprocess_opts(), None).await.unwrap();
        let _b = manager.create(&subprocess_opts(), None).await.unwrap();

        let result = manager.reorder(std::slice::from_ref(&a.id));
        assert!(matches!(result, Err(TabManagerError::InvalidReorder)));

        manager.close_all().unwrap();
    }

    #[tokio::test]
    async fn reorder_with_current_order_is_a_no_op() {
        let manager = make_manager();
        let a = manager.create(&subprocess_opts(), None).await.unwrap();
        let b = manager.create(&subprocess_opts(), None).await.unwrap();

        let current: Vec<String> = manager.all().into_iter().map(|t| t.id).collect();
        manager.reorder(&current).unwrap();

        let ordered = manager.all();
        assert_eq!(ordered[0].id, a.id);
        assert_eq!(ordered[1].id, b.id);

        manager.close_all().unwrap();
    }

    #[tokio::test]
    async fn activate_is_idempotent() {
        let manager = make_manager();
        let a = manager.create(&subprocess_opts(), None).await.unwrap();
        let _b = manager.create(&subprocess_opts(), None).await.unwrap();

        manager.activate(&a.id).unwrap();
        let first = manager.get(&a.id).unwrap().last_active_at;
        manager.activate(&a.id).unwrap();
        let second = manager.get(&a.id).unwrap().last_active_at;

        // Already-active re-activation is a no-op: it must not refresh the
        // activity timestamp a second time.
        assert_eq!(first, second);

        manager.close_all().unwrap();
    }

    #[tokio::test]
    async fn toggle_pin_twice_restores_state() {
        let manager = make_manager();
        let a = manager.create(&subprocess_opts(), None).await.unwrap();

        assert!(!manager.get(&a.id).unwrap().pinned);
        manager.toggle_pin(&a.id).unwrap();
        assert!(manager.get(&a.id).unwrap().pinned);
        manager.toggle_pin(&a.id).unwrap();
        assert!(!manager.get(&a.id).unwrap().pinned);

        manager.close_all().unwrap();
    }

    #[tokio::test]
    async fn dispose_twice_does_not_fault() {
        let manager = make_manager();
        manager.create(&subprocess_opts(), None).await.unwrap();

        manager.dispose();
        manager.dispose();

        assert!(manager.all().is_empty());
        assert!(manager.stats().active.is_none());
    }

    #[tokio::test]
    async fn find_by_title_is_case_insensitive_substring_by_default() {
        let manager = make_manager();
        let a = manager
            .create(&subprocess_opts(), Some("Build Log".to_string()))
            .await
            .unwrap();
        let _b = manager
            .create(&subprocess_opts(), Some("Terminal 2".to_string()))
            .await
            .unwrap();

        let found = manager.find_by_title("build", false);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, a.id);

        assert!(manager.find_by_title("BUILD LOG", true).is_empty());
        assert_eq!(manager.find_by_title("Build Log", true).len(), 1);

        manager.close_all().unwrap();
    }

    #[tokio::test]
    async fn set_title_updates_tab_and_emits_event() {
        let manager = make_manager();
        let a = manager
            .create(&subprocess_opts(), Some("Terminal 1".to_string()))
            .await
            .unwrap();

        manager.set_title(&a.id, "renamed".to_string()).unwrap();
        assert_eq!(manager.get(&a.id).unwrap().title, "renamed");

        manager.close_all().unwrap();
    }

    #[tokio::test]
    async fn focus_activates_a_background_tab() {
        let manager = make_manager();
        let active = manager.create(&subprocess_opts(), None).await.unwrap();
        let background = manager.create(&subprocess_opts(), None).await.unwrap();

        assert_eq!(manager.stats().active, Some(active.id.clone()));
        manager.focus(&background.id).unwrap();
        assert_eq!(manager.stats().active, Some(background.id));

        manager.close_all().unwrap();
    }

    #[tokio::test]
    async fn create_after_dispose_is_rejected() {
        let manager = make_manager();
        manager.dispose();

        let result = manager.create(&subprocess_opts(), None).await;
        assert!(matches!(result, Err(TabManagerError::Disposed)));
    }
}
