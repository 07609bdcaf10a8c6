//! Terminal Manager (§4.6 L4): wraps the Process Manager with naming,
//! per-terminal state tracking and an "active" terminal concept.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::backend::{BackendKind, SpawnOptions};
use crate::event_bus::{EventBus, TypedEvent};
use crate::process_manager::{ProcessManager, ProcessManagerError, ProcessManagerEvent};

#[derive(Debug, thiserror::Error)]
pub enum TerminalManagerError {
    #[error("terminal {0} not found")]
    NotFound(String),

    #[error("terminal manager has been disposed")]
    Disposed,

    #[error(transparent)]
    Process(#[from] ProcessManagerError),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalState {
    pub id: String,
    pub title: String,
    pub pid: u32,
    pub kind: BackendKind,
    pub running: bool,
    /// Whether this is the manager's single active terminal (§3, §8
    /// invariant: at most one `TerminalState` has `is_active=true`).
    /// Computed fresh from the active slot on every snapshot, not stored
    /// per-entry, so it can never drift out of sync with `set_active`.
    pub is_active: bool,
    pub exit_code: Option<i32>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub last_activity: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone)]
pub enum TerminalManagerEvent {
    TerminalCreated(TerminalState),
    TerminalData { id: String, data: String },
    TerminalExit { id: String, exit_code: i32 },
    TerminalError { id: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminalManagerEventKind {
    TerminalCreated,
    TerminalData,
    TerminalExit,
    TerminalError,
}

impl TypedEvent for TerminalManagerEvent {
    type Kind = TerminalManagerEventKind;

    fn kind(&self) -> Self::Kind {
        match self {
            TerminalManagerEvent::TerminalCreated(_) => TerminalManagerEventKind::TerminalCreated,
            TerminalManagerEvent::TerminalData { .. } => TerminalManagerEventKind::TerminalData,
            TerminalManagerEvent::TerminalExit { .. } => TerminalManagerEventKind::TerminalExit,
            TerminalManagerEvent::TerminalError { .. } => TerminalManagerEventKind::TerminalError,
        }
    }
}

struct TerminalEntry {
    state: RwLock<TerminalState>,
}

/// Owns named, trackable terminals on top of the Process Manager's raw
/// backend processes. Assigns monotonic default names ("Terminal 1",
/// "Terminal 2", ...) when the caller supplies none.
pub struct TerminalManager {
    processes: Arc<ProcessManager>,
    terminals: Arc<dashmap::DashMap<String, Arc<TerminalEntry>>>,
    active: Arc<RwLock<Option<String>>>,
    next_label: AtomicU32,
    disposed: AtomicBool,
    events: Arc<EventBus<TerminalManagerEvent>>,
}

impl TerminalManager {
    pub fn new(processes: Arc<ProcessManager>) -> Self {
        let manager = Self {
            processes,
            terminals: Arc::new(dashmap::DashMap::new()),
            active: Arc::new(RwLock::new(None)),
            next_label: AtomicU32::new(1),
            disposed: AtomicBool::new(false),
            events: Arc::new(EventBus::new()),
        };
        manager.wire_process_events();
        manager
    }

    pub fn events(&self) -> &EventBus<TerminalManagerEvent> {
        &self.events
    }

    pub async fn create(
        &self,
        opts: &SpawnOptions,
        title: Option<String>,
    ) -> Result<TerminalState, TerminalManagerError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(TerminalManagerError::Disposed);
        }
        let id = self.processes.spawn(opts).await?;
        let pid = self.processes.pid(&id)?;
        let kind = self.processes.kind(&id)?;

        let title = title.unwrap_or_else(|| {
            format!("Terminal {}", self.next_label.fetch_add(1, Ordering::SeqCst))
        });

        let now = chrono::Utc::now();
        let state = TerminalState {
            id: id.clone(),
            title,
            pid,
            kind,
            running: true,
            is_active: false,
            exit_code: None,
            created_at: now,
            last_activity: now,
        };

        self.terminals.insert(
            id.clone(),
            Arc::new(TerminalEntry {
                state: RwLock::new(state.clone()),
            }),
        );

        if self.active.read().is_none() {
            *self.active.write() = Some(id.clone());
        }

        let state = self.with_active_flag(state);
        self.events
            .emit(TerminalManagerEvent::TerminalCreated(state.clone()));

        Ok(state)
    }

    /// Stamp `is_active` onto a snapshot read out of the map, computed
    /// fresh from the active slot rather than trusting the stored field.
    fn with_active_flag(&self, mut state: TerminalState) -> TerminalState {
        state.is_active = self.active.read().as_deref() == Some(state.id.as_str());
        state
    }

    /// `false` if the terminal is missing or not running; never faults.
    pub fn send_data(&self, id: &str, data: &[u8]) -> bool {
        let Some(entry) = self.terminals.get(id) else {
            return false;
        };
        if self.processes.write(id, data) {
            entry.state.write().last_activity = chrono::Utc::now();
            true
        } else {
            false
        }
    }

    pub fn resize(&self, id: &str, cols: u16, rows: u16) -> bool {
        self.processes.resize(id, cols, rows)
    }

    pub fn close(&self, id: &str) -> Result<(), TerminalManagerError> {
        let entry = self.get_entry(id)?;
        if self.processes.kill(id) {
            entry.state.write().running = false;
        }
        Ok(())
    }

    pub fn set_active(&self, id: &str) -> Result<(), TerminalManagerError> {
        let entry = self.get_entry(id)?;
        *self.active.write() = Some(id.to_string());
        entry.state.write().last_activity = chrono::Utc::now();
        Ok(())
    }

    pub fn active(&self) -> Option<String> {
        self.active.read().clone()
    }

    pub fn get(&self, id: &str) -> Option<TerminalState> {
        self.terminals
            .get(id)
            .map(|e| self.with_active_flag(e.state.read().clone()))
    }

    pub fn all(&self) -> Vec<TerminalState> {
        self.terminals
            .iter()
            .map(|e| self.with_active_flag(e.state.read().clone()))
            .collect()
    }

    pub fn running_count(&self) -> usize {
        self.terminals
            .iter()
            .filter(|e| e.state.read().running)
            .count()
    }

    /// Dispose the Process Manager, clear the terminal map, and detach
    /// every listener registered on this manager's own bus (§4.6).
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.processes.cleanup();
        self.terminals.clear();
        self.events.remove_all(None);
    }

    fn get_entry(&self, id: &str) -> Result<Arc<TerminalEntry>, TerminalManagerError> {
        self.terminals
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| TerminalManagerError::NotFound(id.to_string()))
    }

    fn wire_process_events(&self) {
        let terminals = self.terminals.clone();
        let events = self.events.clone();
        self.processes.events().on(
            crate::process_manager::ProcessManagerEventKind::ProcessData,
            move |ev| {
                if let ProcessManagerEvent::ProcessData { id, data } = ev {
                    if let Some(entry) = terminals.get(id) {
                        entry.state.write().last_activity = chrono::Utc::now();
                        events.emit(TerminalManagerEvent::TerminalData {
                            id: id.clone(),
                            data: data.clone(),
                        });
                    }
                }
            },
        );

        let terminals = self.terminals.clone();
        let events = self.events.clone();
        let active = self.active.clone();
        self.processes.events().on(
            crate::process_manager::ProcessManagerEventKind::ProcessExit,
            move |ev| {
                if let ProcessManagerEvent::ProcessExit { id, exit_code } = ev {
                    // An exited terminal is end-of-life: stamp final state,
                    // emit, then forget it, mirroring the Process Manager
                    // dropping its own entry.
                    if let Some((_, entry)) = terminals.remove(id) {
                        {
                            let mut s = entry.state.write();
                            s.running = false;
                            s.exit_code = Some(*exit_code);
                            s.last_activity = chrono::Utc::now();
                        }
                        if active.read().as_deref() == Some(id.as_str()) {
                            *active.write() = None;
                        }
                        events.emit(TerminalManagerEvent::TerminalExit {
                            id: id.clone(),
                            exit_code: *exit_code,
                        });
                    }
                }
            },
        );

        let terminals = self.terminals.clone();
        let events = self.events.clone();
        self.processes.events().on(
            crate::process_manager::ProcessManagerEventKind::ProcessError,
            move |ev| {
                if let ProcessManagerEvent::ProcessError { id, message } = ev {
                    if let Some(entry) = terminals.get(id) {
                        entry.state.write().running = false;
                    }
                    events.emit(TerminalManagerEvent::TerminalError {
                        id: id.clone(),
                        message: message.clone(),
                    });
                }
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subprocess_opts() -> SpawnOptions {
        SpawnOptions {
            shell: Some("/bin/sh".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_assigns_monotonic_default_titles() {
        let processes = Arc::new(ProcessManager::new());
        let manager = TerminalManager::new(processes);

        let first = manager.create(&subprocess_opts(), None).await.unwrap();
        let second = manager.create(&subprocess_opts(), None).await.unwrap();

        assert_eq!(first.title, "Terminal 1");
        assert_eq!(second.title, "Terminal 2");

        manager.close(&first.id).unwrap();
        manager.close(&second.id).unwrap();
    }

    #[tokio::test]
    async fn first_created_terminal_becomes_active() {
        let processes = Arc::new(ProcessManager::new());
        let manager = TerminalManager::new(processes);

        let first = manager.create(&subprocess_opts(), None).await.unwrap();
        assert_eq!(manager.active(), Some(first.id.clone()));

        manager.close(&first.id).unwrap();
    }

    #[tokio::test]
    async fn custom_title_is_honored() {
        let processes = Arc::new(ProcessManager::new());
        let manager = TerminalManager::new(processes);

        let state = manager
            .create(&subprocess_opts(), Some("build log".to_string()))
            .await
            .unwrap();

        assert_eq!(state.title, "build log");
        manager.close(&state.id).unwrap();
    }

    #[tokio::test]
    async fn send_data_to_unknown_id_returns_false() {
        let processes = Arc::new(ProcessManager::new());
        let manager = TerminalManager::new(processes);

        assert!(!manager.send_data("does-not-exist", b"x"));
    }

    #[tokio::test]
    async fn write_after_exit_returns_false_and_terminal_is_gone() {
        let processes = Arc::new(ProcessManager::new());
        let manager = TerminalManager::new(processes);

        let state = manager.create(&subprocess_opts(), None).await.unwrap();
        manager.close(&state.id).unwrap();

        // Let the backend's exit-detection loop observe the kill and fire
        // `process_exit`, which deletes the terminal state (end of life).
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        assert!(!manager.send_data(&state.id, b"x"));
        assert!(manager.get(&state.id).is_none());
    }

    #[tokio::test]
    async fn create_after_dispose_is_rejected() {
        let processes = Arc::new(ProcessManager::new());
        let manager = TerminalManager::new(processes);
        manager.dispose();

        let result = manager.create(&subprocess_opts(), None).await;
        assert!(matches!(result, Err(TerminalManagerError::Disposed)));
    }
}
