//! Process Manager (§4.5 L3): owns every spawned backend process by id,
//! forwards its data/exit/error events onto its own bus, and removes exited
//! processes from the map automatically.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::backend::{
    BackendFactory, BackendKind, BackendProcess, BackendProcessEvent, ProcessInfo, SpawnOptions,
};
use crate::event_bus::{EventBus, TypedEvent};

/// Lifecycle of a single tracked process. Monotonic: `Starting` → `Running`
/// → `{Exited, Error}`, no back-transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Starting,
    Running,
    Exited,
    Error,
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessManagerError {
    #[error("process {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Backend(#[from] crate::backend::BackendError),
}

/// Events the Process Manager publishes on its own bus (§4.5). Each carries
/// the owning process id so subscribers serving many processes can route
/// without a lookup.
#[derive(Debug, Clone)]
pub enum ProcessManagerEvent {
    ProcessCreated { id: String, pid: u32, kind: BackendKind },
    ProcessData { id: String, data: String },
    ProcessExit { id: String, exit_code: i32 },
    ProcessError { id: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessManagerEventKind {
    ProcessCreated,
    ProcessData,
    ProcessExit,
    ProcessError,
}

impl TypedEvent for ProcessManagerEvent {
    type Kind = ProcessManagerEventKind;

    fn kind(&self) -> Self::Kind {
        match self {
            ProcessManagerEvent::ProcessCreated { .. } => ProcessManagerEventKind::ProcessCreated,
            ProcessManagerEvent::ProcessData { .. } => ProcessManagerEventKind::ProcessData,
            ProcessManagerEvent::ProcessExit { .. } => ProcessManagerEventKind::ProcessExit,
            ProcessManagerEvent::ProcessError { .. } => ProcessManagerEventKind::ProcessError,
        }
    }
}

struct TerminalProcess {
    id: String,
    pid: u32,
    kind: BackendKind,
    info: ProcessInfo,
    state: RwLock<ProcessState>,
    exit_code: RwLock<Option<i32>>,
    error: RwLock<Option<String>>,
    process: Box<dyn BackendProcess>,
}

/// Point-in-time view of a `TerminalProcess` (§3); cheap to clone, never
/// mutated after being read out.
#[derive(Debug, Clone)]
pub struct ProcessSnapshot {
    pub id: String,
    pub pid: u32,
    pub kind: BackendKind,
    pub info: ProcessInfo,
    pub state: ProcessState,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
}

fn snapshot(entry: &TerminalProcess) -> ProcessSnapshot {
    ProcessSnapshot {
        id: entry.id.clone(),
        pid: entry.pid,
        kind: entry.kind,
        info: entry.info.clone(),
        state: *entry.state.read(),
        exit_code: *entry.exit_code.read(),
        error: entry.error.read().clone(),
    }
}

/// Owns every live backend process, keyed by an opaque id assigned at
/// spawn time. One instance per application; cheap to clone (internally
/// `Arc`-backed via `DashMap` + `EventBus`).
pub struct ProcessManager {
    factory: BackendFactory,
    processes: Arc<DashMap<String, Arc<TerminalProcess>>>,
    events: Arc<EventBus<ProcessManagerEvent>>,
}

impl ProcessManager {
    pub fn new() -> Self {
        Self {
            factory: BackendFactory::new(),
            processes: Arc::new(DashMap::new()),
            events: Arc::new(EventBus::new()),
        }
    }

    pub fn events(&self) -> &EventBus<ProcessManagerEvent> {
        &self.events
    }

    /// Spawn a new process and register it under a freshly generated id
    /// (§4.5). Nothing is inserted into the map if spawning fails. Inserted
    /// with `state=Starting`, then immediately transitioned to `Running`
    /// before `process_created` fires.
    pub async fn spawn(&self, opts: &SpawnOptions) -> Result<String, ProcessManagerError> {
        let (kind, process) = self.factory.create_terminal(opts).await?;
        let id = Uuid::new_v4().to_string();
        let pid = process.pid();

        let info = ProcessInfo {
            pid,
            parent_pid: None,
            name: opts.shell_or_default().unwrap_or("shell").to_string(),
            cmd: opts.shell_or_default().unwrap_or_default().to_string(),
            cwd: opts.cwd.clone().unwrap_or_default(),
            env: opts.env.clone(),
            start_time: chrono::Utc::now(),
        };

        let entry = Arc::new(TerminalProcess {
            id: id.clone(),
            pid,
            kind,
            info,
            state: RwLock::new(ProcessState::Starting),
            exit_code: RwLock::new(None),
            error: RwLock::new(None),
            process,
        });

        self.processes.insert(id.clone(), entry.clone());
        wire_events(entry.clone(), self.events.clone(), self.processes.clone());
        *entry.state.write() = ProcessState::Running;

        self.events.emit(ProcessManagerEvent::ProcessCreated {
            id: id.clone(),
            pid,
            kind,
        });

        Ok(id)
    }

    /// Returns `true` iff `id` is tracked and currently `Running`; never
    /// faults (§4.5).
    pub fn write(&self, id: &str, data: &[u8]) -> bool {
        match self.processes.get(id) {
            Some(entry) if *entry.state.read() == ProcessState::Running => {
                entry.process.write(data);
                true
            }
            _ => false,
        }
    }

    pub fn resize(&self, id: &str, cols: u16, rows: u16) -> bool {
        match self.processes.get(id) {
            Some(entry) if *entry.state.read() == ProcessState::Running => {
                entry.process.resize(cols, rows)
            }
            _ => false,
        }
    }

    pub fn kill(&self, id: &str) -> bool {
        match self.processes.get(id) {
            Some(entry) => {
                entry.process.kill(None);
                true
            }
            None => false,
        }
    }

    pub fn pid(&self, id: &str) -> Result<u32, ProcessManagerError> {
        Ok(self.get_entry(id)?.pid)
    }

    pub fn kind(&self, id: &str) -> Result<BackendKind, ProcessManagerError> {
        Ok(self.get_entry(id)?.kind)
    }

    pub fn exists(&self, id: &str) -> bool {
        self.processes.contains_key(id)
    }

    pub fn all_ids(&self) -> Vec<String> {
        self.processes.iter().map(|e| e.key().clone()).collect()
    }

    /// Snapshot of one tracked process (§4.5 `get(id)`).
    pub fn get(&self, id: &str) -> Option<ProcessSnapshot> {
        self.processes.get(id).map(|e| snapshot(e.value()))
    }

    /// Snapshot of every tracked process (§4.5 `all()`).
    pub fn all(&self) -> Vec<ProcessSnapshot> {
        self.processes.iter().map(|e| snapshot(e.value())).collect()
    }

    /// Kill every tracked process (best-effort), clear the map, and detach
    /// every listener registered on this manager's own bus (§4.5).
    pub fn cleanup(&self) {
        for entry in self.processes.iter() {
            entry.process.kill(None);
        }
        self.processes.clear();
        self.events.remove_all(None);
    }

    fn get_entry(&self, id: &str) -> Result<Arc<TerminalProcess>, ProcessManagerError> {
        self.processes
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| ProcessManagerError::NotFound(id.to_string()))
    }
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Bridge a single backend process's events onto the manager's bus,
/// stamping each with its owning id. On `exit`, the process is dropped
/// from the map (§4.5); on `error`, it is retained so the caller can still
/// inspect or explicitly kill it.
fn wire_events(
    entry: Arc<TerminalProcess>,
    bus: Arc<EventBus<ProcessManagerEvent>>,
    processes: Arc<DashMap<String, Arc<TerminalProcess>>>,
) {
    let id = entry.id.clone();
    let data_bus = bus.clone();
    let data_id = id.clone();
    entry.process.events().on(
        crate::backend::BackendProcessEventKind::Data,
        move |ev| {
            if let BackendProcessEvent::Data(data) = ev {
                data_bus.emit(ProcessManagerEvent::ProcessData {
                    id: data_id.clone(),
                    data: data.clone(),
                });
            }
        },
    );

    let error_bus = bus.clone();
    let error_id = id.clone();
    let error_entry = entry.clone();
    entry.process.events().on(
        crate::backend::BackendProcessEventKind::Error,
        move |ev| {
            if let BackendProcessEvent::Error(message) = ev {
                *error_entry.state.write() = ProcessState::Error;
                *error_entry.error.write() = Some(message.clone());
                error_bus.emit(ProcessManagerEvent::ProcessError {
                    id: error_id.clone(),
                    message: message.clone(),
                });
            }
        },
    );

    let exit_bus = bus.clone();
    let exit_id = id.clone();
    let exit_entry = entry.clone();
    entry.process.events().once(
        crate::backend::BackendProcessEventKind::Exit,
        move |ev| {
            if let BackendProcessEvent::Exit { exit_code } = ev {
                *exit_entry.state.write() = ProcessState::Exited;
                *exit_entry.exit_code.write() = Some(*exit_code);
                // Dropped from the map even though a listener racing this one
                // (e.g. concurrent `cleanup`) may have already removed it.
                processes.remove(&exit_id);
                exit_bus.emit(ProcessManagerEvent::ProcessExit {
                    id: exit_id.clone(),
                    exit_code: *exit_code,
                });
            }
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn spawn_write_and_kill_roundtrip() {
        let manager = ProcessManager::new();
        let opts = SpawnOptions {
            shell: Some("/bin/sh".to_string()),
            ..Default::default()
        };

        let id = manager.spawn(&opts).await.expect("spawn should succeed");
        assert!(manager.exists(&id));
        assert!(manager.pid(&id).unwrap() > 0);

        assert!(manager.write(&id, b"echo hi\n"));
        assert!(manager.kill(&id));

        // Allow the background pump to observe exit; not asserted on
        // timing, just exercised without panicking.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn unknown_id_write_returns_false() {
        let manager = ProcessManager::new();
        assert!(!manager.write("does-not-exist", b"x"));
        assert!(!manager.kill("does-not-exist"));
    }

    #[tokio::test]
    async fn process_created_event_fires_on_spawn() {
        let manager = ProcessManager::new();
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();

        manager.events().on(ProcessManagerEventKind::ProcessCreated, move |_| {
            fired2.store(true, Ordering::SeqCst);
        });

        let opts = SpawnOptions {
            shell: Some("/bin/sh".to_string()),
            ..Default::default()
        };
        let id = manager.spawn(&opts).await.unwrap();
        assert!(manager.kill(&id));

        assert!(fired.load(Ordering::SeqCst));
    }
}
