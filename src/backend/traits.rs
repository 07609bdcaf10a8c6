//! Backend abstraction (§4 L1): a uniform spawn/read/write/resize/kill
//! contract over the Native PTY and Subprocess implementations.

use async_trait::async_trait;

use crate::event_bus::{EventBus, TypedEvent};

use super::capabilities::{BackendKind, Capabilities};
use super::error::BackendError;
use super::options::SpawnOptions;

/// POSIX-ish signal names a caller can ask `kill` to send. Backends that
/// can't honor a specific signal fall back to their strongest stop
/// (Subprocess always sends what's requested or `Term`, see §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Term,
    Kill,
    Interrupt,
    Hangup,
}

impl Default for Signal {
    fn default() -> Self {
        Signal::Term
    }
}

/// The three event streams a [`BackendProcess`] publishes (§3).
#[derive(Debug, Clone)]
pub enum BackendProcessEvent {
    /// Raw bytes decoded as UTF-8, forwarded verbatim (no VT filtering).
    Data(String),
    /// Fired exactly once.
    Exit { exit_code: i32 },
    /// Fired on spawn or runtime faults.
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendProcessEventKind {
    Data,
    Exit,
    Error,
}

impl TypedEvent for BackendProcessEvent {
    type Kind = BackendProcessEventKind;

    fn kind(&self) -> Self::Kind {
        match self {
            BackendProcessEvent::Data(_) => BackendProcessEventKind::Data,
            BackendProcessEvent::Exit { .. } => BackendProcessEventKind::Exit,
            BackendProcessEvent::Error(_) => BackendProcessEventKind::Error,
        }
    }
}

/// A spawned backend process. Lifetime: from successful spawn until `exit`
/// or `error` is emitted; after either, `write`/`resize` are no-ops that
/// never fault (§3).
pub trait BackendProcess: Send + Sync {
    fn pid(&self) -> u32;

    /// Write input to the process. Errors are caught internally and logged;
    /// callers only learn about failure through an `error` event.
    fn write(&self, data: &[u8]);

    /// Resize the underlying terminal, if the backend supports it. Returns
    /// `false` on a backend fault; `true` on success, including the
    /// documented Subprocess no-op (§4.3).
    fn resize(&self, cols: u16, rows: u16) -> bool;

    /// Forward a kill request to the OS process. `kill` does not wait for
    /// exit; the eventual `exit` event is the completion signal (§5).
    fn kill(&self, signal: Option<Signal>);

    /// The three event streams described in §3.
    fn events(&self) -> &EventBus<BackendProcessEvent>;
}

/// A concrete backend implementation: Native PTY or Subprocess.
#[async_trait]
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// The capability record this backend always reports when available.
    fn capabilities(&self) -> Capabilities;

    /// Probe whether this backend can actually run on the current host.
    async fn is_available(&self) -> bool;

    /// Spawn a new process through this backend.
    async fn spawn(&self, opts: &SpawnOptions) -> Result<Box<dyn BackendProcess>, BackendError>;
}
