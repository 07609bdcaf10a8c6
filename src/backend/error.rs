//! Backend layer errors (§7: SpawnFailure).

/// Raised by [`crate::backend::Backend::spawn`]. Propagates to the caller;
/// nothing is inserted into the Process Manager's map when this occurs.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("failed to create backend transport: {0}")]
    Create(String),

    #[error("failed to spawn shell: {0}")]
    Spawn(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no process id was assigned to the spawned child")]
    NoPid,
}
