//! Backend abstraction layer (§4 L1/L2): a uniform transport contract over
//! the Native PTY and Subprocess implementations, plus detection and a
//! cached factory for picking between them.

pub mod capabilities;
pub mod detector;
pub mod error;
pub mod factory;
#[cfg(feature = "native-pty")]
pub mod native_pty;
pub mod options;
pub mod subprocess;
pub mod traits;

pub use capabilities::{BackendKind, Capabilities, Reliability};
pub use error::BackendError;
pub use factory::BackendFactory;
#[cfg(feature = "native-pty")]
pub use native_pty::NativePtyBackend;
pub use options::{Encoding, ProcessInfo, SpawnOptions};
pub use subprocess::SubprocessBackend;
pub use traits::{Backend, BackendProcess, BackendProcessEvent, BackendProcessEventKind, Signal};
