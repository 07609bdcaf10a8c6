//! Configuration directories
//!
//! The terminal core persists nothing (no on-disk session state, no saved
//! connections, per §6). The only ambient concern it carries is knowing
//! where the host process's log files should live.

use std::path::PathBuf;

/// Configuration storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("failed to determine config directory")]
    NoConfigDir,
}

/// The application configuration directory.
/// Returns `%APPDATA%\hatch-term` on Windows, `~/.hatch-term` elsewhere.
pub fn config_dir() -> Result<PathBuf, StorageError> {
    #[cfg(windows)]
    {
        if let Some(app_data) = dirs::config_dir() {
            return Ok(app_data.join("hatch-term"));
        }
        dirs::home_dir()
            .map(|home| home.join(".hatch-term"))
            .ok_or(StorageError::NoConfigDir)
    }

    #[cfg(not(windows))]
    {
        dirs::home_dir()
            .map(|home| home.join(".hatch-term"))
            .ok_or(StorageError::NoConfigDir)
    }
}

/// The log directory for storing application logs.
pub fn log_dir() -> Result<PathBuf, StorageError> {
    Ok(config_dir()?.join("logs"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_dir_is_nested_under_config_dir() {
        let config = config_dir().unwrap();
        let log = log_dir().unwrap();
        assert_eq!(log, config.join("logs"));
    }
}
