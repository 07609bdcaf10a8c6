//! Spawn-time configuration and post-spawn process metadata (§3).

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How a backend should decode PTY/pipe bytes before handing them to
/// subscribers. Both current backends only implement `Utf8`; the enum
/// exists so a future backend (e.g. one needing legacy codepage support)
/// has somewhere to plug in without changing the `SpawnOptions` shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Utf8,
}

impl Default for Encoding {
    fn default() -> Self {
        Encoding::Utf8
    }
}

fn default_cols() -> u16 {
    80
}

fn default_rows() -> u16 {
    24
}

/// Request to spawn a new backend process. Empty strings are valid and mean
/// "use the platform default"; callers never need to omit a field just to
/// fall back.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnOptions {
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_cols")]
    pub cols: u16,
    #[serde(default = "default_rows")]
    pub rows: u16,
    #[serde(default)]
    pub encoding: Option<Encoding>,
}

impl SpawnOptions {
    pub fn cols_or_default(&self) -> u16 {
        if self.cols == 0 {
            default_cols()
        } else {
            self.cols
        }
    }

    pub fn rows_or_default(&self) -> u16 {
        if self.rows == 0 {
            default_rows()
        } else {
            self.rows
        }
    }

    /// Empty-string `shell` means "use default", same as an absent one.
    pub fn shell_or_default(&self) -> Option<&str> {
        self.shell.as_deref().filter(|s| !s.is_empty())
    }
}

/// Immutable metadata captured at spawn time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInfo {
    pub pid: u32,
    pub parent_pid: Option<u32>,
    pub name: String,
    pub cmd: String,
    pub cwd: PathBuf,
    pub env: HashMap<String, String>,
    pub start_time: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_cols_and_rows_are_80x24() {
        let opts = SpawnOptions::default();
        assert_eq!(opts.cols_or_default(), 80);
        assert_eq!(opts.rows_or_default(), 24);
    }

    #[test]
    fn empty_shell_string_means_default() {
        let opts = SpawnOptions {
            shell: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(opts.shell_or_default(), None);
    }
}
