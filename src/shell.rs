//! Shell detection and per-shell argument tables (§4.3, §6).
//!
//! Scans `/etc/shells` and probes common names with `which`/`where`, then
//! resolves a platform default. WSL distro enumeration is intentionally not
//! covered here: there is no shell-picker UI in this core to consume it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::fs;

/// Information about a detected shell.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellInfo {
    /// Unique identifier (e.g., "zsh", "bash", "powershell").
    pub id: String,
    /// Human-readable label (e.g., "Zsh", "Bash", "PowerShell").
    pub label: String,
    /// Full path to the shell executable.
    pub path: PathBuf,
}

impl ShellInfo {
    pub fn new(id: impl Into<String>, label: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            path: path.into(),
        }
    }
}

/// The platform default shell (§6): `%ComSpec%` or `cmd.exe` on Windows;
/// `$SHELL` or `/bin/bash` on macOS/Linux; `/bin/sh` otherwise.
pub fn default_shell() -> ShellInfo {
    #[cfg(target_os = "windows")]
    {
        if let Ok(comspec) = std::env::var("ComSpec") {
            let path = PathBuf::from(&comspec);
            let id = shell_id_from_path(&path);
            let label = label_for_id(&id);
            return ShellInfo::new(id, label, path);
        }
        return ShellInfo::new("cmd", "Command Prompt", "cmd.exe");
    }

    #[cfg(any(target_os = "macos", target_os = "linux"))]
    {
        if let Ok(shell_path) = std::env::var("SHELL") {
            if !shell_path.is_empty() {
                let path = PathBuf::from(&shell_path);
                let id = shell_id_from_path(&path);
                let label = label_for_id(&id);
                return ShellInfo::new(id, label, path);
            }
        }
        return ShellInfo::new("bash", "Bash", "/bin/bash");
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        ShellInfo::new("sh", "Bourne Shell", "/bin/sh")
    }
}

/// Login-mode args (§6): `[]` on Windows, `["-l"]` elsewhere.
pub fn login_args() -> Vec<String> {
    #[cfg(target_os = "windows")]
    {
        Vec::new()
    }
    #[cfg(not(target_os = "windows"))]
    {
        vec!["-l".to_string()]
    }
}

/// Resolve the user's home directory (§6): `$HOME`, else `$USERPROFILE`,
/// else the current working directory.
pub fn home_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        if !home.is_empty() {
            return PathBuf::from(home);
        }
    }
    if let Ok(profile) = std::env::var("USERPROFILE") {
        if !profile.is_empty() {
            return PathBuf::from(profile);
        }
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// Per-shell-family login/interactive args for the Subprocess backend (§4.3).
pub fn get_shell_args(shell_id: &str) -> Vec<String> {
    match shell_id {
        "bash" => vec!["--login".into(), "-i".into()],
        "zsh" => vec!["-l".into(), "-i".into()],
        "fish" => vec!["--login".into(), "--interactive".into()],
        "powershell" | "pwsh" | "Windows PowerShell" => {
            vec!["-NoLogo".into(), "-NoProfile".into(), "-Interactive".into()]
        }
        "cmd" | "cmd.exe" | "command.com" => vec!["/Q".into(), "/K".into()],
        _ => Vec::new(),
    }
}

fn shell_id_from_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.trim_end_matches(".exe").to_string())
        .unwrap_or_else(|| "shell".to_string())
}

fn label_for_id(id: &str) -> String {
    match id {
        "zsh" => "Zsh".to_string(),
        "bash" => "Bash".to_string(),
        "fish" => "Fish".to_string(),
        "sh" => "Bourne Shell".to_string(),
        "dash" => "Dash".to_string(),
        "ksh" => "Korn Shell".to_string(),
        "tcsh" => "TENEX C Shell".to_string(),
        "cmd" => "Command Prompt".to_string(),
        "powershell" => "Windows PowerShell".to_string(),
        "pwsh" => "PowerShell Core".to_string(),
        _ => capitalize_first(id),
    }
}

fn capitalize_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
    }
}

/// Scan the system for available shells (used by callers building a shell
/// picker; the terminal core itself only needs [`default_shell`]).
pub fn scan_shells() -> Vec<ShellInfo> {
    let mut shells = Vec::new();

    #[cfg(unix)]
    {
        shells.extend(scan_unix_shells());
    }

    #[cfg(target_os = "windows")]
    {
        shells.extend(scan_windows_shells());
    }

    shells.sort_by(|a, b| a.path.cmp(&b.path));
    shells.dedup_by(|a, b| a.path == b.path);
    shells.sort_by(|a, b| a.label.cmp(&b.label));

    shells
}

#[cfg(unix)]
fn scan_unix_shells() -> Vec<ShellInfo> {
    let mut shells = Vec::new();

    if let Ok(content) = fs::read_to_string("/etc/shells") {
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let path = PathBuf::from(line);
            if path.exists() {
                if let Some(shell) = shell_info_from_path(&path) {
                    shells.push(shell);
                }
            }
        }
    }

    let common_shells = ["zsh", "bash", "fish", "sh", "dash", "ksh", "tcsh"];
    for shell_name in common_shells {
        if let Ok(output) = std::process::Command::new("which").arg(shell_name).output() {
            if output.status.success() {
                let path_str = String::from_utf8_lossy(&output.stdout).trim().to_string();
                let path = PathBuf::from(&path_str);
                if path.exists() && !shells.iter().any(|s| s.path == path) {
                    if let Some(shell) = shell_info_from_path(&path) {
                        shells.push(shell);
                    }
                }
            }
        }
    }

    shells
}

#[cfg(unix)]
fn shell_info_from_path(path: &PathBuf) -> Option<ShellInfo> {
    let file_name = path.file_name()?.to_str()?;
    match file_name {
        "zsh" | "bash" | "fish" | "sh" | "dash" | "ksh" | "tcsh" => Some(ShellInfo::new(
            file_name,
            label_for_id(file_name),
            path.clone(),
        )),
        _ => None,
    }
}

#[cfg(target_os = "windows")]
fn scan_windows_shells() -> Vec<ShellInfo> {
    let mut shells = Vec::new();

    shells.push(ShellInfo::new("cmd", "Command Prompt", "cmd.exe"));

    let powershell_path =
        PathBuf::from(r"C:\Windows\System32\WindowsPowerShell\v1.0\powershell.exe");
    if powershell_path.exists() {
        shells.push(ShellInfo::new(
            "powershell",
            "Windows PowerShell",
            powershell_path,
        ));
    }

    let pwsh_paths = [
        r"C:\Program Files\PowerShell\7\pwsh.exe",
        r"C:\Program Files (x86)\PowerShell\7\pwsh.exe",
    ];
    for path_str in pwsh_paths {
        let path = PathBuf::from(path_str);
        if path.exists() {
            shells.push(ShellInfo::new("pwsh", "PowerShell Core", path));
            break;
        }
    }

    let git_bash_paths = [
        r"C:\Program Files\Git\bin\bash.exe",
        r"C:\Program Files (x86)\Git\bin\bash.exe",
    ];
    for path_str in git_bash_paths {
        let path = PathBuf::from(path_str);
        if path.exists() {
            shells.push(ShellInfo::new("git-bash", "Git Bash", path));
            break;
        }
    }

    shells
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_shell_has_nonempty_id_and_label() {
        let shell = default_shell();
        assert!(!shell.id.is_empty());
        assert!(!shell.label.is_empty());
    }

    #[test]
    fn login_args_empty_on_windows_else_dash_l() {
        let args = login_args();
        if cfg!(target_os = "windows") {
            assert!(args.is_empty());
        } else {
            assert_eq!(args, vec!["-l".to_string()]);
        }
    }

    #[test]
    fn shell_args_table_matches_spec() {
        assert_eq!(get_shell_args("bash"), vec!["--login", "-i"]);
        assert_eq!(get_shell_args("zsh"), vec!["-l", "-i"]);
        assert_eq!(get_shell_args("fish"), vec!["--login", "--interactive"]);
        assert_eq!(
            get_shell_args("powershell"),
            vec!["-NoLogo", "-NoProfile", "-Interactive"]
        );
        assert_eq!(get_shell_args("pwsh"), vec!["-NoLogo", "-NoProfile", "-Interactive"]);
        assert_eq!(get_shell_args("cmd"), vec!["/Q", "/K"]);
        assert_eq!(get_shell_args("cmd.exe"), vec!["/Q", "/K"]);
        assert_eq!(get_shell_args("fancyshell"), Vec::<String>::new());
    }

    #[test]
    fn capitalize_first_handles_empty() {
        assert_eq!(capitalize_first("zsh"), "Zsh");
        assert_eq!(capitalize_first(""), "");
    }

    #[test]
    fn home_dir_is_never_empty() {
        assert!(!home_dir().as_os_str().is_empty());
    }
}
