//! Backend detection and ranking (§4.4): decide which concrete backend a
//! fresh terminal request should use.

#[cfg(target_os = "windows")]
use std::sync::OnceLock;

use super::capabilities::BackendKind;

/// Minimum Windows build number that ships a usable ConPTY (Windows 10
/// 1809, build 17763). Below this, `CreatePseudoConsole` is unavailable
/// and only a Subprocess fallback makes sense.
const MIN_CONPTY_BUILD: u32 = 17763;

/// Decide which [`BackendKind`] a new spawn request should prefer, given
/// whether the Native PTY backend is compiled in and actually usable.
///
/// Ranking (§4.4): Native PTY first when available; otherwise Subprocess.
/// `ConPty`/`WinPty` are reserved tags the detector can name when it
/// recognizes platform support, but today's factory always falls through
/// to Subprocess for either (no separate ConPTY/WinPTY backend exists yet).
pub fn rank(native_pty_available: bool) -> Vec<BackendKind> {
    if native_pty_available {
        vec![BackendKind::NativePty, BackendKind::Subprocess]
    } else if supports_conpty() {
        vec![BackendKind::ConPty, BackendKind::Subprocess]
    } else {
        vec![BackendKind::Subprocess]
    }
}

/// Whether the current host's Windows build is new enough for ConPTY.
/// Always `false` off Windows.
pub fn supports_conpty() -> bool {
    #[cfg(target_os = "windows")]
    {
        windows_build_number().map(|build| build >= MIN_CONPTY_BUILD).unwrap_or(false)
    }
    #[cfg(not(target_os = "windows"))]
    {
        false
    }
}

#[cfg(target_os = "windows")]
fn windows_build_number() -> Option<u32> {
    static CACHED: OnceLock<Option<u32>> = OnceLock::new();
    *CACHED.get_or_init(|| {
        let hklm = winreg::RegKey::predef(winreg::enums::HKEY_LOCAL_MACHINE);
        let key = hklm
            .open_subkey("SOFTWARE\\Microsoft\\Windows NT\\CurrentVersion")
            .ok()?;
        let build: String = key.get_value("CurrentBuildNumber").ok()?;
        build.parse::<u32>().ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_pty_ranked_first_when_available() {
        let ranking = rank(true);
        assert_eq!(ranking.first(), Some(&BackendKind::NativePty));
        assert!(ranking.contains(&BackendKind::Subprocess));
    }

    #[test]
    fn subprocess_only_when_native_pty_unavailable_and_no_conpty() {
        if !supports_conpty() {
            let ranking = rank(false);
            assert_eq!(ranking, vec![BackendKind::Subprocess]);
        }
    }
}
