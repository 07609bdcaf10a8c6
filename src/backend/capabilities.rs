//! Backend capability records (§3 Capabilities, BackendKind).

use serde::{Deserialize, Serialize};

/// Which concrete backend produced a [`Capabilities`] record.
///
/// `ConPty` and `WinPty` are reserved tags: the detector names them when it
/// recognizes the platform supports them, but today's factory always
/// instantiates [`BackendKind::Subprocess`] for either (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    NativePty,
    Subprocess,
    ConPty,
    WinPty,
}

/// How much a caller should trust a backend to behave like a real terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reliability {
    Low,
    Medium,
    High,
}

/// Immutable record describing what a backend supports.
///
/// Invariant: `kind == NativePty` implies `reliability == High` and
/// `supports_resize`. Constructed only through [`Capabilities::native_pty`]
/// and [`Capabilities::subprocess`], which bake the invariant in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub kind: BackendKind,
    pub supports_resize: bool,
    pub supports_colors: bool,
    pub supports_interactivity: bool,
    pub supports_history: bool,
    pub reliability: Reliability,
}

impl Capabilities {
    pub fn native_pty() -> Self {
        Self {
            kind: BackendKind::NativePty,
            supports_resize: true,
            supports_colors: true,
            supports_interactivity: true,
            supports_history: true,
            reliability: Reliability::High,
        }
    }

    pub fn subprocess() -> Self {
        Self {
            kind: BackendKind::Subprocess,
            supports_resize: false,
            supports_colors: true,
            supports_interactivity: true,
            supports_history: true,
            reliability: Reliability::Medium,
        }
    }

    /// `true` for any record claiming `kind == NativePty`, i.e. the invariant
    /// in §3 holds. Used by tests and by the factory's own assertions.
    pub fn satisfies_native_pty_invariant(&self) -> bool {
        self.kind != BackendKind::NativePty
            || (self.reliability == Reliability::High && self.supports_resize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_pty_is_high_reliability_and_resizable() {
        let caps = Capabilities::native_pty();
        assert_eq!(caps.reliability, Reliability::High);
        assert!(caps.supports_resize);
        assert!(caps.satisfies_native_pty_invariant());
    }

    #[test]
    fn subprocess_cannot_resize() {
        let caps = Capabilities::subprocess();
        assert!(!caps.supports_resize);
        assert_eq!(caps.reliability, Reliability::Medium);
    }
}
