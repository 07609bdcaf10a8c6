//! Backend factory (§4.4 L2): turns a spawn request into a running
//! [`BackendProcess`], picking the best available backend and caching
//! availability probes process-wide so repeated terminal creation doesn't
//! re-probe the platform every time.

use parking_lot::RwLock;
use std::sync::OnceLock;

use super::capabilities::{BackendKind, Capabilities};
use super::detector;
use super::error::BackendError;
#[cfg(feature = "native-pty")]
use super::native_pty::NativePtyBackend;
use super::options::SpawnOptions;
use super::subprocess::SubprocessBackend;
use super::traits::{Backend, BackendProcess};

struct CachedAvailability {
    native_pty: bool,
}

static CACHE: OnceLock<RwLock<Option<CachedAvailability>>> = OnceLock::new();

fn cache() -> &'static RwLock<Option<CachedAvailability>> {
    CACHE.get_or_init(|| RwLock::new(None))
}

/// Creates backend processes, preferring Native PTY and falling back to
/// Subprocess. One factory per process is expected; it holds no per-call
/// state beyond the shared availability cache.
pub struct BackendFactory;

impl BackendFactory {
    pub fn new() -> Self {
        Self
    }

    /// Spawn a new terminal process using the best backend available on
    /// this host (§4.4). Falls back to Subprocess if Native PTY is compiled
    /// out or fails its availability probe.
    pub async fn create_terminal(
        &self,
        opts: &SpawnOptions,
    ) -> Result<(BackendKind, Box<dyn BackendProcess>), BackendError> {
        #[cfg(feature = "native-pty")]
        if self.native_pty_available().await {
            let backend = NativePtyBackend::new();
            match backend.spawn(opts).await {
                Ok(process) => return Ok((BackendKind::NativePty, process)),
                Err(e) => {
                    tracing::warn!("native pty spawn failed, falling back to subprocess: {}", e);
                }
            }
        }

        let backend = SubprocessBackend::new();
        let process = backend.spawn(opts).await?;
        Ok((BackendKind::Subprocess, process))
    }

    /// Clear the cached availability probe, forcing the next
    /// [`Self::create_terminal`] or [`Self::test_all_backends`] call to
    /// re-probe the platform.
    pub fn clear_cache(&self) {
        *cache().write() = None;
    }

    #[cfg(feature = "native-pty")]
    async fn native_pty_available(&self) -> bool {
        if let Some(cached) = cache().read().as_ref() {
            return cached.native_pty;
        }

        let available = NativePtyBackend::new().is_available().await;
        *cache().write() = Some(CachedAvailability {
            native_pty: available,
        });
        available
    }

    #[cfg(not(feature = "native-pty"))]
    async fn native_pty_available(&self) -> bool {
        false
    }

    /// Diagnostic: probe every known backend and report its capabilities
    /// and live availability, without spawning anything long-lived.
    pub async fn test_all_backends(&self) -> Vec<(BackendKind, Capabilities, bool)> {
        let mut results = Vec::new();

        #[cfg(feature = "native-pty")]
        {
            let native = NativePtyBackend::new();
            let available = native.is_available().await;
            results.push((native.kind(), native.capabilities(), available));
        }

        let subprocess = SubprocessBackend::new();
        results.push((
            subprocess.kind(),
            subprocess.capabilities(),
            subprocess.is_available().await,
        ));

        results
    }

    /// The ranked backend order the detector would apply right now.
    pub async fn ranking(&self) -> Vec<BackendKind> {
        detector::rank(self.native_pty_available().await)
    }
}

impl Default for BackendFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_terminal_always_returns_some_backend() {
        let factory = BackendFactory::new();
        let opts = SpawnOptions {
            shell: Some("/bin/sh".to_string()),
            ..Default::default()
        };
        let result = factory.create_terminal(&opts).await;
        assert!(result.is_ok());
        if let Ok((_, process)) = result {
            process.kill(None);
        }
    }

    #[tokio::test]
    async fn clear_cache_forces_reprobe() {
        let factory = BackendFactory::new();
        let _ = factory.native_pty_available().await;
        assert!(cache().read().is_some());
        factory.clear_cache();
        assert!(cache().read().is_none());
    }
}
