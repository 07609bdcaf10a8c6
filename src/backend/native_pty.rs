//! Native PTY backend (§4.2): a true pseudoterminal via `portable-pty`,
//! resize-capable, full color/interactivity.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use portable_pty::{native_pty_system, CommandBuilder, MasterPty, PtySize};

#[cfg(unix)]
use nix::sys::signal::{killpg, Signal as NixSignal};
#[cfg(unix)]
use nix::unistd::Pid;

use crate::event_bus::EventBus;

use super::capabilities::{BackendKind, Capabilities};
use super::error::BackendError;
use super::options::SpawnOptions;
use super::traits::{Backend, BackendProcess, BackendProcessEvent, Signal};

/// `TERM_PROGRAM` identifies this core to prompt themes / shell
/// integration scripts that look for it (Oh My Posh, starship, etc.).
const TERM_PROGRAM: &str = "Hatcher";

pub struct NativePtyBackend;

impl NativePtyBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NativePtyBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for NativePtyBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::NativePty
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::native_pty()
    }

    async fn is_available(&self) -> bool {
        // Spawn a throwaway `echo test` PTY and immediately kill it (§4.2).
        let probe = tokio::task::spawn_blocking(|| {
            let pty_system = native_pty_system();
            let pair = match pty_system.openpty(PtySize {
                rows: 24,
                cols: 80,
                pixel_width: 0,
                pixel_height: 0,
            }) {
                Ok(pair) => pair,
                Err(_) => return false,
            };
            let mut cmd = CommandBuilder::new("echo");
            cmd.arg("test");
            match pair.slave.spawn_command(cmd) {
                Ok(mut child) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    true
                }
                Err(_) => false,
            }
        })
        .await;

        matches!(probe, Ok(true))
    }

    async fn spawn(&self, opts: &SpawnOptions) -> Result<Box<dyn BackendProcess>, BackendError> {
        let opts = opts.clone();
        let inner = tokio::task::spawn_blocking(move || spawn_native_pty(&opts))
            .await
            .map_err(|e| BackendError::Create(e.to_string()))??;

        Ok(Box::new(NativePtyProcess(inner)))
    }
}

struct Inner {
    pid: u32,
    master: StdMutex<Box<dyn MasterPty + Send>>,
    child: StdMutex<Box<dyn portable_pty::Child + Send + Sync>>,
    writer: Arc<StdMutex<Box<dyn Write + Send>>>,
    alive: Arc<AtomicBool>,
    events: EventBus<BackendProcessEvent>,
}

// Safety: every field is behind a `StdMutex`, an atomic, or is itself
// Sync; `portable_pty::Child`'s trait object is the one piece that isn't
// auto-derived as Sync even though its only mutation path is behind a lock.
unsafe impl Sync for Inner {}

fn spawn_native_pty(opts: &SpawnOptions) -> Result<Arc<Inner>, BackendError> {
    let pty_system = native_pty_system();
    let cols = opts.cols_or_default();
    let rows = opts.rows_or_default();

    let pair = pty_system
        .openpty(PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| BackendError::Create(e.to_string()))?;

    let shell = opts
        .shell_or_default()
        .map(str::to_string)
        .unwrap_or_else(|| crate::shell::default_shell().path.to_string_lossy().to_string());

    let mut cmd = CommandBuilder::new(&shell);
    for arg in crate::shell::login_args() {
        cmd.arg(arg);
    }

    if let Some(cwd) = &opts.cwd {
        cmd.cwd(cwd);
    } else {
        cmd.cwd(crate::shell::home_dir());
    }

    for (key, value) in base_environment(cols, rows) {
        cmd.env(key, value);
    }
    for (key, value) in &opts.env {
        cmd.env(key, value);
    }

    let child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| BackendError::Spawn(e.to_string()))?;

    let pid = child.process_id().ok_or(BackendError::NoPid)?;

    let reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| BackendError::Create(e.to_string()))?;
    let writer = pair
        .master
        .take_writer()
        .map_err(|e| BackendError::Create(e.to_string()))?;

    let inner = Arc::new(Inner {
        pid,
        master: StdMutex::new(pair.master),
        child: StdMutex::new(child),
        writer: Arc::new(StdMutex::new(writer)),
        alive: Arc::new(AtomicBool::new(true)),
        events: EventBus::new(),
    });

    spawn_read_pump(inner.clone(), reader);

    Ok(inner)
}

/// Caller env merged over a sanitized parent env, plus the fixed set of
/// terminal-identifying variables described in §4.2.
fn base_environment(cols: u16, rows: u16) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = std::env::vars().collect();

    let term = if cfg!(target_os = "windows") {
        "xterm"
    } else {
        "xterm-256color"
    };

    env.push(("TERM".into(), term.into()));
    env.push(("COLORTERM".into(), "truecolor".into()));
    env.push(("COLUMNS".into(), cols.to_string()));
    env.push(("LINES".into(), rows.to_string()));
    env.push(("TERM_PROGRAM".into(), TERM_PROGRAM.into()));
    env.push((
        "TERM_PROGRAM_VERSION".into(),
        env!("CARGO_PKG_VERSION").into(),
    ));
    env.push(("FORCE_COLOR".into(), "1".into()));
    env.push(("LC_ALL".into(), "en_US.UTF-8".into()));
    env.push(("LANG".into(), "en_US.UTF-8".into()));

    env
}

fn spawn_read_pump(inner: Arc<Inner>, reader: Box<dyn Read + Send>) {
    tokio::task::spawn_blocking(move || {
        let reader = StdMutex::new(reader);
        let mut buf = [0u8; 8192];
        let mut remainder: Vec<u8> = Vec::new();

        loop {
            if !inner.alive.load(Ordering::SeqCst) {
                break;
            }

            let n = {
                let mut r = match reader.lock() {
                    Ok(r) => r,
                    Err(_) => break,
                };
                match r.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        if e.kind() == std::io::ErrorKind::WouldBlock
                            || e.kind() == std::io::ErrorKind::Interrupted
                        {
                            continue;
                        }
                        inner
                            .events
                            .emit(BackendProcessEvent::Error(e.to_string()));
                        break;
                    }
                }
            };

            let mut to_send = if remainder.is_empty() {
                buf[..n].to_vec()
            } else {
                let mut combined = std::mem::take(&mut remainder);
                combined.extend_from_slice(&buf[..n]);
                combined
            };

            let safe_end = find_utf8_safe_boundary(&to_send);
            if safe_end < to_send.len() {
                remainder = to_send[safe_end..].to_vec();
                to_send.truncate(safe_end);
            }

            if !to_send.is_empty() {
                let text = String::from_utf8_lossy(&to_send).into_owned();
                inner.events.emit(BackendProcessEvent::Data(text));
            }
        }

        if !remainder.is_empty() {
            let text = String::from_utf8_lossy(&remainder).into_owned();
            inner.events.emit(BackendProcessEvent::Data(text));
        }

        inner.alive.store(false, Ordering::SeqCst);
        let exit_code = {
            let mut child = inner.child.lock().ok();
            child
                .as_mut()
                .and_then(|c| c.wait().ok())
                .map(|status| status.exit_code() as i32)
                .unwrap_or(0)
        };
        inner.events.emit(BackendProcessEvent::Exit { exit_code });
    });
}

/// Find a safe UTF-8 boundary in a byte slice: the index up to which the
/// bytes form valid, complete UTF-8 characters. A trailing incomplete
/// multi-byte sequence is excluded, to avoid splitting CJK/emoji across
/// two `data` events.
fn find_utf8_safe_boundary(buf: &[u8]) -> usize {
    if buf.is_empty() {
        return 0;
    }

    let mut i = buf.len();
    while i > 0 && i > buf.len().saturating_sub(4) {
        let byte = buf[i - 1];

        if byte & 0x80 == 0 {
            return i;
        }
        if byte & 0xC0 == 0x80 {
            i -= 1;
            continue;
        }

        let char_len = if byte & 0xF8 == 0xF0 {
            4
        } else if byte & 0xF0 == 0xE0 {
            3
        } else if byte & 0xE0 == 0xC0 {
            2
        } else {
            return i;
        };

        let start_pos = i - 1;
        let available = buf.len() - start_pos;
        return if available >= char_len {
            start_pos + char_len
        } else {
            start_pos
        };
    }

    buf.len()
}

struct NativePtyProcess(Arc<Inner>);

impl BackendProcess for NativePtyProcess {
    fn pid(&self) -> u32 {
        self.0.pid
    }

    fn write(&self, data: &[u8]) {
        if !self.0.alive.load(Ordering::SeqCst) {
            return;
        }
        if let Ok(mut writer) = self.0.writer.lock() {
            if let Err(e) = writer.write_all(data).and_then(|_| writer.flush()) {
                tracing::debug!("native pty write failed: {}", e);
            }
        }
    }

    fn resize(&self, cols: u16, rows: u16) -> bool {
        let Ok(master) = self.0.master.lock() else {
            return false;
        };
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .is_ok()
    }

    fn kill(&self, signal: Option<Signal>) {
        #[cfg(unix)]
        {
            let _ = signal;
            if let Some(pid) = nonzero_pid(self.0.pid) {
                let pgid = Pid::from_raw(pid);
                let _ = killpg(pgid, NixSignal::SIGTERM);
                std::thread::sleep(std::time::Duration::from_millis(50));
                let _ = killpg(pgid, NixSignal::SIGKILL);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = signal;
            if let Ok(mut child) = self.0.child.lock() {
                let _ = child.kill();
            }
        }
    }

    fn events(&self) -> &EventBus<BackendProcessEvent> {
        &self.0.events
    }
}

#[cfg(unix)]
fn nonzero_pid(pid: u32) -> Option<i32> {
    if pid == 0 {
        None
    } else {
        Some(pid as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_boundary_ascii() {
        assert_eq!(find_utf8_safe_boundary(b"hello world"), 11);
    }

    #[test]
    fn utf8_boundary_complete_cjk() {
        let data = "你好".as_bytes();
        assert_eq!(find_utf8_safe_boundary(data), 6);
    }

    #[test]
    fn utf8_boundary_incomplete_cjk() {
        let data: &[u8] = &[0xE4, 0xBD, 0xA0, 0xE5, 0xA5];
        assert_eq!(find_utf8_safe_boundary(data), 3);
    }

    #[test]
    fn utf8_boundary_incomplete_emoji() {
        let data: &[u8] = &[0xF0, 0x9F, 0x98];
        assert_eq!(find_utf8_safe_boundary(data), 0);
    }

    #[test]
    fn capabilities_are_high_reliability_resizable() {
        let backend = NativePtyBackend::new();
        let caps = backend.capabilities();
        assert!(caps.satisfies_native_pty_invariant());
        assert_eq!(backend.kind(), BackendKind::NativePty);
    }
}
