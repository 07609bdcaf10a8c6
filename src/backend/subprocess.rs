//! Subprocess backend (§4.3): plain pipes, no pseudoterminal. Always
//! available, never resizable, used when the Native PTY backend is absent
//! or disabled.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::Mutex as TokioMutex;

use crate::event_bus::EventBus;

use super::capabilities::{BackendKind, Capabilities};
use super::error::BackendError;
use super::options::SpawnOptions;
use super::traits::{Backend, BackendProcess, BackendProcessEvent, Signal};

pub struct SubprocessBackend;

impl SubprocessBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SubprocessBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for SubprocessBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Subprocess
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::subprocess()
    }

    async fn is_available(&self) -> bool {
        // A shell always exists somewhere on every supported platform.
        true
    }

    async fn spawn(&self, opts: &SpawnOptions) -> Result<Box<dyn BackendProcess>, BackendError> {
        let shell_info = crate::shell::default_shell();
        let shell = opts
            .shell_or_default()
            .map(str::to_string)
            .unwrap_or_else(|| shell_info.path.to_string_lossy().to_string());

        let mut cmd = Command::new(&shell);
        for arg in crate::shell::get_shell_args(&shell_label(&shell)) {
            cmd.arg(arg);
        }

        cmd.cwd_opt(opts.cwd.as_deref());
        cmd.envs(&opts.env);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(BackendError::Io)?;
        let pid = child.id().ok_or(BackendError::NoPid)?;

        let stdin = child.stdin.take().ok_or(BackendError::NoPid)?;
        let stdout = child.stdout.take().ok_or(BackendError::NoPid)?;
        let stderr = child.stderr.take().ok_or(BackendError::NoPid)?;

        let events = Arc::new(EventBus::new());
        let alive = Arc::new(AtomicBool::new(true));
        let stdin = Arc::new(TokioMutex::new(stdin));

        spawn_output_pump(stdout, stderr, events.clone(), alive.clone());
        spawn_wait(child, events.clone(), alive.clone());

        let process = SubprocessProcess {
            pid,
            stdin,
            alive,
            events,
        };

        Ok(Box::new(process))
    }
}

// `cwd_opt` doesn't exist on `tokio::process::Command`; small local helper
// to keep the call site readable above.
trait CommandExt {
    fn cwd_opt(&mut self, cwd: Option<&std::path::Path>) -> &mut Self;
}

impl CommandExt for Command {
    fn cwd_opt(&mut self, cwd: Option<&std::path::Path>) -> &mut Self {
        if let Some(cwd) = cwd {
            self.current_dir(cwd);
        } else {
            self.current_dir(crate::shell::home_dir());
        }
        self
    }
}

fn shell_label(shell_path: &str) -> String {
    std::path::Path::new(shell_path)
        .file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.trim_end_matches(".exe").to_string())
        .unwrap_or_default()
}

struct SubprocessProcess {
    pid: u32,
    stdin: Arc<TokioMutex<tokio::process::ChildStdin>>,
    alive: Arc<AtomicBool>,
    events: Arc<EventBus<BackendProcessEvent>>,
}

fn spawn_output_pump(
    mut stdout: tokio::process::ChildStdout,
    mut stderr: tokio::process::ChildStderr,
    events: Arc<EventBus<BackendProcessEvent>>,
    alive: Arc<AtomicBool>,
) {
    let events2 = events.clone();
    let alive2 = alive.clone();
    tokio::spawn(async move {
        let mut buf = [0u8; 8192];
        loop {
            if !alive2.load(Ordering::SeqCst) {
                break;
            }
            match stderr.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let text = normalize_line_endings(&String::from_utf8_lossy(&buf[..n]));
                    events2.emit(BackendProcessEvent::Data(text));
                }
            }
        }
    });

    tokio::spawn(async move {
        let mut buf = [0u8; 8192];
        loop {
            if !alive.load(Ordering::SeqCst) {
                break;
            }
            match stdout.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let text = normalize_line_endings(&String::from_utf8_lossy(&buf[..n]));
                    events.emit(BackendProcessEvent::Data(text));
                }
            }
        }
    });
}

fn spawn_wait(
    mut child: Child,
    events: Arc<EventBus<BackendProcessEvent>>,
    alive: Arc<AtomicBool>,
) {
    tokio::spawn(async move {
        let status = child.wait().await;
        alive.store(false, Ordering::SeqCst);
        let exit_code = status
            .ok()
            .and_then(|s| s.code())
            .unwrap_or(0);
        events.emit(BackendProcessEvent::Exit { exit_code });
    });
}

/// Merge stdout/stderr line endings to plain `\n`, since there's no PTY
/// driver doing this translation for us (§4.3).
fn normalize_line_endings(s: &str) -> String {
    s.replace("\r\n", "\n").replace('\r', "\n")
}

impl BackendProcess for SubprocessProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn write(&self, data: &[u8]) {
        if !self.alive.load(Ordering::SeqCst) {
            return;
        }
        let stdin = self.stdin.clone();
        let data = data.to_vec();
        tokio::spawn(async move {
            let mut stdin = stdin.lock().await;
            let _ = stdin.write_all(&data).await;
            let _ = stdin.flush().await;
        });
    }

    fn resize(&self, _cols: u16, _rows: u16) -> bool {
        // No PTY to resize; report success per §4.3 so callers don't treat
        // this as a fault.
        true
    }

    fn kill(&self, signal: Option<Signal>) {
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal as NixSignal};
            use nix::unistd::Pid;

            let nix_signal = match signal.unwrap_or_default() {
                Signal::Term => NixSignal::SIGTERM,
                Signal::Kill => NixSignal::SIGKILL,
                Signal::Interrupt => NixSignal::SIGINT,
                Signal::Hangup => NixSignal::SIGHUP,
            };
            let _ = kill(Pid::from_raw(self.pid as i32), nix_signal);
        }
        #[cfg(not(unix))]
        {
            let _ = signal;
            // No portable pipe-level signal on Windows; the child is killed
            // via `kill_on_drop` / wait teardown instead.
        }
    }

    fn events(&self) -> &EventBus<BackendProcessEvent> {
        self.events.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::traits::BackendProcessEventKind;
    use std::sync::Mutex as StdMutex;

    fn opts_with_cwd(cwd: std::path::PathBuf) -> SpawnOptions {
        SpawnOptions {
            shell: Some("/bin/sh".to_string()),
            cwd: Some(cwd),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn spawn_honors_a_scratch_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SubprocessBackend::new();
        let process = backend
            .spawn(&opts_with_cwd(dir.path().to_path_buf()))
            .await
            .unwrap();

        let collected = Arc::new(StdMutex::new(String::new()));
        let collected2 = collected.clone();
        process.events().on(
            BackendProcessEventKind::Data,
            move |ev| {
                if let BackendProcessEvent::Data(data) = ev {
                    collected2.lock().unwrap().push_str(data);
                }
            },
        );

        process.write(b"pwd\n");
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        process.kill(None);

        let canonical = dir
            .path()
            .canonicalize()
            .unwrap()
            .to_string_lossy()
            .to_string();
        assert!(collected.lock().unwrap().contains(&canonical));
    }

    #[tokio::test]
    async fn spawn_with_empty_env_still_inherits_host_env() {
        std::env::set_var("HATCH_TERM_TEST_MARKER", "present");
        let backend = SubprocessBackend::new();
        let opts = SpawnOptions {
            shell: Some("/bin/sh".to_string()),
            ..Default::default()
        };
        let process = backend.spawn(&opts).await.unwrap();

        let collected = Arc::new(StdMutex::new(String::new()));
        let collected2 = collected.clone();
        process.events().on(
            BackendProcessEventKind::Data,
            move |ev| {
                if let BackendProcessEvent::Data(data) = ev {
                    collected2.lock().unwrap().push_str(data);
                }
            },
        );

        process.write(b"echo $HATCH_TERM_TEST_MARKER\n");
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        process.kill(None);

        assert!(collected.lock().unwrap().contains("present"));
        std::env::remove_var("HATCH_TERM_TEST_MARKER");
    }
}
