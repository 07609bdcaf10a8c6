//! Terminal core: PTY/subprocess backend abstraction, process/terminal/tab
//! management, and the host-bridge wire protocol consumed by a desktop
//! shell's renderer.

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod backend;
pub mod bridge;
pub mod commands;
pub mod config;
pub mod event_bus;
pub mod process_manager;
pub mod shell;
pub mod tab_manager;
pub mod terminal_manager;

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;

use tauri::{plugin::TauriPlugin, Manager};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use bridge::HostBridge;
use process_manager::ProcessManager;
use terminal_manager::TerminalManager;

/// Append a line to `<config_dir>/logs/startup.log`; useful for diagnosing
/// startup failures before `tracing` has anywhere to forward to.
fn write_startup_log(message: &str) {
    if let Ok(log_dir) = config::log_dir() {
        let _ = std::fs::create_dir_all(&log_dir);

        let log_file = log_dir.join("startup.log");
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&log_file) {
            let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
            let _ = writeln!(file, "[{}] {}", timestamp, message);
        }
    }
}

/// Show an error dialog on Windows when startup fails before there is any
/// webview window to surface it in.
#[cfg(windows)]
fn show_startup_error(title: &str, message: &str) {
    use std::ffi::OsStr;
    use std::os::windows::ffi::OsStrExt;
    use std::ptr::null_mut;

    let title: Vec<u16> = OsStr::new(title).encode_wide().chain(Some(0)).collect();
    let message: Vec<u16> = OsStr::new(message).encode_wide().chain(Some(0)).collect();

    unsafe {
        #[link(name = "user32")]
        extern "system" {
            fn MessageBoxW(
                hwnd: *mut std::ffi::c_void,
                text: *const u16,
                caption: *const u16,
                type_: u32,
            ) -> i32;
        }
        MessageBoxW(null_mut(), message.as_ptr(), title.as_ptr(), 0x10); // MB_ICONERROR
    }
}

#[cfg(not(windows))]
fn show_startup_error(_title: &str, _message: &str) {}

/// Initialize the `tracing` subscriber. Idempotent: a host embedding this
/// crate alongside others that also call `init()` only pays for the first
/// call, the rest are no-ops (`try_init` swallows the "already set" error).
fn init_logging() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// No CLI surface and no owned application window (§6): this crate is
/// consumed as a Tauri plugin by a host shell. The host calls
/// `.plugin(hatch_term::init())` on its own `tauri::Builder`; this wires
/// the Process/Terminal Manager stack and the nine-channel bridge, and
/// registers the renderer-facing commands.
pub fn init() -> TauriPlugin<tauri::Wry> {
    tauri::plugin::Builder::new("hatch-term")
        .invoke_handler(tauri::generate_handler![
            commands::create_terminal,
            commands::list_terminals,
            commands::terminal_input,
            commands::resize_terminal,
            commands::close_terminal,
            commands::list_shells,
            commands::default_shell,
        ])
        .setup(|app, _api| {
            init_logging();
            write_startup_log("terminal core plugin initializing...");

            let processes = Arc::new(ProcessManager::new());
            let terminals = Arc::new(TerminalManager::new(processes));
            let bridge = HostBridge::new(terminals, app.clone());
            app.manage(bridge);

            write_startup_log("host bridge wired");
            tracing::info!("terminal core plugin ready");
            Ok(())
        })
        .on_event(|app, event| {
            if matches!(event, tauri::RunEvent::Exit) {
                tracing::info!("terminal core shutting down");
                if let Some(bridge) = app.try_state::<Arc<HostBridge>>() {
                    bridge.cleanup();
                } else {
                    show_startup_error(
                        "hatch-term",
                        "shutting down without an initialized host bridge",
                    );
                }
            }
        })
        .build()
}
