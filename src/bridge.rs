//! Host Bridge (§4.8, §6 L6): translates between the in-process manager
//! API and the nine-channel wire protocol exposed to a renderer UI.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tauri::{AppHandle, Emitter};

use crate::backend::SpawnOptions;
use crate::terminal_manager::{TerminalManager, TerminalManagerError, TerminalManagerEvent};

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    Terminal(#[from] TerminalManagerError),
}

impl Serialize for BridgeError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// `terminal-created` / `create-terminal` response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalCreatedMessage {
    pub id: String,
    pub name: String,
    pub pid: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalDataMessage {
    pub id: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalExitMessage {
    pub id: String,
    pub exit_code: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalErrorMessage {
    pub id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTerminalMessage {
    pub name: Option<String>,
    pub shell: Option<String>,
    pub cwd: Option<std::path::PathBuf>,
    pub env: Option<std::collections::HashMap<String, String>>,
    pub cols: Option<u16>,
    pub rows: Option<u16>,
}

impl CreateTerminalMessage {
    fn into_spawn_options(self) -> SpawnOptions {
        SpawnOptions {
            shell: self.shell,
            cwd: self.cwd,
            env: self.env.unwrap_or_default(),
            cols: self.cols.unwrap_or(80),
            rows: self.rows.unwrap_or(24),
            encoding: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalInputMessage {
    pub id: String,
    pub data: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalResizeMessage {
    pub id: String,
    pub cols: u16,
    pub rows: u16,
}

/// Stable wire channel names (§6). Kebab-case, each terminal identifier
/// contains the word "terminal".
mod channel {
    pub const TERMINAL_CREATED: &str = "terminal-created";
    pub const TERMINAL_DATA: &str = "terminal-data";
    pub const TERMINAL_EXIT: &str = "terminal-exit";
    pub const TERMINAL_ERROR: &str = "terminal-error";
}

/// Translates between in-process calls/events and the wire protocol.
/// Holds a Terminal Manager and an `AppHandle` used as the renderer
/// channel; outbound notifications are dropped (not queued) once the app
/// handle reports no webview windows remain (§4.8).
pub struct HostBridge {
    terminals: Arc<TerminalManager>,
    app: AppHandle,
}

impl HostBridge {
    pub fn new(terminals: Arc<TerminalManager>, app: AppHandle) -> Arc<Self> {
        let bridge = Arc::new(Self { terminals, app });
        bridge.clone().wire_terminal_events();
        bridge
    }

    fn wire_terminal_events(self: Arc<Self>) {
        let bridge = self.clone();
        self.terminals.events().on(
            crate::terminal_manager::TerminalManagerEventKind::TerminalCreated,
            move |ev| {
                if let TerminalManagerEvent::TerminalCreated(state) = ev {
                    bridge.notify(
                        channel::TERMINAL_CREATED,
                        TerminalCreatedMessage {
                            id: state.id.clone(),
                            name: state.title.clone(),
                            pid: state.pid,
                        },
                    );
                }
            },
        );

        let bridge = self.clone();
        self.terminals.events().on(
            crate::terminal_manager::TerminalManagerEventKind::TerminalData,
            move |ev| {
                if let TerminalManagerEvent::TerminalData { id, data } = ev {
                    bridge.notify(
                        channel::TERMINAL_DATA,
                        TerminalDataMessage {
                            id: id.clone(),
                            data: data.clone(),
                        },
                    );
                }
            },
        );

        let bridge = self.clone();
        self.terminals.events().on(
            crate::terminal_manager::TerminalManagerEventKind::TerminalExit,
            move |ev| {
                if let TerminalManagerEvent::TerminalExit { id, exit_code } = ev {
                    bridge.notify(
                        channel::TERMINAL_EXIT,
                        TerminalExitMessage {
                            id: id.clone(),
                            exit_code: *exit_code,
                        },
                    );
                }
            },
        );

        let bridge = self.clone();
        self.terminals.events().on(
            crate::terminal_manager::TerminalManagerEventKind::TerminalError,
            move |ev| {
                if let TerminalManagerEvent::TerminalError { id, message } = ev {
                    let error = if message.is_empty() {
                        "Unknown error".to_string()
                    } else {
                        message.clone()
                    };
                    bridge.notify(
                        channel::TERMINAL_ERROR,
                        TerminalErrorMessage {
                            id: id.clone(),
                            error,
                        },
                    );
                }
            },
        );
    }

    /// Emit a notification to the renderer, silently dropping it if no
    /// window is left to receive it (§4.8, §7 BridgeTransportLoss).
    fn notify<T: Serialize + Clone>(&self, channel: &str, payload: T) {
        if self.app.webview_windows().is_empty() {
            tracing::debug!("bridge: dropping {}, no renderer connected", channel);
            return;
        }
        if let Err(e) = self.app.emit(channel, payload) {
            tracing::warn!("bridge: failed to emit {}: {}", channel, e);
        }
    }

    /// `create-terminal` invoke handler.
    pub async fn create_terminal(
        &self,
        msg: CreateTerminalMessage,
    ) -> Result<TerminalCreatedMessage, BridgeError> {
        let name = msg.name.clone();
        let opts = msg.into_spawn_options();
        let state = self.terminals.create(&opts, name).await?;
        Ok(TerminalCreatedMessage {
            id: state.id,
            name: state.title,
            pid: state.pid,
        })
    }

    /// `list-terminals` invoke handler.
    pub fn list_terminals(&self) -> Vec<crate::terminal_manager::TerminalState> {
        self.terminals.all()
    }

    /// `terminal-input` fire-and-forget handler. `false` if the terminal is
    /// missing or not running; never faults.
    pub fn terminal_input(&self, msg: TerminalInputMessage) -> bool {
        self.terminals.send_data(&msg.id, msg.data.as_bytes())
    }

    /// `resize-terminal` fire-and-forget handler.
    pub fn resize_terminal(&self, msg: TerminalResizeMessage) -> bool {
        self.terminals.resize(&msg.id, msg.cols, msg.rows)
    }

    /// `close-terminal` fire-and-forget handler.
    pub fn close_terminal(&self, id: &str) -> Result<(), BridgeError> {
        self.terminals.close(id)?;
        Ok(())
    }

    /// Dispose the Terminal Manager and detach every channel handler this
    /// bridge registered (§4.8). Called once, at host shutdown; the bridge
    /// is not usable afterward. `TerminalManager::dispose` already detaches
    /// every listener on its own bus, which includes this bridge's.
    pub fn cleanup(&self) {
        self.terminals.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_terminal_message_defaults_to_80x24() {
        let msg = CreateTerminalMessage::default();
        let opts = msg.into_spawn_options();
        assert_eq!(opts.cols, 80);
        assert_eq!(opts.rows, 24);
    }
}
