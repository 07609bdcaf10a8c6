//! Tauri commands (§4.8, §6): the renderer to host half of the wire protocol.
//! Thin delegations to [`crate::bridge::HostBridge`]; no logic lives here.

use tauri::State;

use crate::bridge::{
    BridgeError, CreateTerminalMessage, HostBridge, TerminalCreatedMessage,
    TerminalInputMessage, TerminalResizeMessage,
};
use crate::terminal_manager::TerminalState;

#[tauri::command]
pub async fn create_terminal(
    bridge: State<'_, std::sync::Arc<HostBridge>>,
    msg: CreateTerminalMessage,
) -> Result<TerminalCreatedMessage, BridgeError> {
    bridge.create_terminal(msg).await
}

#[tauri::command]
pub fn list_terminals(bridge: State<'_, std::sync::Arc<HostBridge>>) -> Vec<TerminalState> {
    bridge.list_terminals()
}

#[tauri::command]
pub fn terminal_input(
    bridge: State<'_, std::sync::Arc<HostBridge>>,
    msg: TerminalInputMessage,
) -> bool {
    bridge.terminal_input(msg)
}

#[tauri::command]
pub fn resize_terminal(
    bridge: State<'_, std::sync::Arc<HostBridge>>,
    msg: TerminalResizeMessage,
) -> bool {
    bridge.resize_terminal(msg)
}

#[tauri::command]
pub fn close_terminal(
    bridge: State<'_, std::sync::Arc<HostBridge>>,
    id: String,
) -> Result<(), BridgeError> {
    bridge.close_terminal(&id)
}

#[tauri::command]
pub fn list_shells() -> Vec<crate::shell::ShellInfo> {
    crate::shell::scan_shells()
}

#[tauri::command]
pub fn default_shell() -> crate::shell::ShellInfo {
    crate::shell::default_shell()
}
