//! Tauri commands
//!
//! Entry points for TypeScript → Rust communication. Everything except
//! `open_external` is forwarded to Desktop Core; the blocking wait runs off
//! the async runtime so a slow relay call never stalls the UI thread.

use crate::core_process::CoreProcessManager;
use crate::external;
use crate::state::AppState;
use crate::types::CoreReply;
use serde_json::Value;
use std::sync::Arc;
use tauri::{AppHandle, State};

/// Run a Core request on the blocking pool
async fn forward(core: Arc<CoreProcessManager>, op: &'static str, payload: Value) -> CoreReply {
    match tauri::async_runtime::spawn_blocking(move || core.request(op, &payload)).await {
        Ok(reply) => reply,
        Err(e) => CoreReply::err("INTERNAL_ERROR", &e.to_string()),
    }
}

/// `http-request`: relay through Core, resolving with the response envelope
#[tauri::command]
pub async fn http_request(request: Value, state: State<'_, AppState>) -> Result<Value, String> {
    forward(state.core_process.clone(), "http.request", request)
        .await
        .into_result()
}

/// `remote-desktop-connect`: always resolves with `{success, error?, errorKind?}`
#[tauri::command]
pub async fn remote_desktop_connect(options: Value, state: State<'_, AppState>) -> Result<Value, String> {
    Ok(forward(state.core_process.clone(), "remoteDesktop.connect", options)
        .await
        .into_action_result())
}

/// `remote-desktop-disconnect`: always resolves with `{success, error?, errorKind?}`
#[tauri::command]
pub async fn remote_desktop_disconnect(options: Value, state: State<'_, AppState>) -> Result<Value, String> {
    Ok(forward(state.core_process.clone(), "remoteDesktop.disconnect", options)
        .await
        .into_action_result())
}

/// Logout: drop every relay cookie
#[tauri::command]
pub async fn clear_session(state: State<'_, AppState>) -> Result<Value, String> {
    tracing::info!(op = "desktop.session.clear", "Clearing relay cookies");
    forward(state.core_process.clone(), "cookies.clear", Value::Null)
        .await
        .into_result()
}

/// Diagnostics from Core
#[tauri::command]
pub async fn runtime_info(state: State<'_, AppState>) -> Result<Value, String> {
    forward(state.core_process.clone(), "runtime.info", Value::Null)
        .await
        .into_result()
}

/// `open-external`: fire and forget
#[tauri::command]
pub fn open_external(url: String, app: AppHandle) {
    external::open(&app, &url);
}
