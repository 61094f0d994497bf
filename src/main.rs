//! Cloud Desktop - Entry Point
//!
//! # Startup Order
//!
//! 1. Load `.env.local` (dev overrides such as `RUST_LOG`, `CLOUD_DESKTOP_CORE_BIN`)
//! 2. Initialize tracing
//! 3. Build the Tauri app; Desktop Core is spawned lazily on the first command
//! 4. On exit, stop Desktop Core
//!
//! # Design Constraints
//!
//! - The web UI never performs network or OS calls itself
//! - Relay, cookie jar and remote sessions live in Desktop Core

#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod commands;
mod config;
mod core_process;
mod external;
mod state;
mod types;

use commands::{
    clear_session, http_request, open_external, remote_desktop_connect,
    remote_desktop_disconnect, runtime_info,
};
use state::AppState;

fn main() {
    // ==========================================================================
    // PHASE 1: TRACING INITIALIZATION
    // ==========================================================================
    if dotenvy::from_filename(".env.local").is_err() {
        let _ = dotenvy::from_filename("../.env.local");
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cloud_desktop_app=info".parse().unwrap())
                .add_directive("cloud_desktop_core=info".parse().unwrap()),
        )
        .with_target(true)
        .init();

    tracing::info!(
        op = "desktop.startup",
        app = config::app_name(),
        identifier = config::app_identifier(),
        api = config::api_base_url(),
        "Cloud Desktop starting"
    );

    // ==========================================================================
    // PHASE 2: SHELL
    // ==========================================================================
    let state = AppState::default();
    let core_for_shutdown = state.core_process.clone();

    tauri::Builder::default()
        .plugin(tauri_plugin_opener::init())
        .manage(state)
        .invoke_handler(tauri::generate_handler![
            http_request,
            remote_desktop_connect,
            remote_desktop_disconnect,
            clear_session,
            runtime_info,
            open_external,
        ])
        .build(tauri::generate_context!())
        .expect("error while building Cloud Desktop application")
        .run(move |_app, event| {
            if let tauri::RunEvent::Exit = event {
                tracing::debug!(op = "desktop.shutdown", "Shutting down");
                core_for_shutdown.shutdown();
            }
        });
}
