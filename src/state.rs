//! Application state management
//!
//! Contains the shared state accessible across Tauri commands.

use crate::core_process::CoreProcessManager;
use std::sync::Arc;

/// Global state managed by Tauri
pub struct AppState {
    /// Desktop Core child process (relay, cookie jar, remote sessions)
    pub core_process: Arc<CoreProcessManager>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            core_process: Arc::new(CoreProcessManager::new()),
        }
    }
}
