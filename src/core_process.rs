//! Desktop Core Process Manager
//!
//! Spawns and communicates with the cloud-desktop-core child process
//! using JSON-RPC over stdio (newline-delimited JSON).
//!
//! # Architecture
//!
//! - Desktop Core is spawned once on first request (lazy init)
//! - stdin is used to send requests, stdout to receive responses
//! - Each request has a unique `id` for correlation
//! - Timeout: 10s per request, none for `http.request`
//! - If Core stdout closes, pending requests fail with `CORE_EXITED`
//! - Responses for ids nobody is waiting on (late or unknown) are dropped
//! - On process death, auto-restarts on next request

use crate::types::{CoreFailure, CoreReply};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const CORE_BINARY_NAME: &str = "cloud-desktop-core";
const CORE_BIN_ENV: &str = "CLOUD_DESKTOP_CORE_BIN";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Request envelope sent to Desktop Core
#[derive(Debug, Serialize)]
struct CoreRequest {
    id: String,
    op: String,
    payload: Value,
}

/// Response envelope received from Desktop Core
#[derive(Debug, Deserialize)]
struct CoreResponse {
    id: String,
    ok: bool,
    result: Option<Value>,
    error: Option<CoreFailure>,
}

/// Request id → response slot; an entry exists only while a caller waits
type PendingMap = Mutex<HashMap<String, Option<CoreResponse>>>;

/// How long the shell waits for `op`; `None` waits for as long as Core lives
pub fn deadline_for(op: &str) -> Option<Duration> {
    match op {
        // The relay imposes no timeout of its own
        "http.request" => None,
        _ => Some(DEFAULT_TIMEOUT),
    }
}

/// Desktop Core process holder
struct CoreProcess {
    child: Child,
    stdin: std::process::ChildStdin,
    /// Pending responses keyed by request ID
    pending: Arc<PendingMap>,
    /// Set by the reader thread once stdout is closed
    closed: Arc<AtomicBool>,
    /// Reader thread handle (reads stdout in background)
    _reader_thread: std::thread::JoinHandle<()>,
}

/// Program used to start Core
#[derive(Debug, Clone)]
struct CoreCommand {
    program: PathBuf,
    args: Vec<String>,
}

/// Thread-safe manager for the Desktop Core process
pub struct CoreProcessManager {
    inner: Mutex<Option<CoreProcess>>,
    /// Fixed command; `None` locates the Core binary on each spawn
    command: Option<CoreCommand>,
}

impl CoreProcessManager {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(None),
            command: None,
        }
    }

    #[cfg(test)]
    fn with_command(program: &str, args: &[&str]) -> Self {
        Self {
            inner: Mutex::new(None),
            command: Some(CoreCommand {
                program: PathBuf::from(program),
                args: args.iter().map(|a| a.to_string()).collect(),
            }),
        }
    }

    /// Send a request to Desktop Core and wait for response
    ///
    /// Spawns the process lazily on first call. Auto-restarts on death.
    pub fn request(&self, op: &str, payload: &Value) -> CoreReply {
        let request_id = uuid::Uuid::new_v4().to_string();
        let req = CoreRequest {
            id: request_id.clone(),
            op: op.to_string(),
            payload: payload.clone(),
        };

        // Serialize request
        let mut req_line = match serde_json::to_string(&req) {
            Ok(s) => s,
            Err(e) => {
                return CoreReply::err("CORE_SERIALIZE_ERROR", &e.to_string());
            }
        };
        req_line.push('\n');

        // Get or spawn process, then send request
        let (pending, closed) = {
            let mut guard = match self.inner.lock() {
                Ok(g) => g,
                Err(e) => {
                    return CoreReply::err("CORE_LOCK_ERROR", &e.to_string());
                }
            };

            // Spawn if needed (or if previous process died)
            let needs_spawn = match guard.as_mut() {
                None => true,
                Some(proc) => {
                    if proc.closed.load(Ordering::SeqCst) {
                        let _ = proc.child.kill();
                        let _ = proc.child.wait();
                        true
                    } else {
                        // Check if child is still alive
                        match proc.child.try_wait() {
                            Ok(Some(_)) => {
                                tracing::warn!(
                                    op = "core.process.died",
                                    "Desktop Core process died, will restart"
                                );
                                true
                            }
                            Ok(None) => false, // Still running
                            Err(_) => true,
                        }
                    }
                }
            };

            if needs_spawn {
                let spawned = match &self.command {
                    Some(cmd) => spawn_core_process(cmd),
                    None => find_core_binary().and_then(|program| {
                        spawn_core_process(&CoreCommand {
                            program,
                            args: Vec::new(),
                        })
                    }),
                };
                match spawned {
                    Ok(proc) => {
                        tracing::info!(
                            op = "core.process.spawned",
                            pid = proc.child.id(),
                            "Desktop Core process spawned"
                        );
                        *guard = Some(proc);
                    }
                    Err(e) => {
                        return CoreReply::err("CORE_SPAWN_ERROR", &e);
                    }
                }
            }

            let proc = match guard.as_mut() {
                Some(p) => p,
                None => return CoreReply::err("CORE_SPAWN_ERROR", "Desktop Core not running"),
            };

            // Register before writing so the reply can't arrive unclaimed
            match proc.pending.lock() {
                Ok(mut map) => {
                    map.insert(request_id.clone(), None);
                }
                Err(e) => return CoreReply::err("CORE_LOCK_ERROR", &e.to_string()),
            }

            // Write request to stdin
            if let Err(e) = proc.stdin.write_all(req_line.as_bytes()) {
                tracing::error!(op = "core.stdin.error", error = %e, "Failed to write to Core stdin");
                *guard = None; // Kill reference, will respawn next time
                return CoreReply::err("CORE_WRITE_ERROR", &e.to_string());
            }
            if let Err(e) = proc.stdin.flush() {
                tracing::error!(op = "core.stdin.error", error = %e, "Failed to flush Core stdin");
                *guard = None;
                return CoreReply::err("CORE_WRITE_ERROR", &e.to_string());
            }

            (proc.pending.clone(), proc.closed.clone())
        };

        wait_for_response(op, &request_id, &pending, &closed, deadline_for(op))
    }

    /// Kill Core, if running
    pub fn shutdown(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            if let Some(mut proc) = guard.take() {
                tracing::debug!(op = "core.process.shutdown", pid = proc.child.id(), "Stopping Desktop Core");
                let _ = proc.child.kill();
                let _ = proc.child.wait();
            }
        }
    }
}

impl Default for CoreProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Poll the pending map until the response arrives, Core exits or the deadline passes
///
/// The request's entry is removed on every outcome.
fn wait_for_response(
    op: &str,
    request_id: &str,
    pending: &PendingMap,
    closed: &AtomicBool,
    deadline: Option<Duration>,
) -> CoreReply {
    let start = Instant::now();

    loop {
        if let Some(limit) = deadline {
            if start.elapsed() > limit {
                unregister(pending, request_id);
                tracing::error!(
                    op = "core.timeout",
                    id = %request_id,
                    limit_secs = limit.as_secs(),
                    "Desktop Core request timed out"
                );
                return CoreReply::err(
                    "CORE_TIMEOUT",
                    &format!(
                        "Desktop Core did not respond within {}s for op: {}",
                        limit.as_secs(),
                        op
                    ),
                );
            }
        }

        // Read the flag before the map: the reader stores every response before closing
        let exited = closed.load(Ordering::SeqCst);

        // Check if response arrived
        {
            let mut map = match pending.lock() {
                Ok(g) => g,
                Err(e) => {
                    return CoreReply::err("CORE_LOCK_ERROR", &e.to_string());
                }
            };

            if let Some(resp) = map.get_mut(request_id).and_then(Option::take) {
                map.remove(request_id);
                // Convert CoreResponse → CoreReply
                if resp.ok {
                    return CoreReply::ok(resp.result.unwrap_or(Value::Null));
                } else {
                    let err = resp.error.unwrap_or(CoreFailure {
                        code: "CORE_ERROR".to_string(),
                        message: "Unknown error from Desktop Core".to_string(),
                    });
                    return CoreReply::err(&err.code, &err.message);
                }
            }
        }

        if exited {
            unregister(pending, request_id);
            tracing::error!(op = "core.exited", id = %request_id, "Desktop Core exited before responding");
            return CoreReply::err(
                "CORE_EXITED",
                &format!("Desktop Core exited before responding to op: {}", op),
            );
        }

        // Brief sleep before checking again
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn unregister(pending: &PendingMap, request_id: &str) {
    if let Ok(mut map) = pending.lock() {
        map.remove(request_id);
    }
}

/// Fill the waiting slot for `resp`; responses nobody waits on are dropped
fn deliver(pending: &PendingMap, resp: CoreResponse) {
    let Ok(mut map) = pending.lock() else {
        return;
    };
    match map.get_mut(&resp.id) {
        Some(slot) => *slot = Some(resp),
        None => tracing::warn!(
            op = "core.stdout.late_response",
            id = %resp.id,
            "Dropping Core response with no waiting request"
        ),
    }
}

/// Spawn the Desktop Core child process
fn spawn_core_process(cmd: &CoreCommand) -> Result<CoreProcess, String> {
    tracing::info!(
        op = "core.process.spawn",
        binary = %cmd.program.display(),
        "Spawning Desktop Core process"
    );

    let mut command = Command::new(&cmd.program);
    command
        .args(&cmd.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit()); // Core logs go to stderr, which we inherit

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NO_WINDOW: u32 = 0x0800_0000;
        command.creation_flags(CREATE_NO_WINDOW);
    }

    let mut child = command
        .spawn()
        .map_err(|e| format!("Failed to spawn Desktop Core: {}", e))?;

    let stdin = child.stdin.take().ok_or("Failed to capture Core stdin")?;
    let stdout = child.stdout.take().ok_or("Failed to capture Core stdout")?;

    // Shared map for correlating responses
    let pending: Arc<PendingMap> = Arc::new(Mutex::new(HashMap::new()));
    let pending_for_reader = pending.clone();
    let closed = Arc::new(AtomicBool::new(false));
    let closed_for_reader = closed.clone();

    // Background reader thread: reads JSON lines from Core stdout
    let reader_thread = std::thread::spawn(move || {
        let reader = BufReader::new(stdout);
        for line in reader.lines() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    tracing::warn!(
                        op = "core.stdout.closed",
                        error = %e,
                        "Desktop Core stdout closed"
                    );
                    break;
                }
            };

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            // Parse response
            match serde_json::from_str::<CoreResponse>(trimmed) {
                Ok(resp) => deliver(&pending_for_reader, resp),
                Err(e) => {
                    tracing::warn!(
                        op = "core.stdout.parse_error",
                        error = %e,
                        "Failed to parse Core response"
                    );
                }
            }
        }
        closed_for_reader.store(true, Ordering::SeqCst);
        tracing::warn!(op = "core.stdout.eof", "Desktop Core stdout reached EOF");
    });

    Ok(CoreProcess {
        child,
        stdin,
        pending,
        closed,
        _reader_thread: reader_thread,
    })
}

/// Find the Desktop Core binary
///
/// Search order:
/// 1. CLOUD_DESKTOP_CORE_BIN env var (dev override)
/// 2. Same directory as current executable
/// 3. Workspace target directory (dev builds)
fn find_core_binary() -> Result<PathBuf, String> {
    let file_name = format!("{}{}", CORE_BINARY_NAME, std::env::consts::EXE_SUFFIX);

    // 1. Env var override
    if let Ok(path) = std::env::var(CORE_BIN_ENV) {
        let p = PathBuf::from(&path);
        if p.exists() {
            return Ok(p);
        }
        tracing::warn!(
            op = "core.binary.env_not_found",
            path = %path,
            "CLOUD_DESKTOP_CORE_BIN set but binary not found"
        );
    }

    // 2. Same directory as current executable
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let candidate = dir.join(&file_name);
            if candidate.exists() {
                return Ok(candidate);
            }
        }
    }

    // 3. Workspace target directory (debug, then release)
    let target_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("target");
    for profile in ["debug", "release"] {
        let candidate = target_dir.join(profile).join(&file_name);
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    Err(format!(
        "Desktop Core binary not found. Build it first:\n  \
         cargo build -p {}\n  \
         Or set {} env var.",
        CORE_BINARY_NAME, CORE_BIN_ENV
    ))
}
