//! Cloud Desktop Core
//!
//! Privileged process that communicates via JSON-RPC over stdio. Owns the
//! HTTP relay, the cookie jar and the remote session orchestrator.
//!
//! # Protocol
//!
//! Request (one JSON object per line on stdin):
//!   { "id": "<uuid>", "op": "<string>", "payload": {...} }
//!
//! Response (one JSON object per line on stdout):
//!   { "id": "<uuid>", "ok": true|false, "result": {...}|null, "error": {...}|null }
//!
//! Each request is handled on its own thread, so responses may be written
//! out of order. Callers correlate by `id`.
//!
//! # Handled Operations
//!
//! - http.request
//! - remoteDesktop.connect
//! - remoteDesktop.disconnect
//! - cookies.clear
//! - runtime.info

mod bootstrap;
mod config;
mod cookie;
mod cookie_jar;
mod os_tools;
mod relay;
mod remote_desktop;

use anyhow::Context;
use cookie_jar::{CookieJar, CookieStore};
use os_tools::WindowsRemoteDesktop;
use relay::{Relay, RequestDescriptor};
use remote_desktop::{ActionResult, ConnectOptions, DisconnectOptions, ErrorKind, Orchestrator};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{self, BufRead, Write};
use std::sync::{Arc, Mutex};

// =============================================================================
// Protocol Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct Request {
    id: String,
    op: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Serialize)]
struct Response {
    id: String,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorDetail>,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl Response {
    fn ok(id: String, result: Value) -> Self {
        Self {
            id,
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: String, code: &str, message: &str) -> Self {
        Self {
            id,
            ok: false,
            result: None,
            error: Some(ErrorDetail {
                code: code.to_string(),
                message: message.to_string(),
            }),
        }
    }
}

// =============================================================================
// Core Context
// =============================================================================

/// Everything a handler needs; shared by all request threads
struct CoreContext {
    relay: Relay,
    orchestrator: Orchestrator,
    persistent_jar: bool,
}

impl CoreContext {
    fn new(jar: CookieJar, orchestrator: Orchestrator) -> anyhow::Result<Self> {
        let persistent_jar = jar.is_persistent();
        let cookies: Arc<dyn CookieStore> = Arc::new(jar);
        Ok(Self {
            relay: Relay::new(cookies).context("failed to build HTTP relay")?,
            orchestrator,
            persistent_jar,
        })
    }
}

/// Open the on-disk jar, or fall back to memory so the relay still works
fn open_cookie_jar() -> CookieJar {
    let path = match bootstrap::initialize_cookie_jar_path() {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(
                op = "core.cookies.home_unavailable",
                error = %e,
                "Home directory unavailable, using in-memory cookie jar"
            );
            return CookieJar::in_memory();
        }
    };

    match CookieJar::open(path.clone()) {
        Ok(jar) => jar,
        Err(e) => {
            tracing::warn!(
                op = "core.cookies.open_failed",
                path = %path.display(),
                error = %e,
                "Cookie jar unreadable, using in-memory cookie jar"
            );
            CookieJar::in_memory()
        }
    }
}

// =============================================================================
// Op Dispatch
// =============================================================================

fn dispatch(ctx: &CoreContext, req: &Request) -> Response {
    match req.op.as_str() {
        "http.request" => handle_http_request(ctx, &req.id, &req.payload),
        "remoteDesktop.connect" => handle_remote_connect(ctx, &req.id, &req.payload),
        "remoteDesktop.disconnect" => handle_remote_disconnect(ctx, &req.id, &req.payload),
        "cookies.clear" => handle_cookies_clear(ctx, &req.id),
        "runtime.info" => handle_runtime_info(ctx, &req.id),
        _ => Response::err(
            req.id.clone(),
            "UNKNOWN_OP",
            &format!("Desktop Core does not handle op: {}", req.op),
        ),
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// http.request: relay one request through the shared cookie jar
fn handle_http_request(ctx: &CoreContext, id: &str, payload: &Value) -> Response {
    let request: RequestDescriptor = match serde_json::from_value(payload.clone()) {
        Ok(r) => r,
        Err(e) => {
            return Response::err(
                id.to_string(),
                "INVALID_REQUEST",
                &format!("Invalid request descriptor: {}", e),
            )
        }
    };

    match ctx.relay.execute(&request) {
        Ok(envelope) => match serde_json::to_value(&envelope) {
            Ok(v) => Response::ok(id.to_string(), v),
            Err(e) => Response::err(id.to_string(), "INTERNAL_ERROR", &e.to_string()),
        },
        Err(e) => {
            tracing::warn!(
                op = "core.http.failed",
                url = %request.url,
                code = e.code(),
                error = %e,
                "Relay request failed"
            );
            Response::err(id.to_string(), e.code(), &e.to_string())
        }
    }
}

/// remoteDesktop.connect: store credential, launch client
fn handle_remote_connect(ctx: &CoreContext, id: &str, payload: &Value) -> Response {
    tracing::info!(op = "core.remoteDesktop.connect", "Handling remoteDesktop.connect");

    let result = match parse_options::<ConnectOptions>(payload) {
        Ok(options) => ctx.orchestrator.connect(&options),
        Err(result) => result,
    };
    action_response(id, result)
}

/// remoteDesktop.disconnect: kill client windows, delete credential
fn handle_remote_disconnect(ctx: &CoreContext, id: &str, payload: &Value) -> Response {
    tracing::info!(op = "core.remoteDesktop.disconnect", "Handling remoteDesktop.disconnect");

    let result = match parse_options::<DisconnectOptions>(payload) {
        Ok(options) => ctx.orchestrator.disconnect(&options),
        Err(result) => result,
    };
    action_response(id, result)
}

/// A null payload reads as empty options; a wrongly typed one is a validation failure
fn parse_options<T: DeserializeOwned + Default>(payload: &Value) -> Result<T, ActionResult> {
    if payload.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(payload.clone()).map_err(|e| {
        ActionResult::failed(ErrorKind::Validation, format!("invalid options: {}", e))
    })
}

fn action_response(id: &str, result: ActionResult) -> Response {
    match serde_json::to_value(&result) {
        Ok(v) => Response::ok(id.to_string(), v),
        Err(e) => Response::err(id.to_string(), "INTERNAL_ERROR", &e.to_string()),
    }
}

/// cookies.clear: drop every cookie (logout)
fn handle_cookies_clear(ctx: &CoreContext, id: &str) -> Response {
    tracing::info!(op = "core.cookies.clear", "Handling cookies.clear");

    match ctx.relay.cookies().clear() {
        Ok(removed) => Response::ok(
            id.to_string(),
            serde_json::json!({
                "ok": true,
                "removed": removed,
            }),
        ),
        Err(e) => Response::err(id.to_string(), "COOKIE_STORE_ERROR", &e.to_string()),
    }
}

/// runtime.info: build and platform facts for diagnostics
fn handle_runtime_info(ctx: &CoreContext, id: &str) -> Response {
    tracing::info!(op = "core.runtime.info", "Handling runtime.info");

    Response::ok(
        id.to_string(),
        serde_json::json!({
            "app": config::app_name(),
            "version": env!("CARGO_PKG_VERSION"),
            "apiBaseUrl": config::api_base_url(),
            "platform": std::env::consts::OS,
            "remoteDesktopSupported": WindowsRemoteDesktop::is_supported(),
            "cookieJar": if ctx.persistent_jar { "persistent" } else { "memory" },
        }),
    )
}

// =============================================================================
// Main Loop
// =============================================================================

type SharedStdout = Arc<Mutex<io::Stdout>>;

/// Write one response line; false when stdout is gone
fn write_response(stdout: &SharedStdout, resp: &Response) -> bool {
    let line = match serde_json::to_vec(resp) {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(op = "core.stdout.error", error = %e, "Failed to encode response");
            return true;
        }
    };

    let mut out = match stdout.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };

    let written = out
        .write_all(&line)
        .and_then(|_| out.write_all(b"\n"))
        .and_then(|_| out.flush());

    if let Err(e) = written {
        tracing::error!(op = "core.stdout.error", error = %e, "Failed to write response");
        return false;
    }
    true
}

fn main() {
    // Initialize tracing to stderr (stdout is reserved for JSON-RPC)
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cloud_desktop_core=info".parse().unwrap()),
        )
        .with_target(true)
        .init();

    tracing::info!(
        op = "core.startup",
        app = config::app_slug(),
        "Cloud Desktop Core starting (stdio JSON-RPC)"
    );

    let tools = Arc::new(WindowsRemoteDesktop);
    let orchestrator = Orchestrator::new(tools.clone(), tools);

    let ctx = match CoreContext::new(open_cookie_jar(), orchestrator) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            tracing::error!(op = "core.startup.failed", error = %format!("{:#}", e), "Desktop Core failed to start");
            std::process::exit(1);
        }
    };

    let stdout: SharedStdout = Arc::new(Mutex::new(io::stdout()));
    let stdin = io::stdin();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(op = "core.stdin.error", error = %e, "Failed to read stdin");
                break;
            }
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        // Parse request
        let req: Request = match serde_json::from_str(trimmed) {
            Ok(r) => r,
            Err(e) => {
                // Can't correlate to an ID, write error with empty ID
                let resp = Response::err(
                    String::new(),
                    "PARSE_ERROR",
                    &format!("Invalid JSON request: {}", e),
                );
                if !write_response(&stdout, &resp) {
                    break;
                }
                continue;
            }
        };

        tracing::debug!(op = "core.dispatch", id = %req.id, op_name = %req.op, "Dispatching");

        let ctx = Arc::clone(&ctx);
        let stdout = Arc::clone(&stdout);
        std::thread::spawn(move || {
            let resp = dispatch(&ctx, &req);
            write_response(&stdout, &resp);
        });
    }

    tracing::info!(op = "core.shutdown", "Cloud Desktop Core shutting down");
}
