//! Remote Session Orchestrator
//!
//! Stores a Remote Desktop credential and launches the client (connect), and
//! tears both down again (disconnect). Holds no session state between calls:
//! everything is rebuilt from the OS credential store and running windows.
//!
//! # Failure policy
//!
//! - Missing parameters → `{success:false}` before any OS call
//! - Credential store failure on connect → `{success:false}`, no launch
//! - Launch failure on connect → logged only
//! - Both disconnect steps → best effort, logged only
//!
//! Disconnect matches windows by raw host substring, so `10.0.0.1` also
//! matches a session to `10.0.0.10`.

use crate::os_tools::{CommandError, CredentialVault, SessionLauncher};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

pub const MISSING_CONNECT_PARAMS: &str = "missing required connection parameters";
pub const MISSING_ADDRESS: &str = "missing address";

/// Target of a session: `host` or `host:port`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAddress {
    host: String,
    /// Caller's digits, kept verbatim
    port: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AddressError {
    #[error("host is empty")]
    MissingHost,
    #[error("invalid host '{0}'")]
    InvalidHost(String),
    #[error("invalid port '{0}'")]
    InvalidPort(String),
}

impl RemoteAddress {
    /// Compose an address; a missing, empty or zero port means no port
    pub fn new(host: &str, port: Option<&str>) -> Result<Self, AddressError> {
        let host = host.trim();
        if host.is_empty() {
            return Err(AddressError::MissingHost);
        }
        if host.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(AddressError::InvalidHost(host.to_string()));
        }

        let port = match port.map(str::trim) {
            None | Some("") => None,
            Some(raw) => {
                if !raw.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(AddressError::InvalidPort(raw.to_string()));
                }
                match raw.parse::<u16>() {
                    Ok(0) => None,
                    Ok(_) => Some(raw.to_string()),
                    Err(_) => return Err(AddressError::InvalidPort(raw.to_string())),
                }
            }
        };

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// Credential realm, `TERMSRV/{address}`
    pub fn realm(&self) -> String {
        format!("TERMSRV/{}", self)
    }
}

impl fmt::Display for RemoteAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.port {
            Some(port) => write!(f, "{}:{}", self.host, port),
            None => write!(f, "{}", self.host),
        }
    }
}

/// Credential persisted for the Remote Desktop client
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteCredential {
    pub realm: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for RemoteCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCredential")
            .field("realm", &self.realm)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// `remoteDesktop.connect` payload
#[derive(Clone, Default, Deserialize)]
pub struct ConnectOptions {
    #[serde(default)]
    pub ip: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub port: Option<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("ip", &self.ip)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// `remoteDesktop.disconnect` payload
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DisconnectOptions {
    #[serde(default)]
    pub ip: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub port: Option<String>,
}

/// The UI sends ports both as strings and as numbers
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    CredentialStore,
    Internal,
}

/// `{success, error?, errorKind?}` returned to the UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl ActionResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            error_kind: None,
        }
    }

    pub fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            error_kind: Some(kind),
        }
    }
}

/// Stateless connect/disconnect over the OS seams
pub struct Orchestrator {
    vault: Arc<dyn CredentialVault>,
    launcher: Arc<dyn SessionLauncher>,
}

impl Orchestrator {
    pub fn new(vault: Arc<dyn CredentialVault>, launcher: Arc<dyn SessionLauncher>) -> Self {
        Self { vault, launcher }
    }

    pub fn connect(&self, options: &ConnectOptions) -> ActionResult {
        if options.ip.trim().is_empty() || options.username.is_empty() || options.password.is_empty()
        {
            return ActionResult::failed(ErrorKind::Validation, MISSING_CONNECT_PARAMS);
        }

        let address = match RemoteAddress::new(&options.ip, options.port.as_deref()) {
            Ok(a) => a,
            Err(e) => return ActionResult::failed(ErrorKind::Validation, e.to_string()),
        };

        let credential = RemoteCredential {
            realm: address.realm(),
            username: options.username.clone(),
            password: options.password.clone(),
        };

        if let Err(e) = self.vault.upsert(&credential) {
            tracing::warn!(
                op = "core.remote.credential.store_failed",
                realm = %credential.realm,
                error = %e,
                "Failed to store remote desktop credential"
            );
            return ActionResult::failed(ErrorKind::CredentialStore, e.to_string());
        }

        tracing::info!(
            op = "core.remote.credential.stored",
            realm = %credential.realm,
            "Remote desktop credential stored"
        );

        // Fire and forget: launch errors and exit status are not reported
        match self.launcher.launch(&address.to_string()) {
            Ok(handle) => {
                tracing::info!(
                    op = "core.remote.session.launched",
                    address = %address,
                    pid = ?handle.pid(),
                    "Remote desktop client launched"
                );
                drop(handle);
            }
            Err(e) => {
                tracing::warn!(
                    op = "core.remote.session.launch_failed",
                    address = %address,
                    error = %e,
                    "Remote desktop client launch failed (ignored)"
                );
            }
        }

        ActionResult::ok()
    }

    pub fn disconnect(&self, options: &DisconnectOptions) -> ActionResult {
        if options.ip.trim().is_empty() {
            return ActionResult::failed(ErrorKind::Validation, MISSING_ADDRESS);
        }

        let address = match RemoteAddress::new(&options.ip, options.port.as_deref()) {
            Ok(a) => a,
            Err(e) => return ActionResult::failed(ErrorKind::Internal, e.to_string()),
        };

        let killed = self.launcher.terminate_matching(&options.ip);
        discard("core.remote.session.terminate", &address, killed);

        let deleted = self.vault.delete(&address.realm());
        discard("core.remote.credential.delete", &address, deleted);

        tracing::info!(op = "core.remote.disconnect", address = %address, "Remote desktop disconnected");
        ActionResult::ok()
    }
}

/// Log and drop the outcome of a best-effort teardown step
fn discard(op: &'static str, address: &RemoteAddress, result: Result<(), CommandError>) {
    match result {
        Ok(()) => tracing::debug!(op = op, address = %address, ok = true, "Teardown step done"),
        Err(e) => tracing::debug!(
            op = op,
            address = %address,
            ok = false,
            error = %e,
            "Teardown step failed (ignored)"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::os_tools::SpawnHandle;
    use serde_json::json;
    use std::sync::Mutex;

    /// Records every OS call; individual steps can be made to fail
    #[derive(Default)]
    struct FakeTools {
        calls: Mutex<Vec<String>>,
        fail_upsert: bool,
        fail_launch: bool,
        fail_terminate: bool,
        fail_delete: bool,
    }

    impl FakeTools {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn failure(program: &'static str) -> CommandError {
            CommandError::Failed {
                program,
                status: "exit code: 1".to_string(),
                output: "boom".to_string(),
            }
        }
    }

    impl CredentialVault for FakeTools {
        fn upsert(&self, credential: &RemoteCredential) -> Result<(), CommandError> {
            self.record(format!("upsert {} {}", credential.realm, credential.username));
            if self.fail_upsert {
                return Err(Self::failure("cmdkey"));
            }
            Ok(())
        }

        fn delete(&self, realm: &str) -> Result<(), CommandError> {
            self.record(format!("delete {}", realm));
            if self.fail_delete {
                return Err(Self::failure("cmdkey"));
            }
            Ok(())
        }
    }

    impl SessionLauncher for FakeTools {
        fn launch(&self, address: &str) -> Result<SpawnHandle, CommandError> {
            self.record(format!("launch {}", address));
            if self.fail_launch {
                return Err(Self::failure("mstsc"));
            }
            Ok(SpawnHandle::untracked())
        }

        fn terminate_matching(&self, title_fragment: &str) -> Result<(), CommandError> {
            self.record(format!("terminate {}", title_fragment));
            if self.fail_terminate {
                return Err(Self::failure("powershell"));
            }
            Ok(())
        }
    }

    fn orchestrator(tools: FakeTools) -> (Orchestrator, Arc<FakeTools>) {
        let tools = Arc::new(tools);
        (Orchestrator::new(tools.clone(), tools.clone()), tools)
    }

    fn connect_opts(ip: &str, port: Option<&str>) -> ConnectOptions {
        ConnectOptions {
            ip: ip.to_string(),
            port: port.map(str::to_string),
            username: "u".to_string(),
            password: "p".to_string(),
        }
    }

    #[test]
    fn test_address_composition() {
        assert_eq!(RemoteAddress::new("10.0.0.1", Some("0")).unwrap().realm(), "TERMSRV/10.0.0.1");
        assert_eq!(RemoteAddress::new("10.0.0.1", None).unwrap().realm(), "TERMSRV/10.0.0.1");
        assert_eq!(RemoteAddress::new("10.0.0.1", Some("")).unwrap().realm(), "TERMSRV/10.0.0.1");
        assert_eq!(
            RemoteAddress::new("10.0.0.1", Some("3389")).unwrap().realm(),
            "TERMSRV/10.0.0.1:3389"
        );
        assert!(matches!(
            RemoteAddress::new("10.0.0.1", Some("rdp")),
            Err(AddressError::InvalidPort(_))
        ));
        assert!(matches!(
            RemoteAddress::new("10.0.0.1 & calc", None),
            Err(AddressError::InvalidHost(_))
        ));
        assert!(matches!(RemoteAddress::new("  ", None), Err(AddressError::MissingHost)));
    }

    #[test]
    fn test_port_digits_kept_verbatim() {
        assert_eq!(RemoteAddress::new("10.0.0.1", Some("00")).unwrap().realm(), "TERMSRV/10.0.0.1");
        assert_eq!(
            RemoteAddress::new("10.0.0.1", Some("03389")).unwrap().realm(),
            "TERMSRV/10.0.0.1:03389"
        );
        assert_eq!(
            RemoteAddress::new("10.0.0.1", Some(" 3389 ")).unwrap().to_string(),
            "10.0.0.1:3389"
        );
        assert!(matches!(
            RemoteAddress::new("10.0.0.1", Some("+5")),
            Err(AddressError::InvalidPort(_))
        ));
        assert!(matches!(
            RemoteAddress::new("10.0.0.1", Some("65536")),
            Err(AddressError::InvalidPort(_))
        ));
    }

    #[test]
    fn test_connect_stores_credential_then_launches() {
        let (orch, tools) = orchestrator(FakeTools::default());

        assert_eq!(orch.connect(&connect_opts("10.0.0.1", Some("0"))), ActionResult::ok());
        assert_eq!(orch.connect(&connect_opts("10.0.0.1", Some("3389"))), ActionResult::ok());

        assert_eq!(
            tools.calls(),
            vec![
                "upsert TERMSRV/10.0.0.1 u",
                "launch 10.0.0.1",
                "upsert TERMSRV/10.0.0.1:3389 u",
                "launch 10.0.0.1:3389",
            ]
        );
    }

    #[test]
    fn test_connect_validation_has_no_side_effects() {
        let (orch, tools) = orchestrator(FakeTools::default());

        let mut missing_password = connect_opts("10.0.0.1", None);
        missing_password.password.clear();

        for opts in [connect_opts("", None), missing_password] {
            let result = orch.connect(&opts);
            assert!(!result.success);
            assert_eq!(result.error.as_deref(), Some(MISSING_CONNECT_PARAMS));
            assert_eq!(result.error_kind, Some(ErrorKind::Validation));
        }

        let bad_port = orch.connect(&connect_opts("10.0.0.1", Some("99999")));
        assert_eq!(bad_port.error_kind, Some(ErrorKind::Validation));

        assert!(tools.calls().is_empty());
    }

    #[test]
    fn test_credential_failure_skips_launch() {
        let (orch, tools) = orchestrator(FakeTools {
            fail_upsert: true,
            ..Default::default()
        });

        let result = orch.connect(&connect_opts("10.0.0.1", None));
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::CredentialStore));
        assert!(result.error.unwrap().contains("boom"));
        assert_eq!(tools.calls(), vec!["upsert TERMSRV/10.0.0.1 u"]);
    }

    #[test]
    fn test_launch_failure_not_reported() {
        let (orch, _tools) = orchestrator(FakeTools {
            fail_launch: true,
            ..Default::default()
        });
        assert_eq!(orch.connect(&connect_opts("10.0.0.1", None)), ActionResult::ok());
    }

    #[test]
    fn test_disconnect_steps_are_independent() {
        let (orch, tools) = orchestrator(FakeTools {
            fail_terminate: true,
            fail_delete: true,
            ..Default::default()
        });

        let result = orch.disconnect(&DisconnectOptions {
            ip: "10.0.0.1".to_string(),
            port: Some("3389".to_string()),
        });

        assert_eq!(result, ActionResult::ok());
        assert_eq!(
            tools.calls(),
            vec!["terminate 10.0.0.1", "delete TERMSRV/10.0.0.1:3389"]
        );
    }

    #[test]
    fn test_disconnect_missing_address() {
        let (orch, tools) = orchestrator(FakeTools::default());
        let result = orch.disconnect(&DisconnectOptions::default());
        assert_eq!(result, ActionResult::failed(ErrorKind::Validation, MISSING_ADDRESS));
        assert!(tools.calls().is_empty());
    }

    #[test]
    fn test_disconnect_bad_port_is_internal_error() {
        let (orch, tools) = orchestrator(FakeTools::default());
        let result = orch.disconnect(&DisconnectOptions {
            ip: "10.0.0.1".to_string(),
            port: Some("x".to_string()),
        });
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Internal));
        assert!(tools.calls().is_empty());
    }

    #[test]
    fn test_payload_port_string_or_number() {
        let opts: ConnectOptions = serde_json::from_value(json!({
            "ip": "10.0.0.1", "port": 3389, "username": "u", "password": "p"
        }))
        .unwrap();
        assert_eq!(opts.port.as_deref(), Some("3389"));

        let opts: DisconnectOptions =
            serde_json::from_value(json!({ "ip": "10.0.0.1", "port": null })).unwrap();
        assert_eq!(opts.port, None);

        let opts: DisconnectOptions = serde_json::from_value(json!({ "port": "0" })).unwrap();
        assert!(opts.ip.is_empty());
    }

    #[test]
    fn test_action_result_shape() {
        assert_eq!(serde_json::to_value(ActionResult::ok()).unwrap(), json!({ "success": true }));
        assert_eq!(
            serde_json::to_value(ActionResult::failed(ErrorKind::CredentialStore, "denied")).unwrap(),
            json!({ "success": false, "error": "denied", "errorKind": "credential_store" })
        );
    }

    #[test]
    fn test_credential_debug_redacts_password() {
        let credential = RemoteCredential {
            realm: "TERMSRV/h".to_string(),
            username: "u".to_string(),
            password: "hunter2".to_string(),
        };
        assert!(!format!("{:?}", credential).contains("hunter2"));
        assert!(!format!("{:?}", connect_opts("h", None)).contains("\"p\""));
    }
}
