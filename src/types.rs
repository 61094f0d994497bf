//! Shared types for the IPC boundary

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result of a Desktop Core call
#[derive(Debug, Serialize, Deserialize)]
pub struct CoreReply {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CoreFailure>,
}

/// Error details in a reply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreFailure {
    pub code: String,
    pub message: String,
}

impl CoreReply {
    /// Success reply with result value
    pub fn ok(result: Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    /// Error reply
    pub fn err(code: &str, message: &str) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(CoreFailure {
                code: code.to_string(),
                message: message.to_string(),
            }),
        }
    }

    /// Collapse into the `Result` shape Tauri commands return
    ///
    /// Errors become `"<CODE>: <message>"`.
    pub fn into_result(self) -> Result<Value, String> {
        if self.ok {
            return Ok(self.result.unwrap_or(Value::Null));
        }
        let err = self.error.unwrap_or(CoreFailure {
            code: "CORE_ERROR".to_string(),
            message: "Unknown error from Desktop Core".to_string(),
        });
        Err(format!("{}: {}", err.code, err.message))
    }

    /// Fold into an `{success, error, errorKind}` action result
    ///
    /// A successful reply already carries one; an IPC failure becomes an
    /// internal failure.
    pub fn into_action_result(self) -> Value {
        match self.into_result() {
            Ok(result) => result,
            Err(message) => serde_json::json!({
                "success": false,
                "error": message,
                "errorKind": "internal",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_into_result() {
        assert_eq!(CoreReply::ok(json!({"a": 1})).into_result(), Ok(json!({"a": 1})));
        assert_eq!(
            CoreReply::err("TRANSPORT_ERROR", "connection refused").into_result(),
            Err("TRANSPORT_ERROR: connection refused".to_string())
        );
    }

    #[test]
    fn test_into_action_result_passes_core_result() {
        let reply = CoreReply::ok(json!({"success": false, "error": "missing address", "errorKind": "validation"}));
        assert_eq!(reply.into_action_result()["errorKind"], "validation");
    }

    #[test]
    fn test_into_action_result_folds_ipc_failure() {
        let folded = CoreReply::err("CORE_EXITED", "Desktop Core exited").into_action_result();
        assert_eq!(
            folded,
            json!({
                "success": false,
                "error": "CORE_EXITED: Desktop Core exited",
                "errorKind": "internal",
            })
        );
    }
}
