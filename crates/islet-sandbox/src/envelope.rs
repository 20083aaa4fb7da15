//! The uniform result envelope returned by every snippet execution.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SandboxError;

/// One console call captured inside the sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Console level: `log`, `warn`, or `error`.
    pub level: String,
    /// The call's arguments, flattened to JSON-safe values.
    #[serde(default)]
    pub args: Vec<Value>,
}

/// A flattened, JSON-safe representation of a thrown value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Error name (`Error`, `TypeError`, `TimeoutError`, ...).
    #[serde(default)]
    pub name: String,
    /// Error message.
    #[serde(default)]
    pub message: String,
    /// Stack trace, when one was attached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    /// HTTP status, for errors raised by the bridge adapter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Parsed or raw response body, for errors raised by the bridge adapter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl ErrorRecord {
    /// Build a record with just a name and a message.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            ..Self::default()
        }
    }
}

/// Failure category, exposed as a reserved `code` in the JSON envelope so
/// operators can alert on internal defects separately from user errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The user's script threw, rejected, or was otherwise at fault.
    Script,
    /// One of the timeout mechanisms fired.
    Timeout,
    /// A defect in synthesis, bundling, or the runtime itself.
    Internal,
}

impl FailureKind {
    /// Stable envelope code for this category.
    pub fn code(&self) -> &'static str {
        match self {
            FailureKind::Script => "SCRIPT_ERROR",
            FailureKind::Timeout => "TIMEOUT",
            FailureKind::Internal => "INTERNAL",
        }
    }
}

/// Final outcome of a snippet execution.
#[derive(Debug, Clone, PartialEq)]
pub enum RunResult {
    /// The snippet completed; `value` is its (JSON-flattened) return value.
    Success {
        /// The completion value; `Value::Null` when the snippet never
        /// reached a `return`.
        value: Value,
        /// Console output captured during execution, in order.
        logs: Vec<LogEntry>,
    },
    /// The snippet failed; `error` is the flattened cause.
    Failure {
        /// The flattened error record.
        error: ErrorRecord,
        /// Which category of failure this is.
        kind: FailureKind,
        /// Console output captured before the failure, in order.
        logs: Vec<LogEntry>,
    },
}

impl RunResult {
    /// Whether the execution succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, RunResult::Success { .. })
    }

    /// The captured console output, regardless of outcome.
    pub fn logs(&self) -> &[LogEntry] {
        match self {
            RunResult::Success { logs, .. } | RunResult::Failure { logs, .. } => logs,
        }
    }

    /// The JSON wire form: `{ok, value, logs}` or `{ok, error, code, logs}`.
    pub fn to_json(&self) -> Value {
        match self {
            RunResult::Success { value, logs } => serde_json::json!({
                "ok": true,
                "value": value,
                "logs": logs,
            }),
            RunResult::Failure { error, kind, logs } => serde_json::json!({
                "ok": false,
                "error": error,
                "code": kind.code(),
                "logs": logs,
            }),
        }
    }
}

impl From<SandboxError> for RunResult {
    fn from(err: SandboxError) -> Self {
        RunResult::Failure {
            error: ErrorRecord::new(err.error_name(), err.to_string()),
            kind: err.failure_kind(),
            logs: Vec::new(),
        }
    }
}

/// The raw envelope posted from inside the sandbox through the result op.
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    error: Option<ErrorRecord>,
    #[serde(default)]
    logs: Vec<LogEntry>,
    /// Set by the invoke wrapper when the entry function itself misbehaved,
    /// a synthesis defect rather than a user error.
    #[serde(default)]
    internal: bool,
}

/// Parse the JSON envelope the sandbox posted into a [`RunResult`].
pub(crate) fn parse_envelope(json: &str) -> Result<RunResult, SandboxError> {
    let raw: RawEnvelope = serde_json::from_str(json)?;
    match raw.error {
        Some(error) => Ok(RunResult::Failure {
            error,
            kind: if raw.internal {
                FailureKind::Internal
            } else {
                FailureKind::Script
            },
            logs: raw.logs,
        }),
        None => Ok(RunResult::Success {
            value: raw.value.unwrap_or(Value::Null),
            logs: raw.logs,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_envelope_round_trips() {
        let result = parse_envelope(r#"{"ok":true,"value":42,"logs":[]}"#).unwrap();
        assert!(result.is_success());
        let json = result.to_json();
        assert_eq!(json["ok"], true);
        assert_eq!(json["value"], 42);
        assert_eq!(json["logs"], serde_json::json!([]));
    }

    #[test]
    fn missing_value_means_undefined_and_is_success() {
        let result = parse_envelope(r#"{"ok":true,"logs":[]}"#).unwrap();
        match result {
            RunResult::Success { value, .. } => assert_eq!(value, Value::Null),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn error_envelope_carries_the_flattened_record() {
        let result = parse_envelope(
            r#"{"ok":false,"error":{"name":"Error","message":"boom","status":500},"logs":[{"level":"error","args":["boom"]}]}"#,
        )
        .unwrap();
        match &result {
            RunResult::Failure { error, kind, logs } => {
                assert_eq!(error.message, "boom");
                assert_eq!(error.status, Some(500));
                assert_eq!(*kind, FailureKind::Script);
                assert_eq!(logs.len(), 1);
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(result.to_json()["code"], "SCRIPT_ERROR");
    }

    #[test]
    fn internal_flag_switches_the_category() {
        let result =
            parse_envelope(r#"{"ok":false,"internal":true,"error":{"name":"Error","message":"x"},"logs":[]}"#)
                .unwrap();
        assert_eq!(result.to_json()["code"], "INTERNAL");
    }

    #[test]
    fn sandbox_errors_fold_into_failure_envelopes() {
        let result = RunResult::from(SandboxError::Timeout {
            phase: crate::error::TimeoutPhase::Entry,
            timeout_ms: 250,
        });
        let json = result.to_json();
        assert_eq!(json["ok"], false);
        assert_eq!(json["code"], "TIMEOUT");
        assert_eq!(json["error"]["name"], "TimeoutError");
        assert!(json["error"]["message"].as_str().unwrap().contains("250ms"));
    }
}
