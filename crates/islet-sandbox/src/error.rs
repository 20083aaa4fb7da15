//! Error types for the islet sandbox.

use thiserror::Error;

use crate::envelope::FailureKind;

/// Which timeout mechanism tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    /// Module load, compile, and synchronous top-level execution.
    Load,
    /// The awaited entry-function invocation.
    Entry,
}

impl std::fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutPhase::Load => write!(f, "compile/sync-run"),
            TimeoutPhase::Entry => write!(f, "awaited-entry"),
        }
    }
}

/// Errors that can occur during sandbox execution.
///
/// None of these escape [`SandboxExecutor::run_snippet`](crate::SandboxExecutor::run_snippet);
/// they are folded into the failure envelope with a [`FailureKind`] so
/// user-script failures stay distinguishable from core defects.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// Snippet exceeds the configured maximum size.
    #[error("snippet exceeds maximum size of {max} bytes (got {actual})")]
    CodeTooLarge {
        /// Maximum allowed size.
        max: usize,
        /// Actual size.
        actual: usize,
    },

    /// Execution result exceeds the configured maximum size.
    #[error("result exceeds maximum size of {max} bytes")]
    OutputTooLarge {
        /// Maximum allowed size.
        max: usize,
    },

    /// One of the two timeout mechanisms fired.
    #[error("snippet timed out after {timeout_ms}ms ({phase} phase)")]
    Timeout {
        /// Which phase timed out.
        phase: TimeoutPhase,
        /// Configured timeout in milliseconds.
        timeout_ms: u64,
    },

    /// V8 heap memory ceiling was reached; execution was terminated.
    #[error("memory limit exceeded")]
    HeapLimitExceeded,

    /// A JavaScript error was thrown during load or invocation.
    #[error("javascript error: {message}")]
    JsError {
        /// The error message from JavaScript.
        message: String,
    },

    /// Synthesis or bundling produced a unit without the expected entry
    /// export. This is a core defect, not a user error.
    #[error("malformed bundle: {reason}")]
    MalformedBundle {
        /// What was missing or wrong.
        reason: String,
    },

    /// Too many concurrent sandbox executions.
    #[error("concurrency limit reached (max {max} concurrent executions)")]
    ConcurrencyLimit {
        /// Maximum allowed concurrent executions.
        max: usize,
    },

    /// Generic execution failure.
    #[error("sandbox execution failed: {0}")]
    Execution(#[from] anyhow::Error),

    /// Result envelope (de)serialization failed.
    #[error("result serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SandboxError {
    /// The envelope category this error folds into.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::MalformedBundle { .. }
            | Self::ConcurrencyLimit { .. }
            | Self::Execution(_)
            | Self::Serialization(_) => FailureKind::Internal,
            Self::CodeTooLarge { .. }
            | Self::OutputTooLarge { .. }
            | Self::HeapLimitExceeded
            | Self::JsError { .. } => FailureKind::Script,
        }
    }

    /// The `name` field of the flattened error record.
    pub fn error_name(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "TimeoutError",
            Self::HeapLimitExceeded => "RangeError",
            Self::MalformedBundle { .. } => "InternalError",
            _ => "Error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_fold_into_the_timeout_category() {
        let err = SandboxError::Timeout {
            phase: TimeoutPhase::Entry,
            timeout_ms: 60_000,
        };
        assert_eq!(err.failure_kind(), FailureKind::Timeout);
        assert!(err.to_string().contains("awaited-entry"));
    }

    #[test]
    fn malformed_bundle_is_an_internal_defect() {
        let err = SandboxError::MalformedBundle {
            reason: "entry export missing".into(),
        };
        assert_eq!(err.failure_kind(), FailureKind::Internal);
    }

    #[test]
    fn script_failures_stay_in_the_script_category() {
        assert_eq!(
            SandboxError::JsError {
                message: "boom".into()
            }
            .failure_kind(),
            FailureKind::Script
        );
        assert_eq!(
            SandboxError::HeapLimitExceeded.failure_kind(),
            FailureKind::Script
        );
    }
}
