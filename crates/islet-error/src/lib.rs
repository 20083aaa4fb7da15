//! Typed error types for the islet host bridge.
//!
//! Provides [`BridgeError`] — the canonical error type for transport-level
//! failures of the outbound HTTP bridge. HTTP-level failures (4xx/5xx) are
//! *not* errors; they travel back into the sandbox as ordinary responses with
//! `ok: false` and a populated status.

use thiserror::Error;

/// Canonical error type for host bridge transport failures.
///
/// All variants are `#[non_exhaustive]` to allow future additions without
/// breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BridgeError {
    /// The request descriptor could not be turned into a real request
    /// (bad URL, unknown method, malformed header name/value).
    #[error("invalid bridge request: {0}")]
    InvalidRequest(String),

    /// The request did not complete within its deadline.
    #[error("bridge request timed out after {timeout_ms}ms: {url}")]
    Timeout {
        /// The request URL.
        url: String,
        /// The timeout that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// The remote endpoint could not be reached (DNS, connection refused).
    #[error("failed to connect to {url}: {message}")]
    Connect {
        /// The request URL.
        url: String,
        /// Underlying connection failure.
        message: String,
    },

    /// The connection was established but the exchange failed mid-flight
    /// (reset, protocol error, body read failure).
    #[error("bridge transport failure: {0}")]
    Transport(String),

    /// An internal error (catch-all for unexpected failures).
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl BridgeError {
    /// Returns a static error code string for programmatic matching.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Connect { .. } => "CONNECT_FAILED",
            Self::Transport(_) => "TRANSPORT",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Returns whether the request that produced this error may succeed if retried.
    pub fn retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Connect { .. } => true,
            Self::Transport(_) => true,
            Self::InvalidRequest(_) => false,
            Self::Internal(_) => false,
        }
    }

    /// Convert to a structured JSON error record.
    ///
    /// This is the shape the bridge op throws into the sandbox: a plain
    /// serializable record with no host-side object identity.
    pub fn to_structured_error(&self) -> serde_json::Value {
        serde_json::json!({
            "error": true,
            "code": self.code(),
            "message": self.to_string(),
            "retryable": self.retryable(),
        })
    }
}
