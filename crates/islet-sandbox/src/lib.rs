#![warn(missing_docs)]

//! # islet-sandbox
//!
//! V8 isolation boundary for the islet snippet runtime.
//!
//! Executes untrusted JavaScript snippets in a deno_core isolate with no
//! filesystem, process, or native network access. Discovered SDKs are wired
//! into the snippet's scope through a synthesized entry module, and the only
//! bridge to the outside world is a single host-mediated HTTP call routed
//! through a [`HttpBridge`] implementation on the trusted side.
//!
//! ## Security model
//!
//! - **V8 isolate**: Same process-level isolation as Chrome tabs
//! - **Fresh runtime per call**: One isolate per request, destroyed after
//!   exactly one execution, no state leakage between requests
//! - **Static module graph**: Host-capability modules (`fs`,
//!   `child_process`, sockets, ...) are denied at graph-resolution time, so
//!   not even a transitively imported SDK can pull them in
//! - **Heap ceiling**: V8 heap limits plus a near-heap-limit callback that
//!   terminates execution instead of letting V8 abort the host
//! - **Dual timeouts**: A CPU watchdog thread bounds synchronous execution;
//!   a host-side deadline bounds the awaited entry invocation
//! - **Single capability**: `globalThis.__HOST_BRIDGE__` is the one injected
//!   callable; everything else host-shaped (`Deno`, `process`, `Buffer`,
//!   `eval`, the `Function` constructor chain) is removed before any
//!   sandboxed code runs

pub mod envelope;
pub mod error;
pub mod executor;
pub mod loader;
pub mod ops;
pub mod template;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use islet_error::BridgeError;

pub use envelope::{ErrorRecord, FailureKind, LogEntry, RunResult};
pub use error::{SandboxError, TimeoutPhase};
pub use executor::{SandboxConfig, SandboxExecutor};

/// A flattened, serializable outbound HTTP request descriptor.
///
/// This is the only shape in which a network request crosses the trust
/// boundary: no object identity, just data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeRequest {
    /// Fully assembled request URL.
    pub url: String,
    /// HTTP method name (`GET`, `POST`, ...).
    pub method: String,
    /// Request headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Request body, if any.
    #[serde(default)]
    pub body: Option<BridgeBody>,
    /// Per-request timeout in milliseconds; the bridge default applies when
    /// absent.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Request body variants the bridge can carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BridgeBody {
    /// A pre-serialized textual body (JSON, form-urlencoded, plain text).
    Text(String),
    /// Multipart form fields, sent as `multipart/form-data` by the bridge.
    Form(BTreeMap<String, serde_json::Value>),
}

/// A flattened, serializable HTTP response descriptor.
///
/// Serialized in camelCase because this record is handed straight to the
/// in-sandbox adapter code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeResponse {
    /// Whether the status code was in the 2xx range.
    pub ok: bool,
    /// HTTP status code.
    pub status: u16,
    /// Response headers with lowercased names.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Response body read as text.
    pub body_text: String,
}

/// Trait for performing real outbound HTTP calls on the trusted side.
///
/// Implementations run entirely outside the sandbox. HTTP-level failures
/// (4xx/5xx) are reported via `ok: false` on the response, never as errors;
/// only transport-level failures (DNS, connect, timeout) produce a
/// [`BridgeError`], which the bridge op converts into a plain thrown error
/// inside the sandbox.
#[async_trait::async_trait]
pub trait HttpBridge: Send + Sync {
    /// Perform the request described by `request` and return the flattened
    /// response.
    async fn send(&self, request: BridgeRequest) -> Result<BridgeResponse, BridgeError>;
}
