//! deno_core op definitions for the islet sandbox.
//!
//! The `#[op2]` macro generates additional public items (v8 function
//! pointers, metadata structs) that cannot carry doc comments. We suppress
//! `missing_docs` at the module level; all actual functions and types are
//! documented below.
#![allow(missing_docs)]

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

use deno_core::op2;
use deno_core::OpState;
use deno_error::JsErrorBox;

use crate::{BridgeBody, BridgeRequest, HttpBridge};

/// Rate limiting state for bridge calls within a single execution.
pub struct BridgeCallLimits {
    /// Maximum number of bridge calls allowed.
    pub max_calls: usize,
    /// Number of bridge calls made so far.
    pub calls_made: usize,
}

/// Default timeout applied to bridge requests that do not carry their own.
pub struct BridgeDefaults {
    /// Timeout in milliseconds.
    pub timeout_ms: u64,
}

/// Wrapper for the result envelope posted from sandbox code.
pub struct ExecutionResult(pub String);

/// The request-options record as sandbox-side adapters assemble it.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct FetchInit {
    method: Option<String>,
    headers: BTreeMap<String, String>,
    body_text: Option<String>,
    form: Option<BTreeMap<String, serde_json::Value>>,
    timeout: Option<u64>,
}

/// Store the execution result envelope in OpState.
#[op2(fast)]
pub fn op_set_result(state: &mut OpState, #[string] json: &str) {
    state.put(ExecutionResult(json.to_string()));
}

/// Perform an outbound HTTP call through the host bridge.
///
/// This is the single capability injected into the sandbox. The request
/// crosses the boundary as flattened data, the real call happens on the
/// trusted side, and transport failures come back as plain thrown errors
/// carrying no host-side object identity.
#[op2]
#[string]
pub async fn op_bridge_fetch(
    op_state: Rc<RefCell<OpState>>,
    #[string] url: String,
    #[string] init_json: String,
) -> Result<String, JsErrorBox> {
    tracing::debug!(url = %url, "bridge call dispatched");

    // Check and increment the per-execution call budget
    {
        let mut st = op_state.borrow_mut();
        let limits = st.borrow_mut::<BridgeCallLimits>();
        if limits.calls_made >= limits.max_calls {
            return Err(JsErrorBox::generic(format!(
                "bridge call limit exceeded (max {} calls per execution)",
                limits.max_calls
            )));
        }
        limits.calls_made += 1;
    }

    let (bridge, default_timeout_ms) = {
        let st = op_state.borrow();
        let bridge = st.borrow::<Arc<dyn HttpBridge>>().clone();
        let timeout_ms = st.borrow::<BridgeDefaults>().timeout_ms;
        (bridge, timeout_ms)
    };

    let init: FetchInit = serde_json::from_str(&init_json)
        .map_err(|e| JsErrorBox::generic(format!("invalid request options: {e}")))?;

    let body = match (init.body_text, init.form) {
        (Some(text), _) => Some(BridgeBody::Text(text)),
        (None, Some(form)) => Some(BridgeBody::Form(form)),
        (None, None) => None,
    };
    let request = BridgeRequest {
        url,
        method: init.method.unwrap_or_else(|| "GET".to_string()),
        headers: init.headers,
        body,
        timeout_ms: Some(init.timeout.unwrap_or(default_timeout_ms)),
    };

    let response = bridge.send(request).await.map_err(|e| {
        JsErrorBox::generic(format!("bridge transport failure [{}]: {e}", e.code()))
    })?;

    serde_json::to_string(&response)
        .map_err(|e| JsErrorBox::generic(format!("response serialization failed: {e}")))
}

deno_core::extension!(islet_ext, ops = [op_set_result, op_bridge_fetch],);
