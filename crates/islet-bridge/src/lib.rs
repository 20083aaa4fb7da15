#![warn(missing_docs)]

//! # islet-bridge
//!
//! The trusted-side implementation of the islet host bridge.
//!
//! [`ReqwestBridge`] performs the real network call described by a
//! [`BridgeRequest`] and flattens the outcome into a [`BridgeResponse`].
//! HTTP-level failures (4xx/5xx) are reported via `ok: false`, never as
//! errors; interpretation (JSON parsing, error construction) belongs to the
//! in-sandbox adapter. Only transport-level failures (DNS, connection
//! refused, timeout) become [`BridgeError`]s.

use std::collections::BTreeMap;
use std::time::Duration;

use islet_error::BridgeError;
use islet_sandbox::{BridgeBody, BridgeRequest, BridgeResponse, HttpBridge};

/// Fallback per-request timeout when the descriptor carries none.
const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// [`HttpBridge`] implementation backed by a shared reqwest client.
pub struct ReqwestBridge {
    client: reqwest::Client,
}

impl ReqwestBridge {
    /// Create a bridge with a fresh client.
    pub fn new() -> Result<Self, BridgeError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| BridgeError::Transport(e.to_string()))?;
        Ok(Self { client })
    }

    /// Create a bridge around an existing client (shared pools, proxies).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn build_request(
        &self,
        request: &BridgeRequest,
    ) -> Result<reqwest::RequestBuilder, BridgeError> {
        let method = reqwest::Method::from_bytes(request.method.to_uppercase().as_bytes())
            .map_err(|_| {
                BridgeError::InvalidRequest(format!("unknown HTTP method '{}'", request.method))
            })?;

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(Duration::from_millis(
                request.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
            ));

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        match &request.body {
            Some(BridgeBody::Text(text)) => builder = builder.body(text.clone()),
            Some(BridgeBody::Form(fields)) => {
                let mut form = reqwest::multipart::Form::new();
                for (name, value) in fields {
                    let text = match value {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    form = form.text(name.clone(), text);
                }
                builder = builder.multipart(form);
            }
            None => {}
        }

        Ok(builder)
    }
}

#[async_trait::async_trait]
impl HttpBridge for ReqwestBridge {
    async fn send(&self, request: BridgeRequest) -> Result<BridgeResponse, BridgeError> {
        tracing::debug!(method = %request.method, url = %request.url, "bridge request");

        let timeout_ms = request.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);
        let url = request.url.clone();
        let builder = self.build_request(&request)?;

        let response = builder
            .send()
            .await
            .map_err(|e| classify_reqwest_error(e, &url, timeout_ms))?;

        let status = response.status().as_u16();
        let ok = response.status().is_success();
        let headers = normalize_headers(response.headers());
        let body_text = response
            .text()
            .await
            .map_err(|e| BridgeError::Transport(format!("failed to read response body: {e}")))?;

        tracing::debug!(status, ok, body_len = body_text.len(), "bridge response");
        Ok(BridgeResponse {
            ok,
            status,
            headers,
            body_text,
        })
    }
}

/// Lowercase header names and join repeated headers with `", "` so the
/// in-sandbox adapter can do case-insensitive lookups on a plain record.
fn normalize_headers(headers: &reqwest::header::HeaderMap) -> BTreeMap<String, String> {
    let mut out: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let name = name.as_str().to_ascii_lowercase();
        let value = String::from_utf8_lossy(value.as_bytes()).to_string();
        out.entry(name)
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    out
}

fn classify_reqwest_error(err: reqwest::Error, url: &str, timeout_ms: u64) -> BridgeError {
    if err.is_timeout() {
        BridgeError::Timeout {
            url: url.to_string(),
            timeout_ms,
        }
    } else if err.is_connect() {
        BridgeError::Connect {
            url: url.to_string(),
            message: err.to_string(),
        }
    } else if err.is_builder() || err.is_request() {
        BridgeError::InvalidRequest(err.to_string())
    } else {
        BridgeError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_methods_are_rejected_as_invalid_requests() {
        let bridge = ReqwestBridge::new().unwrap();
        let request = BridgeRequest {
            url: "https://api.test/x".into(),
            method: "NOT A METHOD".into(),
            headers: BTreeMap::new(),
            body: None,
            timeout_ms: None,
        };
        let err = bridge.build_request(&request).unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");
    }

    #[test]
    fn repeated_headers_are_joined() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.append("Set-Cookie", "a=1".parse().unwrap());
        headers.append("Set-Cookie", "b=2".parse().unwrap());
        headers.insert("Content-Type", "application/json".parse().unwrap());

        let normalized = normalize_headers(&headers);
        assert_eq!(normalized["set-cookie"], "a=1, b=2");
        assert_eq!(normalized["content-type"], "application/json");
    }
}
