#![warn(missing_docs)]

//! # islet-server
//!
//! HTTP front-end for the islet snippet runtime.
//!
//! Exposes three routes:
//! - `POST /run` — execute a snippet inside the sandbox, with access to
//!   every registered SDK via `sdk.<namespace>`
//! - `POST /sdk/upload` — upload an OpenAPI spec, generate a client library
//!   under the SDK root, and register it for subsequent runs
//! - `GET /health` — liveness probe
//!
//! The server is intentionally slim; execution lives in `islet-sandbox` and
//! discovery in `islet-registry`. Input validation here (length bounds, the
//! keyword blocklist) is belt-and-braces only; the isolate is the real
//! boundary.

pub mod generator;
pub mod validator;

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use islet_registry::names::create_unique_sdk_folder;
use islet_registry::SdkRegistry;
use islet_sandbox::SandboxExecutor;

use generator::{ensure_entry_module, SdkGenerator};
use validator::validate_snippet;

/// Maximum accepted upload size (the spec file plus form overhead).
const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// File name the uploaded spec is persisted under inside the SDK folder.
const UPLOADED_SPEC_FILE: &str = "openapi.upload.yaml";

/// Shared state behind the HTTP routes.
#[derive(Clone)]
pub struct AppState {
    /// The sandbox executor.
    pub executor: Arc<SandboxExecutor>,
    /// The SDK registry, shared with the executor.
    pub registry: Arc<SdkRegistry>,
    /// The external generator collaborator; uploads are rejected when absent.
    pub generator: Option<Arc<dyn SdkGenerator>>,
    /// Maximum snippet length accepted by `/run`.
    pub max_snippet_len: usize,
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/run", post(run_snippet))
        .route("/sdk/upload", post(upload_sdk))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Body of a `POST /run` request.
#[derive(Debug, Deserialize)]
pub struct RunBody {
    /// The snippet to execute.
    pub snippet: String,
}

async fn run_snippet(State(state): State<AppState>, Json(body): Json<RunBody>) -> Response {
    if let Err(rejection) = validate_snippet(&body.snippet, state.max_snippet_len) {
        tracing::info!(reason = %rejection, "run: snippet rejected before execution");
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "ok": false, "error": rejection.to_string() })),
        )
            .into_response();
    }

    let result = state.executor.run_snippet(&body.snippet).await;
    let status = if result.is_success() {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    (status, Json(result.to_json())).into_response()
}

fn bad_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "ok": false, "error": message.into() })),
    )
        .into_response()
}

async fn upload_sdk(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let Some(generator) = state.generator.clone() else {
        return bad_request("no SDK generator is configured on this deployment");
    };

    let mut spec_bytes: Option<Vec<u8>> = None;
    let mut preferred_name: Option<String> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return bad_request(format!("malformed multipart body: {e}")),
        };
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("spec") => match field.bytes().await {
                Ok(bytes) => spec_bytes = Some(bytes.to_vec()),
                Err(e) => return bad_request(format!("failed to read spec upload: {e}")),
            },
            Some("name") => match field.text().await {
                Ok(text) => preferred_name = Some(text),
                Err(e) => return bad_request(format!("failed to read name field: {e}")),
            },
            _ => {}
        }
    }

    let Some(spec_bytes) = spec_bytes else {
        return bad_request("missing 'spec' file field");
    };

    // Claim a unique, collision-free folder under the SDK root.
    let folder = match create_unique_sdk_folder(state.registry.root(), preferred_name.as_deref()) {
        Ok(folder) => folder,
        Err(e) => {
            tracing::error!(error = %e, "upload: failed to create SDK folder");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "ok": false, "error": "failed to create SDK folder" })),
            )
                .into_response();
        }
    };

    let spec_path = folder.path.join(UPLOADED_SPEC_FILE);
    if let Err(e) = std::fs::write(&spec_path, &spec_bytes) {
        tracing::error!(error = %e, "upload: failed to persist spec");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "ok": false, "error": "failed to persist uploaded spec" })),
        )
            .into_response();
    }

    if let Err(e) = generator.generate(&spec_path, &folder.path).await {
        tracing::warn!(error = %e, namespace = %folder.namespace, "upload: generator failed");
        return bad_request(format!("codegen failed: {e}"));
    }

    let entry = match ensure_entry_module(&folder.path) {
        Ok(entry) => entry,
        Err(e) => {
            tracing::error!(error = %e, "upload: failed to write fallback entry module");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "ok": false, "error": "failed to write entry module" })),
            )
                .into_response();
        }
    };

    // Invalidate discovery so the next /run sees this SDK.
    state.registry.invalidate();

    tracing::info!(
        namespace = %folder.namespace,
        location = %folder.path.display(),
        "SDK generated and registered"
    );
    Json(serde_json::json!({
        "ok": true,
        "sdk": {
            "namespace": folder.namespace,
            "location": folder.path,
            "entry": entry,
        },
        "message": "SDK generated and will be auto-loaded on /run under sdk.<namespace>",
    }))
    .into_response()
}
