//! Integration tests for the HTTP front-end, driving the full pipeline
//! through the router with an in-process bridge double.

use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use islet_registry::SdkRegistry;
use islet_sandbox::{
    BridgeRequest, BridgeResponse, HttpBridge, SandboxConfig, SandboxExecutor,
};
use islet_server::generator::SdkGenerator;
use islet_server::{router, AppState};

struct StubBridge;

#[async_trait::async_trait]
impl HttpBridge for StubBridge {
    async fn send(&self, _request: BridgeRequest) -> Result<BridgeResponse, islet_error::BridgeError> {
        Ok(BridgeResponse {
            ok: true,
            status: 200,
            headers: Default::default(),
            body_text: String::new(),
        })
    }
}

/// Generator double that writes a client module but no entry module.
struct FakeGenerator;

#[async_trait::async_trait]
impl SdkGenerator for FakeGenerator {
    async fn generate(&self, _spec_path: &Path, out_dir: &Path) -> anyhow::Result<()> {
        std::fs::write(
            out_dir.join("client.js"),
            "export const OpenAPI = { BASE: \"https://api.example.test\" };\n",
        )?;
        Ok(())
    }
}

fn state(root: &Path, generator: Option<Arc<dyn SdkGenerator>>) -> AppState {
    let registry = Arc::new(SdkRegistry::new(root));
    let executor = Arc::new(SandboxExecutor::new(
        SandboxConfig::default(),
        Arc::clone(&registry),
        Arc::new(StubBridge),
    ));
    AppState {
        executor,
        registry,
        generator,
        max_snippet_len: 10_000,
    }
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn run_request(snippet: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/run")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({ "snippet": snippet }).to_string(),
        ))
        .unwrap()
}

#[tokio::test]
async fn health_endpoint_responds() {
    let tmp = tempfile::tempdir().unwrap();
    let app = router(state(tmp.path(), None));

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn run_executes_a_snippet_end_to_end() {
    let tmp = tempfile::tempdir().unwrap();
    let app = router(state(tmp.path(), None));

    let response = app.oneshot(run_request("return 1 + 1;")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["ok"], true);
    assert_eq!(json["value"], 2);
    assert_eq!(json["logs"], serde_json::json!([]));
}

#[tokio::test]
async fn run_returns_logs_alongside_the_value() {
    let tmp = tempfile::tempdir().unwrap();
    let app = router(state(tmp.path(), None));

    let response = app
        .oneshot(run_request(r#"console.log("hi"); return 7;"#))
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["value"], 7);
    assert_eq!(
        json["logs"],
        serde_json::json!([{ "level": "log", "args": ["hi"] }])
    );
}

#[tokio::test]
async fn failing_snippets_return_the_failure_envelope() {
    let tmp = tempfile::tempdir().unwrap();
    let app = router(state(tmp.path(), None));

    let response = app
        .oneshot(run_request(r#"throw new Error("boom");"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["ok"], false);
    assert_eq!(json["code"], "SCRIPT_ERROR");
    assert_eq!(json["error"]["message"], "boom");
}

#[tokio::test]
async fn blocklisted_snippets_never_reach_the_sandbox() {
    let tmp = tempfile::tempdir().unwrap();
    let app = router(state(tmp.path(), None));

    for snippet in ["return process.env;", "require(\"fs\");", "await import(\"net\");"] {
        let response = app.clone().oneshot(run_request(snippet)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{snippet}");
        let json = body_json(response).await;
        assert_eq!(json["ok"], false);
        assert_eq!(json["error"], "snippet contains disallowed APIs");
    }
}

#[tokio::test]
async fn empty_snippets_are_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let app = router(state(tmp.path(), None));

    let response = app.oneshot(run_request("  ")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

fn multipart_upload(name: Option<&str>) -> Request<Body> {
    let boundary = "ISLET-TEST-BOUNDARY";
    let mut body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"spec\"; filename=\"api.yaml\"\r\n\
         Content-Type: application/yaml\r\n\r\n\
         openapi: 3.0.0\r\n"
    );
    if let Some(name) = name {
        body.push_str(&format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"name\"\r\n\r\n\
             {name}\r\n"
        ));
    }
    body.push_str(&format!("--{boundary}--\r\n"));

    Request::builder()
        .method("POST")
        .uri("/sdk/upload")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn upload_without_a_generator_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let app = router(state(tmp.path(), None));

    let response = app.oneshot(multipart_upload(Some("Petstore"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("generator"));
}

#[tokio::test]
async fn upload_registers_a_discoverable_sdk() {
    let tmp = tempfile::tempdir().unwrap();
    let app_state = state(tmp.path(), Some(Arc::new(FakeGenerator)));
    let registry = Arc::clone(&app_state.registry);
    let app = router(app_state);

    let response = app.oneshot(multipart_upload(Some("Petstore"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["ok"], true);
    assert_eq!(json["sdk"]["namespace"], "petstore");

    // The fallback entry module was synthesized and the cache invalidated,
    // so discovery sees the new SDK immediately.
    let map = registry.cached();
    assert!(map.contains_key("petstore"));
    assert!(map["petstore"].ends_with("petstore/index.js"));
    let entry = std::fs::read_to_string(&map["petstore"]).unwrap();
    assert!(entry.contains("export * from \"./client.js\";"));
}

#[tokio::test]
async fn upload_without_a_spec_field_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let app = router(state(tmp.path(), Some(Arc::new(FakeGenerator))));

    let boundary = "ISLET-TEST-BOUNDARY";
    let body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"name\"\r\n\r\n\
         Petstore\r\n\
         --{boundary}--\r\n"
    );
    let request = Request::builder()
        .method("POST")
        .uri("/sdk/upload")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("spec"));
}
