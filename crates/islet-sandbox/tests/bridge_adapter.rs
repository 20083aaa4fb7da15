//! Tests for the generated bridge adapter: request shaping, auth headers,
//! response translation, and error construction, all against bridge doubles.

use std::path::Path;
use std::sync::{Arc, Mutex};

use islet_error::BridgeError;
use islet_registry::SdkRegistry;
use islet_sandbox::{
    BridgeBody, BridgeRequest, BridgeResponse, HttpBridge, RunResult, SandboxConfig,
    SandboxExecutor,
};

/// Echoes POST bodies back with 201, serves 500 for `/fail` paths.
struct EchoBridge;

#[async_trait::async_trait]
impl HttpBridge for EchoBridge {
    async fn send(&self, request: BridgeRequest) -> Result<BridgeResponse, BridgeError> {
        let json_headers = [("content-type".to_string(), "application/json".to_string())]
            .into_iter()
            .collect();
        if request.url.contains("/fail") {
            return Ok(BridgeResponse {
                ok: false,
                status: 500,
                headers: json_headers,
                body_text: r#"{"msg":"nope"}"#.to_string(),
            });
        }
        let body_text = match request.body {
            Some(BridgeBody::Text(text)) => text,
            _ => "null".to_string(),
        };
        Ok(BridgeResponse {
            ok: true,
            status: 201,
            headers: json_headers,
            body_text,
        })
    }
}

/// Records every request and returns an empty 200.
struct RecordingBridge {
    requests: Arc<Mutex<Vec<BridgeRequest>>>,
}

#[async_trait::async_trait]
impl HttpBridge for RecordingBridge {
    async fn send(&self, request: BridgeRequest) -> Result<BridgeResponse, BridgeError> {
        self.requests.lock().unwrap().push(request);
        Ok(BridgeResponse {
            ok: true,
            status: 200,
            headers: Default::default(),
            body_text: "{}".to_string(),
        })
    }
}

/// Always fails at the transport level.
struct DeadBridge;

#[async_trait::async_trait]
impl HttpBridge for DeadBridge {
    async fn send(&self, request: BridgeRequest) -> Result<BridgeResponse, BridgeError> {
        Err(BridgeError::Connect {
            url: request.url,
            message: "connection refused".to_string(),
        })
    }
}

fn write_petstore_sdk(root: &Path, extra_config: &str) {
    let sdk_dir = root.join("petstore");
    std::fs::create_dir_all(&sdk_dir).unwrap();
    std::fs::write(
        sdk_dir.join("index.js"),
        format!(
            r#"
export const OpenAPI = {{
  BASE: "https://api.example.test",
  VERSION: "1.0.0",
  TOKEN: undefined,
  USERNAME: undefined,
  PASSWORD: undefined,
  HEADERS: undefined,
  ENCODE_PATH: undefined,
  HTTP: undefined,
  TIMEOUT: 1000,
{extra_config}
}};

export class PetsService {{
  static listPets(filter) {{
    return OpenAPI.HTTP.request({{ method: "GET", path: "/pets", query: filter }});
  }}
  static createPet(body) {{
    return OpenAPI.HTTP.request({{
      method: "POST",
      path: "/pets",
      body,
      mediaType: "application/json",
    }});
  }}
  static brokenPet() {{
    return OpenAPI.HTTP.request({{ method: "GET", path: "/fail" }});
  }}
}}
"#
        ),
    )
    .unwrap();
}

fn executor(root: &Path, bridge: Arc<dyn HttpBridge>) -> SandboxExecutor {
    executor_with(root, bridge, SandboxConfig::default())
}

fn executor_with(
    root: &Path,
    bridge: Arc<dyn HttpBridge>,
    config: SandboxConfig,
) -> SandboxExecutor {
    SandboxExecutor::new(config, Arc::new(SdkRegistry::new(root)), bridge)
}

fn expect_value(result: RunResult) -> serde_json::Value {
    match result {
        RunResult::Success { value, .. } => value,
        other => panic!("expected success, got {other:?}"),
    }
}

#[tokio::test]
async fn created_resource_round_trips_through_the_bridge() {
    let tmp = tempfile::tempdir().unwrap();
    write_petstore_sdk(tmp.path(), "");

    let value = expect_value(
        executor(tmp.path(), Arc::new(EchoBridge))
            .run_snippet(r#"return await sdk.petstore.PetsService.createPet({ name: "rex" });"#)
            .await,
    );
    assert_eq!(value, serde_json::json!({ "name": "rex" }));
}

#[tokio::test]
async fn non_2xx_responses_become_thrown_errors_with_status_and_body() {
    let tmp = tempfile::tempdir().unwrap();
    write_petstore_sdk(tmp.path(), "");

    let value = expect_value(
        executor(tmp.path(), Arc::new(EchoBridge))
            .run_snippet(
                r#"
                try {
                    await sdk.petstore.PetsService.brokenPet();
                    return "unreachable";
                } catch (e) {
                    return { status: e.status, message: e.message, body: e.body };
                }
                "#,
            )
            .await,
    );
    assert_eq!(value["status"], 500);
    assert_eq!(value["body"], serde_json::json!({ "msg": "nope" }));
    assert!(value["message"].as_str().unwrap().contains("500"));
}

#[tokio::test]
async fn adapter_assembles_url_query_and_bearer_auth() {
    let tmp = tempfile::tempdir().unwrap();
    write_petstore_sdk(tmp.path(), r#"  TOKEN: "sekret","#);

    let requests = Arc::new(Mutex::new(Vec::new()));
    let bridge = Arc::new(RecordingBridge {
        requests: Arc::clone(&requests),
    });

    expect_value(
        executor(tmp.path(), bridge)
            .run_snippet(r#"return await sdk.petstore.PetsService.listPets({ limit: 2 });"#)
            .await,
    );

    let recorded = requests.lock().unwrap();
    assert_eq!(recorded.len(), 1);
    let request = &recorded[0];
    assert_eq!(request.method, "GET");
    assert_eq!(request.url, "https://api.example.test/pets?limit=2");
    assert_eq!(
        request.headers.get("Authorization").map(String::as_str),
        Some("Bearer sekret")
    );
    assert_eq!(request.timeout_ms, Some(1000));
}

#[tokio::test]
async fn adapter_serializes_json_bodies_and_content_type() {
    let tmp = tempfile::tempdir().unwrap();
    write_petstore_sdk(tmp.path(), "");

    let requests = Arc::new(Mutex::new(Vec::new()));
    let bridge = Arc::new(RecordingBridge {
        requests: Arc::clone(&requests),
    });

    expect_value(
        executor(tmp.path(), bridge)
            .run_snippet(r#"return await sdk.petstore.PetsService.createPet({ name: "rex" });"#)
            .await,
    );

    let recorded = requests.lock().unwrap();
    let request = &recorded[0];
    assert_eq!(request.method, "POST");
    assert_eq!(
        request.headers.get("Content-Type").map(String::as_str),
        Some("application/json")
    );
    match &request.body {
        Some(BridgeBody::Text(text)) => {
            assert_eq!(
                serde_json::from_str::<serde_json::Value>(text).unwrap(),
                serde_json::json!({ "name": "rex" })
            );
        }
        other => panic!("expected a text body, got {other:?}"),
    }
}

#[tokio::test]
async fn transport_failures_surface_as_plain_catchable_errors() {
    let tmp = tempfile::tempdir().unwrap();
    write_petstore_sdk(tmp.path(), "");

    let value = expect_value(
        executor(tmp.path(), Arc::new(DeadBridge))
            .run_snippet(
                r#"
                try {
                    await sdk.petstore.PetsService.listPets();
                    return "unreachable";
                } catch (e) {
                    return String(e.message || e);
                }
                "#,
            )
            .await,
    );
    let message = value.as_str().unwrap();
    assert!(message.contains("bridge transport failure"), "{message}");
    assert!(message.contains("CONNECT_FAILED"), "{message}");
}

#[tokio::test]
async fn bridge_call_budget_is_enforced_per_execution() {
    let tmp = tempfile::tempdir().unwrap();
    write_petstore_sdk(tmp.path(), "");

    let exec = executor_with(
        tmp.path(),
        Arc::new(EchoBridge),
        SandboxConfig {
            max_bridge_calls: 1,
            ..Default::default()
        },
    );

    let value = expect_value(
        exec.run_snippet(
            r#"
            await sdk.petstore.PetsService.createPet({ n: 1 });
            try {
                await sdk.petstore.PetsService.createPet({ n: 2 });
                return "unbounded";
            } catch (e) {
                return String(e.message || e);
            }
            "#,
        )
        .await,
    );
    assert!(
        value.as_str().unwrap().contains("bridge call limit"),
        "{value}"
    );
}
