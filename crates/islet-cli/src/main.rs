#![warn(missing_docs)]

//! islet, the sandboxed snippet runtime with generated SDKs.
//!
//! Wires the registry, the host bridge, and the sandbox executor together
//! and serves the HTTP front-end.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use islet_bridge::ReqwestBridge;
use islet_config::IsletConfig;
use islet_registry::SdkRegistry;
use islet_sandbox::{SandboxConfig, SandboxExecutor};
use islet_server::generator::{clean_sdk_root, CommandGenerator, SdkGenerator};
use islet_server::{router, AppState};
use tracing_subscriber::EnvFilter;

/// Build SandboxConfig from config overrides.
fn build_sandbox_config(overrides: &islet_config::SandboxOverrides) -> SandboxConfig {
    let mut config = SandboxConfig::default();
    if let Some(ms) = overrides.timeout_ms {
        config.timeout = Duration::from_millis(ms);
    }
    if let Some(mb) = overrides.memory_limit_mb {
        config.memory_limit = mb * 1024 * 1024;
    }
    if let Some(size) = overrides.max_code_size {
        config.max_code_size = size;
    }
    if let Some(size) = overrides.max_output_size {
        config.max_output_size = size;
    }
    if let Some(n) = overrides.max_concurrent {
        config.max_concurrent = n;
    }
    if let Some(n) = overrides.max_bridge_calls {
        config.max_bridge_calls = n;
    }
    if let Some(ms) = overrides.bridge_timeout_ms {
        config.bridge_timeout = Duration::from_millis(ms);
    }
    config
}

/// Locate the config file.
///
/// Search order:
/// 1. `ISLET_CONFIG` environment variable
/// 2. `./islet.toml` in the current directory
/// 3. None (no config file found, which is not an error)
fn find_config_file() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("ISLET_CONFIG") {
        let p = PathBuf::from(path);
        if p.exists() {
            return Some(p);
        }
    }

    let cwd = PathBuf::from("islet.toml");
    if cwd.exists() {
        return Some(cwd);
    }

    None
}

#[tokio::main]
async fn main() -> Result<()> {
    // Handle --version / -V before anything else
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("islet {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Load config
    let mut config = match find_config_file() {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading config");
            IsletConfig::from_file_with_env(&path)
                .with_context(|| format!("failed to load config from {}", path.display()))?
        }
        None => {
            tracing::info!("no config file found, using defaults");
            IsletConfig::default()
        }
    };
    config.apply_env_overrides();

    // The ephemeral default root starts from a clean state each run; an
    // explicitly configured root is preserved.
    let sdk_root = config.effective_sdk_root();
    if config.sdk_root.is_none() {
        clean_sdk_root(&sdk_root)
            .with_context(|| format!("failed to reset SDK root {}", sdk_root.display()))?;
    } else {
        std::fs::create_dir_all(&sdk_root)
            .with_context(|| format!("failed to create SDK root {}", sdk_root.display()))?;
    }

    let registry = Arc::new(SdkRegistry::new(&sdk_root));
    let bridge = Arc::new(ReqwestBridge::new().context("failed to build host bridge")?);
    let sandbox_config = build_sandbox_config(&config.sandbox);
    let max_snippet_len = sandbox_config.max_code_size;
    let executor = Arc::new(SandboxExecutor::new(
        sandbox_config,
        Arc::clone(&registry),
        bridge,
    ));

    let generator: Option<Arc<dyn SdkGenerator>> = config.generator.as_ref().map(|g| {
        Arc::new(CommandGenerator::new(g.command.clone(), g.args.clone())) as Arc<dyn SdkGenerator>
    });
    if generator.is_none() {
        tracing::info!("no SDK generator configured, /sdk/upload is disabled");
    }

    let state = AppState {
        executor,
        registry,
        generator,
        max_snippet_len,
    };

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(addr = %addr, sdk_root = %sdk_root.display(), "islet listening");

    axum::serve(listener, router(state))
        .await
        .context("server error")?;
    Ok(())
}
