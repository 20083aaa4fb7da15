#![warn(missing_docs)]

//! # islet-config
//!
//! Configuration loading for the islet snippet runtime.
//!
//! Supports TOML configuration files with environment variable expansion,
//! plus a small set of environment overrides for deployments that only need
//! to retarget the SDK root or the execution limits.
//!
//! ## Example
//!
//! ```toml
//! sdk_root = "/var/lib/islet/sdks"
//!
//! [sandbox]
//! timeout_ms = 60000
//! memory_limit_mb = 128
//! max_concurrent = 8
//!
//! [server]
//! host = "0.0.0.0"
//! port = 3000
//!
//! [generator]
//! command = "openapi-generator"
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Environment variable overriding the SDK root directory.
pub const ENV_SDK_ROOT: &str = "ISLET_SDK_ROOT";
/// Environment variable overriding the sandbox memory ceiling (MiB).
pub const ENV_MEM_MB: &str = "ISLET_MEM_MB";
/// Environment variable overriding the execution timeout (milliseconds).
pub const ENV_TIMEOUT_MS: &str = "ISLET_TIMEOUT_MS";

/// Errors from config parsing.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Invalid configuration value.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level islet configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IsletConfig {
    /// Directory where generated SDKs are written and discovered.
    ///
    /// Defaults to an ephemeral location under the system temp dir, so a
    /// disposable compute environment does not accidentally persist SDKs
    /// across runs.
    #[serde(default)]
    pub sdk_root: Option<PathBuf>,

    /// Sandbox execution settings.
    #[serde(default)]
    pub sandbox: SandboxOverrides,

    /// HTTP front-end settings.
    #[serde(default)]
    pub server: ServerOverrides,

    /// External SDK generator collaborator, if one is deployed.
    #[serde(default)]
    pub generator: Option<GeneratorConfig>,
}

/// Sandbox configuration overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SandboxOverrides {
    /// Execution timeout in milliseconds, applied to both timeout phases.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// V8 heap ceiling in MiB.
    #[serde(default)]
    pub memory_limit_mb: Option<usize>,

    /// Maximum snippet size in bytes.
    #[serde(default)]
    pub max_code_size: Option<usize>,

    /// Maximum serialized result size in bytes.
    #[serde(default)]
    pub max_output_size: Option<usize>,

    /// Maximum concurrent sandbox executions.
    #[serde(default)]
    pub max_concurrent: Option<usize>,

    /// Maximum bridge calls per execution.
    #[serde(default)]
    pub max_bridge_calls: Option<usize>,

    /// Default per-request bridge timeout in milliseconds.
    #[serde(default)]
    pub bridge_timeout_ms: Option<u64>,
}

/// HTTP front-end overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerOverrides {
    /// Bind address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerOverrides {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

/// Configuration for the external OpenAPI-to-client generator.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneratorConfig {
    /// Command to execute.
    pub command: String,

    /// Extra arguments, prepended before the spec/output paths.
    #[serde(default)]
    pub args: Vec<String>,
}

impl IsletConfig {
    /// Parse a config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: IsletConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse a config from a TOML string, expanding `${ENV_VAR}` references.
    pub fn from_toml_with_env(toml_str: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(toml_str);
        Self::from_toml(&expanded)
    }

    /// Load config from a file path, expanding environment variables.
    pub fn from_file_with_env(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_with_env(&content)
    }

    /// Apply `ISLET_*` environment overrides on top of the loaded values.
    ///
    /// Overrides win over the file so containerized deployments can retarget
    /// the SDK root and limits without editing the config.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(root) = std::env::var(ENV_SDK_ROOT) {
            if !root.is_empty() {
                self.sdk_root = Some(PathBuf::from(root));
            }
        }
        if let Ok(mem) = std::env::var(ENV_MEM_MB) {
            if let Ok(mb) = mem.parse::<usize>() {
                self.sandbox.memory_limit_mb = Some(mb);
            }
        }
        if let Ok(timeout) = std::env::var(ENV_TIMEOUT_MS) {
            if let Ok(ms) = timeout.parse::<u64>() {
                self.sandbox.timeout_ms = Some(ms);
            }
        }
    }

    /// The SDK root to use: configured value, or the ephemeral default.
    pub fn effective_sdk_root(&self) -> PathBuf {
        self.sdk_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("islet-sdks"))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.sandbox.timeout_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "sandbox.timeout_ms must be greater than zero".into(),
            ));
        }
        if self.sandbox.memory_limit_mb == Some(0) {
            return Err(ConfigError::Invalid(
                "sandbox.memory_limit_mb must be greater than zero".into(),
            ));
        }
        if let Some(generator) = &self.generator {
            if generator.command.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "generator.command must not be empty".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Expand `${ENV_VAR}` patterns in a string using environment variables.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(value) => result.push_str(&value),
                Err(_) => {
                    // Leave the placeholder if env var not found
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(ch);
        }
    }

    result
}
