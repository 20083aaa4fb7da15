//! The out-of-scope OpenAPI-to-client generator, seen only at its interface.
//!
//! The front-end materializes generated SDK files on disk through a
//! [`SdkGenerator`] implementation; [`CommandGenerator`] shells out to
//! whatever generator the deployment configured. When a generator produces
//! no recognized entry module, [`ensure_entry_module`] synthesizes a
//! fallback so registry discovery still succeeds.

use std::path::{Path, PathBuf};

use anyhow::Context;

/// Interface to the external code-generation collaborator.
#[async_trait::async_trait]
pub trait SdkGenerator: Send + Sync {
    /// Generate a client library from `spec_path` into `out_dir`.
    async fn generate(&self, spec_path: &Path, out_dir: &Path) -> anyhow::Result<()>;
}

/// Runs a configured generator command as a child process.
///
/// The command is invoked as
/// `<command> <args...> --input <spec> --output <out_dir>`.
pub struct CommandGenerator {
    command: String,
    args: Vec<String>,
}

impl CommandGenerator {
    /// Create a generator for the given command and fixed arguments.
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }
}

#[async_trait::async_trait]
impl SdkGenerator for CommandGenerator {
    async fn generate(&self, spec_path: &Path, out_dir: &Path) -> anyhow::Result<()> {
        tracing::info!(
            command = %self.command,
            spec = %spec_path.display(),
            out = %out_dir.display(),
            "running SDK generator"
        );

        let output = tokio::process::Command::new(&self.command)
            .args(&self.args)
            .arg("--input")
            .arg(spec_path)
            .arg("--output")
            .arg(out_dir)
            .output()
            .await
            .with_context(|| format!("failed to spawn SDK generator '{}'", self.command))?;

        if !output.status.success() {
            anyhow::bail!(
                "SDK generator exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

/// Make sure `dir` carries an entry module the registry will recognize.
///
/// When the generator produced none, writes a fallback `index.js` that
/// re-exports every generated top-level module, so
/// `import * as <namespace>` still sees the client surface.
pub fn ensure_entry_module(dir: &Path) -> std::io::Result<PathBuf> {
    for candidate in ["index.js", "index.mjs"] {
        let path = dir.join(candidate);
        if path.is_file() {
            return Ok(path);
        }
    }

    let mut modules: Vec<String> = std::fs::read_dir(dir)?
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_string();
            (name.ends_with(".js") && entry.path().is_file()).then_some(name)
        })
        .collect();
    modules.sort();

    let mut content = String::from("// Auto-generated fallback entry module\n");
    for module in &modules {
        content.push_str(&format!("export * from \"./{module}\";\n"));
    }

    let index_path = dir.join("index.js");
    std::fs::write(&index_path, content)?;
    tracing::info!(path = %index_path.display(), "entry module was missing, wrote fallback re-exports");
    Ok(index_path)
}

/// Reset the SDK root to a clean state. Used at startup for the ephemeral
/// default root.
pub fn clean_sdk_root(root: &Path) -> std::io::Result<()> {
    if root.exists() {
        std::fs::remove_dir_all(root)?;
    }
    std::fs::create_dir_all(root)
}
