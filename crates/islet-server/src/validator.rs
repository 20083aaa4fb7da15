//! Pre-execution snippet validation for the HTTP front-end.
//!
//! This blocklist is **belt-and-braces**; the isolate and the static module
//! graph are the real security boundary. Catching the obvious patterns here
//! gives better error messages and keeps junk out of the runtime.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Patterns that are rejected before a snippet reaches the sandbox.
static SNIPPET_BLOCKLIST: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"process\.",
        r"require\s*\(",
        r"\bimport\s*\(",
        r"\bfs\b",
        r"\bchild_process\b",
        r"\bworker_threads\b",
        r"\bvm\b",
        r"\bcluster\b",
        r"\bnet\b",
        r"\btls\b",
        r"\bdgram\b",
        r"\binspector\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("blocklist pattern must compile"))
    .collect()
});

/// Why a snippet was rejected before execution.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SnippetRejection {
    /// Empty or whitespace-only snippet.
    #[error("snippet is empty")]
    Empty,

    /// Snippet longer than the configured bound.
    #[error("snippet exceeds maximum length of {max} characters (got {actual})")]
    TooLong {
        /// Maximum allowed length.
        max: usize,
        /// Actual length.
        actual: usize,
    },

    /// Snippet matched the keyword blocklist.
    #[error("snippet contains disallowed APIs")]
    DisallowedApi,
}

/// Validate an incoming snippet against length bounds and the blocklist.
pub fn validate_snippet(snippet: &str, max_len: usize) -> Result<(), SnippetRejection> {
    if snippet.trim().is_empty() {
        return Err(SnippetRejection::Empty);
    }
    if snippet.len() > max_len {
        return Err(SnippetRejection::TooLong {
            max: max_len,
            actual: snippet.len(),
        });
    }
    if SNIPPET_BLOCKLIST.iter().any(|re| re.is_match(snippet)) {
        return Err(SnippetRejection::DisallowedApi);
    }
    Ok(())
}
