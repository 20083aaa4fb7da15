#![warn(missing_docs)]

//! # islet-registry
//!
//! Discovery and caching of generated SDKs for the islet snippet runtime.
//!
//! An SDK is a directory directly under the configured SDK root that contains
//! a recognized entry module (`index.js` or `index.mjs`). Discovery produces
//! a namespace → entry-file mapping; the namespace is the directory's base
//! name, which [`names::sanitize_base_name`] guarantees is a usable
//! source-code binding name at folder-creation time.
//!
//! The mapping is cached process-wide in a single shared slot and replaced
//! atomically; readers always observe a whole snapshot, never a partially
//! built one. [`SdkRegistry::invalidate`] resets the slot so the next read
//! re-scans the root.

pub mod names;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Namespace → absolute path of the SDK's entry module.
///
/// Ordered so downstream source synthesis is deterministic for a given set
/// of registered SDKs.
pub type SdkMap = BTreeMap<String, PathBuf>;

/// Entry module file names that qualify a directory as an SDK.
const ENTRY_CANDIDATES: &[&str] = &["index.js", "index.mjs"];

/// Scan the immediate subdirectories of `root` for SDKs.
///
/// A missing or unreadable root yields an empty mapping; a cold start with
/// zero registered SDKs is not an error. Subdirectories without a recognized
/// entry module are silently skipped.
pub fn discover(root: &Path) -> SdkMap {
    let mut map = SdkMap::new();

    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(_) => {
            tracing::debug!(root = %root.display(), "SDK root not readable, yielding empty mapping");
            return map;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(namespace) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        if let Some(entry_file) = find_entry_module(&path) {
            map.insert(namespace.to_string(), entry_file);
        } else {
            tracing::debug!(dir = %path.display(), "skipping directory without entry module");
        }
    }

    map
}

fn find_entry_module(dir: &Path) -> Option<PathBuf> {
    ENTRY_CANDIDATES
        .iter()
        .map(|candidate| dir.join(candidate))
        .find(|p| p.is_file())
}

/// Process-wide registry of discovered SDKs.
///
/// One instance is shared between the executor (which snapshots the mapping
/// per run) and the registration front-end (which invalidates after writing
/// a new SDK to disk).
pub struct SdkRegistry {
    root: PathBuf,
    cache: RwLock<Option<Arc<SdkMap>>>,
    generation: AtomicU64,
}

impl SdkRegistry {
    /// Create a registry over the given SDK root. No I/O happens until the
    /// first [`cached`](Self::cached) call.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: RwLock::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// The SDK root this registry scans.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Return the cached mapping, scanning the root on first use.
    ///
    /// Concurrent callers observe the same `Arc` snapshot. A scan that raced
    /// with an [`invalidate`](Self::invalidate) still returns its fresh
    /// result to the caller, but does not install it; the invalidation wins
    /// and the next call re-scans.
    pub fn cached(&self) -> Arc<SdkMap> {
        if let Some(map) = self.cache.read().expect("registry cache poisoned").as_ref() {
            return Arc::clone(map);
        }

        let started_at = self.generation.load(Ordering::Acquire);
        let fresh = Arc::new(discover(&self.root));

        let mut slot = self.cache.write().expect("registry cache poisoned");
        if self.generation.load(Ordering::Acquire) == started_at {
            match slot.as_ref() {
                // Another caller installed a snapshot while we scanned;
                // share theirs so every reader holds the same object.
                Some(existing) => return Arc::clone(existing),
                None => *slot = Some(Arc::clone(&fresh)),
            }
        }
        fresh
    }

    /// Drop the cached mapping so the next [`cached`](Self::cached) call
    /// re-scans the root. Call after registering a new SDK on disk.
    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        *self.cache.write().expect("registry cache poisoned") = None;
        tracing::debug!(root = %self.root.display(), "SDK cache invalidated");
    }
}

impl std::fmt::Debug for SdkRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SdkRegistry")
            .field("root", &self.root)
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .finish()
    }
}
