//! Namespace sanitization and collision-free SDK folder creation.

use std::io;
use std::path::{Path, PathBuf};

/// Upper bound on suffix probing before giving up.
const MAX_SUFFIX_ATTEMPTS: u32 = 10_000;

/// Sanitize a caller-preferred SDK name into an identifier.
///
/// The trimmed input must consist solely of ASCII alphanumerics and
/// underscores; anything else rejects the whole name. Empty or absent input
/// yields an empty string.
pub fn sanitize_base_name(input: Option<&str>) -> String {
    let trimmed = input.unwrap_or("").trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        trimmed.to_string()
    } else {
        String::new()
    }
}

/// A freshly created, uniquely named SDK folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdkFolder {
    /// The namespace the SDK will be exposed under (`sdk.<namespace>`).
    pub namespace: String,
    /// Absolute path of the created folder under the SDK root.
    pub path: PathBuf,
}

/// Create a uniquely named folder for a new SDK under `root`.
///
/// The namespace seed is the sanitized, lower-cased preferred name (falling
/// back to `sdk` when sanitization rejects everything). Uniqueness is
/// enforced by exclusive creation: `create_dir` either claims the name or
/// fails with `AlreadyExists`, in which case the next numeric suffix is
/// probed. This keeps concurrent registrations with the same preferred name
/// from ever colliding, where a plain existence check would not.
pub fn create_unique_sdk_folder(root: &Path, preferred: Option<&str>) -> io::Result<SdkFolder> {
    std::fs::create_dir_all(root)?;

    let sanitized = sanitize_base_name(preferred).to_lowercase();
    let seed = if sanitized.is_empty() {
        "sdk".to_string()
    } else {
        sanitized
    };

    for attempt in 1..=MAX_SUFFIX_ATTEMPTS {
        let namespace = if attempt == 1 {
            seed.clone()
        } else {
            format!("{seed}_{attempt}")
        };
        let path = root.join(&namespace);

        match std::fs::create_dir(&path) {
            Ok(()) => {
                tracing::debug!(namespace = %namespace, path = %path.display(), "created SDK folder");
                return Ok(SdkFolder { namespace, path });
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }

    Err(io::Error::other(format!(
        "exhausted {MAX_SUFFIX_ATTEMPTS} candidate names for SDK folder '{seed}'"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_allows_alphanumerics_and_underscore_only() {
        assert_eq!(sanitize_base_name(Some("Good_Name_123")), "Good_Name_123");
        assert_eq!(sanitize_base_name(Some("has-dash")), "");
        assert_eq!(sanitize_base_name(Some(" spaced ")), "spaced");
        assert_eq!(sanitize_base_name(Some("päth")), "");
        assert_eq!(sanitize_base_name(None), "");
    }

    #[test]
    fn sequential_requests_get_distinct_folders() {
        let tmp = tempfile::tempdir().unwrap();

        let a = create_unique_sdk_folder(tmp.path(), Some("MySDK")).unwrap();
        let b = create_unique_sdk_folder(tmp.path(), Some("MySDK")).unwrap();

        assert_eq!(a.namespace, "mysdk");
        assert_ne!(a.namespace, b.namespace);
        assert!(b.namespace.starts_with("mysdk"));
        assert!(a.path.starts_with(tmp.path()));
        assert!(b.path.starts_with(tmp.path()));
        assert!(a.path.is_dir());
        assert!(b.path.is_dir());
    }

    #[test]
    fn rejected_names_fall_back_to_sdk_seed() {
        let tmp = tempfile::tempdir().unwrap();
        let folder = create_unique_sdk_folder(tmp.path(), Some("!!!")).unwrap();
        assert_eq!(folder.namespace, "sdk");
    }

    #[test]
    fn concurrent_requests_never_collide() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().to_path_buf();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let root = root.clone();
                std::thread::spawn(move || {
                    create_unique_sdk_folder(&root, Some("Shared")).unwrap()
                })
            })
            .collect();

        let mut namespaces: Vec<String> = handles
            .into_iter()
            .map(|h| h.join().unwrap().namespace)
            .collect();
        namespaces.sort();
        namespaces.dedup();
        assert_eq!(namespaces.len(), 8, "every request must get its own folder");
    }
}
