//! Directory operations backing key spaces.
//!
//! Creation, removal and orphan sweeping of `root/<token>` directories.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::infrastructure::audit::{redact_key_path, token_prefix};
use crate::types::KeyspaceError;

/// Destroys whatever lives at `root` and recreates it as an empty directory.
/// Returns the canonical form of the new root.
pub(crate) fn reset_root(root: &Path) -> Result<PathBuf, KeyspaceError> {
    let reset_failed = |source| KeyspaceError::RootReset {
        path: root.to_path_buf(),
        source,
    };

    if let Ok(metadata) = fs::symlink_metadata(root) {
        warn!("Removing existing contents of root directory {:?}", root);
        if metadata.is_dir() {
            fs::remove_dir_all(root).map_err(reset_failed)?;
        } else {
            fs::remove_file(root).map_err(reset_failed)?;
        }
    }

    fs::create_dir_all(root).map_err(reset_failed)?;
    let canonical = dunce::canonicalize(root).map_err(reset_failed)?;
    info!("Root directory ready: {:?}", canonical);
    Ok(canonical)
}

/// Creates `root/<token>` if it does not exist yet and returns its path.
pub(crate) fn ensure_key_dir(root: &Path, token: &str) -> Result<PathBuf, KeyspaceError> {
    let key_dir = root.join(token);
    if key_dir.is_dir() {
        return Ok(key_dir);
    }
    fs::create_dir_all(&key_dir)
        .map_err(|e| KeyspaceError::io(redact_key_path(root, &key_dir), e))?;
    debug!(token = %token_prefix(token), "Created key directory");
    Ok(key_dir)
}

/// Removes `root/<token>` and everything under it. Returns `false` if there
/// was nothing to remove.
pub(crate) fn remove_key_dir(root: &Path, token: &str) -> Result<bool, KeyspaceError> {
    let key_dir = root.join(token);
    if fs::symlink_metadata(&key_dir).is_err() {
        return Ok(false);
    }
    fs::remove_dir_all(&key_dir).map_err(|e| KeyspaceError::CleanupFailed {
        path: redact_key_path(root, &key_dir),
        source: e,
    })?;
    debug!(token = %token_prefix(token), "Cleaned up key directory");
    Ok(true)
}

/// Removes every directory under `root` whose name `is_tracked` rejects.
pub(crate) fn cleanup_orphaned(
    root: &Path,
    is_tracked: impl Fn(&str) -> bool,
) -> Result<usize, KeyspaceError> {
    let mut cleaned = 0;

    if !root.exists() {
        return Ok(0);
    }

    let entries =
        fs::read_dir(root).map_err(|e| KeyspaceError::ReadDirectoryFailed(e.to_string()))?;

    for entry in entries {
        let entry = entry.map_err(|e| KeyspaceError::ReadDirectoryFailed(e.to_string()))?;
        let path = entry.path();

        if !path.is_dir() {
            continue;
        }

        let dir_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if !is_tracked(dir_name) {
            info!(token = %token_prefix(dir_name), "Cleaning up orphaned key directory");
            fs::remove_dir_all(&path).map_err(|e| KeyspaceError::CleanupFailed {
                path: redact_key_path(root, &path),
                source: e,
            })?;
            cleaned += 1;
        }
    }

    if cleaned > 0 {
        info!("Cleaned up {} orphaned key directories", cleaned);
    }

    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_reset_root_wipes_existing_contents() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let root = dir.path().join("root");
        fs::create_dir_all(root.join("stale/nested"))?;
        fs::write(root.join("stale/nested/file.txt"), "old")?;

        let canonical = reset_root(&root)?;
        assert!(canonical.is_dir());
        assert_eq!(fs::read_dir(&canonical)?.count(), 0);
        Ok(())
    }

    #[test]
    fn test_reset_root_replaces_plain_file() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let root = dir.path().join("root");
        fs::write(&root, "not a directory")?;

        reset_root(&root)?;
        assert!(root.is_dir());
        Ok(())
    }

    #[test]
    fn test_remove_key_dir_absent_is_noop() -> anyhow::Result<()> {
        let dir = tempdir()?;
        assert!(!remove_key_dir(dir.path(), "missing")?);
        Ok(())
    }

    #[test]
    fn test_ensure_and_remove_key_dir() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let key_dir = ensure_key_dir(dir.path(), "key")?;
        assert_eq!(key_dir, dir.path().join("key"));
        assert!(key_dir.is_dir());
        assert_eq!(ensure_key_dir(dir.path(), "key")?, key_dir);

        assert!(remove_key_dir(dir.path(), "key")?);
        assert!(!key_dir.exists());
        Ok(())
    }

    #[test]
    fn test_ensure_key_dir_error_hides_token() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let token = "0b6f1d2e-8f0a-4a5e-9c1d-7e2f3a4b5c6d";
        fs::write(dir.path().join(token), "in the way")?;

        let err = ensure_key_dir(dir.path(), token).unwrap_err();
        assert!(matches!(err, KeyspaceError::Io { .. }));
        assert!(!err.to_string().contains(token));
        assert!(err.to_string().contains("0b6f1d2e"));
        Ok(())
    }

    #[test]
    fn test_cleanup_orphaned_keeps_tracked() -> anyhow::Result<()> {
        let dir = tempdir()?;
        fs::create_dir(dir.path().join("tracked"))?;
        fs::create_dir(dir.path().join("orphan"))?;
        fs::write(dir.path().join("loose.txt"), "x")?;

        let cleaned = cleanup_orphaned(dir.path(), |name| name == "tracked")?;
        assert_eq!(cleaned, 1);
        assert!(dir.path().join("tracked").exists());
        assert!(!dir.path().join("orphan").exists());
        assert!(dir.path().join("loose.txt").exists());
        Ok(())
    }
}
