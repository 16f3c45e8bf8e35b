//! Path policy for key spaces.
//!
//! Every file operation goes through here before touching the disk: the token
//! must be a single plain directory name and the relative path must stay
//! inside `root/<token>`, both lexically and after following symlinks.

use crate::types::KeyspaceError;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Longest token accepted as a directory name.
const MAX_TOKEN_LEN: usize = 128;

/// Checks that `token` can be used as a key directory name.
///
/// # Errors
///
/// Returns [`KeyspaceError::InvalidToken`] unless the token is non-empty, at
/// most 128 bytes, and made only of ASCII letters, digits, `-` and `_`.
pub fn validate_token(token: &str) -> Result<(), KeyspaceError> {
    let well_formed = !token.is_empty()
        && token.len() <= MAX_TOKEN_LEN
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');

    if well_formed {
        Ok(())
    } else {
        Err(KeyspaceError::InvalidToken(token.to_string()))
    }
}

/// Normalizes a caller-supplied relative path.
///
/// `.` components are dropped. Absolute paths, drive prefixes and `..` are
/// rejected, as is anything that normalizes to nothing.
///
/// # Errors
///
/// Returns [`KeyspaceError::InvalidRelativePath`] describing the first problem found.
pub fn normalize_relative(relative: &str) -> Result<PathBuf, KeyspaceError> {
    let reject = |reason| KeyspaceError::InvalidRelativePath {
        path: relative.to_string(),
        reason,
    };

    if relative.contains('\0') {
        return Err(reject("contains a NUL byte"));
    }

    let mut normalized = PathBuf::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => return Err(reject("contains a parent directory component")),
            Component::RootDir | Component::Prefix(_) => return Err(reject("is not relative")),
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(reject("does not name a file"));
    }
    Ok(normalized)
}

/// Verifies that `candidate`, once symlinks are resolved, still lives under
/// `key_dir`.
///
/// The deepest existing ancestor of `candidate` is canonicalized and compared;
/// parts that do not exist yet cannot redirect anything. `key_dir` must itself
/// be canonical apart from its final component.
///
/// # Errors
///
/// Returns [`KeyspaceError::InvalidRelativePath`] if the path resolves outside
/// `key_dir` or through a dangling symlink.
pub fn ensure_contained(
    key_dir: &Path,
    candidate: &Path,
    relative: &str,
) -> Result<(), KeyspaceError> {
    let escape = || KeyspaceError::InvalidRelativePath {
        path: relative.to_string(),
        reason: "resolves outside the key space",
    };

    let mut probe = Some(candidate);
    while let Some(path) = probe {
        if !path.starts_with(key_dir) {
            // The key directory does not exist yet.
            return Ok(());
        }
        if fs::symlink_metadata(path).is_ok() {
            let resolved = dunce::canonicalize(path).map_err(|_| escape())?;
            return if resolved.starts_with(key_dir) {
                Ok(())
            } else {
                Err(escape())
            };
        }
        probe = path.parent();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_validate_token_accepts_issued_shape() {
        assert!(validate_token("0b6f1d2e-8f0a-4a5e-9f3c-2d1e0c9b8a7f").is_ok());
        assert!(validate_token("abc_DEF-123").is_ok());
    }

    #[test]
    fn test_validate_token_rejects_traversal() {
        for bad in ["", ".", "..", "a/b", "a\\b", "../etc", "a b", "tok\0en"] {
            let err = validate_token(bad).unwrap_err();
            assert!(matches!(err, KeyspaceError::InvalidToken(_)), "{bad:?}");
        }
        assert!(validate_token(&"a".repeat(MAX_TOKEN_LEN + 1)).is_err());
    }

    #[test]
    fn test_normalize_relative() -> anyhow::Result<()> {
        assert_eq!(normalize_relative("a.txt")?, PathBuf::from("a.txt"));
        assert_eq!(normalize_relative("./dir/./b.txt")?, PathBuf::from("dir/b.txt"));
        Ok(())
    }

    #[test]
    fn test_normalize_relative_rejects_escapes() {
        for bad in ["", ".", "..", "../a.txt", "dir/../../a.txt", "/etc/passwd", "a\0b"] {
            let err = normalize_relative(bad).unwrap_err();
            assert!(
                matches!(err, KeyspaceError::InvalidRelativePath { .. }),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn test_ensure_contained_missing_key_dir() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let key_dir = dunce::canonicalize(dir.path())?.join("token");
        ensure_contained(&key_dir, &key_dir.join("a/b.txt"), "a/b.txt")?;
        Ok(())
    }

    #[test]
    fn test_ensure_contained_existing_file() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let key_dir = dunce::canonicalize(dir.path())?.join("token");
        std::fs::create_dir_all(key_dir.join("sub"))?;
        std::fs::write(key_dir.join("sub/file.txt"), "x")?;

        ensure_contained(&key_dir, &key_dir.join("sub/file.txt"), "sub/file.txt")?;
        ensure_contained(&key_dir, &key_dir.join("sub/new.txt"), "sub/new.txt")?;
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_ensure_contained_rejects_symlink_escape() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let root = dunce::canonicalize(dir.path())?;
        let outside = root.join("outside");
        std::fs::create_dir_all(&outside)?;
        let key_dir = root.join("token");
        std::fs::create_dir_all(&key_dir)?;
        std::os::unix::fs::symlink(&outside, key_dir.join("link"))?;
        std::os::unix::fs::symlink(root.join("missing"), key_dir.join("dangling"))?;

        let escaped = ensure_contained(&key_dir, &key_dir.join("link/secret.txt"), "link/secret.txt");
        assert!(escaped.is_err());

        let dangling = ensure_contained(&key_dir, &key_dir.join("dangling"), "dangling");
        assert!(dangling.is_err());
        Ok(())
    }
}
