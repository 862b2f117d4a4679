//! Allowlist-based path validation.
//!
//! Every index request names a repository root on the local filesystem. The
//! sandbox refuses any root that does not resolve, after symlink resolution,
//! to a path inside one of the configured allowed roots. The check runs
//! before any file I/O.

use std::path::{Path, PathBuf};

use crate::error::ApiError;

pub struct Sandbox {
    allowed_roots: Vec<PathBuf>,
}

impl Sandbox {
    pub fn new(allowed_roots: &[PathBuf]) -> Self {
        Self {
            allowed_roots: allowed_roots.to_vec(),
        }
    }

    /// Resolve `path` (following symlinks) and verify it lies inside an
    /// allowed root. Returns the canonical path on success.
    pub fn resolve(&self, path: &Path) -> Result<PathBuf, ApiError> {
        let resolved = path
            .canonicalize()
            .map_err(|_| ApiError::PathNotAllowed(path.display().to_string()))?;

        for root in &self.allowed_roots {
            // Allowed roots are canonicalized at check time: they may be
            // created or re-mounted after startup.
            let Ok(root) = root.canonicalize() else {
                continue;
            };
            if resolved == root || resolved.starts_with(&root) {
                return Ok(resolved);
            }
        }

        Err(ApiError::PathNotAllowed(path.display().to_string()))
    }

    /// Containment check without the error, for per-file filtering.
    pub fn contains(&self, path: &Path) -> bool {
        self.resolve(path).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_path_inside_root_allowed() {
        let tmp = TempDir::new().unwrap();
        let repo = tmp.path().join("repo");
        std::fs::create_dir_all(repo.join("src")).unwrap();

        let sandbox = Sandbox::new(&[tmp.path().to_path_buf()]);
        assert!(sandbox.resolve(&repo).is_ok());
        assert!(sandbox.resolve(&repo.join("src")).is_ok());
    }

    #[test]
    fn test_path_outside_root_rejected() {
        let allowed = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();

        let sandbox = Sandbox::new(&[allowed.path().to_path_buf()]);
        let err = sandbox.resolve(outside.path()).unwrap_err();
        assert!(matches!(err, ApiError::PathNotAllowed(_)));
    }

    #[test]
    fn test_nonexistent_path_rejected() {
        let allowed = TempDir::new().unwrap();
        let sandbox = Sandbox::new(&[allowed.path().to_path_buf()]);
        assert!(sandbox.resolve(&allowed.path().join("missing")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_rejected() {
        let allowed = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let link = allowed.path().join("escape");
        std::os::unix::fs::symlink(outside.path(), &link).unwrap();

        let sandbox = Sandbox::new(&[allowed.path().to_path_buf()]);
        // The link sits under the allowed root but resolves outside it.
        assert!(sandbox.resolve(&link).is_err());
    }

    #[test]
    fn test_multiple_roots() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let sandbox = Sandbox::new(&[a.path().to_path_buf(), b.path().to_path_buf()]);
        assert!(sandbox.resolve(a.path()).is_ok());
        assert!(sandbox.resolve(b.path()).is_ok());
    }
}
