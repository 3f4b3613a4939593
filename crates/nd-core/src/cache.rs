//! Content-addressed package cache layout.
//!
//! Each `(name, version)` gets one directory under the cache root,
//! populated at most once. The presence of `package.json` (carrying the
//! `_integrity` digest) marks a completed entry; anything less is treated
//! as absent and re-extracted.

use crate::error::NdError;
use crate::paths;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Per-user package cache.
#[derive(Debug, Clone)]
pub struct PackageCache {
    root: PathBuf,
}

impl PackageCache {
    /// Create a cache rooted at the given directory.
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Create a cache at the platform default (or `ND_CACHE_DIR`) root.
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(paths::cache_root())
    }

    /// The cache root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The extracted-package directory for `(name, version)`.
    #[must_use]
    pub fn package_dir(&self, name: &str, version: &str) -> PathBuf {
        self.root.join("packages").join(name).join(version)
    }

    /// The advisory lock file path for `(name, version)`.
    #[must_use]
    pub fn lock_path(&self, name: &str, version: &str) -> PathBuf {
        let mut path: OsString = self.package_dir(name, version).into_os_string();
        path.push(".lock");
        PathBuf::from(path)
    }

    /// The manifest cache directory.
    #[must_use]
    pub fn manifest_root(&self) -> PathBuf {
        self.root.join("manifests")
    }

    /// Whether the entry for `(name, version)` is fully populated.
    #[must_use]
    pub fn is_populated(&self, name: &str, version: &str) -> bool {
        self.package_dir(name, version).join("package.json").exists()
    }
}

/// Rewrite an extracted package's `package.json` with the manifest-supplied
/// integrity digest. Completes the cache entry.
///
/// # Errors
/// Returns an error if `package.json` is missing, undecodable, or cannot be
/// rewritten.
pub fn set_integrity(dir: &Path, integrity: &str) -> Result<(), NdError> {
    let path = dir.join("package.json");
    debug!("set integrity on {}", path.display());

    let bytes = fs::read(&path)
        .map_err(|e| NdError::cache_error(format!("failed to read {}: {e}", path.display())))?;
    let mut pjson: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|e| NdError::cache_error(format!("failed to decode {}: {e}", path.display())))?;

    let Some(object) = pjson.as_object_mut() else {
        return Err(NdError::cache_error(format!(
            "{} is not a JSON object",
            path.display()
        )));
    };
    object.insert(
        "_integrity".to_string(),
        serde_json::Value::String(integrity.to_string()),
    );

    let mut out = serde_json::to_vec_pretty(&pjson)
        .map_err(|e| NdError::cache_error(format!("failed to encode {}: {e}", path.display())))?;
    out.push(b'\n');
    fs::write(&path, out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_package_dir_layout() {
        let cache = PackageCache::new(PathBuf::from("/cache/nd"));
        assert_eq!(
            cache.package_dir("left-pad", "1.3.0"),
            PathBuf::from("/cache/nd/packages/left-pad/1.3.0")
        );
    }

    #[test]
    fn test_scoped_package_dir_nests() {
        let cache = PackageCache::new(PathBuf::from("/cache/nd"));
        assert_eq!(
            cache.package_dir("@types/node", "20.0.0"),
            PathBuf::from("/cache/nd/packages/@types/node/20.0.0")
        );
    }

    #[test]
    fn test_lock_path_is_sibling() {
        let cache = PackageCache::new(PathBuf::from("/cache/nd"));
        assert_eq!(
            cache.lock_path("left-pad", "1.3.0"),
            PathBuf::from("/cache/nd/packages/left-pad/1.3.0.lock")
        );
    }

    #[test]
    fn test_manifest_root() {
        let cache = PackageCache::new(PathBuf::from("/cache/nd"));
        assert_eq!(cache.manifest_root(), PathBuf::from("/cache/nd/manifests"));
    }

    #[test]
    fn test_is_populated() {
        let dir = tempdir().unwrap();
        let cache = PackageCache::new(dir.path().to_path_buf());
        assert!(!cache.is_populated("a", "1.0.0"));

        let pkg_dir = cache.package_dir("a", "1.0.0");
        fs::create_dir_all(&pkg_dir).unwrap();
        assert!(!cache.is_populated("a", "1.0.0"));

        fs::write(pkg_dir.join("package.json"), "{}").unwrap();
        assert!(cache.is_populated("a", "1.0.0"));
    }

    #[test]
    fn test_set_integrity_adds_field() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("package.json"),
            r#"{"name":"a","version":"1.0.0"}"#,
        )
        .unwrap();

        set_integrity(dir.path(), "sha512-abc").unwrap();

        let content = fs::read_to_string(dir.path().join("package.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(value["_integrity"], "sha512-abc");
        assert_eq!(value["name"], "a");
    }

    #[test]
    fn test_set_integrity_missing_package_json() {
        let dir = tempdir().unwrap();
        let err = set_integrity(dir.path(), "sha512-abc").unwrap_err();
        assert_eq!(err.code(), crate::error::codes::CACHE_ERROR);
    }
}
