//! Project and package metadata files.

use crate::error::NdError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io;
use std::path::Path;

/// Parsed `package.json`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PackageJson {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default, rename = "devDependencies")]
    pub dev_dependencies: Option<BTreeMap<String, String>>,
    /// Either a single relative path or a name -> path map. Only the scalar
    /// form produces an executable link.
    #[serde(default)]
    pub bin: Option<serde_json::Value>,
}

/// One node of a `package-lock.json` tree, mirroring the materialized layout.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PackageLock {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub resolved: Option<String>,
    #[serde(default)]
    pub integrity: Option<String>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, PackageLock>,
}

/// Read and parse `<dir>/package.json`.
///
/// # Errors
/// Returns `PACKAGE_JSON_NOT_FOUND` if the file is missing and
/// `PACKAGE_JSON_INVALID` if it cannot be parsed.
pub fn read_package_json(dir: &Path) -> Result<PackageJson, NdError> {
    let path = dir.join("package.json");
    tracing::debug!("parsing {}", path.display());

    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(NdError::package_json_not_found(&path));
        }
        Err(e) => return Err(e.into()),
    };

    serde_json::from_str(&content).map_err(|e| {
        NdError::package_json_invalid(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Read and parse `<dir>/package-lock.json` if present.
///
/// A missing lockfile is not an error; an unparseable one is fatal.
///
/// # Errors
/// Returns `LOCKFILE_INVALID` if the file exists but cannot be parsed.
pub fn read_package_lock(dir: &Path) -> Result<Option<PackageLock>, NdError> {
    let path = dir.join("package-lock.json");

    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    tracing::debug!("parsing {}", path.display());
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| NdError::lockfile_invalid(format!("failed to parse {}: {e}", path.display())))
}
