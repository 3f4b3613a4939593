//! Installer error type.

use std::fmt;
use std::io;
use std::path::Path;

/// Stable error codes.
pub mod codes {
    pub const PACKAGE_JSON_NOT_FOUND: &str = "PACKAGE_JSON_NOT_FOUND";
    pub const PACKAGE_JSON_INVALID: &str = "PACKAGE_JSON_INVALID";
    pub const LOCKFILE_INVALID: &str = "LOCKFILE_INVALID";
    pub const REGISTRY_ERROR: &str = "REGISTRY_ERROR";
    pub const PACKAGE_NOT_FOUND: &str = "PACKAGE_NOT_FOUND";
    pub const VERSION_NOT_FOUND: &str = "VERSION_NOT_FOUND";
    pub const RANGE_INVALID: &str = "RANGE_INVALID";
    pub const DOWNLOAD_FAILED: &str = "DOWNLOAD_FAILED";
    pub const EXTRACT_FAILED: &str = "EXTRACT_FAILED";
    pub const CACHE_ERROR: &str = "CACHE_ERROR";
    pub const LOCK_TIMEOUT: &str = "LOCK_TIMEOUT";
    pub const CLONE_FAILED: &str = "CLONE_FAILED";
    pub const LINK_FAILED: &str = "LINK_FAILED";
    pub const FS_ERROR: &str = "FS_ERROR";
}

/// Installer error.
///
/// Carries a stable code (for exit diagnostics and tests) and a message that
/// includes the originating URL, path, or `(name, version)` where applicable.
#[derive(Debug)]
pub struct NdError {
    code: &'static str,
    message: String,
}

impl NdError {
    /// Create a new error with the given code and message.
    #[must_use]
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Get the error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// Get the error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Create a missing package.json error.
    #[must_use]
    pub fn package_json_not_found(path: &Path) -> Self {
        Self::new(
            codes::PACKAGE_JSON_NOT_FOUND,
            format!("package.json not found: {}", path.display()),
        )
    }

    /// Create an invalid package.json error.
    pub fn package_json_invalid(msg: impl Into<String>) -> Self {
        Self::new(codes::PACKAGE_JSON_INVALID, msg)
    }

    /// Create an invalid lockfile error.
    pub fn lockfile_invalid(msg: impl Into<String>) -> Self {
        Self::new(codes::LOCKFILE_INVALID, msg)
    }

    /// Create a registry error.
    pub fn registry(msg: impl Into<String>) -> Self {
        Self::new(codes::REGISTRY_ERROR, msg)
    }

    /// Create a package not found error.
    #[must_use]
    pub fn not_found(name: &str) -> Self {
        Self::new(codes::PACKAGE_NOT_FOUND, format!("package not found: {name}"))
    }

    /// Create a version not found error.
    #[must_use]
    pub fn version_not_found(name: &str, range: &str) -> Self {
        Self::new(
            codes::VERSION_NOT_FOUND,
            format!("no version of {name} satisfies range: {range}"),
        )
    }

    /// Create an invalid range error.
    pub fn range_invalid(range: &str, msg: impl fmt::Display) -> Self {
        Self::new(
            codes::RANGE_INVALID,
            format!("invalid version range '{range}': {msg}"),
        )
    }

    /// Create a download failed error.
    pub fn download_failed(msg: impl Into<String>) -> Self {
        Self::new(codes::DOWNLOAD_FAILED, msg)
    }

    /// Create an extraction failed error.
    pub fn extract_failed(msg: impl Into<String>) -> Self {
        Self::new(codes::EXTRACT_FAILED, msg)
    }

    /// Create a cache error.
    pub fn cache_error(msg: impl Into<String>) -> Self {
        Self::new(codes::CACHE_ERROR, msg)
    }

    /// Create a lock timeout error.
    #[must_use]
    pub fn lock_timeout(path: &Path) -> Self {
        Self::new(
            codes::LOCK_TIMEOUT,
            format!("timed out acquiring lock: {}", path.display()),
        )
    }

    /// Create a clone failed error.
    pub fn clone_failed(msg: impl Into<String>) -> Self {
        Self::new(codes::CLONE_FAILED, msg)
    }

    /// Create a link failed error.
    pub fn link_failed(msg: impl Into<String>) -> Self {
        Self::new(codes::LINK_FAILED, msg)
    }
}

impl fmt::Display for NdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for NdError {}

impl From<io::Error> for NdError {
    fn from(e: io::Error) -> Self {
        Self::new(codes::FS_ERROR, e.to_string())
    }
}

impl From<reqwest::Error> for NdError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::new(codes::REGISTRY_ERROR, format!("request timed out: {e}"))
        } else if e.is_connect() {
            Self::new(codes::REGISTRY_ERROR, format!("connection failed: {e}"))
        } else {
            Self::new(codes::REGISTRY_ERROR, e.to_string())
        }
    }
}

impl From<serde_json::Error> for NdError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(codes::REGISTRY_ERROR, format!("invalid JSON: {e}"))
    }
}
