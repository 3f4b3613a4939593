//! User cache root discovery.

use std::path::PathBuf;

/// Environment variable to override the cache root (used by tests).
pub const CACHE_DIR_ENV: &str = "ND_CACHE_DIR";

/// Get the per-user cache root.
///
/// Defaults to `~/Library/Caches/nd` on macOS and `~/.cache/nd` elsewhere.
/// `ND_CACHE_DIR` overrides the location.
#[must_use]
pub fn cache_root() -> PathBuf {
    if let Ok(dir) = std::env::var(CACHE_DIR_ENV) {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }

    let home = dirs_next::home_dir().unwrap_or_else(|| PathBuf::from("."));

    if cfg!(target_os = "macos") {
        home.join("Library").join("Caches").join("nd")
    } else {
        home.join(".cache").join("nd")
    }
}
