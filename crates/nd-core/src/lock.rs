//! Advisory cross-process lock for cache entries.

use crate::error::NdError;
use fs4::FileExt;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Acquisition budget. Contention past this is fatal.
const LOCK_BUDGET: Duration = Duration::from_secs(30);

/// An advisory file lock guarding one cache entry.
///
/// Acquisition is non-blocking with randomized 0-1000 ms backoff against a
/// fixed budget. The holder has exclusive right to mutate the entry;
/// readers also take the lock so they never observe a partial extraction
/// from another process.
pub struct CacheLock {
    path: PathBuf,
}

/// Held lock. Releases on drop; unlock errors are logged, not fatal.
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl CacheLock {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// The lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire the lock with the default 30 s budget.
    ///
    /// # Errors
    /// Returns `LOCK_TIMEOUT` if the budget expires, or a filesystem error
    /// if the lock file cannot be created.
    pub async fn acquire(&self) -> Result<LockGuard, NdError> {
        self.acquire_with_budget(LOCK_BUDGET).await
    }

    /// Acquire the lock, failing once `budget` is exhausted.
    ///
    /// # Errors
    /// Returns `LOCK_TIMEOUT` if the budget expires.
    pub async fn acquire_with_budget(&self, budget: Duration) -> Result<LockGuard, NdError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&self.path)?;

        let mut remaining = budget;
        let mut warned = false;

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    return Ok(LockGuard {
                        file,
                        path: self.path.clone(),
                    });
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if !warned {
                        warn!("lockfile locked {}", self.path.display());
                        warned = true;
                    }
                    let jitter = Duration::from_millis(u64::from(jitter_ms()));
                    tokio::time::sleep(jitter).await;
                    remaining = match remaining.checked_sub(jitter) {
                        Some(r) => r,
                        None => return Err(NdError::lock_timeout(&self.path)),
                    };
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            warn!("lockfile error: {} ({})", e, self.path.display());
        }
    }
}

/// Backoff jitter in 0..1000 ms.
#[allow(clippy::cast_possible_truncation)]
fn jitter_ms() -> u32 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let state = RandomState::new();
    let mut hasher = state.build_hasher();
    hasher.write_u64(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0),
    );
    (hasher.finish() % 1000) as u32
}
