//! Process-wide single-flight memoization.
//!
//! The first caller for a key takes ownership of running the computation;
//! concurrent callers for the same key wait on its completion and receive
//! the published value. Values are immutable after first publication.

use crate::error::NdError;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

/// Keyed single-flight table.
///
/// Entries persist until [`SingleFlight::reset`] is called.
pub struct SingleFlight<T> {
    entries: Mutex<HashMap<String, Arc<OnceCell<T>>>>,
}

impl<T: Clone> SingleFlight<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Run `init` for `key` at most once, returning the published value.
    ///
    /// If `init` fails, the entry stays empty and the error propagates to
    /// the caller that ran it; a later caller may retry.
    ///
    /// # Errors
    /// Returns the error produced by `init`.
    pub async fn fetch<F, Fut>(&self, key: &str, init: F) -> Result<T, NdError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, NdError>>,
    {
        let cell = {
            let mut entries = self.entries.lock().await;
            Arc::clone(entries.entry(key.to_string()).or_default())
        };
        let value = cell.get_or_try_init(init).await?;
        Ok(value.clone())
    }

    /// Drop all entries so subsequent fetches recompute.
    pub async fn reset(&self) {
        self.entries.lock().await.clear();
    }
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}
