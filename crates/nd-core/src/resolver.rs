//! Concurrent dependency resolution.
//!
//! Every dependency node resolves on its own task. Cycles are cut by
//! passing an immutable ancestor stack down the recursion and pruning any
//! child whose range accepts an ancestor of the same name. Cache fills run
//! as side tasks, joined before materialization.

use crate::cache::{self, PackageCache};
use crate::dependency::Dependency;
use crate::error::NdError;
use crate::lock::CacheLock;
use crate::memo::SingleFlight;
use crate::pjson::PackageLock;
use crate::registry::{ManifestDist, RegistryClient};
use crate::tarball::{download_tarball, extract_tarball};
use crate::version::{min_satisfying, Range};
use futures::future::BoxFuture;
use semver::Version;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::debug;

/// Bound on concurrent HTTP fetches and tarball extractions.
pub const MAX_CONCURRENT_IO: usize = 20;

/// Shared state for one installation run.
///
/// Holds the registry client, the package cache, the I/O worker-pool
/// semaphore, the single-flight table deduplicating cache fills, and the
/// set of in-flight cache-fill tasks. Created fresh per top-level
/// invocation, so all memoization resets between runs.
pub struct InstallContext {
    registry: RegistryClient,
    cache: PackageCache,
    io_permits: Arc<Semaphore>,
    cache_flights: SingleFlight<()>,
    cache_tasks: Mutex<Vec<JoinHandle<Result<(), NdError>>>>,
}

impl InstallContext {
    /// Create a context for the given registry URL and cache root.
    ///
    /// # Errors
    /// Returns an error if the registry client cannot be built.
    pub fn new(registry_url: &str, cache_root: PathBuf) -> Result<Self, NdError> {
        let cache = PackageCache::new(cache_root);
        let io_permits = Arc::new(Semaphore::new(MAX_CONCURRENT_IO));
        let registry =
            RegistryClient::new(registry_url, cache.manifest_root(), Arc::clone(&io_permits))?;

        Ok(Self {
            registry,
            cache,
            io_permits,
            cache_flights: SingleFlight::new(),
            cache_tasks: Mutex::new(Vec::new()),
        })
    }

    /// Create a context from `ND_REGISTRY` / `ND_CACHE_DIR` (or defaults).
    ///
    /// # Errors
    /// Returns an error if the registry client cannot be built.
    pub fn from_env() -> Result<Self, NdError> {
        Self::new(&RegistryClient::url_from_env(), crate::paths::cache_root())
    }

    /// The package cache.
    #[must_use]
    pub fn cache(&self) -> &PackageCache {
        &self.cache
    }

    /// The registry client.
    #[must_use]
    pub fn registry(&self) -> &RegistryClient {
        &self.registry
    }

    /// Spawn the background cache fill for a resolved node.
    async fn spawn_cache_fill(self: &Arc<Self>, name: String, version: Version, dist: ManifestDist) {
        let ctx = Arc::clone(self);
        let handle = tokio::spawn(async move { ctx.cache_dep(&name, &version, &dist).await });
        self.cache_tasks.lock().await.push(handle);
    }

    /// Populate the cache entry for `(name, version)` at most once per
    /// process and per cache (single-flight plus the entry's file lock).
    async fn cache_dep(
        &self,
        name: &str,
        version: &Version,
        dist: &ManifestDist,
    ) -> Result<(), NdError> {
        let dir = self.cache.package_dir(name, &version.to_string());
        let key = format!("cache_dep:{}", dir.display());

        self.cache_flights
            .fetch(&key, || async {
                let lock = CacheLock::new(self.cache.lock_path(name, &version.to_string()));
                let _guard = lock.acquire().await?;

                if !dir.join("package.json").exists() {
                    debug!("caching {name}@{version}");
                    let _permit = self
                        .io_permits
                        .acquire()
                        .await
                        .map_err(|_| NdError::cache_error("worker pool closed"))?;
                    let bytes = download_tarball(self.registry.http(), &dist.tarball).await?;
                    extract_tarball(&bytes, &dir)?;
                    cache::set_integrity(&dir, &dist.integrity)?;
                }
                Ok(())
            })
            .await
    }

    /// Join every spawned cache-fill task. Materialization must not start
    /// before this returns.
    pub(crate) async fn wait_for_cache(&self) -> Result<(), NdError> {
        loop {
            let handles = {
                let mut tasks = self.cache_tasks.lock().await;
                std::mem::take(&mut *tasks)
            };
            if handles.is_empty() {
                return Ok(());
            }
            for handle in handles {
                handle
                    .await
                    .map_err(|e| NdError::cache_error(format!("cache task failed: {e}")))??;
            }
        }
    }
}

/// One entry of the ancestor stack.
#[derive(Debug, Clone)]
pub(crate) struct Ancestor {
    name: String,
    version: Version,
}

/// Resolve one dependency node and, concurrently, its whole subtree.
///
/// Selection order: a lockfile pin whose version satisfies the request
/// range wins; otherwise the minimum manifest version satisfying the range
/// is chosen. The returned node owns its resolved children, sorted by name.
pub(crate) fn resolve_dep(
    ctx: Arc<InstallContext>,
    name: String,
    range: Range,
    ancestors: Vec<Ancestor>,
    lock: Option<PackageLock>,
) -> BoxFuture<'static, Result<Dependency, NdError>> {
    Box::pin(async move {
        let manifest = ctx.registry.fetch_manifest(&name).await?;

        let pinned = lock
            .as_ref()
            .and_then(|l| l.version.as_deref())
            .and_then(|v| Version::parse(v).ok())
            .filter(|v| range.matches(v));
        let version = match pinned {
            Some(version) => {
                debug!("{name}: pinned to {version} by lockfile");
                version
            }
            None => min_satisfying(&manifest, &range)
                .ok_or_else(|| NdError::version_not_found(&name, range.as_str()))?,
        };

        let version_data = manifest
            .versions
            .get(&version.to_string())
            .ok_or_else(|| NdError::version_not_found(&name, &version.to_string()))?;
        let dist = version_data.dist.clone();

        let mut ancestors = ancestors;
        ancestors.push(Ancestor {
            name: name.clone(),
            version: version.clone(),
        });

        let mut children: Vec<(String, Range)> = Vec::new();
        for (child_name, child_range) in &version_data.dependencies {
            let child_range = Range::parse(child_range)?;
            // Refuse to descend into an ancestor whose identity the child
            // would accept; this is what breaks cycles.
            let circular = ancestors
                .iter()
                .any(|a| a.name == *child_name && child_range.matches(&a.version));
            if circular {
                debug!("{child_name}: satisfied by ancestor, pruned");
                continue;
            }
            children.push((child_name.clone(), child_range));
        }
        children.sort_by(|a, b| a.0.cmp(&b.0));

        ctx.spawn_cache_fill(name.clone(), version.clone(), dist.clone())
            .await;

        let mut tasks: JoinSet<Result<Dependency, NdError>> = JoinSet::new();
        for (child_name, child_range) in children {
            let child_lock = lock
                .as_ref()
                .and_then(|l| l.dependencies.get(&child_name))
                .cloned();
            tasks.spawn(resolve_dep(
                Arc::clone(&ctx),
                child_name,
                child_range,
                ancestors.clone(),
                child_lock,
            ));
        }

        let mut dependencies = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let child = joined
                .map_err(|e| NdError::cache_error(format!("resolution task failed: {e}")))??;
            dependencies.push(child);
        }
        dependencies.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(Dependency {
            name,
            range: Some(range),
            version: Some(version),
            dist: Some(dist),
            dependencies,
            pjson: None,
        })
    })
}
