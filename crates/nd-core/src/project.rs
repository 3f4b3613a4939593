//! Project loading: resolve, dedupe, and materialize.

use crate::dependency::Dependency;
use crate::error::NdError;
use crate::install::install_tree;
use crate::pjson::{read_package_json, read_package_lock, PackageLock};
use crate::resolver::{resolve_dep, InstallContext};
use crate::version::Range;
use semver::Version;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info};

/// A loaded project: the root directory, the resolved dependency tree, and
/// the lockfile it was pinned against (if any).
#[derive(Debug)]
pub struct Project {
    pub root: PathBuf,
    pub dependency: Dependency,
    pub lock: Option<PackageLock>,
}

impl Project {
    /// Load the project at `root`: resolve the full dependency graph,
    /// dedupe it, fill the package cache, and materialize `node_modules`.
    ///
    /// # Errors
    /// Returns an error for a missing or invalid root manifest, any
    /// resolution or network failure, or a failed materialization.
    pub async fn load(root: impl AsRef<Path>) -> Result<Self, NdError> {
        let ctx = Arc::new(InstallContext::from_env()?);
        Self::load_with(root, ctx).await
    }

    /// Load the project using an explicit context (registry and cache).
    ///
    /// # Errors
    /// Same as [`Project::load`].
    pub async fn load_with(
        root: impl AsRef<Path>,
        ctx: Arc<InstallContext>,
    ) -> Result<Self, NdError> {
        let root = std::path::absolute(root.as_ref())?;
        debug!("load: {}", root.display());

        let pjson = read_package_json(&root)?;
        let lock = read_package_lock(&root)?;

        let version = match pjson.version.as_deref() {
            Some(v) if !v.is_empty() => Some(Version::parse(v).map_err(|e| {
                NdError::package_json_invalid(format!("invalid version '{v}': {e}"))
            })?),
            _ => None,
        };

        // Development dependencies count at the top level only; regular
        // dependencies win on a name collision.
        let mut declared: BTreeMap<String, String> =
            pjson.dev_dependencies.clone().unwrap_or_default();
        declared.extend(pjson.dependencies.clone());

        info!("finding all deps");
        let mut tasks: JoinSet<Result<Dependency, NdError>> = JoinSet::new();
        for (name, range) in declared {
            let range = Range::parse(&range)?;
            let child_lock = lock
                .as_ref()
                .and_then(|l| l.dependencies.get(&name))
                .cloned();
            tasks.spawn(resolve_dep(
                Arc::clone(&ctx),
                name,
                range,
                Vec::new(),
                child_lock,
            ));
        }

        let mut dependencies = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let child = joined
                .map_err(|e| NdError::cache_error(format!("resolution task failed: {e}")))??;
            dependencies.push(child);
        }
        info!("found all deps");

        let mut dependency = Dependency {
            name: pjson.name.clone(),
            range: None,
            version,
            dist: None,
            dependencies,
            pjson: Some(pjson),
        };
        dependency.sort_children();
        debug!("resolved:\n{}", dependency.render());

        dependency.dedupe();
        debug!("deduped:\n{}", dependency.render());

        // Every cache entry must be complete before anything clones from it.
        ctx.wait_for_cache().await?;

        install_tree(&mut dependency, &ctx, root.clone(), &root).await?;

        Ok(Self {
            root,
            dependency,
            lock,
        })
    }

    /// Render the resolved tree.
    #[must_use]
    pub fn render(&self) -> String {
        self.dependency.render()
    }
}
