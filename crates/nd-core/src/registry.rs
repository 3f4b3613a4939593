//! Registry client with an ETag-revalidated on-disk manifest cache.

use crate::error::NdError;
use crate::memo::SingleFlight;
use reqwest::header::{ETAG, IF_NONE_MATCH};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use url::Url;

/// Default registry URL.
pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org/";

/// Environment variable to override the registry URL.
pub const REGISTRY_ENV: &str = "ND_REGISTRY";

/// A registry manifest: every published version of one package.
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub versions: BTreeMap<String, ManifestVersion>,
}

/// One published version inside a manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestVersion {
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    pub dist: ManifestDist,
}

/// Tarball location and integrity digest for a published version.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestDist {
    pub tarball: String,
    #[serde(default)]
    pub integrity: String,
}

/// Registry client.
///
/// Manifests are fetched at most once per name per process (single-flight)
/// and revalidated against an on-disk cache at
/// `<manifest-root>/<name>/<etag>.json`.
pub struct RegistryClient {
    base_url: Url,
    http: Client,
    manifest_root: PathBuf,
    permits: Arc<Semaphore>,
    flights: SingleFlight<Arc<Manifest>>,
}

impl RegistryClient {
    /// Create a client for the given registry base URL.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the HTTP client cannot be
    /// built.
    pub fn new(
        base_url: &str,
        manifest_root: PathBuf,
        permits: Arc<Semaphore>,
    ) -> Result<Self, NdError> {
        let mut base = base_url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| NdError::registry(format!("invalid registry URL '{base_url}': {e}")))?;

        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(15))
            .user_agent(concat!("nd/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| NdError::registry(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            http,
            manifest_root,
            permits,
            flights: SingleFlight::new(),
        })
    }

    /// The registry URL from the environment, or the default.
    #[must_use]
    pub fn url_from_env() -> String {
        std::env::var(REGISTRY_ENV).unwrap_or_else(|_| DEFAULT_REGISTRY.to_string())
    }

    /// The HTTP client, for reuse in tarball downloads.
    #[must_use]
    pub fn http(&self) -> &Client {
        &self.http
    }

    /// Fetch the manifest for a package, single-flighted per name.
    ///
    /// # Errors
    /// Returns an error on non-2xx/304 statuses, transport failures, or an
    /// undecodable response.
    pub async fn fetch_manifest(&self, name: &str) -> Result<Arc<Manifest>, NdError> {
        let key = format!("manifest:{name}");
        self.flights
            .fetch(&key, || self.fetch_manifest_uncached(name))
            .await
    }

    async fn fetch_manifest_uncached(&self, name: &str) -> Result<Arc<Manifest>, NdError> {
        let dir = self.manifest_root.join(name);
        let url = self
            .base_url
            .join(&encode_name(name))
            .map_err(|e| NdError::registry(format!("failed to build URL for '{name}': {e}")))?;

        let mut etag = latest_cached_etag(&dir);
        let mut retried = false;

        loop {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| NdError::registry("worker pool closed"))?;

            debug!("HTTP GET {url}");
            let mut request = self.http.get(url.as_str());
            if let Some(tag) = &etag {
                request = request.header(IF_NONE_MATCH, format!("\"{tag}\""));
            }
            let response = request.send().await?;
            info!("HTTP GET {url} {}", response.status());

            match response.status() {
                StatusCode::NOT_MODIFIED => {
                    let tag = etag.take().unwrap_or_default();
                    let path = dir.join(format!("{tag}.json"));
                    match read_cached_manifest(&path) {
                        Ok(manifest) => return Ok(Arc::new(manifest)),
                        Err(e) if !retried => {
                            // A corrupt cached manifest invalidates the whole
                            // per-name directory so a broken ETag is never
                            // selected again.
                            warn!("corrupt cached manifest {}: {e}", path.display());
                            fs::remove_dir_all(&dir)?;
                            retried = true;
                            continue;
                        }
                        Err(e) => return Err(e),
                    }
                }
                StatusCode::OK => {
                    let new_tag = response
                        .headers()
                        .get(ETAG)
                        .and_then(|v| v.to_str().ok())
                        .map(|v| v.trim_start_matches("W/").trim_matches('"').to_string());

                    let body = response.bytes().await?;
                    let manifest: Manifest = serde_json::from_slice(&body)?;

                    if let Some(tag) = new_tag.filter(|t| !t.is_empty()) {
                        fs::create_dir_all(&dir)?;
                        fs::write(dir.join(format!("{tag}.json")), &body)?;
                    }

                    return Ok(Arc::new(manifest));
                }
                StatusCode::NOT_FOUND => return Err(NdError::not_found(name)),
                status => {
                    return Err(NdError::registry(format!(
                        "unexpected status {status} for {url}"
                    )));
                }
            }
        }
    }
}

/// URL-encode a package name (scoped names carry a `/`).
fn encode_name(name: &str) -> String {
    if name.starts_with('@') {
        name.replace('/', "%2F")
    } else {
        name.to_string()
    }
}

fn read_cached_manifest(path: &Path) -> Result<Manifest, NdError> {
    let bytes = fs::read(path)
        .map_err(|e| NdError::cache_error(format!("failed to read {}: {e}", path.display())))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| NdError::cache_error(format!("failed to decode {}: {e}", path.display())))
}

/// The ETag of the newest cached manifest file (by modification time).
///
/// The ETag is the file name up to the first `.`.
fn latest_cached_etag(dir: &Path) -> Option<String> {
    let entries = fs::read_dir(dir).ok()?;

    let mut newest: Option<(std::time::SystemTime, String)> = None;
    for entry in entries.flatten() {
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        if newest.as_ref().map_or(true, |(t, _)| modified >= *t) {
            newest = Some((modified, name));
        }
    }

    let (_, name) = newest?;
    let tag = name.split('.').next().unwrap_or_default();
    if tag.is_empty() {
        None
    } else {
        Some(tag.to_string())
    }
}
