//! Tarball download and extraction.

use crate::error::NdError;
use bytes::Bytes;
use flate2::read::GzDecoder;
use reqwest::Client;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path};
use std::time::Duration;
use tar::Archive;
use tracing::{debug, info};

/// Maximum tarball size (200 MB).
pub const MAX_TARBALL_SIZE: u64 = 200 * 1024 * 1024;

/// Download timeout in seconds.
const DOWNLOAD_TIMEOUT_SECS: u64 = 30;

/// Download a tarball from a URL.
///
/// # Errors
/// Returns an error if the download fails, returns a non-200 status, or
/// exceeds the size limit.
pub async fn download_tarball(client: &Client, url: &str) -> Result<Bytes, NdError> {
    info!("HTTP GET {url}");
    let response = client
        .get(url)
        .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
        .send()
        .await
        .map_err(|e| NdError::download_failed(format!("failed to download '{url}': {e}")))?;

    if response.status() != reqwest::StatusCode::OK {
        return Err(NdError::download_failed(format!(
            "download failed with status {} for '{url}'",
            response.status()
        )));
    }

    if let Some(len) = response.content_length() {
        if len > MAX_TARBALL_SIZE {
            return Err(NdError::download_failed(format!(
                "tarball too large: {len} bytes (max: {MAX_TARBALL_SIZE}) for '{url}'"
            )));
        }
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| NdError::download_failed(format!("failed to read body of '{url}': {e}")))?;

    if bytes.len() as u64 > MAX_TARBALL_SIZE {
        return Err(NdError::download_failed(format!(
            "tarball too large: {} bytes (max: {MAX_TARBALL_SIZE}) for '{url}'",
            bytes.len()
        )));
    }

    Ok(bytes)
}

/// Extract a gzipped tarball into `dest`, stripping the leading archive
/// component (conventionally `package/`).
///
/// Directory entries become directories, regular files are copied in full,
/// and all other entry kinds are ignored.
///
/// # Errors
/// Returns an error if the archive is malformed, contains absolute or
/// traversal paths, or an entry cannot be written.
pub fn extract_tarball(bytes: &[u8], dest: &Path) -> Result<(), NdError> {
    let gz = GzDecoder::new(bytes);
    let mut archive = Archive::new(gz);

    for entry in archive
        .entries()
        .map_err(|e| NdError::extract_failed(format!("failed to read tarball entries: {e}")))?
    {
        let mut entry =
            entry.map_err(|e| NdError::extract_failed(format!("failed to read entry: {e}")))?;

        let path = entry
            .path()
            .map_err(|e| NdError::extract_failed(format!("failed to read entry path: {e}")))?
            .into_owned();

        if path.is_absolute() {
            return Err(NdError::extract_failed(format!(
                "tarball contains absolute path: {}",
                path.display()
            )));
        }
        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(NdError::extract_failed(format!(
                "tarball contains path traversal: {}",
                path.display()
            )));
        }

        // Drop the leading archive component.
        let mut components = path.components();
        components.next();
        let rel = components.as_path();
        if rel.as_os_str().is_empty() {
            continue;
        }

        let dest_path = dest.join(rel);
        if !dest_path.starts_with(dest) {
            return Err(NdError::extract_failed(format!(
                "tarball entry escapes destination: {}",
                path.display()
            )));
        }

        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let entry_type = entry.header().entry_type();
        if entry_type.is_dir() {
            debug!("creating directory {}", dest_path.display());
            fs::create_dir_all(&dest_path)?;
        } else if entry_type.is_file() {
            let mut file = File::create(&dest_path)?;
            io::copy(&mut entry, &mut file)?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Ok(mode) = entry.header().mode() {
                    let _ = fs::set_permissions(&dest_path, fs::Permissions::from_mode(mode));
                }
            }
        }
    }

    Ok(())
}

/// Download `url` and extract it into `dest`.
///
/// # Errors
/// Returns an error if the download or extraction fails.
pub async fn extract_tar_from_url(client: &Client, url: &str, dest: &Path) -> Result<(), NdError> {
    let bytes = download_tarball(client, url).await?;
    extract_tarball(&bytes, dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tar::Builder;
    use tempfile::tempdir;

    fn build_tarball(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut tar_bytes = Vec::new();
        {
            let mut builder = Builder::new(&mut tar_bytes);
            for (path, data) in entries {
                let mut header = tar::Header::new_gnu();
                header.set_path(path).unwrap();
                header.set_size(data.len() as u64);
                header.set_mode(0o644);
                header.set_cksum();
                builder.append(&header, *data).unwrap();
            }
            builder.finish().unwrap();
        }

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tar_bytes).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_extract_strips_leading_component() {
        let dir = tempdir().unwrap();
        let tgz = build_tarball(&[
            ("package/package.json", br#"{"name":"test"}"#),
            ("package/lib/index.js", b"module.exports = 42;"),
        ]);

        extract_tarball(&tgz, dir.path()).unwrap();

        assert!(dir.path().join("package.json").exists());
        assert!(dir.path().join("lib").join("index.js").exists());
        assert!(!dir.path().join("package").exists());
    }

    #[test]
    fn test_extract_non_package_prefix() {
        let dir = tempdir().unwrap();
        let tgz = build_tarball(&[("node/index.d.ts", b"export {};")]);

        extract_tarball(&tgz, dir.path()).unwrap();
        assert!(dir.path().join("index.d.ts").exists());
    }

    #[test]
    fn test_extract_skips_bare_leading_entry() {
        let dir = tempdir().unwrap();
        let tgz = build_tarball(&[("package", b""), ("package/a.txt", b"a")]);

        extract_tarball(&tgz, dir.path()).unwrap();
        assert!(dir.path().join("a.txt").exists());
    }

    #[test]
    fn test_extract_preserves_content() {
        let dir = tempdir().unwrap();
        let body = br#"{"name":"test","version":"1.0.0"}"#;
        let tgz = build_tarball(&[("package/package.json", body)]);

        extract_tarball(&tgz, dir.path()).unwrap();
        let content = fs::read(dir.path().join("package.json")).unwrap();
        assert_eq!(content, body);
    }

    #[test]
    fn test_extract_deeply_nested() {
        let dir = tempdir().unwrap();
        let tgz = build_tarball(&[("package/a/b/c/file.txt", b"deep")]);

        extract_tarball(&tgz, dir.path()).unwrap();
        assert!(dir.path().join("a/b/c/file.txt").exists());
    }

    #[test]
    fn test_extract_garbage_fails() {
        let dir = tempdir().unwrap();
        let result = extract_tarball(b"not a gzip stream", dir.path());
        assert!(result.is_err());
    }
}
