//! Materialization of the resolved tree into `node_modules`.

use crate::dependency::Dependency;
use crate::error::NdError;
use crate::lock::CacheLock;
use crate::pjson::{read_package_json, PackageJson};
use crate::resolver::InstallContext;
use futures::future::BoxFuture;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Install `dep` into `dir`, children first.
///
/// Children land in `<dir>/node_modules/<name>`; a node whose
/// `package.json` already exists is treated as installed. Cloning from the
/// cache happens under the entry's file lock so a partial extraction from
/// another process is never observed.
pub(crate) fn install_tree<'a>(
    dep: &'a mut Dependency,
    ctx: &'a InstallContext,
    dir: PathBuf,
    project_root: &'a Path,
) -> BoxFuture<'a, Result<(), NdError>> {
    Box::pin(async move {
        for child in &mut dep.dependencies {
            let child_dir = dir.join("node_modules").join(&child.name);
            install_tree(child, ctx, child_dir, project_root).await?;
        }

        if dir.join("package.json").exists() {
            return Ok(());
        }

        let Some(version) = dep.version.as_ref().map(ToString::to_string) else {
            return Err(NdError::clone_failed(format!(
                "{} has no resolved version",
                dep.name
            )));
        };

        info!("installing {}", dep.name);
        let cache_dir = ctx.cache().package_dir(&dep.name, &version);
        let lock = CacheLock::new(ctx.cache().lock_path(&dep.name, &version));
        {
            let _guard = lock.acquire().await?;
            // Re-check under the lock: another process may have finished
            // this node between the check above and acquisition.
            if !dir.join("package.json").exists() {
                clone_dir(&cache_dir, &dir)?;
            }
        }

        let pjson = read_package_json(&dir)?;
        install_bins(project_root, &dir, &pjson)?;
        dep.pjson = Some(pjson);
        Ok(())
    })
}

/// Clone a cached package tree into the project.
///
/// Files are hard-linked where the filesystem allows it and copied
/// otherwise; either way the result is byte-identical to the cache.
pub(crate) fn clone_dir(src: &Path, dst: &Path) -> Result<(), NdError> {
    fs::create_dir_all(dst).map_err(|e| {
        NdError::clone_failed(format!("failed to create {}: {e}", dst.display()))
    })?;

    let entries = fs::read_dir(src)
        .map_err(|e| NdError::clone_failed(format!("failed to read {}: {e}", src.display())))?;

    for entry in entries {
        let entry = entry
            .map_err(|e| NdError::clone_failed(format!("failed to read {}: {e}", src.display())))?;
        let file_type = entry.file_type().map_err(|e| {
            NdError::clone_failed(format!("failed to stat {}: {e}", entry.path().display()))
        })?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if file_type.is_dir() {
            clone_dir(&src_path, &dst_path)?;
        } else if file_type.is_file() {
            match fs::hard_link(&src_path, &dst_path) {
                Ok(()) => {}
                // Already linked from an earlier clone of the same entry.
                // Copying over it would truncate the shared inode.
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(_) => {
                    fs::copy(&src_path, &dst_path).map_err(|e| {
                        NdError::clone_failed(format!(
                            "failed to copy {} to {}: {e}",
                            src_path.display(),
                            dst_path.display()
                        ))
                    })?;
                }
            }
        }
    }

    Ok(())
}

/// Link a package's executable into `<root>/node_modules/.bin`.
///
/// Only the scalar `"bin": "<path>"` form is linked; the link target is
/// computed relative to the `.bin` directory.
fn install_bins(project_root: &Path, pkg_dir: &Path, pjson: &PackageJson) -> Result<(), NdError> {
    let Some(bin) = pjson.bin.as_ref().and_then(|v| v.as_str()) else {
        return Ok(());
    };
    if pjson.name.is_empty() {
        return Ok(());
    }
    let link_name = pjson.name.split('/').next_back().unwrap_or(&pjson.name);

    let bin_dir = project_root.join("node_modules").join(".bin");
    fs::create_dir_all(&bin_dir)
        .map_err(|e| NdError::link_failed(format!("failed to create .bin directory: {e}")))?;

    let target = relative_path(&bin_dir, &pkg_dir.join(bin));
    let link_path = bin_dir.join(link_name);
    create_bin_link(&target, &link_path)
}

#[cfg(unix)]
fn create_bin_link(target: &Path, link_path: &Path) -> Result<(), NdError> {
    if link_path.symlink_metadata().is_ok() {
        fs::remove_file(link_path)
            .map_err(|e| NdError::link_failed(format!("failed to remove existing link: {e}")))?;
    }
    std::os::unix::fs::symlink(target, link_path).map_err(|e| {
        NdError::link_failed(format!(
            "failed to link {} -> {}: {e}",
            link_path.display(),
            target.display()
        ))
    })
}

#[cfg(windows)]
fn create_bin_link(target: &Path, link_path: &Path) -> Result<(), NdError> {
    // Windows has no reliable unprivileged symlinks; write a cmd shim.
    let cmd_path = link_path.with_extension("cmd");
    let shim = format!("@ECHO off\r\nnode \"%~dp0\\{}\" %*\r\n", target.display());
    fs::write(&cmd_path, shim).map_err(|e| {
        NdError::link_failed(format!("failed to create shim {}: {e}", cmd_path.display()))
    })
}

/// The path of `to` relative to the directory `from`.
fn relative_path(from: &Path, to: &Path) -> PathBuf {
    let from: Vec<_> = from.components().collect();
    let to: Vec<_> = to.components().collect();

    let common = from
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = PathBuf::new();
    for _ in common..from.len() {
        out.push("..");
    }
    for component in &to[common..] {
        out.push(component.as_os_str());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_relative_path_sibling_tree() {
        let rel = relative_path(
            Path::new("/proj/node_modules/.bin"),
            Path::new("/proj/node_modules/tool/cli.js"),
        );
        assert_eq!(rel, PathBuf::from("../tool/cli.js"));
    }

    #[test]
    fn test_relative_path_nested() {
        let rel = relative_path(
            Path::new("/proj/node_modules/.bin"),
            Path::new("/proj/node_modules/a/node_modules/b/run.js"),
        );
        assert_eq!(rel, PathBuf::from("../a/node_modules/b/run.js"));
    }

    #[test]
    fn test_clone_dir_copies_tree() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        let dst_pkg = dst.path().join("pkg");

        fs::create_dir_all(src.path().join("lib")).unwrap();
        fs::write(src.path().join("package.json"), r#"{"name":"a"}"#).unwrap();
        fs::write(src.path().join("lib/index.js"), "module.exports = 1;").unwrap();

        clone_dir(src.path(), &dst_pkg).unwrap();

        assert_eq!(
            fs::read_to_string(dst_pkg.join("package.json")).unwrap(),
            r#"{"name":"a"}"#
        );
        assert_eq!(
            fs::read_to_string(dst_pkg.join("lib/index.js")).unwrap(),
            "module.exports = 1;"
        );
    }

    #[test]
    fn test_clone_dir_missing_source_fails() {
        let dst = tempdir().unwrap();
        let err = clone_dir(Path::new("/nonexistent/source"), dst.path()).unwrap_err();
        assert_eq!(err.code(), crate::error::codes::CLONE_FAILED);
    }

    #[cfg(unix)]
    #[test]
    fn test_install_bins_scalar_form() {
        let project = tempdir().unwrap();
        let pkg_dir = project.path().join("node_modules").join("tool");
        fs::create_dir_all(&pkg_dir).unwrap();
        fs::write(pkg_dir.join("cli.js"), "#!/usr/bin/env node\n").unwrap();

        let pjson = PackageJson {
            name: "tool".to_string(),
            bin: Some(serde_json::Value::String("cli.js".to_string())),
            ..PackageJson::default()
        };

        install_bins(project.path(), &pkg_dir, &pjson).unwrap();

        let link = project.path().join("node_modules/.bin/tool");
        let target = fs::read_link(&link).unwrap();
        assert_eq!(target, PathBuf::from("../tool/cli.js"));
        // The link resolves to a real file.
        assert!(fs::metadata(&link).is_ok());
    }

    #[test]
    fn test_install_bins_map_form_is_not_linked() {
        let project = tempdir().unwrap();
        let pkg_dir = project.path().join("node_modules").join("tool");
        fs::create_dir_all(&pkg_dir).unwrap();

        let pjson = PackageJson {
            name: "tool".to_string(),
            bin: Some(serde_json::json!({"tool": "cli.js"})),
            ..PackageJson::default()
        };

        install_bins(project.path(), &pkg_dir, &pjson).unwrap();
        assert!(!project.path().join("node_modules/.bin/tool").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_install_bins_scoped_name_uses_last_segment() {
        let project = tempdir().unwrap();
        let pkg_dir = project.path().join("node_modules").join("@scope/tool");
        fs::create_dir_all(&pkg_dir).unwrap();
        fs::write(pkg_dir.join("cli.js"), "").unwrap();

        let pjson = PackageJson {
            name: "@scope/tool".to_string(),
            bin: Some(serde_json::Value::String("cli.js".to_string())),
            ..PackageJson::default()
        };

        install_bins(project.path(), &pkg_dir, &pjson).unwrap();
        assert!(project
            .path()
            .join("node_modules/.bin/tool")
            .symlink_metadata()
            .is_ok());
    }
}
