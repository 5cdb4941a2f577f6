//! Version-aware tool installation with an on-disk cache.
//!
//! Installs are atomic: all work happens in a staging directory next to the
//! final location, and a single rename publishes the result. Staging
//! directories are unique per call, so installers racing on the same
//! (tool, version) — threads or processes — each work in isolation; only one
//! rename wins and the losers fall back to the published copy.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use serde_json::json;

use crate::errors::{Result, SetupError};
use crate::tools::{Distribution, InstalledTool, ToolSpec};

/// Overall budget for downloading one distribution artifact
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Ensure `spec` is installed under `root`, installing it if absent.
///
/// Returns without any network or subprocess activity when the resolved
/// executable already exists (cache hit).
pub fn ensure(spec: &ToolSpec, root: &Path) -> Result<InstalledTool> {
    semver::Version::parse(&spec.version).map_err(|e| {
        SetupError::InvalidConfig(format!("'{}' is not a valid {} version: {e}", spec.version, spec.kind))
    })?;

    let home = root.join(spec.install_dir_name());
    let executable = home.join(spec.executable_rel_path());
    if executable.is_file() {
        tracing::debug!(tool = %spec.kind, version = %spec.version, "tool already installed");
        return Ok(installed(spec, home, executable));
    }

    tracing::info!(tool = %spec.kind, version = %spec.version, "installing tool");
    fs::create_dir_all(root)?;
    // unique per call; the drop guard removes it on any failure path
    let staging = tempfile::Builder::new()
        .prefix(&format!(".tmp-{}-", spec.install_dir_name()))
        .tempdir_in(root)?;

    install_into(spec, staging.path())?;
    let staged_exe = staging.path().join(spec.executable_rel_path());
    if !staged_exe.is_file() {
        return Err(SetupError::ToolInstallCorrupt {
            name: spec.kind.name().into(),
            version: spec.version.clone(),
            path: staged_exe,
        });
    }
    publish(staging, &home)?;

    if !executable.is_file() {
        return Err(SetupError::ToolInstallCorrupt {
            name: spec.kind.name().into(),
            version: spec.version.clone(),
            path: executable,
        });
    }
    tracing::info!(tool = %spec.kind, version = %spec.version, path = %executable.display(), "tool installed");
    Ok(installed(spec, home, executable))
}

fn installed(spec: &ToolSpec, home: PathBuf, executable: PathBuf) -> InstalledTool {
    InstalledTool { kind: spec.kind, version: spec.version.clone(), home, executable }
}

fn install_into(spec: &ToolSpec, staging: &Path) -> Result<()> {
    match &spec.distribution {
        Distribution::BinaryDownload { .. } => {
            let url = spec.download_url().expect("binary distribution has a url");
            let dest = staging.join(spec.executable_rel_path());
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            download_file(spec, &url, &dest)?;
            set_executable(&dest)?;
        }
        Distribution::NpmPackage { package, bin: _ } => {
            fs::create_dir_all(staging)?;
            let mut dependencies = serde_json::Map::new();
            dependencies.insert(package.to_string(), serde_json::Value::String(spec.version.clone()));
            let manifest = json!({
                "name": format!("{}-chainlab-env", spec.kind.name()),
                "version": "1.0.0",
                "description": "chainlab tool environment",
                "dependencies": dependencies,
            });
            let body = serde_json::to_vec_pretty(&manifest).expect("manifest is valid json");
            fs::write(staging.join("package.json"), body)?;
            run_npm_install(spec, staging)?;
        }
    }
    Ok(())
}

/// Publish the staging directory at its final location. Losing the rename
/// race to a concurrent installer is fine as long as the winner's copy is
/// there; the loser's staging copy is removed by the drop guard.
fn publish(staging: tempfile::TempDir, home: &Path) -> Result<()> {
    match fs::rename(staging.path(), home) {
        Ok(()) => {
            // the rename moved the directory; disarm the guard
            let _ = staging.into_path();
            Ok(())
        }
        Err(_) if home.is_dir() => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn download_file(spec: &ToolSpec, url: &str, dest: &Path) -> Result<()> {
    let unavailable = |reason: String| SetupError::ToolUnavailable {
        name: spec.kind.name().into(),
        version: spec.version.clone(),
        reason,
    };

    let client = reqwest::blocking::Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .build()
        .map_err(|e| unavailable(e.to_string()))?;
    let response = client
        .get(url)
        .send()
        .and_then(|r| r.error_for_status())
        .map_err(|e| unavailable(format!("download of {url} failed: {e}")))?;
    let body = response.bytes().map_err(|e| unavailable(format!("download of {url} failed: {e}")))?;
    fs::write(dest, &body)?;
    Ok(())
}

fn run_npm_install(spec: &ToolSpec, cwd: &Path) -> Result<()> {
    let unavailable = |reason: String| SetupError::ToolUnavailable {
        name: spec.kind.name().into(),
        version: spec.version.clone(),
        reason,
    };

    let status = Command::new("npm")
        .arg("install")
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|e| unavailable(format!("failed to run npm: {e}")))?;
    if !status.success() {
        return Err(unavailable(format!("npm install exited with {status}")));
    }
    Ok(())
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(perms.mode() | 0o755);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}
