// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Downloads engine releases and caches them per version

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use tokio::sync::Mutex;

use super::{DownloadError, ToolDownloader};

const DEFAULT_BASE_URL: &str = "https://github.com/opentofu/opentofu/releases/download";
const DEFAULT_BINARY: &str = "tofu";

/// Fetches `<base>/v<version>/<binary>_<version>_<os>_<arch>.tar.gz` once
/// and keeps the unpacked binary under `<dest>/<version>/<binary>`.
#[derive(Clone, Debug)]
pub struct ReleaseDownloader {
    dest: PathBuf,
    base_url: String,
    binary: String,
    // One download at a time; a second caller then hits the cache
    lock: Arc<Mutex<()>>,
}

impl ReleaseDownloader {
    pub fn new(dest: impl Into<PathBuf>) -> Self {
        Self {
            dest: dest.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            binary: DEFAULT_BINARY.to_string(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_binary(mut self, name: impl Into<String>) -> Self {
        self.binary = name.into();
        self
    }

    /// Path the binary for `version` is cached at
    pub fn dest(&self, version: &str) -> PathBuf {
        self.dest.join(version).join(&self.binary)
    }

    fn url(&self, version: &str) -> String {
        format!(
            "{}/v{version}/{}_{version}_{}_{}.tar.gz",
            self.base_url.trim_end_matches('/'),
            self.binary,
            platform_os(),
            platform_arch(),
        )
    }
}

#[async_trait]
impl ToolDownloader for ReleaseDownloader {
    async fn download(&self, version: &str) -> Result<PathBuf, DownloadError> {
        validate_version(version)?;
        let dest = self.dest(version);
        let _guard = self.lock.lock().await;
        if tokio::fs::try_exists(&dest).await? {
            return Ok(dest);
        }

        let url = self.url(version);
        tracing::info!(%url, "downloading engine");
        let binary = self.binary.clone();
        let target = dest.clone();
        tokio::task::spawn_blocking(move || -> Result<(), DownloadError> {
            let response = ureq::get(&url).call().map_err(|e| DownloadError::Http {
                url: url.clone(),
                message: e.to_string(),
            })?;
            unpack(response.into_body().into_reader(), &binary, &target)
        })
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))??;
        tracing::info!(path = %dest.display(), "engine downloaded");
        Ok(dest)
    }
}

/// Extract `binary` from a gzipped tarball into `dest`.
///
/// The file is written next to `dest` first and renamed into place, so a
/// partial download never looks like a cached binary.
pub(crate) fn unpack(reader: impl Read, binary: &str, dest: &Path) -> Result<(), DownloadError> {
    let dir = dest
        .parent()
        .ok_or_else(|| DownloadError::MissingBinary(binary.to_string()))?;
    std::fs::create_dir_all(dir)?;
    let partial = dir.join(format!(".{}.partial", binary));

    let mut archive = tar::Archive::new(GzDecoder::new(reader));
    let mut found = false;
    for entry in archive.entries()? {
        let mut entry = entry?;
        let is_binary = entry
            .path()?
            .file_name()
            .is_some_and(|name| name == binary);
        if is_binary {
            entry.unpack(&partial)?;
            found = true;
            break;
        }
    }
    if !found {
        return Err(DownloadError::MissingBinary(binary.to_string()));
    }
    make_executable(&partial)?;
    std::fs::rename(&partial, dest)?;
    Ok(())
}

#[cfg(unix)]
fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Versions become path components and URL segments
fn validate_version(version: &str) -> Result<(), DownloadError> {
    let valid = !version.is_empty()
        && version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '+'))
        && !version.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(DownloadError::InvalidVersion(version.to_string()))
    }
}

fn platform_os() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        os => os,
    }
}

fn platform_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        arch => arch,
    }
}

#[cfg(test)]
#[path = "release_tests.rs"]
mod tests;
