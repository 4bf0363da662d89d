use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::error::{PrestarterError, PrestarterResult};

/// Refuse to start a transfer with less free space than this.
pub const MIN_FREE_DISK_BYTES: u64 = 512 * 1024 * 1024;
const CATALOG_TIMEOUT: Duration = Duration::from_secs(60);

/// How a verified archive ended up on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadStatus {
    Downloaded { bytes: u64 },
    Reused,
}

/// Cancellable, SHA-256 validated downloader.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
    /// Free space required before writing.
    min_free_bytes: u64,
}

impl Downloader {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            min_free_bytes: MIN_FREE_DISK_BYTES,
        }
    }

    pub fn with_min_free_bytes(mut self, bytes: u64) -> Self {
        self.min_free_bytes = bytes;
        self
    }

    pub fn min_free_bytes(&self) -> u64 {
        self.min_free_bytes
    }

    pub fn http_client(&self) -> &Client {
        &self.client
    }

    // ── Catalog requests ────────────────────────────────

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> PrestarterResult<T> {
        let text = self.get_text(url, cancel).await?;
        Ok(serde_json::from_str(&text)?)
    }

    pub async fn get_text(&self, url: &str, cancel: &CancellationToken) -> PrestarterResult<String> {
        debug!("GET {}", url);
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PrestarterError::Cancelled),
            response = self.client.get(url).timeout(CATALOG_TIMEOUT).send() => response?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(PrestarterError::DownloadFailed {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PrestarterError::Cancelled),
            text = response.text() => Ok(text?),
        }
    }

    // ── Archive download ────────────────────────────────

    /// Download `url` to `dest`, verifying SHA-256.
    ///
    /// An existing `dest` with the expected hash is reused. The body is
    /// streamed into `<dest>.part` and only renamed once verified, so `dest`
    /// never holds an unverified archive.
    pub async fn download_verified(
        &self,
        url: &str,
        dest: &Path,
        expected_sha256: &str,
        cancel: &CancellationToken,
    ) -> PrestarterResult<DownloadStatus> {
        if cancel.is_cancelled() {
            return Err(PrestarterError::Cancelled);
        }
        if dest.exists() {
            if Self::validate_sha256(dest, expected_sha256).await? {
                debug!("Archive already present and verified: {:?}", dest);
                return Ok(DownloadStatus::Reused);
            }
            tokio::fs::remove_file(dest)
                .await
                .map_err(|source| PrestarterError::io(dest, source))?;
        }

        let parent = dest.parent().unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| PrestarterError::io(parent, source))?;
        ensure_min_disk_space(parent, self.min_free_bytes)?;

        let (part_path, actual, written) = self.stream_to_part(url, dest, cancel).await?;
        if !actual.eq_ignore_ascii_case(expected_sha256.trim()) {
            let _ = tokio::fs::remove_file(&part_path).await;
            return Err(PrestarterError::ChecksumMismatch {
                path: dest.to_path_buf(),
                expected: expected_sha256.to_string(),
                actual,
            });
        }

        tokio::fs::rename(&part_path, dest)
            .await
            .map_err(|source| PrestarterError::io(dest, source))?;

        debug!("Downloaded: {} -> {:?} ({} bytes)", url, dest, written);
        Ok(DownloadStatus::Downloaded { bytes: written })
    }

    /// Download `url` to `dest` without a published checksum. An existing
    /// `dest` is kept.
    pub async fn download_if_missing(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> PrestarterResult<DownloadStatus> {
        if dest.is_file() {
            return Ok(DownloadStatus::Reused);
        }
        let parent = dest.parent().unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| PrestarterError::io(parent, source))?;
        ensure_min_disk_space(parent, self.min_free_bytes)?;

        let (part_path, sha256, written) = self.stream_to_part(url, dest, cancel).await?;
        tokio::fs::rename(&part_path, dest)
            .await
            .map_err(|source| PrestarterError::io(dest, source))?;
        debug!("Downloaded: {} -> {:?} ({} bytes, sha256 {})", url, dest, written, sha256);
        Ok(DownloadStatus::Downloaded { bytes: written })
    }

    /// Stream the body of `url` into `<dest>.part`, hashing as it goes.
    /// Returns the part path, its SHA-256 and the byte count.
    async fn stream_to_part(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> PrestarterResult<(PathBuf, String, u64)> {
        info!("Downloading {}", url);
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PrestarterError::Cancelled),
            response = self.client.get(url).send() => response?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(PrestarterError::DownloadFailed {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let part_path = part_path(dest);
        let mut hasher = Sha256::new();
        let mut written = 0_u64;
        let mut file = tokio::fs::File::create(&part_path)
            .await
            .map_err(|source| PrestarterError::io(&part_path, source))?;
        let mut stream = response.bytes_stream();

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                chunk = stream.next() => Some(chunk),
            };
            let chunk = match chunk {
                None => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&part_path).await;
                    return Err(PrestarterError::Cancelled);
                }
                Some(None) => break,
                Some(Some(Ok(chunk))) => chunk,
                Some(Some(Err(err))) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&part_path).await;
                    return Err(err.into());
                }
            };
            hasher.update(&chunk);
            file.write_all(&chunk)
                .await
                .map_err(|source| PrestarterError::io(&part_path, source))?;
            written = written.saturating_add(chunk.len() as u64);
        }

        file.flush()
            .await
            .map_err(|source| PrestarterError::io(&part_path, source))?;
        drop(file);

        Ok((part_path, hex::encode(hasher.finalize()), written))
    }

    /// Validate an existing file's SHA-256.
    pub async fn validate_sha256(path: &Path, expected: &str) -> PrestarterResult<bool> {
        let path = path.to_path_buf();
        let actual = tokio::task::spawn_blocking(move || sha256_file(&path))
            .await
            .map_err(|e| PrestarterError::Other(format!("Task join error: {e}")))??;
        Ok(actual.eq_ignore_ascii_case(expected.trim()))
    }
}

/// Streamed SHA-256 of a file as lowercase hex.
pub fn sha256_file(path: &Path) -> PrestarterResult<String> {
    let mut file = std::fs::File::open(path).map_err(|source| PrestarterError::io(path, source))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher).map_err(|source| PrestarterError::io(path, source))?;
    Ok(hex::encode(hasher.finalize()))
}

pub fn ensure_min_disk_space(path: &Path, minimum_bytes: u64) -> PrestarterResult<()> {
    if minimum_bytes == 0 {
        return Ok(());
    }
    let disks = sysinfo::Disks::new_with_refreshed_list();
    let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let mut best_len = 0usize;
    let mut available = None;
    for disk in disks.list() {
        let mount = disk.mount_point();
        if canonical.starts_with(mount) {
            let len = mount.as_os_str().len();
            if len >= best_len {
                best_len = len;
                available = Some(disk.available_space());
            }
        }
    }
    match available {
        Some(bytes) if bytes < minimum_bytes => Err(PrestarterError::InsufficientDiskSpace {
            path: canonical,
            available: bytes,
            required: minimum_bytes,
        }),
        _ => Ok(()),
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}
