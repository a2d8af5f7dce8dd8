// Transfer Core - Resumable HTTP transfer engine
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! File operations used by the transfer pipelines
//!
//! # Key Operations
//! - Promotion of finished data (rename with retry, copy-then-rename across filesystems)
//! - Copy fallback for files held open by a player
//! - Best-effort cleanup of transient files
//! - MD5 digests with progress reporting and early abort

use crate::error::{Result, TransferError};
use md5::{Digest, Md5};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Maximum retry attempts for file operations
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Delay between retry attempts
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Read size while digesting
const DIGEST_CHUNK: usize = 64 * 1024;

/// Move `source` to `destination`, replacing it, with retry
///
/// The move is a rename, so the destination either holds the complete data or is
/// left untouched. Across filesystems the data is copied to a hidden sibling of
/// the destination first and renamed from there.
pub async fn safe_move(source: &Path, destination: &Path) -> Result<()> {
    let mut attempts = 0;

    loop {
        attempts += 1;

        match try_move(source, destination).await {
            Ok(()) => return Ok(()),
            Err(e) if attempts >= MAX_RETRY_ATTEMPTS || crate::error::is_storage_full(&e) => {
                return Err(TransferError::MoveFailed {
                    from: source.display().to_string(),
                    to: destination.display().to_string(),
                    reason: e.to_string(),
                });
            }
            Err(e) => {
                debug!(from = %source.display(), attempt = attempts, error = %e, "Move failed, retrying");
                sleep(RETRY_DELAY).await;
            }
        }
    }
}

async fn try_move(source: &Path, destination: &Path) -> std::io::Result<()> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).await?;
    }
    if fs::try_exists(destination).await.unwrap_or(false) {
        fs::remove_file(destination).await?;
    }
    match fs::rename(source, destination).await {
        Err(e) if is_cross_device(&e) => move_across_devices(source, destination).await,
        result => result,
    }
}

/// EXDEV (`ERROR_NOT_SAME_DEVICE` on Windows)
fn is_cross_device(error: &std::io::Error) -> bool {
    #[cfg(windows)]
    const CROSS_DEVICE: i32 = 17;
    #[cfg(not(windows))]
    const CROSS_DEVICE: i32 = 18;

    error.raw_os_error() == Some(CROSS_DEVICE)
}

/// Copy next to `destination`, rename into place, then drop `source`
///
/// The destination only ever appears complete; a failed copy leaves it absent.
async fn move_across_devices(source: &Path, destination: &Path) -> std::io::Result<()> {
    let staging = staging_path(destination);
    debug!(from = %source.display(), to = %destination.display(), "Moving across filesystems");

    let placed = async {
        fs::copy(source, &staging).await?;
        fs::rename(&staging, destination).await
    }
    .await;

    if let Err(e) = placed {
        let _ = fs::remove_file(&staging).await;
        return Err(e);
    }
    fs::remove_file(source).await
}

/// Hidden sibling of `destination` used while copying
fn staging_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    destination.with_file_name(format!(".{}.part", name))
}

/// Copy `source` to `destination`, with retry
pub async fn safe_copy(source: &Path, destination: &Path) -> Result<()> {
    if !file_exists(source).await {
        return Err(TransferError::FileNotFound(source.display().to_string()));
    }

    let mut attempts = 0;

    loop {
        attempts += 1;

        let result = async {
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::copy(source, destination).await.map(|_| ())
        }
        .await;

        match result {
            Ok(()) => return Ok(()),
            Err(e) if crate::error::is_storage_full(&e) => return Err(TransferError::IoError(e)),
            Err(e) if attempts >= MAX_RETRY_ATTEMPTS => {
                return Err(TransferError::MoveFailed {
                    from: source.display().to_string(),
                    to: destination.display().to_string(),
                    reason: format!("copy failed: {}", e),
                });
            }
            Err(_) => sleep(RETRY_DELAY).await,
        }
    }
}

/// Delete a file, treating a missing file as success
pub async fn safe_delete(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(TransferError::file_io(format!(
            "Delete failed: {}: {}",
            path.display(),
            e
        ))),
    }
}

/// Delete a transient file, logging instead of failing
pub async fn cleanup_file(path: &Path) {
    if let Err(e) = safe_delete(path).await {
        warn!(path = %path.display(), error = %e, "Could not remove transient file");
    }
}

/// Check if file exists
pub async fn file_exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

/// Length of a file, `None` if it does not exist
pub async fn file_len(path: &Path) -> Option<u64> {
    fs::metadata(path).await.ok().map(|m| m.len())
}

/// Hex MD5 digest of a file
///
/// `on_progress` receives the percentage digested so far. `is_cancelled` is polled
/// between chunks; a cancelled digest returns [`TransferError::Cancelled`].
pub async fn md5_digest(
    path: &Path,
    mut on_progress: impl FnMut(u8) + Send,
    is_cancelled: impl Fn() -> bool + Send,
) -> Result<String> {
    let mut file = fs::File::open(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            TransferError::FileNotFound(path.display().to_string())
        } else {
            TransferError::IoError(e)
        }
    })?;
    let total = file.metadata().await?.len();

    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; DIGEST_CHUNK];
    let mut read_total = 0u64;
    let mut last_percent = 0u8;
    on_progress(0);

    loop {
        if is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        read_total += n as u64;

        if total > 0 {
            let percent = ((read_total * 100) / total).min(100) as u8;
            if percent != last_percent {
                last_percent = percent;
                on_progress(percent);
            }
        }
    }

    on_progress(100);
    Ok(hex::encode(hasher.finalize()))
}

/// Whether the file at `path` has the given hex MD5 digest
pub async fn digest_matches(path: &Path, expected: &str) -> Result<bool> {
    let actual = md5_digest(path, |_| {}, || false).await?;
    Ok(actual.eq_ignore_ascii_case(expected.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_safe_move_replaces_destination() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("Incomplete").join("a.incomplete.bin");
        let dest = temp_dir.path().join("Downloads").join("a.bin");

        fs::create_dir_all(source.parent().unwrap()).await.unwrap();
        fs::write(&source, b"new content").await.unwrap();
        fs::create_dir_all(dest.parent().unwrap()).await.unwrap();
        fs::write(&dest, b"old").await.unwrap();

        safe_move(&source, &dest).await.unwrap();

        assert!(!source.exists());
        assert_eq!(fs::read(&dest).await.unwrap(), b"new content");
    }

    #[test]
    fn test_cross_device_error_is_recognized() {
        #[cfg(not(windows))]
        let exdev = std::io::Error::from_raw_os_error(18);
        #[cfg(windows)]
        let exdev = std::io::Error::from_raw_os_error(17);

        assert!(is_cross_device(&exdev));
        assert!(!is_cross_device(&std::io::Error::from(std::io::ErrorKind::NotFound)));
    }

    #[tokio::test]
    async fn test_move_across_devices_places_complete_file() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("Incomplete").join("b.incomplete.bin");
        let dest = temp_dir.path().join("Downloads").join("b.bin");
        fs::create_dir_all(source.parent().unwrap()).await.unwrap();
        fs::create_dir_all(dest.parent().unwrap()).await.unwrap();
        fs::write(&source, vec![5u8; 3000]).await.unwrap();

        move_across_devices(&source, &dest).await.unwrap();

        assert!(!source.exists());
        assert!(!staging_path(&dest).exists());
        assert_eq!(fs::read(&dest).await.unwrap(), vec![5u8; 3000]);
    }

    #[tokio::test]
    async fn test_move_across_devices_failure_leaves_no_destination() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("missing.bin");
        let dest = temp_dir.path().join("c.bin");

        assert!(move_across_devices(&source, &dest).await.is_err());
        assert!(!dest.exists());
        assert!(!staging_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_safe_move_missing_source_fails() {
        let temp_dir = TempDir::new().unwrap();
        let err = safe_move(&temp_dir.path().join("nope"), &temp_dir.path().join("dest"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::MoveFailed { .. }));
    }

    #[tokio::test]
    async fn test_safe_copy_keeps_source() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("source.txt");
        fs::write(&source, b"test content").await.unwrap();

        let dest = temp_dir.path().join("out").join("dest.txt");
        safe_copy(&source, &dest).await.unwrap();

        assert!(source.exists());
        assert_eq!(fs::read_to_string(&dest).await.unwrap(), "test content");
    }

    #[tokio::test]
    async fn test_safe_delete_missing_is_ok() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("file.txt");
        fs::write(&file, b"x").await.unwrap();

        safe_delete(&file).await.unwrap();
        assert!(!file.exists());
        safe_delete(&file).await.unwrap();
    }

    #[tokio::test]
    async fn test_md5_digest_known_value() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("hello.txt");
        fs::write(&file, b"hello world").await.unwrap();

        let mut seen = Vec::new();
        let digest = md5_digest(&file, |p| seen.push(p), || false).await.unwrap();

        assert_eq!(digest, "5eb63bbbe01eeed093cb22bb8f5acdc3");
        assert_eq!(seen.first(), Some(&0));
        assert_eq!(seen.last(), Some(&100));
        assert!(digest_matches(&file, "5EB63BBBE01EEED093CB22BB8F5ACDC3").await.unwrap());
    }

    #[tokio::test]
    async fn test_md5_digest_stops_when_cancelled() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("big.bin");
        fs::write(&file, vec![7u8; DIGEST_CHUNK * 4]).await.unwrap();

        let cancelled = AtomicBool::new(false);
        let result = md5_digest(
            &file,
            |p| {
                if p > 0 {
                    cancelled.store(true, Ordering::SeqCst);
                }
            },
            || cancelled.load(Ordering::SeqCst),
        )
        .await;

        assert!(matches!(result, Err(TransferError::Cancelled)));
    }
}
