//! Tarball download and extraction.

use super::error::PkgError;
use burrow_util::fs::copy_dir_all;
use bytes::Bytes;
use flate2::read::GzDecoder;
use reqwest::Client;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tar::Archive;
use tracing::debug;

/// Maximum tarball size (200 MB).
pub const MAX_TARBALL_SIZE: u64 = 200 * 1024 * 1024;

const DOWNLOAD_TIMEOUT_SECS: u64 = 60;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Download a tarball, refusing bodies above `max_bytes`.
///
/// # Errors
/// Returns `PKG_DOWNLOAD_FAILED` on transport errors, non-2xx status or an
/// oversized body.
pub async fn download_tarball(client: &Client, url: &str, max_bytes: u64) -> Result<Bytes, PkgError> {
    debug!(url, "downloading tarball");
    let response = client
        .get(url)
        .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
        .send()
        .await
        .map_err(|e| PkgError::download_failed(format!("Failed to download '{url}': {e}")))?;

    if !response.status().is_success() {
        return Err(PkgError::download_failed(format!(
            "Download failed with status {} for '{url}'",
            response.status()
        )));
    }

    if let Some(len) = response.content_length() {
        if len > max_bytes {
            return Err(PkgError::download_failed(format!(
                "Tarball too large: {len} bytes (max: {max_bytes})"
            )));
        }
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| PkgError::download_failed(format!("Failed to read response body: {e}")))?;

    if bytes.len() as u64 > max_bytes {
        return Err(PkgError::download_failed(format!(
            "Tarball too large: {} bytes (max: {max_bytes})",
            bytes.len()
        )));
    }

    Ok(bytes)
}

/// Extract a gzipped tarball into `dest`.
///
/// Entries are unpacked into a sibling temp directory and the single
/// top-level directory (usually `package/`) is renamed onto `dest`. An
/// existing `dest` is left untouched.
///
/// # Errors
/// Returns `PKG_EXTRACT_FAILED` for malformed archives, absolute or escaping
/// entry paths, or a layout without exactly one top-level directory.
pub fn extract_tgz_atomic(bytes: &[u8], dest: &Path) -> Result<(), PkgError> {
    let parent = dest
        .parent()
        .ok_or_else(|| PkgError::extract_failed("Destination has no parent"))?;
    fs::create_dir_all(parent)?;

    if dest.exists() {
        return Ok(());
    }

    let temp_dir = parent.join(format!(
        ".tmp-{}-{}",
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    if temp_dir.exists() {
        let _ = fs::remove_dir_all(&temp_dir);
    }
    fs::create_dir_all(&temp_dir)?;

    let result = extract_tgz_to(bytes, &temp_dir)
        .and_then(|()| find_extracted_root(&temp_dir))
        .and_then(|root| move_into_place(&root, dest));
    let _ = fs::remove_dir_all(&temp_dir);
    result
}

fn move_into_place(root: &Path, dest: &Path) -> Result<(), PkgError> {
    match fs::rename(root, dest) {
        Ok(()) => Ok(()),
        // another writer won the race
        Err(_) if dest.exists() => Ok(()),
        Err(rename_err) => copy_dir_all(root, dest, &[]).map_err(|copy_err| {
            PkgError::extract_failed(format!(
                "Failed to move or copy extracted package: rename={rename_err}, copy={copy_err}"
            ))
        }),
    }
}

/// The single top-level directory of an extracted tarball.
///
/// Most tarballs use `package/`; some (`@types/*`) use the bare name.
fn find_extracted_root(temp_dir: &Path) -> Result<PathBuf, PkgError> {
    let package_dir = temp_dir.join("package");
    if package_dir.is_dir() {
        return Ok(package_dir);
    }

    let entries: Vec<PathBuf> = fs::read_dir(temp_dir)
        .map_err(|e| PkgError::extract_failed(format!("Failed to read extracted dir: {e}")))?
        .filter_map(Result::ok)
        .filter(|e| {
            e.file_type().is_ok_and(|ft| ft.is_dir())
                && !e.file_name().to_string_lossy().starts_with('.')
        })
        .map(|e| e.path())
        .collect();

    match entries.as_slice() {
        [single] => Ok(single.clone()),
        [] => Err(PkgError::extract_failed(
            "Tarball does not contain any top-level directory",
        )),
        many => Err(PkgError::extract_failed(format!(
            "Tarball contains {} top-level directories, expected 1",
            many.len()
        ))),
    }
}

fn extract_tgz_to(bytes: &[u8], dest: &Path) -> Result<(), PkgError> {
    let mut archive = Archive::new(GzDecoder::new(bytes));
    let entries = archive
        .entries()
        .map_err(|e| PkgError::extract_failed(format!("Failed to read tarball entries: {e}")))?;

    for entry in entries {
        let mut entry = entry
            .map_err(|e| PkgError::extract_failed(format!("Failed to read tarball entry: {e}")))?;
        let path = entry
            .path()
            .map_err(|e| PkgError::extract_failed(format!("Failed to read entry path: {e}")))?
            .into_owned();

        let escapes = path.is_absolute()
            || path
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir));
        let target = dest.join(&path);
        if escapes || !target.starts_with(dest) {
            return Err(PkgError::extract_failed(format!(
                "Tarball entry escapes destination: {}",
                path.display()
            )));
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let kind = entry.header().entry_type();
        if kind.is_dir() {
            fs::create_dir_all(&target)?;
        } else if kind.is_file() {
            let mut file = File::create(&target)?;
            io::copy(&mut entry, &mut file)?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Ok(mode) = entry.header().mode() {
                    let _ = fs::set_permissions(&target, fs::Permissions::from_mode(mode));
                }
            }
        }
        // symlinks and special entries are skipped
    }

    Ok(())
}
