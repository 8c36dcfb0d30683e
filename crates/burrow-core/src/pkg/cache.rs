//! Package cache layout.
//!
//! Every fetched package gets a content-addressed directory. A directory
//! only counts as cached once its metadata file exists; the fetcher writes it
//! last, so an interrupted extraction is never mistaken for a hit.

use super::error::PkgError;
use super::manifest::Remote;
use burrow_util::fs::atomic_write;
use burrow_util::hash::short_hash;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Marker file written into a cache directory after a successful fetch.
pub const METADATA_FILE: &str = ".burrow-metadata.json";

/// Length of the remote-identity hash suffix on non-registry directories.
const REMOTE_HASH_LEN: usize = 8;

/// What the fetcher recorded about a cache directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub name: String,
    pub version: String,
    /// `Remote::identity()` of the source.
    pub remote: String,
    /// BLAKE3 of the fetched bytes (tarballs) or tree (directories).
    pub hash: String,
}

/// Package cache rooted at one directory.
#[derive(Debug, Clone)]
pub struct PackageCache {
    root: PathBuf,
}

impl PackageCache {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Destination for a package fetched from `remote`.
    ///
    /// - registry: `<root>/<name>/<version>`
    /// - tarball, file, git: `<root>/<name>/<version>-<hash8>`
    /// - link, workspace: the source directory itself
    ///
    /// Scoped names nest (`@types/node` -> `<root>/@types/node/...`).
    #[must_use]
    pub fn dest_for(&self, name: &str, version: &str, remote: &Remote) -> PathBuf {
        match remote {
            Remote::Link { path } | Remote::Workspace { path } => path.clone(),
            Remote::Registry { .. } => self.name_dir(name).join(version),
            Remote::Tarball { .. } | Remote::Git { .. } | Remote::File { .. } => {
                let hash = short_hash(remote.identity().as_bytes(), REMOTE_HASH_LEN);
                self.name_dir(name).join(format!("{version}-{hash}"))
            }
        }
    }

    fn name_dir(&self, name: &str) -> PathBuf {
        match name.split_once('/') {
            Some((scope, rest)) if name.starts_with('@') => self.root.join(scope).join(rest),
            _ => self.root.join(name),
        }
    }

    /// Metadata of a completed fetch at `dest`, if any.
    #[must_use]
    pub fn read_metadata(dest: &Path) -> Option<CacheMetadata> {
        let content = std::fs::read_to_string(dest.join(METADATA_FILE)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Mark `dest` as a completed fetch.
    pub fn write_metadata(dest: &Path, metadata: &CacheMetadata) -> Result<(), PkgError> {
        let json = serde_json::to_vec_pretty(metadata)?;
        atomic_write(&dest.join(METADATA_FILE), &json).map_err(|e| {
            PkgError::cache_error(format!(
                "Failed to write cache metadata in {}: {e}",
                dest.display()
            ))
        })
    }

    /// Whether `dest` holds a completed fetch of `remote`.
    #[must_use]
    pub fn is_cached(dest: &Path, remote: &Remote) -> bool {
        Self::read_metadata(dest).is_some_and(|m| m.remote == remote.identity())
    }
}
