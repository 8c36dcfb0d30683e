//! Fetchers: put a remote's files into its cache directory.

use super::cache::{CacheMetadata, PackageCache};
use super::error::PkgError;
use super::lockfile::{Lockfile, LOCKFILE_NAME};
use super::manifest::{Manifest, PackageJson, Remote};
use super::tarball::{download_tarball, extract_tgz_atomic, MAX_TARBALL_SIZE};
use async_trait::async_trait;
use burrow_util::fs::copy_dir_all;
use burrow_util::hash::{blake3_bytes, blake3_dir};
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Result of fetching one package.
#[derive(Debug, Clone)]
pub struct FetchedPackage {
    /// The package's own `package.json`.
    pub manifest: PackageJson,
    /// BLAKE3 of the fetched bytes or tree.
    pub hash: String,
    pub dest: PathBuf,
    /// Lockfile shipped inside the package, if any.
    pub lockfile: Option<Arc<Lockfile>>,
    /// Whether this run did the I/O (`false` for a cache hit).
    pub fresh: bool,
}

impl FetchedPackage {
    /// Read the manifest and embedded lockfile a fetch left at `dest`.
    pub fn load(dest: &Path, hash: String, fresh: bool) -> Result<Self, PkgError> {
        let manifest_path = dest.join("package.json");
        let manifest = if manifest_path.is_file() {
            PackageJson::read(&manifest_path)?
        } else {
            PackageJson::default()
        };

        let lockfile = match Lockfile::read_optional(&dest.join(LOCKFILE_NAME)) {
            Ok(found) => found.map(Arc::new),
            Err(e) => {
                warn!(dest = %dest.display(), error = %e, "ignoring unreadable embedded lockfile");
                None
            }
        };

        Ok(Self {
            manifest,
            hash,
            dest: dest.to_path_buf(),
            lockfile,
            fresh,
        })
    }
}

/// Run filesystem work on the blocking pool.
pub(crate) async fn run_blocking<T, F>(what: &str, work: F) -> Result<T, PkgError>
where
    F: FnOnce() -> Result<T, PkgError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| PkgError::cache_error(format!("{what} task failed: {e}")))?
}

/// Serve a cache hit from `dest`, or clear what an interrupted fetch left there.
fn reuse_or_clear(dest: &Path, identity: &str) -> Result<Option<FetchedPackage>, PkgError> {
    if let Some(metadata) = PackageCache::read_metadata(dest) {
        if metadata.remote == identity {
            return FetchedPackage::load(dest, metadata.hash, false).map(Some);
        }
    }
    // a directory without metadata is a leftover from an interrupted fetch
    if dest.exists() {
        std::fs::remove_dir_all(dest).map_err(|e| {
            PkgError::cache_error(format!("Failed to clear {}: {e}", dest.display()))
        })?;
    }
    Ok(None)
}

/// Read back a fresh fetch and record it in the cache.
fn finish_fetch(dest: &Path, hash: String, identity: String) -> Result<FetchedPackage, PkgError> {
    let fetched = FetchedPackage::load(dest, hash, true)?;
    PackageCache::write_metadata(
        dest,
        &CacheMetadata {
            name: fetched.manifest.name.clone().unwrap_or_default(),
            version: fetched.manifest.version.clone().unwrap_or_default(),
            remote: identity,
            hash: fetched.hash.clone(),
        },
    )?;
    Ok(fetched)
}

/// Puts the files of a remote at a destination.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Where `manifest` will be fetched to. Also the coalescing key.
    fn dest_for(&self, manifest: &Manifest) -> PathBuf;

    async fn fetch(&self, remote: &Remote, dest: &Path) -> Result<FetchedPackage, PkgError>;
}

/// Registry and tarball-URL remotes.
#[derive(Debug, Clone)]
pub struct TarballFetcher {
    http: Client,
    max_bytes: u64,
}

impl TarballFetcher {
    #[must_use]
    pub fn new(http: Client) -> Self {
        Self {
            http,
            max_bytes: MAX_TARBALL_SIZE,
        }
    }

    /// Download and extract; returns the hash of the tarball bytes.
    async fn fetch_into(&self, remote: &Remote, dest: &Path) -> Result<String, PkgError> {
        let url = match remote {
            Remote::Registry { tarball, .. } => tarball,
            Remote::Tarball { url, .. } => url,
            other => {
                return Err(PkgError::unsupported_remote(format!(
                    "Tarball fetcher cannot fetch a {} remote",
                    other.kind()
                )))
            }
        };

        let bytes = download_tarball(&self.http, url, self.max_bytes).await?;
        let hash = blake3_bytes(&bytes);

        let target = dest.to_path_buf();
        tokio::task::spawn_blocking(move || extract_tgz_atomic(&bytes, &target))
            .await
            .map_err(|e| PkgError::extract_failed(format!("Extraction task failed: {e}")))??;

        Ok(hash)
    }
}

/// `file:` remotes: the source directory is copied into the cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyFetcher;

impl CopyFetcher {
    async fn fetch_into(remote: &Remote, dest: &Path) -> Result<String, PkgError> {
        let Remote::File { path } = remote else {
            return Err(PkgError::unsupported_remote(format!(
                "Copy fetcher cannot fetch a {} remote",
                remote.kind()
            )));
        };

        let (src, target) = (path.clone(), dest.to_path_buf());
        tokio::task::spawn_blocking(move || {
            copy_dir_all(&src, &target, &["node_modules"])?;
            blake3_dir(&target)
        })
        .await
        .map_err(|e| PkgError::cache_error(format!("Copy task failed: {e}")))?
        .map_err(|e| {
            PkgError::cache_error(format!("Failed to copy {}: {e}", path.display()))
        })
    }
}

/// The fetcher the resolver uses: dispatch by remote kind, serve cache hits,
/// bound concurrent network fetches.
#[derive(Debug, Clone)]
pub struct PackageFetcher {
    cache: PackageCache,
    tarball: TarballFetcher,
    network: Arc<Semaphore>,
}

impl PackageFetcher {
    #[must_use]
    pub fn new(cache: PackageCache, http: Client, network_concurrency: usize) -> Self {
        Self {
            cache,
            tarball: TarballFetcher::new(http),
            network: Arc::new(Semaphore::new(network_concurrency.max(1))),
        }
    }

    /// Link and workspace packages are read where they are.
    async fn fetch_in_place(remote: &Remote, dest: &Path) -> Result<FetchedPackage, PkgError> {
        let identity = remote.identity();
        let dest = dest.to_path_buf();
        run_blocking("Package read", move || {
            if !dest.is_dir() {
                return Err(PkgError::not_found(&identity));
            }
            let hash = blake3_bytes(identity.as_bytes());
            FetchedPackage::load(&dest, hash, false)
        })
        .await
    }
}

#[async_trait]
impl Fetcher for PackageFetcher {
    fn dest_for(&self, manifest: &Manifest) -> PathBuf {
        self.cache
            .dest_for(&manifest.name, &manifest.version, &manifest.remote)
    }

    async fn fetch(&self, remote: &Remote, dest: &Path) -> Result<FetchedPackage, PkgError> {
        if remote.is_in_place() {
            return Self::fetch_in_place(remote, dest).await;
        }

        let (target, identity) = (dest.to_path_buf(), remote.identity());
        if let Some(hit) =
            run_blocking("Cache lookup", move || reuse_or_clear(&target, &identity)).await?
        {
            debug!(dest = %dest.display(), "cache hit");
            return Ok(hit);
        }

        let hash = match remote {
            Remote::Registry { .. } | Remote::Tarball { .. } => {
                let _permit = self
                    .network
                    .acquire()
                    .await
                    .map_err(|e| PkgError::download_failed(e.to_string()))?;
                self.tarball.fetch_into(remote, dest).await?
            }
            Remote::File { .. } => CopyFetcher::fetch_into(remote, dest).await?,
            Remote::Git { url, .. } => {
                return Err(PkgError::unsupported_remote(format!(
                    "Git remotes cannot be fetched: {url}"
                )))
            }
            Remote::Link { .. } | Remote::Workspace { .. } => {
                return Self::fetch_in_place(remote, dest).await
            }
        };

        let (target, identity) = (dest.to_path_buf(), remote.identity());
        let fetched =
            run_blocking("Cache write", move || finish_fetch(&target, hash, identity)).await?;
        debug!(dest = %dest.display(), "fetched");
        Ok(fetched)
    }
}
