//! Resolution strategies: the registry and the exotic (non-registry) sources.
//!
//! A resolver turns a [`Pattern`] into a [`Manifest`] without touching the
//! cache. Fetching happens later, once the request knows the package is new.

use super::error::PkgError;
use super::fetch::run_blocking;
use super::manifest::{Manifest, PackageJson, Remote};
use super::pattern::Pattern;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Version used for a tarball URL whose file name does not carry one.
/// Replaced by the real version once the tarball's `package.json` is read.
pub const UNKNOWN_TARBALL_VERSION: &str = "0.0.0";

/// Resolves plain `name@range` patterns against a registry.
#[async_trait]
pub trait RegistryResolver: Send + Sync {
    /// Registry identifier; part of the request dedup key.
    fn registry(&self) -> &str;

    async fn resolve(&self, pattern: &Pattern) -> Result<Manifest, PkgError>;
}

/// Resolves a range with a non-registry syntax (URL, path, git).
#[async_trait]
pub trait ExoticResolver: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Whether this resolver claims `range`.
    fn matches(&self, range: &str) -> bool;

    /// Whether this resolver claims `pattern`. Most resolvers only look at the range.
    fn claims(&self, pattern: &Pattern) -> bool {
        self.matches(pattern.range())
    }

    async fn resolve(&self, pattern: &Pattern) -> Result<Manifest, PkgError>;
}

/// The exotic resolvers a project gets by default, in match order.
#[must_use]
pub fn default_exotics(cwd: &Path) -> Vec<Arc<dyn ExoticResolver>> {
    vec![
        Arc::new(GitResolver),
        Arc::new(TarballResolver),
        Arc::new(LinkResolver::new(cwd)),
        Arc::new(FileResolver::new(cwd)),
    ]
}

/// First resolver in `exotics` claiming `pattern`.
#[must_use]
pub fn find_exotic<'a>(
    exotics: &'a [Arc<dyn ExoticResolver>],
    pattern: &Pattern,
) -> Option<&'a Arc<dyn ExoticResolver>> {
    exotics.iter().find(|r| r.claims(pattern))
}

/// `https://host/path/pkg-1.2.3.tgz`
#[derive(Debug, Clone, Copy, Default)]
pub struct TarballResolver;

impl TarballResolver {
    /// Best-effort version from a `name-1.2.3.tgz` file name.
    fn version_from_url(url: &str) -> Option<String> {
        let file = url.rsplit('/').next()?;
        let stem = file
            .strip_suffix(".tgz")
            .or_else(|| file.strip_suffix(".tar.gz"))?;
        let start = stem
            .char_indices()
            .find(|(i, c)| c.is_ascii_digit() && *i > 0 && stem[..*i].ends_with('-'))
            .map(|(i, _)| i)?;
        let candidate = &stem[start..];
        semver::Version::parse(candidate)
            .ok()
            .map(|_| candidate.to_string())
    }
}

#[async_trait]
impl ExoticResolver for TarballResolver {
    fn kind(&self) -> &'static str {
        "tarball"
    }

    fn matches(&self, range: &str) -> bool {
        let is_http = range.starts_with("http://") || range.starts_with("https://");
        let path = range.split(['?', '#']).next().unwrap_or(range);
        is_http && (path.ends_with(".tgz") || path.ends_with(".tar.gz"))
    }

    async fn resolve(&self, pattern: &Pattern) -> Result<Manifest, PkgError> {
        let url = pattern.range();
        let (url, integrity) = match url.split_once('#') {
            Some((u, hash)) if !hash.is_empty() => (u, Some(hash.to_string())),
            _ => (url, None),
        };
        let version =
            Self::version_from_url(url).unwrap_or_else(|| UNKNOWN_TARBALL_VERSION.to_string());
        Ok(Manifest::new(
            pattern.name(),
            version,
            Remote::Tarball {
                url: url.to_string(),
                integrity,
            },
        ))
    }
}

/// Strip a protocol prefix and anchor the path at `cwd`.
fn local_path(cwd: &Path, range: &str, prefix: &str) -> PathBuf {
    let raw = range.strip_prefix(prefix).unwrap_or(range);
    let path = Path::new(raw);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

/// Read the manifest of a local package directory.
///
/// With `allow_bare`, a directory without a `package.json` still resolves,
/// at [`UNKNOWN_TARBALL_VERSION`].
pub(crate) async fn read_local(
    pattern: &Pattern,
    dir: PathBuf,
    remote: Remote,
    allow_bare: bool,
) -> Result<Manifest, PkgError> {
    let name = pattern.name().to_string();
    run_blocking("Local package read", move || {
        let manifest_path = dir.join("package.json");
        if !manifest_path.is_file() {
            if allow_bare && dir.is_dir() {
                return Ok(Manifest::new(name, UNKNOWN_TARBALL_VERSION, remote));
            }
            let reason = if allow_bare { "does not exist" } else { "has no package.json" };
            return Err(PkgError::not_found(&format!(
                "{name} ({} {reason})",
                dir.display()
            )));
        }
        let json = PackageJson::read(&manifest_path)?;
        let mut manifest = Manifest::new(name, String::new(), remote);
        manifest.refresh_from(&json)?;
        Ok(manifest)
    })
    .await
}

/// `file:../dir` and bare relative or absolute paths, copied into the cache.
#[derive(Debug, Clone)]
pub struct FileResolver {
    cwd: PathBuf,
}

impl FileResolver {
    #[must_use]
    pub fn new(cwd: &Path) -> Self {
        Self {
            cwd: cwd.to_path_buf(),
        }
    }
}

#[async_trait]
impl ExoticResolver for FileResolver {
    fn kind(&self) -> &'static str {
        "file"
    }

    fn matches(&self, range: &str) -> bool {
        range.starts_with("file:")
            || range.starts_with("./")
            || range.starts_with("../")
            || range.starts_with('/')
    }

    async fn resolve(&self, pattern: &Pattern) -> Result<Manifest, PkgError> {
        let path = local_path(&self.cwd, pattern.range(), "file:");
        read_local(pattern, path.clone(), Remote::File { path }, false).await
    }
}

/// `link:../dir`, used in place.
#[derive(Debug, Clone)]
pub struct LinkResolver {
    cwd: PathBuf,
}

impl LinkResolver {
    #[must_use]
    pub fn new(cwd: &Path) -> Self {
        Self {
            cwd: cwd.to_path_buf(),
        }
    }
}

#[async_trait]
impl ExoticResolver for LinkResolver {
    fn kind(&self) -> &'static str {
        "link"
    }

    fn matches(&self, range: &str) -> bool {
        range.starts_with("link:")
    }

    async fn resolve(&self, pattern: &Pattern) -> Result<Manifest, PkgError> {
        let path = local_path(&self.cwd, pattern.range(), "link:");
        // A link target may be a bare directory; it still installs.
        read_local(pattern, path.clone(), Remote::Link { path }, true).await
    }
}

/// Recognises git ranges so they fail with a clear error instead of a
/// registry lookup for a nonsense range.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitResolver;

impl GitResolver {
    const PREFIXES: [&'static str; 7] = [
        "git:",
        "git+ssh:",
        "git+https:",
        "git+http:",
        "git+file:",
        "github:",
        "gitlab:",
    ];
}

#[async_trait]
impl ExoticResolver for GitResolver {
    fn kind(&self) -> &'static str {
        "git"
    }

    fn matches(&self, range: &str) -> bool {
        Self::PREFIXES.iter().any(|p| range.starts_with(p))
            || range.split('#').next().is_some_and(|r| r.ends_with(".git"))
    }

    async fn resolve(&self, pattern: &Pattern) -> Result<Manifest, PkgError> {
        Err(PkgError::unsupported_remote(format!(
            "Git dependencies are not supported: {pattern}"
        )))
    }
}
