//! npm registry client.

use super::error::PkgError;
use super::manifest::{Manifest, Remote};
use super::pattern::{url_encoded_name, Pattern};
use super::resolvers::RegistryResolver;
use super::version::resolve_version;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Default npm registry URL.
pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org/";

/// Package metadata document served at `GET <registry>/<name>`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Packument {
    pub name: String,
    #[serde(rename = "dist-tags", default)]
    pub dist_tags: BTreeMap<String, String>,
    #[serde(default)]
    pub versions: BTreeMap<String, PackumentVersion>,
}

/// One published version inside a packument.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackumentVersion {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub optional_dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub os: Vec<String>,
    #[serde(default)]
    pub cpu: Vec<String>,
    #[serde(default)]
    pub dist: Dist,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Dist {
    #[serde(default)]
    pub tarball: String,
    #[serde(default)]
    pub integrity: Option<String>,
    #[serde(default)]
    pub shasum: Option<String>,
}

impl Packument {
    /// Pick the version `range` resolves to and build its manifest.
    ///
    /// # Errors
    /// `PKG_VERSION_NOT_FOUND` when nothing matches; `PKG_MANIFEST_INVALID`
    /// when the chosen version has no tarball.
    pub fn manifest_for(&self, range: &str, registry: &str) -> Result<Manifest, PkgError> {
        let version = resolve_version(
            &self.name,
            range,
            &self.dist_tags,
            self.versions.keys().map(String::as_str),
        )?;
        let entry = self
            .versions
            .get(&version)
            .ok_or_else(|| PkgError::version_not_found(&self.name, range))?;

        if entry.dist.tarball.is_empty() {
            return Err(PkgError::manifest_missing_field(
                &format!("{}@{version}", self.name),
                "dist.tarball",
            ));
        }

        // Older packuments only carry a sha1 shasum.
        let integrity = entry
            .dist
            .integrity
            .clone()
            .or_else(|| entry.dist.shasum.as_ref().map(|s| format!("sha1-{s}")));

        let mut manifest = Manifest::new(
            self.name.clone(),
            version,
            Remote::Registry {
                registry: registry.to_string(),
                tarball: entry.dist.tarball.clone(),
                integrity,
            },
        );
        manifest.dependencies.clone_from(&entry.dependencies);
        manifest
            .optional_dependencies
            .clone_from(&entry.optional_dependencies);
        manifest.os.clone_from(&entry.os);
        manifest.cpu.clone_from(&entry.cpu);
        Ok(manifest)
    }
}

/// Registry client for fetching package metadata.
///
/// Packuments are memoised for the lifetime of the client, so many ranges of
/// one package cost a single request.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    base_url: Url,
    http: Client,
    packuments: Arc<Mutex<HashMap<String, Arc<Packument>>>>,
}

impl RegistryClient {
    /// Create a new registry client with the given base URL.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the HTTP client cannot be created.
    pub fn new(base_url: &str) -> Result<Self, PkgError> {
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let base_url = Url::parse(&normalized)
            .map_err(|e| PkgError::registry(format!("Invalid registry URL '{base_url}': {e}")))?;

        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .user_agent(crate::version::user_agent())
            .build()
            .map_err(|e| PkgError::registry(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            http,
            packuments: Arc::default(),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Get the HTTP client (for reuse in tarball downloads).
    #[must_use]
    pub fn http(&self) -> &Client {
        &self.http
    }

    /// Fetch the packument for a package, memoised.
    ///
    /// # Errors
    /// Returns an error if the request fails or the package is not found.
    pub async fn fetch_packument(&self, name: &str) -> Result<Arc<Packument>, PkgError> {
        if let Some(hit) = self.cached(name) {
            return Ok(hit);
        }

        let url = self
            .base_url
            .join(&url_encoded_name(name))
            .map_err(|e| PkgError::registry(format!("Failed to build URL for '{name}': {e}")))?;

        debug!(%url, "fetching packument");
        let response = self.http.get(url.as_str()).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(PkgError::not_found(name));
        }

        if !response.status().is_success() {
            return Err(PkgError::registry(format!(
                "Registry returned status {} for '{name}'",
                response.status()
            )));
        }

        let mut packument: Packument = response.json().await?;
        if packument.name.is_empty() {
            packument.name = name.to_string();
        }
        let packument = Arc::new(packument);

        if let Ok(mut cache) = self.packuments.lock() {
            cache.insert(name.to_string(), Arc::clone(&packument));
        }
        Ok(packument)
    }

    fn cached(&self, name: &str) -> Option<Arc<Packument>> {
        self.packuments.lock().ok()?.get(name).cloned()
    }
}

#[async_trait]
impl RegistryResolver for RegistryClient {
    fn registry(&self) -> &str {
        self.base_url.as_str()
    }

    async fn resolve(&self, pattern: &Pattern) -> Result<Manifest, PkgError> {
        let packument = self.fetch_packument(pattern.name()).await?;
        packument.manifest_for(pattern.range(), self.registry())
    }
}
