//! Resolved package metadata.

use super::error::PkgError;
use super::pattern::Pattern;
use super::reference::ReferenceId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Where a resolved package comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Remote {
    /// A registry tarball.
    Registry {
        /// Registry base URL the package was resolved against.
        registry: String,
        /// Tarball URL.
        tarball: String,
        /// Subresource integrity string from the packument, if published.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        integrity: Option<String>,
    },
    /// An arbitrary tarball URL.
    Tarball {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        integrity: Option<String>,
    },
    /// A git repository at a commit or ref.
    Git {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        committish: Option<String>,
    },
    /// A local directory copied into the cache.
    File { path: PathBuf },
    /// A local directory used in place.
    Link { path: PathBuf },
    /// A workspace member used in place.
    Workspace { path: PathBuf },
}

impl Remote {
    /// Short name of the remote kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Registry { .. } => "registry",
            Self::Tarball { .. } => "tarball",
            Self::Git { .. } => "git",
            Self::File { .. } => "file",
            Self::Link { .. } => "link",
            Self::Workspace { .. } => "workspace",
        }
    }

    /// Stable locator string; two remotes with the same identity fetch the same bytes.
    #[must_use]
    pub fn identity(&self) -> String {
        match self {
            Self::Registry { tarball, .. } => tarball.clone(),
            Self::Tarball { url, .. } => url.clone(),
            Self::Git { url, committish } => match committish {
                Some(c) => format!("{url}#{c}"),
                None => url.clone(),
            },
            Self::File { path } => format!("file:{}", path.display()),
            Self::Link { path } => format!("link:{}", path.display()),
            Self::Workspace { path } => format!("workspace:{}", path.display()),
        }
    }

    #[cfg(test)]
    #[must_use]
    pub fn integrity(&self) -> Option<&str> {
        match self {
            Self::Registry { integrity, .. } | Self::Tarball { integrity, .. } => {
                integrity.as_deref()
            }
            _ => None,
        }
    }

    /// Whether the package is used from its own directory instead of the cache.
    #[must_use]
    pub fn is_in_place(&self) -> bool {
        matches!(self, Self::Link { .. } | Self::Workspace { .. })
    }
}

/// Metadata of one concrete package version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Manifest {
    pub name: String,
    pub version: String,
    pub dependencies: BTreeMap<String, String>,
    pub optional_dependencies: BTreeMap<String, String>,
    pub os: Vec<String>,
    pub cpu: Vec<String>,
    pub remote: Remote,
    /// Set once the manifest has been registered in a resolver graph.
    #[serde(skip)]
    pub reference: Option<ReferenceId>,
}

impl Manifest {
    /// A manifest with no dependencies.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>, remote: Remote) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            dependencies: BTreeMap::new(),
            optional_dependencies: BTreeMap::new(),
            os: Vec::new(),
            cpu: Vec::new(),
            remote,
            reference: None,
        }
    }

    #[cfg(test)]
    #[must_use]
    pub fn with_dependency(mut self, name: &str, range: &str) -> Self {
        self.dependencies.insert(name.to_string(), range.to_string());
        self
    }

    #[cfg(test)]
    #[must_use]
    pub fn with_optional_dependency(mut self, name: &str, range: &str) -> Self {
        self.optional_dependencies
            .insert(name.to_string(), range.to_string());
        self
    }

    /// `name@version`.
    #[must_use]
    pub fn human(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }

    /// Fail unless both `name` and `version` are present.
    pub fn validate(&self) -> Result<(), PkgError> {
        let human = self.human();
        if self.name.is_empty() {
            return Err(PkgError::manifest_missing_field(&human, "name"));
        }
        if self.version.is_empty() {
            return Err(PkgError::manifest_missing_field(&human, "version"));
        }
        Ok(())
    }

    /// Refresh dependency and platform fields from a fetched `package.json`.
    ///
    /// The requested name is kept (aliases install under the requested name).
    pub fn refresh_from(&mut self, fetched: &PackageJson) -> Result<(), PkgError> {
        if let Some(version) = fetched.version.as_deref().filter(|v| !v.is_empty()) {
            self.version = version.to_string();
        } else if self.version.is_empty() {
            return Err(PkgError::manifest_missing_field(&self.name, "version"));
        }
        self.dependencies.clone_from(&fetched.dependencies);
        self.optional_dependencies
            .clone_from(&fetched.optional_dependencies);
        self.os.clone_from(&fetched.os);
        self.cpu.clone_from(&fetched.cpu);
        Ok(())
    }

    /// Patterns of `dependencies` then `optionalDependencies`.
    ///
    /// A name listed in both is only requested once, as optional.
    #[must_use]
    pub fn dependency_patterns(&self) -> Vec<(Pattern, bool)> {
        let required = self
            .dependencies
            .iter()
            .filter(|(name, _)| !self.optional_dependencies.contains_key(*name))
            .map(|(name, range)| (Pattern::from_dependency(name, range), false));
        let optional = self
            .optional_dependencies
            .iter()
            .map(|(name, range)| (Pattern::from_dependency(name, range), true));
        required.chain(optional).collect()
    }
}

impl fmt::Display for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// The parts of a `package.json` the engine reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageJson {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dev_dependencies: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub optional_dependencies: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub os: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cpu: Vec<String>,
}

impl PackageJson {
    /// Read and parse a `package.json`.
    pub fn read(path: &Path) -> Result<Self, PkgError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PkgError::package_json_invalid(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_json(&content).map_err(|e| {
            PkgError::package_json_invalid(format!("{}: {}", path.display(), e.message()))
        })
    }

    /// Parse `package.json` text.
    pub fn from_json(content: &str) -> Result<Self, PkgError> {
        serde_json::from_str(content)
            .map_err(|e| PkgError::package_json_invalid(format!("Invalid package.json: {e}")))
    }

    /// Root requests of a project: `(pattern, optional)`.
    ///
    /// `dependencies` and `devDependencies` are required; `optionalDependencies`
    /// are optional and win over a duplicate entry in the other two.
    #[must_use]
    pub fn root_patterns(&self) -> Vec<(Pattern, bool)> {
        let mut required: BTreeMap<&str, &str> = BTreeMap::new();
        for (name, range) in self.dev_dependencies.iter().chain(&self.dependencies) {
            required.insert(name, range);
        }

        let mut out: Vec<(Pattern, bool)> = required
            .into_iter()
            .filter(|(name, _)| !self.optional_dependencies.contains_key(*name))
            .map(|(name, range)| (Pattern::from_dependency(name, range), false))
            .collect();
        out.extend(
            self.optional_dependencies
                .iter()
                .map(|(name, range)| (Pattern::from_dependency(name, range), true)),
        );
        out
    }
}
