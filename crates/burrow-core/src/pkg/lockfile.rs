//! Lockfile: pinned resolutions keyed by pattern.
//!
//! ## File Format
//!
//! `burrow.lock` is JSON. Patterns that resolved to the same package share one
//! entry whose key lists them all, sorted and joined with `", "`:
//!
//! ```json
//! {
//!   "lockfile_version": 1,
//!   "packages": {
//!     "which@^1.0.5, which@^1.2.9": {
//!       "name": "which",
//!       "version": "1.2.11",
//!       "remote": { "type": "registry", "registry": "...", "tarball": "..." },
//!       "dependencies": { "isexe": "^1.1.1" }
//!     }
//!   }
//! }
//! ```
//!
//! Entries live in a `BTreeMap`, so output is sorted and byte-stable.

use super::graph::ResolverGraph;
use super::manifest::{Manifest, Remote};
use super::reference::{ReferenceId, Visibility};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

/// Lockfile format version.
pub const LOCKFILE_VERSION: u32 = 1;

/// Lockfile filename.
pub const LOCKFILE_NAME: &str = "burrow.lock";

/// Separator between the patterns of one grouped entry.
const KEY_SEPARATOR: &str = ", ";

/// Lockfile error codes.
pub mod codes {
    /// Lockfile not found at the expected path.
    pub const PKG_LOCK_NOT_FOUND: &str = "PKG_LOCK_NOT_FOUND";
    /// Lockfile has invalid JSON.
    pub const PKG_LOCK_INVALID_JSON: &str = "PKG_LOCK_INVALID_JSON";
    /// Lockfile format version mismatch.
    pub const PKG_LOCK_VERSION_MISMATCH: &str = "PKG_LOCK_VERSION_MISMATCH";
    /// Lockfile write failed.
    pub const PKG_LOCK_WRITE_FAILED: &str = "PKG_LOCK_WRITE_FAILED";
    /// Lockfile needs changes but rewriting was forbidden.
    pub const PKG_LOCK_STALE: &str = "PKG_LOCK_STALE";
}

/// One pinned package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedPackage {
    pub name: String,
    pub version: String,
    pub remote: Remote,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub optional_dependencies: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub permissions: BTreeMap<String, bool>,
}

impl LockedPackage {
    /// Manifest as pinned, before the package itself is read.
    #[must_use]
    pub fn to_manifest(&self) -> Manifest {
        let mut manifest = Manifest::new(self.name.clone(), self.version.clone(), self.remote.clone());
        manifest.dependencies.clone_from(&self.dependencies);
        manifest
            .optional_dependencies
            .clone_from(&self.optional_dependencies);
        manifest
    }
}

/// The complete lockfile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lockfile {
    pub lockfile_version: u32,
    #[serde(default)]
    packages: BTreeMap<String, LockedPackage>,
    /// pattern -> entry key, rebuilt on load
    #[serde(skip)]
    index: HashMap<String, String>,
}

impl PartialEq for Lockfile {
    fn eq(&self, other: &Self) -> bool {
        self.lockfile_version == other.lockfile_version && self.packages == other.packages
    }
}

impl Eq for Lockfile {}

impl Default for Lockfile {
    fn default() -> Self {
        Self {
            lockfile_version: LOCKFILE_VERSION,
            packages: BTreeMap::new(),
            index: HashMap::new(),
        }
    }
}

impl Lockfile {
    /// An empty lockfile.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin `patterns` to `pkg` as one grouped entry.
    pub fn insert<S: AsRef<str>>(&mut self, patterns: &[S], pkg: LockedPackage) {
        let mut sorted: Vec<&str> = patterns.iter().map(AsRef::as_ref).collect();
        sorted.sort_unstable();
        sorted.dedup();
        let key = sorted.join(KEY_SEPARATOR);
        for pattern in sorted {
            self.index.insert(pattern.to_string(), key.clone());
        }
        self.packages.insert(key, pkg);
    }

    /// The pin for `pattern`, if any.
    #[must_use]
    pub fn get_locked(&self, pattern: &str) -> Option<&LockedPackage> {
        self.index
            .get(pattern)
            .and_then(|key| self.packages.get(key))
    }

    /// Whether `pattern` is pinned.
    #[must_use]
    pub fn contains(&self, pattern: &str) -> bool {
        self.index.contains_key(pattern)
    }

    /// Grouped entries in key order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &LockedPackage)> {
        self.packages.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Number of grouped entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        for key in self.packages.keys() {
            for pattern in key.split(KEY_SEPARATOR) {
                self.index.insert(pattern.to_string(), key.clone());
            }
        }
    }

    /// Generate a lockfile from a completed resolution.
    ///
    /// Every pattern of the graph is grouped under its reference; packages that
    /// were excluded after a failed optional fetch are left out. Ignored packages
    /// stay pinned so the lockfile does not depend on the platform it was written on.
    #[must_use]
    pub fn from_graph(graph: &ResolverGraph) -> Self {
        let mut groups: BTreeMap<ReferenceId, Vec<&str>> = BTreeMap::new();
        for (pattern, id) in graph.pattern_entries() {
            groups.entry(id).or_default().push(pattern);
        }

        let mut lockfile = Self::new();
        for (id, patterns) in groups {
            let reference = graph.reference(id);
            if matches!(reference.visibility, Visibility::Excluded) {
                continue;
            }
            let manifest = &reference.manifest;
            lockfile.insert(
                &patterns,
                LockedPackage {
                    name: manifest.name.clone(),
                    version: manifest.version.clone(),
                    remote: manifest.remote.clone(),
                    dependencies: manifest.dependencies.clone(),
                    optional_dependencies: manifest.optional_dependencies.clone(),
                    permissions: reference.permissions.clone(),
                },
            );
        }
        lockfile
    }

    /// Read a lockfile from a path.
    pub fn read_from(path: &Path) -> Result<Self, LockfileError> {
        let content = fs::read_to_string(path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                LockfileError::new(
                    codes::PKG_LOCK_NOT_FOUND,
                    format!("Lockfile not found: {}", path.display()),
                )
            } else {
                LockfileError::new(
                    codes::PKG_LOCK_INVALID_JSON,
                    format!("Failed to read lockfile: {e}"),
                )
            }
        })?;

        Self::from_json(&content)
    }

    /// Read a lockfile if one exists at `path`.
    pub fn read_optional(path: &Path) -> Result<Option<Self>, LockfileError> {
        match Self::read_from(path) {
            Ok(lockfile) => Ok(Some(lockfile)),
            Err(e) if e.code() == codes::PKG_LOCK_NOT_FOUND => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Write the lockfile to a path atomically.
    pub fn write_to(&self, path: &Path) -> Result<(), LockfileError> {
        let content = self.to_json()?;
        burrow_util::fs::atomic_write(path, content.as_bytes()).map_err(|e| {
            LockfileError::new(
                codes::PKG_LOCK_WRITE_FAILED,
                format!("Failed to write lockfile: {e}"),
            )
        })
    }

    /// Serialize to pretty JSON with a trailing newline.
    pub fn to_json(&self) -> Result<String, LockfileError> {
        let mut json = serde_json::to_string_pretty(self).map_err(|e| {
            LockfileError::new(
                codes::PKG_LOCK_WRITE_FAILED,
                format!("Failed to serialize lockfile: {e}"),
            )
        })?;
        json.push('\n');
        Ok(json)
    }

    /// Deserialize from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, LockfileError> {
        let mut lockfile: Self = serde_json::from_str(json).map_err(|e| {
            LockfileError::new(
                codes::PKG_LOCK_INVALID_JSON,
                format!("Invalid lockfile JSON: {e}"),
            )
        })?;

        if lockfile.lockfile_version != LOCKFILE_VERSION {
            return Err(LockfileError::new(
                codes::PKG_LOCK_VERSION_MISMATCH,
                format!(
                    "Lockfile version {} not supported (expected {LOCKFILE_VERSION})",
                    lockfile.lockfile_version
                ),
            ));
        }

        lockfile.rebuild_index();
        Ok(lockfile)
    }
}

/// Lockfile error.
#[derive(Debug)]
pub struct LockfileError {
    code: &'static str,
    message: String,
}

impl LockfileError {
    #[must_use]
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        self.code
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for LockfileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for LockfileError {}
