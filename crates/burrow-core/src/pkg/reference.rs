//! Package references: one per distinct resolved package.

use super::manifest::Manifest;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Index of a reference in the resolver graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReferenceId(pub(crate) usize);

impl fmt::Display for ReferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ref#{}", self.0)
    }
}

/// Whether a package is optional for the install.
///
/// Starts `Unset`; any required edge makes it `Required` for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Optionality {
    #[default]
    Unset,
    Optional,
    Required,
}

impl Optionality {
    /// Fold in one more edge.
    #[must_use]
    pub fn merge(self, optional: bool) -> Self {
        match (self, optional) {
            (Self::Required, _) | (_, false) => Self::Required,
            (Self::Unset | Self::Optional, true) => Self::Optional,
        }
    }

    #[must_use]
    pub fn is_optional(self) -> bool {
        self == Self::Optional
    }
}

/// Whether a reference ends up on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Visible,
    /// An optional package that failed to resolve or fetch.
    Excluded,
    /// Marked non-installable by the compatibility check.
    Ignored,
    /// Displaced by a flat-mode collapse.
    RemovedAncestor,
}

/// One request that landed on a reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    pub pattern: String,
    /// Human-readable chain of parent patterns, root first.
    pub chain: Vec<String>,
    pub optional: bool,
}

/// The shared identity of every request that resolved to one package.
#[derive(Debug, Clone)]
pub struct PackageReference {
    pub id: ReferenceId,
    pub manifest: Manifest,
    pub requests: Vec<RequestInfo>,
    /// Every pattern that maps here, in arrival order.
    pub patterns: Vec<String>,
    /// Patterns of this package's own dependencies, set once after fetch.
    pub dependencies: Vec<String>,
    pub optional: Optionality,
    /// Consents pinned in the lockfile (e.g. `scripts: true`).
    pub permissions: BTreeMap<String, bool>,
    pub visibility: Visibility,
    /// Cache (or in-place) directory once fetched.
    pub location: Option<PathBuf>,
    /// Content hash reported by the fetcher.
    pub hash: Option<String>,
    /// Fetched from the network in this run rather than served from cache.
    pub fresh: bool,
}

impl PackageReference {
    #[must_use]
    pub fn new(id: ReferenceId, mut manifest: Manifest) -> Self {
        manifest.reference = Some(id);
        Self {
            id,
            manifest,
            requests: Vec::new(),
            patterns: Vec::new(),
            dependencies: Vec::new(),
            optional: Optionality::Unset,
            permissions: BTreeMap::new(),
            visibility: Visibility::Visible,
            location: None,
            hash: None,
            fresh: false,
        }
    }

    /// Identity used for convergence: `name`, `version` and remote locator.
    #[must_use]
    pub fn identity(&self) -> (String, String, String) {
        identity_of(&self.manifest)
    }

    pub fn add_request(&mut self, request: RequestInfo) {
        self.optional = self.optional.merge(request.optional);
        self.requests.push(request);
    }

    pub fn add_pattern(&mut self, pattern: &str) {
        if !self.patterns.iter().any(|p| p == pattern) {
            self.patterns.push(pattern.to_string());
        }
    }

    pub fn remove_pattern(&mut self, pattern: &str) {
        self.patterns.retain(|p| p != pattern);
    }

    pub fn set_dependencies(&mut self, deps: Vec<String>) {
        self.dependencies = deps;
    }

    /// Record a lockfile permission. An existing `false` is never flipped to `true`.
    pub fn set_permission(&mut self, key: &str, allowed: bool) {
        let entry = self.permissions.entry(key.to_string()).or_insert(allowed);
        *entry = *entry && allowed;
    }

    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.visibility == Visibility::Visible
    }

    /// Whether the hoister should lay this package out at all.
    ///
    /// Ignored packages still occupy their slots during hoisting, so only
    /// excluded and collapsed references are pruned before the build.
    #[must_use]
    pub fn is_pruned(&self) -> bool {
        matches!(
            self.visibility,
            Visibility::Excluded | Visibility::RemovedAncestor
        )
    }
}

/// Identity triple of a manifest.
#[must_use]
pub fn identity_of(manifest: &Manifest) -> (String, String, String) {
    (
        manifest.name.clone(),
        manifest.version.clone(),
        manifest.remote.identity(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkg::manifest::Remote;

    fn reference() -> PackageReference {
        let remote = Remote::Registry {
            registry: "npm".to_string(),
            tarball: "https://r/a-1.0.0.tgz".to_string(),
            integrity: None,
        };
        PackageReference::new(ReferenceId(0), Manifest::new("a", "1.0.0", remote))
    }

    fn request(pattern: &str, optional: bool) -> RequestInfo {
        RequestInfo {
            pattern: pattern.to_string(),
            chain: Vec::new(),
            optional,
        }
    }

    #[test]
    fn test_optionality_lattice() {
        assert_eq!(Optionality::Unset.merge(true), Optionality::Optional);
        assert_eq!(Optionality::Unset.merge(false), Optionality::Required);
        assert_eq!(Optionality::Optional.merge(false), Optionality::Required);
        assert_eq!(Optionality::Required.merge(true), Optionality::Required);
        assert_eq!(Optionality::Optional.merge(true), Optionality::Optional);
    }

    #[test]
    fn test_required_edge_wins_in_any_order() {
        let mut r = reference();
        r.add_request(request("a@^1", true));
        r.add_request(request("a@1.0.0", false));
        assert_eq!(r.optional, Optionality::Required);

        let mut r = reference();
        r.add_request(request("a@1.0.0", false));
        r.add_request(request("a@^1", true));
        assert_eq!(r.optional, Optionality::Required);
    }

    #[test]
    fn test_patterns_are_unique() {
        let mut r = reference();
        r.add_pattern("a@^1");
        r.add_pattern("a@^1");
        r.add_pattern("a@1.0.0");
        assert_eq!(r.patterns, vec!["a@^1", "a@1.0.0"]);

        r.remove_pattern("a@^1");
        assert_eq!(r.patterns, vec!["a@1.0.0"]);
    }

    #[test]
    fn test_manifest_back_reference() {
        let r = reference();
        assert_eq!(r.manifest.reference, Some(ReferenceId(0)));
    }

    #[test]
    fn test_permission_denial_sticks() {
        let mut r = reference();
        r.set_permission("scripts", false);
        r.set_permission("scripts", true);
        assert_eq!(r.permissions.get("scripts"), Some(&false));
    }
}
