//! The resolver graph: every pattern, every reference, and the indices between them.
//!
//! Owned by one writer at a time. All mutation goes through the methods here so
//! `patterns` and `patterns_by_package` never disagree.

use super::error::PkgError;
use super::manifest::Manifest;
use super::reference::{identity_of, PackageReference, ReferenceId, Visibility};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::warn;

type Identity = (String, String, String);

/// Completed (or in-progress) resolution state.
#[derive(Debug, Default)]
pub struct ResolverGraph {
    /// pattern -> reference
    patterns: BTreeMap<String, ReferenceId>,
    /// package name -> every pattern that resolved to some version of it
    patterns_by_package: BTreeMap<String, Vec<String>>,
    references: Vec<PackageReference>,
    identities: HashMap<Identity, ReferenceId>,
    new_patterns: BTreeSet<String>,
    warnings: Vec<String>,
}

impl ResolverGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Live reference with the same `(name, version, remote)` as `manifest`.
    #[must_use]
    pub fn find_reference(&self, manifest: &Manifest) -> Option<ReferenceId> {
        self.identities.get(&identity_of(manifest)).copied()
    }

    /// Register a new reference for `manifest`, or return the existing one.
    pub fn insert_reference(&mut self, manifest: Manifest) -> ReferenceId {
        let identity = identity_of(&manifest);
        if let Some(id) = self.identities.get(&identity) {
            return *id;
        }
        let id = ReferenceId(self.references.len());
        self.references.push(PackageReference::new(id, manifest));
        self.identities.insert(identity, id);
        id
    }

    /// # Panics
    /// Panics if `id` was not issued by this graph.
    #[must_use]
    pub fn reference(&self, id: ReferenceId) -> &PackageReference {
        &self.references[id.0]
    }

    /// # Panics
    /// Panics if `id` was not issued by this graph.
    pub fn reference_mut(&mut self, id: ReferenceId) -> &mut PackageReference {
        &mut self.references[id.0]
    }

    /// All references in creation order.
    #[must_use]
    pub fn package_references(&self) -> &[PackageReference] {
        &self.references
    }

    /// Map `pattern` to `id`, keeping both indices in step.
    pub fn add_pattern(&mut self, pattern: &str, id: ReferenceId) {
        if let Some(previous) = self.patterns.insert(pattern.to_string(), id) {
            if previous != id {
                self.references[previous.0].remove_pattern(pattern);
            }
        }
        self.references[id.0].add_pattern(pattern);

        let name = self.references[id.0].manifest.name.clone();
        let list = self.patterns_by_package.entry(name).or_default();
        if !list.iter().any(|p| p == pattern) {
            list.push(pattern.to_string());
        }
    }

    /// Forget `pattern`. The reference and its children stay; unreachable
    /// nodes are pruned when the tree is laid out.
    pub fn remove_pattern(&mut self, pattern: &str) {
        let Some(id) = self.patterns.remove(pattern) else {
            return;
        };
        let reference = &mut self.references[id.0];
        reference.remove_pattern(pattern);

        let name = reference.manifest.name.clone();
        if let Some(list) = self.patterns_by_package.get_mut(&name) {
            list.retain(|p| p != pattern);
            if list.is_empty() {
                self.patterns_by_package.remove(&name);
            }
        }
    }

    /// Reference a pattern resolved to.
    #[must_use]
    pub fn reference_for(&self, pattern: &str) -> Option<ReferenceId> {
        self.patterns.get(pattern).copied()
    }

    /// Manifest a pattern resolved to.
    #[must_use]
    pub fn resolved_pattern(&self, pattern: &str) -> Option<&Manifest> {
        self.reference_for(pattern)
            .map(|id| &self.references[id.0].manifest)
    }

    /// Like [`Self::resolved_pattern`], but an unknown pattern is an error.
    pub fn strict_resolved_pattern(&self, pattern: &str) -> Result<&Manifest, PkgError> {
        self.resolved_pattern(pattern).ok_or_else(|| {
            PkgError::hoist_invariant(format!("Couldn't find resolved manifest for {pattern}"))
        })
    }

    /// A live package `name@version` reached through any pattern.
    #[must_use]
    pub fn get_exact_version_match(&self, name: &str, version: &str) -> Option<&Manifest> {
        self.patterns_by_package
            .get(name)?
            .iter()
            .filter_map(|p| self.patterns.get(p))
            .map(|id| &self.references[id.0])
            .find(|r| r.manifest.version == version && !r.is_pruned())
            .map(|r| &r.manifest)
    }

    /// Every distinct manifest installed under `name`, in first-seen order.
    #[must_use]
    pub fn get_all_info_for_package_name(&self, name: &str) -> Vec<&Manifest> {
        let mut seen = HashSet::new();
        self.patterns_by_package
            .get(name)
            .into_iter()
            .flatten()
            .filter_map(|p| self.patterns.get(p))
            .filter(|id| seen.insert(**id))
            .map(|id| &self.references[id.0].manifest)
            .collect()
    }

    /// Drop patterns resolving to a package an earlier pattern already covers.
    ///
    /// Unresolved patterns are dropped too.
    #[must_use]
    pub fn dedupe_patterns<S: AsRef<str>>(&self, patterns: &[S]) -> Vec<String> {
        let mut seen = HashSet::new();
        patterns
            .iter()
            .map(AsRef::as_ref)
            .filter(|p| {
                self.patterns
                    .get(*p)
                    .is_some_and(|id| seen.insert(*id))
            })
            .map(str::to_string)
            .collect()
    }

    /// One manifest per reference, in creation order.
    pub fn manifests(&self) -> impl Iterator<Item = &Manifest> {
        self.references.iter().map(|r| &r.manifest)
    }

    /// All `(pattern, reference)` pairs in pattern order.
    pub fn pattern_entries(&self) -> impl Iterator<Item = (&str, ReferenceId)> {
        self.patterns.iter().map(|(p, id)| (p.as_str(), *id))
    }

    /// Package names with their distinct versions, for names with more than one.
    #[must_use]
    pub fn names_with_multiple_versions(&self) -> Vec<(String, Vec<String>)> {
        self.patterns_by_package
            .keys()
            .filter_map(|name| {
                let versions: BTreeSet<String> = self
                    .get_all_info_for_package_name(name)
                    .into_iter()
                    .map(|m| m.version.clone())
                    .collect();
                (versions.len() > 1).then(|| (name.clone(), versions.into_iter().collect()))
            })
            .collect()
    }

    /// Point every pattern of `name` at its `version` reference.
    ///
    /// Displaced references are marked [`Visibility::RemovedAncestor`].
    pub fn collapse_all_versions_of_package(
        &mut self,
        name: &str,
        version: &str,
    ) -> Result<ReferenceId, PkgError> {
        let target = self
            .get_exact_version_match(name, version)
            .and_then(|m| m.reference)
            .ok_or_else(|| PkgError::version_not_found(name, version))?;

        let patterns = self.patterns_by_package.get(name).cloned().unwrap_or_default();
        for pattern in patterns {
            let Some(current) = self.patterns.get(&pattern).copied() else {
                continue;
            };
            if current == target {
                continue;
            }
            self.references[current.0].visibility = Visibility::RemovedAncestor;
            let optional = self.references[current.0].optional;
            let target_ref = &mut self.references[target.0];
            if !optional.is_optional() {
                target_ref.optional = target_ref.optional.merge(false);
            }
            self.add_pattern(&pattern, target);
        }

        Ok(target)
    }

    /// Mark a reference as not installable on this platform.
    pub fn ignore_reference(&mut self, id: ReferenceId) {
        self.references[id.0].visibility = Visibility::Ignored;
    }

    /// Mark a reference as dropped after a failed optional resolution.
    pub fn exclude_reference(&mut self, id: ReferenceId) {
        self.references[id.0].visibility = Visibility::Excluded;
    }

    pub fn record_new_pattern(&mut self, pattern: &str) {
        self.new_patterns.insert(pattern.to_string());
    }

    /// Patterns that were not pinned by the lockfile.
    #[must_use]
    pub fn new_patterns(&self) -> &BTreeSet<String> {
        &self.new_patterns
    }

    pub fn push_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    #[must_use]
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Propagate exclusions along required edges once resolution is done.
    ///
    /// Walks from the root patterns through visible references. A reachable
    /// package with an excluded required dependency cannot be installed either,
    /// so it is excluded too, with a warning if only optional edges reach it.
    /// Repeats until nothing changes. Fails if a required root ends up excluded.
    pub fn settle_exclusions<S: AsRef<str>>(&mut self, roots: &[(S, bool)]) -> Result<(), PkgError> {
        // excluded id -> `a@1.0.0 > b@2.0.0` path to the package that failed
        let mut causes: HashMap<ReferenceId, String> = HashMap::new();

        while let Some((parent, dep)) = self.first_broken_edge(roots) {
            let dep_cause = causes
                .get(&dep)
                .cloned()
                .unwrap_or_else(|| self.references[dep.0].manifest.human());
            let reference = &self.references[parent.0];
            let human = reference.manifest.human();
            if reference.optional.is_optional() {
                let warning =
                    format!("{human}: optional dependency skipped: {dep_cause} could not be installed");
                warn!(package = %human, "{warning}");
                self.push_warning(warning);
            }
            self.exclude_reference(parent);
            causes.insert(parent, format!("{human} > {dep_cause}"));
        }

        for (pattern, optional) in roots {
            let pattern = pattern.as_ref();
            let Some(id) = self.reference_for(pattern) else {
                continue;
            };
            if !optional && self.references[id.0].visibility == Visibility::Excluded {
                let cause = causes
                    .remove(&id)
                    .unwrap_or_else(|| self.references[id.0].manifest.human());
                return Err(PkgError::download_failed(format!(
                    "{cause} could not be installed (requested by {pattern})"
                )));
            }
        }
        Ok(())
    }

    /// First reachable `(parent, dependency)` edge whose required dependency is excluded.
    fn first_broken_edge<S: AsRef<str>>(&self, roots: &[(S, bool)]) -> Option<(ReferenceId, ReferenceId)> {
        let mut queue: Vec<ReferenceId> = roots
            .iter()
            .filter_map(|(pattern, _)| self.reference_for(pattern.as_ref()))
            .filter(|id| self.references[id.0].visibility != Visibility::Excluded)
            .collect();
        let mut seen: HashSet<ReferenceId> = queue.iter().copied().collect();

        while let Some(id) = queue.pop() {
            for (pattern, optional) in self.references[id.0].manifest.dependency_patterns() {
                let Some(dep) = self.reference_for(pattern.as_str()) else {
                    continue;
                };
                if self.references[dep.0].visibility == Visibility::Excluded {
                    if optional {
                        continue;
                    }
                    return Some((id, dep));
                }
                if seen.insert(dep) {
                    queue.push(dep);
                }
            }
        }
        None
    }

    /// Check the pattern/reference back-link invariant.
    pub fn check_consistency(&self) -> Result<(), PkgError> {
        for (pattern, id) in &self.patterns {
            if !self.references[id.0].patterns.iter().any(|p| p == pattern) {
                return Err(PkgError::hoist_invariant(format!(
                    "Pattern {pattern} is not recorded on its reference {id}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkg::error::codes;
    use crate::pkg::manifest::Remote;
    use crate::pkg::reference::Optionality;

    fn manifest(name: &str, version: &str) -> Manifest {
        Manifest::new(
            name,
            version,
            Remote::Registry {
                registry: "npm".to_string(),
                tarball: format!("https://r/{name}-{version}.tgz"),
                integrity: None,
            },
        )
    }

    fn graph_with(entries: &[(&str, &str, &str)]) -> ResolverGraph {
        let mut graph = ResolverGraph::new();
        for (pattern, name, version) in entries {
            let id = graph.insert_reference(manifest(name, version));
            graph.add_pattern(pattern, id);
        }
        graph
    }

    /// `x@1.0.0 -> y@^1`, with `y` excluded after a failed fetch.
    fn graph_with_failed_dependency(x_optionality: Optionality) -> (ResolverGraph, ReferenceId) {
        let mut graph = ResolverGraph::new();
        let x = graph.insert_reference(manifest("x", "1.0.0").with_dependency("y", "^1"));
        graph.add_pattern("x@^1", x);
        graph.reference_mut(x).optional = x_optionality;
        let y = graph.insert_reference(manifest("y", "1.0.0"));
        graph.add_pattern("y@^1", y);
        graph.reference_mut(y).optional = Optionality::Required;
        graph.exclude_reference(y);
        (graph, x)
    }

    #[test]
    fn test_settle_excludes_optional_parent() {
        let (mut graph, x) = graph_with_failed_dependency(Optionality::Optional);

        graph.settle_exclusions(&[("x@^1", true)]).unwrap();

        assert_eq!(graph.reference(x).visibility, Visibility::Excluded);
        assert_eq!(graph.warnings().len(), 1);
        assert!(graph.warnings()[0].contains("y@1.0.0 could not be installed"));
    }

    #[test]
    fn test_settle_fails_required_root_with_path() {
        let (mut graph, x) = graph_with_failed_dependency(Optionality::Required);
        let b = graph.insert_reference(manifest("b", "1.0.0").with_dependency("x", "^1"));
        graph.add_pattern("b@1.0.0", b);
        graph.reference_mut(b).optional = Optionality::Required;

        let err = graph.settle_exclusions(&[("b@1.0.0", false)]).unwrap_err();

        assert_eq!(err.code(), codes::PKG_DOWNLOAD_FAILED);
        assert!(
            err.message().contains("b@1.0.0 > x@1.0.0 > y@1.0.0 could not be installed"),
            "{}",
            err.message()
        );
        assert_eq!(graph.reference(x).visibility, Visibility::Excluded);
        assert!(graph.warnings().is_empty());
    }

    #[test]
    fn test_settle_cascades_to_optional_ancestor() {
        let (mut graph, x) = graph_with_failed_dependency(Optionality::Required);
        let a = graph.insert_reference(manifest("a", "1.0.0").with_dependency("x", "^1"));
        graph.add_pattern("a@^1", a);
        graph.reference_mut(a).optional = Optionality::Optional;

        graph.settle_exclusions(&[("a@^1", true)]).unwrap();

        assert_eq!(graph.reference(x).visibility, Visibility::Excluded);
        assert_eq!(graph.reference(a).visibility, Visibility::Excluded);
        assert_eq!(graph.warnings().len(), 1);
        assert!(graph.warnings()[0].starts_with("a@1.0.0: optional dependency skipped"));
    }

    #[test]
    fn test_settle_skips_unreachable_packages() {
        let (mut graph, x) = graph_with_failed_dependency(Optionality::Required);
        let root = graph.insert_reference(manifest("root-dep", "1.0.0"));
        graph.add_pattern("root-dep@^1", root);

        graph.settle_exclusions(&[("root-dep@^1", false)]).unwrap();
        assert_eq!(graph.reference(x).visibility, Visibility::Visible);
        assert!(graph.warnings().is_empty());
    }

    #[test]
    fn test_settle_rejects_excluded_required_root() {
        let (mut graph, _) = graph_with_failed_dependency(Optionality::Optional);
        let err = graph.settle_exclusions(&[("y@^1", false)]).unwrap_err();
        assert!(err.message().contains("requested by y@^1"));

        let (mut graph, _) = graph_with_failed_dependency(Optionality::Optional);
        graph.settle_exclusions(&[("y@^1", true)]).unwrap();
    }

    #[test]
    fn test_insert_reference_converges_on_identity() {
        let mut graph = ResolverGraph::new();
        let a = graph.insert_reference(manifest("which", "1.2.11"));
        let b = graph.insert_reference(manifest("which", "1.2.11"));
        assert_eq!(a, b);
        assert_eq!(graph.package_references().len(), 1);
    }

    #[test]
    fn test_add_pattern_updates_both_indices() {
        let graph = graph_with(&[
            ("which@^1.0.5", "which", "1.2.11"),
            ("which@^1.2.9", "which", "1.2.11"),
        ]);

        let id = graph.reference_for("which@^1.0.5").unwrap();
        assert_eq!(graph.reference_for("which@^1.2.9"), Some(id));
        assert_eq!(
            graph.reference(id).patterns,
            vec!["which@^1.0.5", "which@^1.2.9"]
        );
        assert_eq!(graph.get_all_info_for_package_name("which").len(), 1);
        graph.check_consistency().unwrap();
    }

    #[test]
    fn test_remove_pattern_is_lazy() {
        let mut graph = graph_with(&[("a@^1", "a", "1.0.0")]);
        let id = graph.reference_for("a@^1").unwrap();

        graph.remove_pattern("a@^1");
        assert!(graph.resolved_pattern("a@^1").is_none());
        assert!(graph.get_all_info_for_package_name("a").is_empty());
        // reference itself is kept
        assert_eq!(graph.reference(id).manifest.name, "a");
        graph.check_consistency().unwrap();
    }

    #[test]
    fn test_exact_version_match() {
        let graph = graph_with(&[("a@^1", "a", "1.2.0"), ("a@^2", "a", "2.0.0")]);
        assert_eq!(
            graph.get_exact_version_match("a", "2.0.0").map(|m| m.version.as_str()),
            Some("2.0.0")
        );
        assert!(graph.get_exact_version_match("a", "3.0.0").is_none());
        assert!(graph.get_exact_version_match("b", "1.0.0").is_none());
    }

    #[test]
    fn test_dedupe_patterns() {
        let graph = graph_with(&[
            ("a@^1", "a", "1.0.0"),
            ("a@1.0.0", "a", "1.0.0"),
            ("b@^1", "b", "1.0.0"),
        ]);
        let deduped = graph.dedupe_patterns(&["a@^1", "a@1.0.0", "missing@1", "b@^1"]);
        assert_eq!(deduped, vec!["a@^1", "b@^1"]);
    }

    #[test]
    fn test_collapse_all_versions() {
        let mut graph = graph_with(&[
            ("d@^1", "d", "1.0.0"),
            ("d@^2", "d", "2.0.0"),
            ("d@2.0.0", "d", "2.0.0"),
        ]);
        let old = graph.reference_for("d@^1").unwrap();

        let target = graph.collapse_all_versions_of_package("d", "2.0.0").unwrap();
        assert_eq!(graph.reference_for("d@^1"), Some(target));
        assert_eq!(graph.reference(old).visibility, Visibility::RemovedAncestor);
        assert!(graph.reference(old).patterns.is_empty());
        assert_eq!(graph.get_all_info_for_package_name("d").len(), 1);
        graph.check_consistency().unwrap();

        assert!(graph.collapse_all_versions_of_package("d", "9.9.9").is_err());
    }

    #[test]
    fn test_names_with_multiple_versions() {
        let graph = graph_with(&[
            ("d@^1", "d", "1.0.0"),
            ("d@^2", "d", "2.0.0"),
            ("e@^1", "e", "1.0.0"),
        ]);
        assert_eq!(
            graph.names_with_multiple_versions(),
            vec![("d".to_string(), vec!["1.0.0".to_string(), "2.0.0".to_string()])]
        );
    }

    #[test]
    fn test_strict_resolved_pattern() {
        let graph = graph_with(&[("a@^1", "a", "1.0.0")]);
        assert!(graph.strict_resolved_pattern("a@^1").is_ok());
        assert!(graph.strict_resolved_pattern("zzz@1").is_err());
    }
}
