//! Resolution orchestration.

use super::cache::PackageCache;
use super::error::PkgError;
use super::fetch::{Fetcher, PackageFetcher};
use super::graph::ResolverGraph;
use super::lockfile::Lockfile;
use super::pattern::Pattern;
use super::queue::FetchQueue;
use super::registry::RegistryClient;
use super::request::{PackageRequest, Request};
use super::resolvers::{default_exotics, ExoticResolver, RegistryResolver};
use super::version::highest;
use super::workspaces::{WorkspaceLayout, WorkspaceResolver};
use crate::config::Config;
use futures::future::{try_join_all, BoxFuture, FutureExt};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Collaborators the resolver talks to.
#[derive(Clone)]
pub struct ResolverSources {
    pub registry: Arc<dyn RegistryResolver>,
    /// Tried in order before the registry.
    pub exotics: Vec<Arc<dyn ExoticResolver>>,
    pub fetcher: Arc<dyn Fetcher>,
}

impl ResolverSources {
    /// Registry client, default exotic resolvers and the caching fetcher.
    ///
    /// A monorepo root also gets a workspace resolver, tried first.
    pub fn from_config(config: &Config) -> Result<Self, PkgError> {
        let registry = RegistryClient::new(&config.registry)?;
        let fetcher = PackageFetcher::new(
            PackageCache::new(config.cache_root()),
            registry.http().clone(),
            config.network_concurrency,
        );
        let mut exotics: Vec<Arc<dyn ExoticResolver>> = Vec::new();
        if let Some(layout) = WorkspaceLayout::detect(&config.cwd) {
            exotics.push(Arc::new(WorkspaceResolver::new(layout)));
        }
        exotics.extend(default_exotics(&config.cwd));
        Ok(Self {
            exotics,
            registry: Arc::new(registry),
            fetcher: Arc::new(fetcher),
        })
    }
}

/// Drives every request of one install to completion.
pub struct PackageResolver {
    sources: ResolverSources,
    lockfile: Option<Arc<Lockfile>>,
    flat: bool,
    queue: FetchQueue,
    graph: tokio::sync::Mutex<ResolverGraph>,
    /// `registry:pattern:optional` keys already issued.
    seen: Mutex<HashSet<String>>,
}

impl PackageResolver {
    #[must_use]
    pub fn new(sources: ResolverSources, lockfile: Option<Lockfile>) -> Self {
        Self {
            sources,
            lockfile: lockfile.map(Arc::new),
            flat: false,
            queue: FetchQueue::new(),
            graph: tokio::sync::Mutex::new(ResolverGraph::new()),
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Collapse every package to a single version after resolution.
    #[must_use]
    pub fn with_flat(mut self, flat: bool) -> Self {
        self.flat = flat;
        self
    }

    pub(crate) fn sources(&self) -> &ResolverSources {
        &self.sources
    }

    pub(crate) fn lockfile(&self) -> Option<&Lockfile> {
        self.lockfile.as_deref()
    }

    pub(crate) fn graph(&self) -> &tokio::sync::Mutex<ResolverGraph> {
        &self.graph
    }

    pub(crate) fn queue(&self) -> &FetchQueue {
        &self.queue
    }

    /// Resolve all root requests and return the finished graph.
    ///
    /// Nothing can observe the graph until every request, transitively, has
    /// settled. A required failure aborts the whole resolution.
    pub async fn init(self, roots: &[(Pattern, bool)]) -> Result<ResolverGraph, PkgError> {
        info!(roots = roots.len(), "resolving");
        try_join_all(
            roots
                .iter()
                .map(|(pattern, optional)| self.find(Request::root(pattern.clone(), *optional))),
        )
        .await?;

        let mut graph = self.graph.into_inner();
        graph.settle_exclusions(roots)?;
        if self.flat {
            flatten_versions(&mut graph)?;
        }
        graph.check_consistency()?;
        debug!(
            references = graph.package_references().len(),
            fetches = self.queue.completed(),
            "resolution complete"
        );
        Ok(graph)
    }

    /// Dedup gate in front of [`PackageRequest::find`].
    pub fn find(&self, request: Request) -> BoxFuture<'_, Result<(), PkgError>> {
        async move {
            let key = format!(
                "{}:{}:{}",
                self.sources.registry.registry(),
                request.pattern,
                request.optional
            );
            {
                let mut seen = self
                    .seen
                    .lock()
                    .map_err(|_| PkgError::cache_error("resolver dedup lock poisoned"))?;
                if !seen.insert(key) {
                    return Ok(());
                }
            }

            let pattern = request.pattern.as_str();
            let pinned = self.lockfile().is_some_and(|l| l.contains(pattern));
            if !pinned {
                self.graph.lock().await.record_new_pattern(pattern);
            }

            PackageRequest::new(self, request).find().await
        }
        .boxed()
    }
}

/// Point every name with several versions at its highest one.
fn flatten_versions(graph: &mut ResolverGraph) -> Result<(), PkgError> {
    for (name, versions) in graph.names_with_multiple_versions() {
        let Some(target) = highest(versions.iter().map(String::as_str)) else {
            continue;
        };
        let target = target.to_string();
        info!(%name, version = %target, "flat: collapsing versions");
        graph.collapse_all_versions_of_package(&name, &target)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkg::manifest::{Manifest, Remote};
    use crate::pkg::reference::Visibility;

    fn manifest(name: &str, version: &str) -> Manifest {
        Manifest::new(
            name,
            version,
            Remote::Registry {
                registry: "mock".to_string(),
                tarball: format!("https://r/{name}-{version}.tgz"),
                integrity: None,
            },
        )
    }

    #[test]
    fn test_flatten_versions_picks_highest() {
        let mut graph = ResolverGraph::new();
        for (pattern, version) in [("d@^1", "1.4.0"), ("d@^2", "2.1.0"), ("d@~2.0", "2.0.3")] {
            let id = graph.insert_reference(manifest("d", version));
            graph.add_pattern(pattern, id);
        }

        flatten_versions(&mut graph).unwrap();

        let target = graph.reference_for("d@^2").unwrap();
        assert_eq!(graph.reference_for("d@^1"), Some(target));
        assert_eq!(graph.reference_for("d@~2.0"), Some(target));
        assert_eq!(graph.reference(target).manifest.version, "2.1.0");
        assert_eq!(
            graph
                .package_references()
                .iter()
                .filter(|r| r.visibility == Visibility::RemovedAncestor)
                .count(),
            2
        );
    }
}
