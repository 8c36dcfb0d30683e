//! Resolution of a single pattern.

use super::error::PkgError;
use super::fetch::FetchedPackage;
use super::lockfile::Lockfile;
use super::manifest::Manifest;
use super::pattern::Pattern;
use super::reference::{ReferenceId, RequestInfo, Visibility};
use super::resolver::PackageResolver;
use super::resolvers::find_exotic;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// One `name@range` request and where it came from.
#[derive(Debug, Clone)]
pub struct Request {
    pub pattern: Pattern,
    pub optional: bool,
    /// Patterns of the requesting ancestors, root first.
    pub chain: Vec<String>,
    /// Nearest ancestor's embedded lockfile.
    pub sub_lockfile: Option<Arc<Lockfile>>,
}

impl Request {
    #[must_use]
    pub fn root(pattern: Pattern, optional: bool) -> Self {
        Self {
            pattern,
            optional,
            chain: Vec::new(),
            sub_lockfile: None,
        }
    }

    /// `a@^1 > b@~2 > this`
    #[must_use]
    pub fn describe_chain(&self) -> String {
        self.chain
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.pattern.as_str()))
            .collect::<Vec<_>>()
            .join(" > ")
    }
}

/// A manifest and the lockfile permissions it was pinned with.
struct Candidate {
    manifest: Manifest,
    permissions: BTreeMap<String, bool>,
}

/// Resolves one request against the shared resolver state.
pub struct PackageRequest<'a> {
    resolver: &'a PackageResolver,
    request: Request,
}

impl<'a> PackageRequest<'a> {
    #[must_use]
    pub fn new(resolver: &'a PackageResolver, request: Request) -> Self {
        Self { resolver, request }
    }

    /// Resolve, register, fetch and fan out.
    ///
    /// Recoverable failures on an optional edge become a warning; everything
    /// else is returned with the request chain attached.
    pub async fn find(self) -> Result<(), PkgError> {
        let candidate = match self.resolve().await {
            Ok(candidate) => candidate,
            Err(err) => return self.recover(err).await,
        };
        let id = match self.register(candidate).await {
            Ok(Some(id)) => id,
            Ok(None) => return Ok(()),
            Err(err) => return self.recover(err).await,
        };
        let fetched = match self.fetch(id).await {
            Ok(fetched) => fetched,
            Err(err) => {
                // Nothing on disk, so no edge can install it.
                self.resolver.graph().lock().await.exclude_reference(id);
                let err = err.in_request(&self.request.describe_chain());
                return self.fail_reference(id, err).await;
            }
        };

        let dependencies = self
            .record_fetch(id, &fetched)
            .await
            .map_err(|e| e.in_request(&self.request.describe_chain()))?;
        match self.fan_out(dependencies, fetched.lockfile).await {
            Ok(()) => Ok(()),
            Err(err) => self.fail_reference(id, err).await,
        }
    }

    async fn recover(&self, err: PkgError) -> Result<(), PkgError> {
        if self.request.optional && err.is_recoverable() {
            self.swallow(&err).await;
            Ok(())
        } else {
            Err(err.in_request(&self.request.describe_chain()))
        }
    }

    /// Lockfile pin, then sub-lockfile pin, then an exotic resolver, then the registry.
    async fn resolve(&self) -> Result<Candidate, PkgError> {
        let pattern = &self.request.pattern;

        let locked = self
            .resolver
            .lockfile()
            .and_then(|l| l.get_locked(pattern.as_str()))
            .or_else(|| {
                self.request
                    .sub_lockfile
                    .as_deref()
                    .and_then(|l| l.get_locked(pattern.as_str()))
            });
        if let Some(locked) = locked {
            debug!(%pattern, version = %locked.version, "pinned by lockfile");
            return Ok(Candidate {
                manifest: locked.to_manifest(),
                permissions: locked.permissions.clone(),
            });
        }

        let sources = self.resolver.sources();
        let manifest = match find_exotic(&sources.exotics, pattern) {
            Some(exotic) => {
                debug!(%pattern, kind = exotic.kind(), "exotic resolve");
                let mut manifest = exotic.resolve(pattern).await?;
                manifest.name = pattern.name().to_string();
                manifest
            }
            None => sources.registry.resolve(pattern).await?,
        };

        Ok(Candidate {
            manifest,
            permissions: BTreeMap::new(),
        })
    }

    /// Attach to an existing reference, or create one.
    ///
    /// Returns the id only when this request created the reference and so
    /// owns fetching and expanding it.
    async fn register(&self, candidate: Candidate) -> Result<Option<ReferenceId>, PkgError> {
        let info = RequestInfo {
            pattern: self.request.pattern.as_str().to_string(),
            chain: self.request.chain.clone(),
            optional: self.request.optional,
        };
        let pattern = self.request.pattern.as_str();

        let mut graph = self.resolver.graph().lock().await;

        if let Some(id) = graph.find_reference(&candidate.manifest) {
            let reference = graph.reference(id);
            if reference.visibility == Visibility::Excluded && !self.request.optional {
                return Err(PkgError::download_failed(format!(
                    "{} could not be installed",
                    reference.manifest.human()
                )));
            }
            graph.reference_mut(id).add_request(info);
            graph.add_pattern(pattern, id);
            return Ok(None);
        }

        candidate.manifest.validate()?;
        let id = graph.insert_reference(candidate.manifest);
        let reference = graph.reference_mut(id);
        reference.add_request(info);
        for (key, allowed) in candidate.permissions {
            reference.set_permission(&key, allowed);
        }
        graph.add_pattern(pattern, id);
        Ok(Some(id))
    }

    async fn fetch(&self, id: ReferenceId) -> Result<FetchedPackage, PkgError> {
        let manifest = self.resolver.graph().lock().await.reference(id).manifest.clone();
        let fetcher = &self.resolver.sources().fetcher;
        let dest = fetcher.dest_for(&manifest);
        self.resolver
            .queue()
            .run(&dest, || fetcher.fetch(&manifest.remote, &dest))
            .await
    }

    /// Exclude a reference that could not be fetched or whose required
    /// dependencies failed.
    ///
    /// The reference's own optionality decides, not this request's: once any
    /// required edge has attached, the failure is fatal.
    async fn fail_reference(&self, id: ReferenceId, err: PkgError) -> Result<(), PkgError> {
        let excluded = {
            let mut graph = self.resolver.graph().lock().await;
            let still_optional = graph.reference(id).optional.is_optional();
            if still_optional && err.is_recoverable() {
                graph.exclude_reference(id);
                true
            } else {
                false
            }
        };

        if excluded {
            self.swallow(&err).await;
            Ok(())
        } else {
            Err(err)
        }
    }

    /// Store fetch results on the reference; returns its dependency requests.
    async fn record_fetch(
        &self,
        id: ReferenceId,
        fetched: &FetchedPackage,
    ) -> Result<Vec<(Pattern, bool)>, PkgError> {
        let mut graph = self.resolver.graph().lock().await;
        let reference = graph.reference_mut(id);
        reference.manifest.refresh_from(&fetched.manifest)?;
        reference.location = Some(fetched.dest.clone());
        reference.hash = Some(fetched.hash.clone());
        reference.fresh = fetched.fresh;

        let dependencies = reference.manifest.dependency_patterns();
        reference.set_dependencies(
            dependencies
                .iter()
                .map(|(p, _)| p.as_str().to_string())
                .collect(),
        );
        Ok(dependencies)
    }

    /// Request every dependency with its own optionality.
    ///
    /// All children settle before the first error is returned, so a parent
    /// that swallows the failure leaves no half-expanded sibling behind.
    async fn fan_out(
        &self,
        dependencies: Vec<(Pattern, bool)>,
        embedded: Option<Arc<Lockfile>>,
    ) -> Result<(), PkgError> {
        let sub_lockfile = embedded.or_else(|| self.request.sub_lockfile.clone());
        let mut chain = self.request.chain.clone();
        chain.push(self.request.pattern.as_str().to_string());

        let children = dependencies.into_iter().map(|(pattern, optional)| {
            self.resolver.find(Request {
                pattern,
                optional,
                chain: chain.clone(),
                sub_lockfile: sub_lockfile.clone(),
            })
        });
        join_all(children).await.into_iter().collect()
    }

    async fn swallow(&self, err: &PkgError) {
        let warning = format!(
            "{}: optional dependency skipped: {}",
            self.request.describe_chain(),
            err.message()
        );
        warn!(pattern = %self.request.pattern, code = err.code(), "{warning}");
        self.resolver.graph().lock().await.push_warning(warning);
    }
}
