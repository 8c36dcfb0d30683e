//! Install planning: package.json and lockfile in, hoisted layout out.
//!
//! Runs resolution, the platform check and hoisting, then regenerates the
//! lockfile. Linking the planned layout onto disk is left to the caller.

use super::compat::{check_compatibility, Platform};
use super::error::PkgError;
use super::fetch::run_blocking;
use super::hoister::{HoistedPackage, PackageHoister};
use super::lockfile::{codes as lockfile_codes, Lockfile};
use super::manifest::PackageJson;
use super::resolver::{PackageResolver, ResolverSources};
use crate::config::Config;
use serde::Serialize;
use tracing::{debug, info};

/// Everything a linker needs to lay out `node_modules`.
#[derive(Debug, Clone, Serialize)]
pub struct InstallPlan {
    /// Packages in install order (parents before children).
    pub packages: Vec<HoistedPackage>,
    /// Optional packages that were skipped.
    pub warnings: Vec<String>,
    /// Patterns that were not pinned by the previous lockfile.
    pub new_patterns: Vec<String>,
    /// Whether the lockfile on disk was (or, when frozen, would have been) rewritten.
    pub lockfile_changed: bool,
}

/// Plan an install of the project at `config.cwd` for the running platform.
pub async fn plan_install(config: &Config, sources: ResolverSources) -> Result<InstallPlan, PkgError> {
    plan_install_for(config, sources, &Platform::current()).await
}

/// Plan an install as if running on `platform`.
pub async fn plan_install_for(
    config: &Config,
    sources: ResolverSources,
    platform: &Platform,
) -> Result<InstallPlan, PkgError> {
    let (manifest_path, lockfile_path) = (config.manifest_path(), config.lockfile_path());
    let lockfile_source = lockfile_path.clone();
    let (package_json, previous) = run_blocking("Project read", move || {
        let package_json = PackageJson::read(&manifest_path)?;
        let previous = Lockfile::read_optional(&lockfile_source)?;
        Ok((package_json, previous))
    })
    .await?;
    if previous.is_some() {
        debug!(path = %lockfile_path.display(), "using lockfile");
    }

    let roots = package_json.root_patterns();
    let resolver = PackageResolver::new(sources, previous.clone()).with_flat(config.flat);
    let mut graph = resolver.init(&roots).await?;

    check_compatibility(&mut graph, platform)?;

    let root_patterns: Vec<&str> = roots.iter().map(|(p, _)| p.as_str()).collect();
    let mut hoister = PackageHoister::new(&graph, config.modules_root());
    hoister.seed(&root_patterns)?;
    let packages = hoister.init()?;

    let lockfile = Lockfile::from_graph(&graph);
    let lockfile_changed = match &previous {
        Some(existing) => *existing != lockfile,
        None => !lockfile.is_empty(),
    };

    if lockfile_changed {
        if config.frozen_lockfile {
            return Err(PkgError::new(
                lockfile_codes::PKG_LOCK_STALE,
                format!(
                    "{} needs to be updated, but --frozen-lockfile was given",
                    lockfile_path.display()
                ),
            ));
        }
        let target = lockfile_path.clone();
        let written = lockfile.clone();
        run_blocking("Lockfile write", move || Ok(written.write_to(&target)?)).await?;
        info!(path = %lockfile_path.display(), entries = lockfile.len(), "lockfile written");
    }

    info!(packages = packages.len(), "install planned");
    Ok(InstallPlan {
        packages,
        warnings: graph.warnings().to_vec(),
        new_patterns: graph.new_patterns().iter().cloned().collect(),
        lockfile_changed,
    })
}
