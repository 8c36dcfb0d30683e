//! Platform compatibility (`os` / `cpu` fields).

use super::error::PkgError;
use super::graph::ResolverGraph;
use super::manifest::Manifest;
use tracing::warn;

/// The platform packages are checked against, in npm's vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: String,
    pub cpu: String,
}

impl Platform {
    #[must_use]
    pub fn new(os: impl Into<String>, cpu: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            cpu: cpu.into(),
        }
    }

    /// The running platform.
    #[must_use]
    pub fn current() -> Self {
        let os = match std::env::consts::OS {
            "macos" => "darwin",
            "windows" => "win32",
            other => other,
        };
        let cpu = match std::env::consts::ARCH {
            "x86_64" => "x64",
            "x86" => "ia32",
            "aarch64" => "arm64",
            "powerpc64" => "ppc64",
            other => other,
        };
        Self::new(os, cpu)
    }
}

/// npm list semantics: a plain entry allows, a `!entry` forbids. A list
/// made only of negations allows everything it does not name.
#[must_use]
pub fn is_valid(items: &[String], actual: &str) -> bool {
    if items.is_empty() {
        return true;
    }

    let mut is_blacklist = false;
    for item in items {
        if item == actual {
            return true;
        }
        if let Some(negated) = item.strip_prefix('!') {
            is_blacklist = true;
            if negated == actual {
                return false;
            }
        }
    }
    is_blacklist
}

/// Human-readable reasons `manifest` cannot run on `platform`.
#[must_use]
pub fn problems(manifest: &Manifest, platform: &Platform) -> Vec<String> {
    let mut out = Vec::new();
    if !is_valid(&manifest.os, &platform.os) {
        out.push(format!(
            "The platform {} is incompatible with this module.",
            platform.os
        ));
    }
    if !is_valid(&manifest.cpu, &platform.cpu) {
        out.push(format!(
            "The CPU architecture {} is incompatible with this module.",
            platform.cpu
        ));
    }
    out
}

/// Mark optional incompatible packages ignored; fail on required ones.
///
/// # Errors
/// `PKG_INCOMPATIBLE` listing every required package that cannot be installed.
pub fn check_compatibility(graph: &mut ResolverGraph, platform: &Platform) -> Result<(), PkgError> {
    let mut ignored = Vec::new();
    let mut fatal = Vec::new();

    for reference in graph.package_references() {
        if !reference.is_visible() {
            continue;
        }
        let found = problems(&reference.manifest, platform);
        if found.is_empty() {
            continue;
        }
        let message = format!("{}: {}", reference.manifest.human(), found.join(" "));
        if reference.optional.is_optional() {
            ignored.push((reference.id, message));
        } else {
            fatal.push(message);
        }
    }

    if !fatal.is_empty() {
        return Err(PkgError::incompatible(fatal.join("\n")));
    }

    for (id, message) in ignored {
        warn!("{message}");
        graph.ignore_reference(id);
        graph.push_warning(message);
    }
    Ok(())
}
