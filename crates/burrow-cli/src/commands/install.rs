//! `burrow install`: resolve, check, hoist, write the lockfile.

use burrow_core::paths::require_project_root;
use burrow_core::pkg::{plan_install, InstallPlan, PkgError, ResolverSources};
use burrow_core::Config;
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Flags of `burrow install`. Set flags win over env and `.burrowrc.json`.
#[derive(Debug, Default)]
pub struct InstallArgs {
    pub frozen_lockfile: bool,
    pub flat: bool,
    pub modules_folder: Option<PathBuf>,
    pub cache_folder: Option<PathBuf>,
    pub registry: Option<String>,
    pub network_concurrency: Option<usize>,
}

#[derive(Serialize)]
struct InstallOutput<'a> {
    ok: bool,
    packages: Vec<PackageOutput<'a>>,
    warnings: &'a [String],
    new_patterns: &'a [String],
    lockfile_changed: bool,
}

#[derive(Serialize)]
struct PackageOutput<'a> {
    key: &'a str,
    name: &'a str,
    version: &'a str,
    dest: String,
}

#[derive(Serialize)]
struct ErrorOutput<'a> {
    ok: bool,
    error: ErrorInfo<'a>,
}

#[derive(Serialize)]
struct ErrorInfo<'a> {
    code: &'a str,
    message: &'a str,
}

pub fn run(config: Config, args: InstallArgs, json: bool) -> Result<()> {
    let config = match resolve_config(config, args) {
        Ok(config) => config,
        Err((code, message)) => return fail(json, code, &message),
    };
    debug!(
        cwd = %config.cwd.display(),
        registry = %config.registry,
        cache = %config.cache_root().display(),
        "install config"
    );

    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
    let result = runtime.block_on(async {
        let sources = ResolverSources::from_config(&config)?;
        plan_install(&config, sources).await
    });

    match result {
        Ok(plan) => {
            report(&plan, &config.cwd, json);
            Ok(())
        }
        Err(err) => fail_pkg(json, &err),
    }
}

/// Defaults, then `.burrowrc.json`, then env, then flags.
fn resolve_config(config: Config, args: InstallArgs) -> Result<Config, (&'static str, String)> {
    let root = require_project_root(&config.cwd)
        .map_err(|e| ("PROJECT_NOT_FOUND", e.to_string()))?;

    let mut config = Config { cwd: root, ..config }
        .load_project_file()
        .map_err(|e| ("CONFIG_INVALID", e.to_string()))?
        .with_env_overrides()
        .with_frozen_lockfile(args.frozen_lockfile);

    if args.flat {
        config = config.with_flat(true);
    }
    if let Some(folder) = args.modules_folder {
        let folder = config.resolve_path(&folder);
        config = config.with_modules_folder(Some(folder));
    }
    if let Some(folder) = args.cache_folder {
        let folder = config.resolve_path(&folder);
        config = config.with_cache_folder(Some(folder));
    }
    if let Some(registry) = args.registry {
        config = config.with_registry(registry);
    }
    if let Some(n) = args.network_concurrency {
        config = config.with_network_concurrency(n);
    }
    Ok(config)
}

fn report(plan: &InstallPlan, cwd: &Path, json: bool) {
    if json {
        let output = InstallOutput {
            ok: true,
            packages: plan
                .packages
                .iter()
                .map(|p| PackageOutput {
                    key: &p.key,
                    name: &p.manifest.name,
                    version: &p.manifest.version,
                    dest: p.dest.display().to_string(),
                })
                .collect(),
            warnings: &plan.warnings,
            new_patterns: &plan.new_patterns,
            lockfile_changed: plan.lockfile_changed,
        };
        match serde_json::to_string_pretty(&output) {
            Ok(s) => println!("{s}"),
            Err(e) => eprintln!("error: failed to serialize output: {e}"),
        }
        return;
    }

    for package in &plan.packages {
        let dest = package.dest.strip_prefix(cwd).unwrap_or(&package.dest);
        println!("{}  {}", package.manifest.human(), dest.display());
    }
    for warning in &plan.warnings {
        eprintln!("warning: {warning}");
    }
    println!(
        "{} packages planned{}",
        plan.packages.len(),
        if plan.lockfile_changed { ", lockfile updated" } else { "" }
    );
}

fn fail_pkg(json: bool, err: &PkgError) -> Result<()> {
    fail(json, err.code(), err.message())
}

fn fail(json: bool, code: &str, message: &str) -> Result<()> {
    if json {
        let output = ErrorOutput {
            ok: false,
            error: ErrorInfo { code, message },
        };
        match serde_json::to_string_pretty(&output) {
            Ok(s) => println!("{s}"),
            Err(e) => eprintln!("error: failed to serialize output: {e}"),
        }
        std::process::exit(1);
    }
    Err(miette::miette!(code = code.to_string(), "{message}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_flags_override_project_file() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        std::fs::write(
            dir.path().join(".burrowrc.json"),
            r#"{"registry": "http://file.local/", "networkConcurrency": 3}"#,
        )
        .unwrap();

        let args = InstallArgs {
            registry: Some("http://flag.local/".to_string()),
            modules_folder: Some(PathBuf::from("vendor")),
            ..InstallArgs::default()
        };
        let config = resolve_config(Config::new(dir.path().to_path_buf()), args).unwrap();

        assert_eq!(config.registry, "http://flag.local/");
        assert_eq!(config.network_concurrency, 3);
        assert_eq!(config.modules_root(), dir.path().join("vendor"));
    }

    #[test]
    fn test_project_root_is_found_from_subdirectory() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        let nested = dir.path().join("src").join("lib");
        std::fs::create_dir_all(&nested).unwrap();

        let config = resolve_config(Config::new(nested), InstallArgs::default()).unwrap();
        assert_eq!(config.cwd, dir.path());
        assert_eq!(config.lockfile_path(), dir.path().join("burrow.lock"));
    }
}
