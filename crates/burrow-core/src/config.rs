use crate::error::Error;
use crate::paths::cache_dir;
use crate::pkg::registry::DEFAULT_REGISTRY;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding the registry URL.
pub const REGISTRY_ENV: &str = "BURROW_REGISTRY";

/// Environment variable overriding the package cache directory.
pub const CACHE_DIR_ENV: &str = "BURROW_CACHE_DIR";

/// Optional per-project configuration file, read from the project root.
pub const PROJECT_CONFIG_NAME: &str = ".burrowrc.json";

/// Default number of concurrent network fetches.
pub const DEFAULT_NETWORK_CONCURRENCY: usize = 8;

/// Runtime configuration for burrow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Current working directory (the project root for installs).
    pub cwd: PathBuf,

    /// Whether to emit JSON logs.
    pub json_logs: bool,

    /// Verbosity level (0 = INFO, 1 = DEBUG, 2+ = TRACE).
    pub verbosity: u8,

    /// Channel (dev, nightly, stable) - affects cache paths.
    pub channel: Channel,

    /// Registry base URL.
    pub registry: String,

    /// Overrides `<cwd>/node_modules` as the root of the install tree.
    pub modules_folder: Option<PathBuf>,

    /// Overrides the platform cache directory for fetched packages.
    pub cache_folder: Option<PathBuf>,

    /// Maximum concurrent fetches.
    pub network_concurrency: usize,

    /// Collapse every package name onto a single version.
    pub flat: bool,

    /// Fail instead of rewriting an out-of-date lockfile.
    pub frozen_lockfile: bool,
}

/// Release channel for cache directory namespacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    #[default]
    Stable,
    Nightly,
    Dev,
}

impl Channel {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Nightly => "nightly",
            Self::Dev => "dev",
        }
    }
}

/// Shape of `.burrowrc.json`. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ProjectFile {
    registry: Option<String>,
    modules_folder: Option<PathBuf>,
    cache_folder: Option<PathBuf>,
    network_concurrency: Option<usize>,
    flat: Option<bool>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            json_logs: false,
            verbosity: 0,
            channel: Channel::default(),
            registry: DEFAULT_REGISTRY.to_string(),
            modules_folder: None,
            cache_folder: None,
            network_concurrency: DEFAULT_NETWORK_CONCURRENCY,
            flat: false,
            frozen_lockfile: false,
        }
    }
}

impl Config {
    /// Create a new config with the given working directory.
    #[must_use]
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            cwd,
            ..Default::default()
        }
    }

    /// Set verbosity level.
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Set JSON log output.
    #[must_use]
    pub fn with_json_logs(mut self, json: bool) -> Self {
        self.json_logs = json;
        self
    }

    /// Set channel.
    #[must_use]
    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channel = channel;
        self
    }

    /// Set the registry URL.
    #[must_use]
    pub fn with_registry(mut self, registry: impl Into<String>) -> Self {
        self.registry = registry.into();
        self
    }

    /// Set the modules folder.
    #[must_use]
    pub fn with_modules_folder(mut self, folder: Option<PathBuf>) -> Self {
        self.modules_folder = folder;
        self
    }

    /// Set the cache folder.
    #[must_use]
    pub fn with_cache_folder(mut self, folder: Option<PathBuf>) -> Self {
        self.cache_folder = folder;
        self
    }

    /// Set fetch concurrency (clamped to at least 1).
    #[must_use]
    pub fn with_network_concurrency(mut self, n: usize) -> Self {
        self.network_concurrency = n.max(1);
        self
    }

    /// Enable flat mode.
    #[must_use]
    pub fn with_flat(mut self, flat: bool) -> Self {
        self.flat = flat;
        self
    }

    /// Refuse lockfile rewrites.
    #[must_use]
    pub fn with_frozen_lockfile(mut self, frozen: bool) -> Self {
        self.frozen_lockfile = frozen;
        self
    }

    /// Apply `BURROW_REGISTRY` and `BURROW_CACHE_DIR` if set.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(registry) = std::env::var(REGISTRY_ENV) {
            if !registry.is_empty() {
                self.registry = registry;
            }
        }
        if let Ok(dir) = std::env::var(CACHE_DIR_ENV) {
            if !dir.is_empty() {
                self.cache_folder = Some(PathBuf::from(dir));
            }
        }
        self
    }

    /// Merge `.burrowrc.json` from `cwd` into this config, if the file exists.
    ///
    /// Relative folders in the file are resolved against `cwd`.
    pub fn load_project_file(mut self) -> Result<Self, Error> {
        let path = self.cwd.join(PROJECT_CONFIG_NAME);
        if !path.exists() {
            return Ok(self);
        }

        let content = std::fs::read_to_string(&path).map_err(|source| Error::ConfigRead {
            path: path.clone(),
            source,
        })?;
        let file: ProjectFile =
            serde_json::from_str(&content).map_err(|source| Error::ConfigParse {
                path: path.clone(),
                source,
            })?;

        if let Some(registry) = file.registry {
            self.registry = registry;
        }
        if let Some(folder) = file.modules_folder {
            self.modules_folder = Some(self.cwd.join(folder));
        }
        if let Some(folder) = file.cache_folder {
            self.cache_folder = Some(self.cwd.join(folder));
        }
        if let Some(n) = file.network_concurrency {
            self.network_concurrency = n.max(1);
        }
        if let Some(flat) = file.flat {
            self.flat = flat;
        }

        Ok(self)
    }

    /// Root of the install tree.
    #[must_use]
    pub fn modules_root(&self) -> PathBuf {
        self.modules_folder
            .clone()
            .unwrap_or_else(|| self.cwd.join("node_modules"))
    }

    /// Root of the package cache.
    #[must_use]
    pub fn cache_root(&self) -> PathBuf {
        self.cache_folder
            .clone()
            .unwrap_or_else(|| cache_dir(self.channel).join("packages"))
    }

    /// Path of the project's `package.json`.
    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.cwd.join("package.json")
    }

    /// Path of the project's lockfile.
    #[must_use]
    pub fn lockfile_path(&self) -> PathBuf {
        self.cwd.join(crate::pkg::lockfile::LOCKFILE_NAME)
    }

    /// Resolve a path relative to `cwd`.
    #[must_use]
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.cwd.join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::new(PathBuf::from("/project"));
        assert_eq!(config.registry, DEFAULT_REGISTRY);
        assert_eq!(config.network_concurrency, DEFAULT_NETWORK_CONCURRENCY);
        assert_eq!(config.modules_root(), PathBuf::from("/project/node_modules"));
        assert!(!config.flat);
    }

    #[test]
    fn test_modules_folder_override() {
        let config = Config::new(PathBuf::from("/project"))
            .with_modules_folder(Some(PathBuf::from("/elsewhere/mods")));
        assert_eq!(config.modules_root(), PathBuf::from("/elsewhere/mods"));
    }

    #[test]
    fn test_network_concurrency_never_zero() {
        let config = Config::default().with_network_concurrency(0);
        assert_eq!(config.network_concurrency, 1);
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var(REGISTRY_ENV, "http://localhost:4873/");
        std::env::set_var(CACHE_DIR_ENV, "/tmp/burrow-cache");

        let config = Config::default().with_env_overrides();
        assert_eq!(config.registry, "http://localhost:4873/");
        assert_eq!(config.cache_root(), PathBuf::from("/tmp/burrow-cache"));

        std::env::remove_var(REGISTRY_ENV);
        std::env::remove_var(CACHE_DIR_ENV);
    }

    #[test]
    #[serial]
    fn test_env_overrides_absent() {
        std::env::remove_var(REGISTRY_ENV);
        std::env::remove_var(CACHE_DIR_ENV);

        let config = Config::default().with_env_overrides();
        assert_eq!(config.registry, DEFAULT_REGISTRY);
        assert!(config.cache_folder.is_none());
    }

    #[test]
    fn test_load_project_file() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(PROJECT_CONFIG_NAME),
            r#"{"registry": "http://mirror.local/", "modulesFolder": "vendor", "flat": true}"#,
        )
        .unwrap();

        let config = Config::new(dir.path().to_path_buf())
            .load_project_file()
            .unwrap();
        assert_eq!(config.registry, "http://mirror.local/");
        assert_eq!(config.modules_root(), dir.path().join("vendor"));
        assert!(config.flat);
    }

    #[test]
    fn test_load_project_file_missing_is_ok() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf())
            .load_project_file()
            .unwrap();
        assert_eq!(config.registry, DEFAULT_REGISTRY);
    }

    #[test]
    fn test_load_project_file_invalid() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(PROJECT_CONFIG_NAME), "{ nope").unwrap();

        let err = Config::new(dir.path().to_path_buf())
            .load_project_file()
            .unwrap_err();
        assert!(matches!(err, Error::ConfigParse { .. }));
    }
}
