use crate::config::Channel;
use crate::error::Error;
use crate::version::SCHEMA_VERSION;
use std::path::{Path, PathBuf};

/// Find the project root by walking up from `cwd` looking for `package.json`.
///
/// Returns the first directory containing one, or `None` if none is found.
#[must_use]
pub fn project_root(cwd: &Path) -> Option<PathBuf> {
    cwd.ancestors()
        .find(|dir| dir.join("package.json").is_file())
        .map(Path::to_path_buf)
}

/// Like [`project_root`], but a missing root is an error.
pub fn require_project_root(cwd: &Path) -> Result<PathBuf, Error> {
    project_root(cwd).ok_or_else(|| Error::ProjectNotFound {
        start: cwd.to_path_buf(),
    })
}

/// Get the cache directory for burrow.
///
/// Uses platform-appropriate locations with versioning:
/// - Linux: `$XDG_CACHE_HOME/burrow/v{N}/{channel}` or `~/.cache/burrow/v{N}/{channel}`
/// - macOS: `~/Library/Caches/burrow/v{N}/{channel}`
/// - Windows: `%LOCALAPPDATA%\burrow\v{N}\{channel}`
#[must_use]
pub fn cache_dir(channel: Channel) -> PathBuf {
    let base = dirs_next::cache_dir().map_or_else(
        || {
            dirs_next::home_dir().map_or_else(
                || PathBuf::from(".burrow-cache"),
                |p| p.join(".cache").join("burrow"),
            )
        },
        |p| p.join("burrow"),
    );

    base.join(format!("v{SCHEMA_VERSION}"))
        .join(channel.as_str())
}
