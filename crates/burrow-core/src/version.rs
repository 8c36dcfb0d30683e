use std::fmt::Write;

/// The current version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Schema version for cache directories.
/// Bump this when the cache layout changes in a way old entries can't be read.
pub const SCHEMA_VERSION: u32 = 1;

/// Returns a formatted version string including build metadata if available.
#[must_use]
pub fn version_string() -> String {
    let mut s = format!("burrow {VERSION}");

    if let Some(hash) = option_env!("BURROW_BUILD_GIT_HASH") {
        let _ = write!(s, " ({hash})");
    }

    s
}

/// User agent sent with registry and tarball requests.
#[must_use]
pub fn user_agent() -> String {
    format!("burrow/{VERSION} ({} {})", std::env::consts::OS, std::env::consts::ARCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_string_contains_version() {
        let vs = version_string();
        assert!(vs.contains(VERSION));
        assert!(vs.starts_with("burrow "));
    }

    #[test]
    fn test_user_agent_names_platform() {
        let ua = user_agent();
        assert!(ua.starts_with("burrow/"));
        assert!(ua.contains(std::env::consts::OS));
    }
}
