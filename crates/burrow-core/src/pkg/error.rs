//! Package engine error types.

use std::fmt;
use std::io;

/// Package engine error codes.
pub mod codes {
    pub const PKG_SPEC_INVALID: &str = "PKG_SPEC_INVALID";
    pub const PKG_NOT_FOUND: &str = "PKG_NOT_FOUND";
    pub const PKG_VERSION_NOT_FOUND: &str = "PKG_VERSION_NOT_FOUND";
    pub const PKG_REGISTRY_ERROR: &str = "PKG_REGISTRY_ERROR";
    pub const PKG_DOWNLOAD_FAILED: &str = "PKG_DOWNLOAD_FAILED";
    pub const PKG_EXTRACT_FAILED: &str = "PKG_EXTRACT_FAILED";
    pub const PKG_CACHE_ERROR: &str = "PKG_CACHE_ERROR";
    pub const PKG_UNSUPPORTED_REMOTE: &str = "PKG_UNSUPPORTED_REMOTE";
    pub const PKG_PACKAGE_JSON_INVALID: &str = "PKG_PACKAGE_JSON_INVALID";
    pub const PKG_MANIFEST_INVALID: &str = "PKG_MANIFEST_INVALID";
    pub const PKG_INCOMPATIBLE: &str = "PKG_INCOMPATIBLE";
    pub const PKG_HOIST_TOO_DEEP: &str = "PKG_HOIST_TOO_DEEP";
    pub const PKG_HOIST_INVARIANT: &str = "PKG_HOIST_INVARIANT";
}

/// Package engine error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkgError {
    code: &'static str,
    message: String,
}

impl PkgError {
    /// Create a new error with the given code and message.
    #[must_use]
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Get the error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// Get the error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether an optional dependency edge may swallow this error.
    ///
    /// Lookup and fetch failures are recoverable; a package without a name or
    /// version and hoisting failures never are.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self.code,
            codes::PKG_MANIFEST_INVALID
                | codes::PKG_HOIST_TOO_DEEP
                | codes::PKG_HOIST_INVARIANT
                | codes::PKG_PACKAGE_JSON_INVALID
        )
    }

    /// Append the request chain (`a@^1 > b@~2`) to the message.
    #[must_use]
    pub fn in_request(mut self, chain: &str) -> Self {
        if !chain.is_empty() {
            self.message = format!("{} (requested by {chain})", self.message);
        }
        self
    }

    pub fn spec_invalid(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_SPEC_INVALID, msg)
    }

    #[must_use]
    pub fn not_found(name: &str) -> Self {
        Self::new(codes::PKG_NOT_FOUND, format!("Package not found: {name}"))
    }

    #[must_use]
    pub fn version_not_found(name: &str, range: &str) -> Self {
        Self::new(
            codes::PKG_VERSION_NOT_FOUND,
            format!("No version of {name} satisfies range: {range}"),
        )
    }

    pub fn registry(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_REGISTRY_ERROR, msg)
    }

    pub fn download_failed(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_DOWNLOAD_FAILED, msg)
    }

    pub fn extract_failed(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_EXTRACT_FAILED, msg)
    }

    pub fn cache_error(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_CACHE_ERROR, msg)
    }

    pub fn unsupported_remote(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_UNSUPPORTED_REMOTE, msg)
    }

    pub fn package_json_invalid(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_PACKAGE_JSON_INVALID, msg)
    }

    /// A resolved or fetched package lacks a required field.
    #[must_use]
    pub fn manifest_missing_field(human: &str, field: &str) -> Self {
        Self::new(
            codes::PKG_MANIFEST_INVALID,
            format!("Package {human} doesn't have a {field}"),
        )
    }

    pub fn incompatible(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_INCOMPATIBLE, msg)
    }

    #[must_use]
    pub fn hoist_too_deep(key: &str) -> Self {
        Self::new(
            codes::PKG_HOIST_TOO_DEEP,
            format!("Maximum dependency depth reached while laying out {key}; the resolved graph is malformed"),
        )
    }

    pub fn hoist_invariant(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_HOIST_INVARIANT, msg)
    }
}

impl fmt::Display for PkgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for PkgError {}

impl From<io::Error> for PkgError {
    fn from(e: io::Error) -> Self {
        Self::new(codes::PKG_CACHE_ERROR, e.to_string())
    }
}

impl From<reqwest::Error> for PkgError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::new(codes::PKG_REGISTRY_ERROR, format!("Request timed out: {e}"))
        } else if e.is_connect() {
            Self::new(codes::PKG_REGISTRY_ERROR, format!("Connection failed: {e}"))
        } else {
            Self::new(codes::PKG_REGISTRY_ERROR, e.to_string())
        }
    }
}

impl From<serde_json::Error> for PkgError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(codes::PKG_REGISTRY_ERROR, format!("Invalid JSON: {e}"))
    }
}

impl From<super::lockfile::LockfileError> for PkgError {
    fn from(e: super::lockfile::LockfileError) -> Self {
        Self::new(e.code(), e.message())
    }
}
