//! Dependency patterns.
//!
//! A pattern is the `name@range` string a manifest uses to request a package:
//! - `react` (range defaults to `latest`)
//! - `react@^18.0.0`
//! - `@types/node@^20`
//! - `foo@https://example.com/foo-1.0.0.tgz`
//! - `bar@file:../bar`
//!
//! Everything after the first separating `@` is the range, so exotic ranges
//! containing `@` (git URLs, aliases) survive intact.

use super::error::PkgError;
use std::fmt;

/// Range used when a pattern carries no `@range` part.
pub const DEFAULT_RANGE: &str = "latest";

/// A normalised `name@range` request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pattern {
    raw: String,
    name: String,
    range: String,
}

impl Pattern {
    /// Parse a pattern string.
    ///
    /// # Errors
    /// Returns an error for empty input or a scope without a package name.
    pub fn parse(input: &str) -> Result<Self, PkgError> {
        let raw = input.trim();
        if raw.is_empty() {
            return Err(PkgError::spec_invalid("Empty dependency pattern"));
        }

        // A leading `@` belongs to the scope, not the range separator
        let (scoped, body) = match raw.strip_prefix('@') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };

        let (name, range) = match body.split_once('@') {
            Some((name, "")) => (name, "*"),
            Some((name, range)) => (name, range),
            None => (body, DEFAULT_RANGE),
        };

        if name.is_empty() {
            return Err(PkgError::spec_invalid(format!(
                "Invalid pattern '{raw}': empty package name"
            )));
        }

        if scoped {
            match name.split_once('/') {
                Some((scope, pkg)) if !scope.is_empty() && !pkg.is_empty() => {}
                _ => {
                    return Err(PkgError::spec_invalid(format!(
                        "Invalid scoped package in pattern '{raw}'"
                    )))
                }
            }
        }

        let name = if scoped {
            format!("@{name}")
        } else {
            name.to_string()
        };

        Ok(Self {
            raw: raw.to_string(),
            name,
            range: range.to_string(),
        })
    }

    /// Build the pattern a manifest entry `"name": "range"` denotes.
    #[must_use]
    pub fn from_dependency(name: &str, range: &str) -> Self {
        let range = if range.trim().is_empty() { "*" } else { range.trim() };
        Self {
            raw: format!("{name}@{range}"),
            name: name.to_string(),
            range: range.to_string(),
        }
    }

    /// The original pattern string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Package name (including `@scope/`).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Version range, tag, or exotic locator.
    #[must_use]
    pub fn range(&self) -> &str {
        &self.range
    }

    /// Scope without the `@`, if any.
    #[must_use]
    pub fn scope(&self) -> Option<&str> {
        self.name
            .strip_prefix('@')
            .and_then(|rest| rest.split_once('/'))
            .map(|(scope, _)| scope)
    }
}

impl AsRef<str> for Pattern {
    fn as_ref(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// URL-encode a package name for registry requests (`@scope/name` -> `@scope%2Fname`).
#[must_use]
pub fn url_encoded_name(name: &str) -> String {
    if name.starts_with('@') {
        name.replace('/', "%2F")
    } else {
        name.to_string()
    }
}
