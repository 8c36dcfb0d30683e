//! npm-flavoured semver ranges on top of the `semver` crate.

use super::error::PkgError;
use semver::{Version, VersionReq};
use std::collections::BTreeMap;

/// A parsed range: any alternative may match (`^1 || ^2`).
#[derive(Debug, Clone)]
pub struct Range {
    raw: String,
    alternatives: Vec<VersionReq>,
}

impl Range {
    /// Parse an npm range.
    ///
    /// Accepts caret/tilde/comparator ranges, `||` alternatives, hyphen
    /// ranges, x-ranges, `*`/empty and space-separated comparators.
    ///
    /// # Errors
    /// Returns `PKG_SPEC_INVALID` when no alternative parses.
    pub fn parse(range: &str) -> Result<Self, PkgError> {
        let alternatives: Vec<VersionReq> = range
            .split("||")
            .map(str::trim)
            .filter_map(|alt| parse_single(alt).ok())
            .collect();

        if alternatives.is_empty() {
            return Err(PkgError::spec_invalid(format!(
                "Invalid version range '{range}'"
            )));
        }

        Ok(Self {
            raw: range.to_string(),
            alternatives,
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }

    /// Highest version in `versions` the range accepts.
    pub fn max_satisfying<'a, I>(&self, versions: I) -> Option<&'a str>
    where
        I: IntoIterator<Item = &'a str>,
    {
        versions
            .into_iter()
            .filter_map(|v| Version::parse(v).ok().map(|parsed| (parsed, v)))
            .filter(|(parsed, _)| self.matches(parsed))
            .max_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(_, raw)| raw)
    }
}

/// Pick a version for `range` out of a registry listing.
///
/// Dist-tags are consulted first, then an exact hit, then the highest
/// satisfying version.
///
/// # Errors
/// `PKG_VERSION_NOT_FOUND` when nothing matches, `PKG_SPEC_INVALID` when the
/// range is neither a tag nor a parseable range.
pub fn resolve_version<'a, I>(
    name: &str,
    range: &str,
    dist_tags: &BTreeMap<String, String>,
    versions: I,
) -> Result<String, PkgError>
where
    I: IntoIterator<Item = &'a str> + Clone,
{
    if let Some(tagged) = dist_tags.get(range) {
        return Ok(tagged.clone());
    }

    if versions.clone().into_iter().any(|v| v == range) {
        return Ok(range.to_string());
    }

    let parsed = Range::parse(range)?;
    parsed
        .max_satisfying(versions)
        .map(str::to_string)
        .ok_or_else(|| PkgError::version_not_found(name, range))
}

/// Whether `version` satisfies `range`. Unparseable input never satisfies.
#[must_use]
pub fn satisfies(version: &str, range: &str) -> bool {
    let Ok(version) = Version::parse(version) else {
        return false;
    };
    Range::parse(range).is_ok_and(|r| r.matches(&version))
}

/// Highest of a set of version strings by semver order.
///
/// Versions that are not valid semver sort below every valid one.
pub fn highest<'a, I>(versions: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    versions
        .into_iter()
        .max_by(|a, b| match (Version::parse(a), Version::parse(b)) {
            (Ok(a), Ok(b)) => a.cmp(&b),
            (Ok(_), Err(_)) => std::cmp::Ordering::Greater,
            (Err(_), Ok(_)) => std::cmp::Ordering::Less,
            (Err(_), Err(_)) => a.cmp(b),
        })
}

fn parse_single(range: &str) -> Result<VersionReq, semver::Error> {
    let range = range.trim();

    if range.is_empty() || range == "*" || range == "x" || range == "X" || range == "latest" {
        return Ok(VersionReq::STAR);
    }

    if let Some((start, end)) = range.split_once(" - ") {
        let (start, end) = (start.trim(), end.trim());
        if !start.is_empty() && !end.is_empty() {
            return VersionReq::parse(&format!(">={start}, <={end}"));
        }
    }

    if range.split('.').any(is_wild) {
        return VersionReq::parse(&convert_x_range(range));
    }

    VersionReq::parse(&join_comparators(range))
}

/// `">= 2.1.2 < 3.0.0"` becomes `">=2.1.2, <3.0.0"`.
fn join_comparators(range: &str) -> String {
    let mut out = String::new();
    let mut pending_op = String::new();

    for token in range.split_whitespace() {
        if token.chars().any(|c| c.is_ascii_digit()) {
            if !out.is_empty() {
                out.push_str(", ");
            }
            let token = token.trim_end_matches(',');
            if pending_op.is_empty() {
                out.push_str(&bare_to_npm(token));
            } else {
                out.push_str(&pending_op);
                out.push_str(token);
            }
            pending_op.clear();
        } else {
            pending_op.push_str(token);
        }
    }

    if out.is_empty() {
        range.to_string()
    } else {
        out
    }
}

/// npm reads a bare version as exact and `1.2` as `1.2.x`; the `semver`
/// crate reads both as caret ranges.
fn bare_to_npm(token: &str) -> String {
    if !token.starts_with(|c: char| c.is_ascii_digit()) {
        return token.to_string();
    }
    if Version::parse(token).is_ok() {
        return format!("={token}");
    }
    if token.split('.').count() == 2 {
        return format!("~{token}");
    }
    token.to_string()
}

fn is_wild(part: &str) -> bool {
    matches!(part.trim_start_matches(['^', '~', '=', 'v']), "x" | "X" | "*")
}

fn convert_x_range(range: &str) -> String {
    let range = range.trim_start_matches(['^', '~', '=', 'v']);
    let parts: Vec<&str> = range.split('.').collect();

    match parts.as_slice() {
        [major, minor] | [major, minor, _] if is_wild(minor) => {
            if let Ok(m) = major.parse::<u64>() {
                return format!(">={m}.0.0, <{}.0.0", m + 1);
            }
        }
        [major, minor, patch] if is_wild(patch) => {
            if let (Ok(m), Ok(n)) = (major.parse::<u64>(), minor.parse::<u64>()) {
                return format!(">={m}.{n}.0, <{m}.{}.0", n + 1);
            }
        }
        _ => {}
    }

    range.replace(['x', 'X', '*'], "0")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(latest: &str) -> BTreeMap<String, String> {
        BTreeMap::from([("latest".to_string(), latest.to_string())])
    }

    fn resolve(versions: &[&str], range: &str) -> Result<String, PkgError> {
        let latest = versions.last().copied().unwrap_or("0.0.0");
        resolve_version("test-pkg", range, &tags(latest), versions.iter().copied())
    }

    #[test]
    fn test_resolve_dist_tag() {
        assert_eq!(resolve(&["1.0.0", "2.0.0", "3.0.0"], "latest").unwrap(), "3.0.0");
    }

    #[test]
    fn test_resolve_exact_version() {
        assert_eq!(resolve(&["1.0.0", "2.0.0", "3.0.0"], "2.0.0").unwrap(), "2.0.0");
    }

    #[test]
    fn test_resolve_caret_and_tilde() {
        let versions = ["1.0.0", "1.0.5", "1.5.0", "2.0.0", "2.5.0"];
        assert_eq!(resolve(&versions, "^1.0.0").unwrap(), "1.5.0");
        assert_eq!(resolve(&versions, "~1.0.0").unwrap(), "1.0.5");
    }

    #[test]
    fn test_resolve_major_only() {
        assert_eq!(resolve(&["1.0.0", "2.0.0", "2.5.0"], "2").unwrap(), "2.5.0");
    }

    #[test]
    fn test_resolve_skips_prerelease() {
        let versions = ["1.0.0", "2.0.0-alpha.1", "2.0.0-beta.1", "2.0.0"];
        assert_eq!(resolve(&versions, "^2.0.0").unwrap(), "2.0.0");
    }

    #[test]
    fn test_resolve_not_found() {
        let err = resolve(&["1.0.0", "2.0.0"], "^3.0.0").unwrap_err();
        assert_eq!(err.code(), crate::pkg::error::codes::PKG_VERSION_NOT_FOUND);
    }

    #[test]
    fn test_invalid_range() {
        let err = resolve(&["1.0.0"], "not-a-range!!!").unwrap_err();
        assert_eq!(err.code(), crate::pkg::error::codes::PKG_SPEC_INVALID);
    }

    #[test]
    fn test_or_ranges() {
        let versions = ["1.0.0", "1.5.0", "2.0.0", "2.5.0"];
        assert_eq!(resolve(&versions, "^1.0.0 || ^2.0.0").unwrap(), "2.5.0");
        assert_eq!(resolve(&versions, "^1.0.0||^9.0.0").unwrap(), "1.5.0");
        assert!(resolve(&versions, "^3.0.0 || ^4.0.0").is_err());
    }

    #[test]
    fn test_x_and_hyphen_ranges() {
        let versions = ["1.0.0", "1.2.3", "1.5.0", "2.0.0", "3.0.0"];
        assert_eq!(resolve(&versions, "1.x").unwrap(), "1.5.0");
        assert_eq!(resolve(&versions, "1.2.x").unwrap(), "1.2.3");
        assert_eq!(resolve(&versions, "1.0.0 - 2.0.0").unwrap(), "2.0.0");
        assert_eq!(resolve(&versions, "*").unwrap(), "3.0.0");
    }

    #[test]
    fn test_space_separated_comparators() {
        let versions = ["2.0.0", "2.1.2", "2.5.0", "3.0.0"];
        assert_eq!(resolve(&versions, ">= 2.1.2 < 3.0.0").unwrap(), "2.5.0");
        assert_eq!(resolve(&versions, ">=2.1.2 <3.0.0").unwrap(), "2.5.0");
        assert_eq!(resolve(&["2.1.2", "3.0.0"], ">= 2.1.2 < 3.0.0").unwrap(), "2.1.2");
    }

    #[test]
    fn test_bare_versions_follow_npm() {
        assert!(!satisfies("1.5.0", "1.0.0"));
        assert!(satisfies("1.0.0", "1.0.0"));
        assert!(satisfies("1.2.7", "1.2"));
        assert!(!satisfies("1.3.0", "1.2"));
    }

    #[test]
    fn test_satisfies() {
        assert!(satisfies("1.2.11", "^1.0.5"));
        assert!(!satisfies("2.0.0", "^1.0.5"));
        assert!(!satisfies("garbage", "*"));
    }

    #[test]
    fn test_highest() {
        assert_eq!(highest(["1.0.0", "10.0.0", "2.0.0"]), Some("10.0.0"));
        assert_eq!(highest(["weird", "0.0.1"]), Some("0.0.1"));
        assert_eq!(highest(std::iter::empty()), None);
    }
}
