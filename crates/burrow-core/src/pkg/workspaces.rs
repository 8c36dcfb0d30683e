//! Workspace support for monorepos.
//!
//! The root `package.json` lists member directories in `workspaces`, either
//! as an array of globs or as `{ "packages": [...] }`. A dependency on a
//! member's name whose range the member's version satisfies resolves to the
//! member directory, used in place.

use super::error::PkgError;
use super::manifest::{Manifest, Remote};
use super::pattern::Pattern;
use super::resolvers::{read_local, ExoticResolver};
use super::version::satisfies;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Range prefix that only ever resolves to a workspace member.
pub const WORKSPACE_PROTOCOL: &str = "workspace:";

/// A discovered workspace package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceMember {
    pub name: String,
    /// Absolute path to the member directory.
    pub path: PathBuf,
    pub version: String,
}

/// Members of a monorepo, keyed by package name.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceLayout {
    members: BTreeMap<String, WorkspaceMember>,
}

impl WorkspaceLayout {
    /// Read the `workspaces` field of `root/package.json`.
    ///
    /// Returns `None` when the project declares no workspaces or none of its
    /// globs match a package.
    #[must_use]
    pub fn detect(root: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(root.join("package.json")).ok()?;
        let package: Value = serde_json::from_str(&content).ok()?;
        let globs = member_globs(package.get("workspaces")?);
        if globs.is_empty() {
            return None;
        }

        let mut members = BTreeMap::new();
        for glob_pattern in &globs {
            let full = root.join(glob_pattern);
            let entries = match glob::glob(&full.to_string_lossy()) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(pattern = %glob_pattern, error = %e, "invalid workspace glob");
                    continue;
                }
            };
            for dir in entries.flatten() {
                // the root may list itself through a broad glob
                if dir == root {
                    continue;
                }
                if let Some(member) = read_member(&dir) {
                    members.insert(member.name.clone(), member);
                }
            }
        }

        if members.is_empty() {
            return None;
        }
        debug!(members = members.len(), root = %root.display(), "workspaces detected");
        Some(Self { members })
    }

    #[must_use]
    pub fn member(&self, name: &str) -> Option<&WorkspaceMember> {
        self.members.get(name)
    }
}

fn member_globs(field: &Value) -> Vec<String> {
    let list = match field {
        Value::Array(list) => list,
        Value::Object(obj) => match obj.get("packages").and_then(Value::as_array) {
            Some(list) => list,
            None => return Vec::new(),
        },
        _ => return Vec::new(),
    };
    list.iter()
        .filter_map(|v| v.as_str().map(String::from))
        .collect()
}

fn read_member(dir: &Path) -> Option<WorkspaceMember> {
    if !dir.is_dir() {
        return None;
    }
    let content = std::fs::read_to_string(dir.join("package.json")).ok()?;
    let package: Value = serde_json::from_str(&content).ok()?;
    let name = package.get("name")?.as_str()?.to_string();
    let version = package
        .get("version")
        .and_then(Value::as_str)
        .unwrap_or("0.0.0")
        .to_string();
    Some(WorkspaceMember {
        name,
        path: dir.to_path_buf(),
        version,
    })
}

/// Resolves patterns naming a workspace member to the member directory.
#[derive(Debug, Clone)]
pub struct WorkspaceResolver {
    layout: WorkspaceLayout,
}

impl WorkspaceResolver {
    #[must_use]
    pub fn new(layout: WorkspaceLayout) -> Self {
        Self { layout }
    }

    /// The range a member must satisfy; `workspace:*`, `^` and `~` accept any version.
    fn member_range(range: &str) -> Option<&str> {
        let range = range.strip_prefix(WORKSPACE_PROTOCOL).unwrap_or(range);
        match range {
            "" | "*" | "^" | "~" => None,
            other => Some(other),
        }
    }
}

#[async_trait]
impl ExoticResolver for WorkspaceResolver {
    fn kind(&self) -> &'static str {
        "workspace"
    }

    fn matches(&self, range: &str) -> bool {
        range.starts_with(WORKSPACE_PROTOCOL)
    }

    fn claims(&self, pattern: &Pattern) -> bool {
        if self.matches(pattern.range()) {
            return true;
        }
        self.layout
            .member(pattern.name())
            .is_some_and(|m| satisfies(&m.version, pattern.range()))
    }

    async fn resolve(&self, pattern: &Pattern) -> Result<Manifest, PkgError> {
        let member = self.layout.member(pattern.name()).ok_or_else(|| {
            PkgError::not_found(&format!("{} (not a workspace member)", pattern.name()))
        })?;
        if let Some(range) = Self::member_range(pattern.range()) {
            if !satisfies(&member.version, range) {
                return Err(PkgError::version_not_found(pattern.name(), range));
            }
        }
        let path = member.path.clone();
        read_local(pattern, path.clone(), Remote::Workspace { path }, false).await
    }
}
