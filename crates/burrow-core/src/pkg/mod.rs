//! The package engine.
//!
//! Provides:
//! - Parsing dependency patterns (`name@range`)
//! - Registry and exotic (tarball, file, link, workspace) resolvers
//! - Concurrent resolution into a deduplicated reference graph
//! - Coalesced, content-addressed fetching into the package cache
//! - Platform compatibility checks for optional packages
//! - Hoisting the graph into a `node_modules` layout
//! - Deterministic lockfile generation

pub mod cache;
pub mod compat;
pub mod error;
pub mod fetch;
pub mod graph;
pub mod hoister;
pub mod install;
pub mod lockfile;
pub mod manifest;
pub mod pattern;
pub mod queue;
pub mod reference;
pub mod registry;
pub mod request;
pub mod resolver;
pub mod resolvers;
pub mod tarball;
pub mod version;
pub mod workspaces;

pub use cache::{CacheMetadata, PackageCache};
pub use compat::{check_compatibility, Platform};
pub use error::{codes as pkg_codes, PkgError};
pub use fetch::{FetchedPackage, Fetcher, PackageFetcher};
pub use graph::ResolverGraph;
pub use hoister::{HoistedPackage, PackageHoister};
pub use install::{plan_install, plan_install_for, InstallPlan};
pub use lockfile::{
    codes as lockfile_codes, LockedPackage, Lockfile, LockfileError, LOCKFILE_NAME,
    LOCKFILE_VERSION,
};
pub use manifest::{Manifest, PackageJson, Remote};
pub use pattern::Pattern;
pub use queue::FetchQueue;
pub use reference::{Optionality, PackageReference, ReferenceId, Visibility};
pub use registry::{RegistryClient, DEFAULT_REGISTRY};
pub use request::{PackageRequest, Request};
pub use resolver::{PackageResolver, ResolverSources};
pub use resolvers::{ExoticResolver, RegistryResolver};
pub use tarball::{download_tarball, extract_tgz_atomic, MAX_TARBALL_SIZE};
pub use version::{resolve_version, satisfies, Range};
pub use workspaces::{WorkspaceLayout, WorkspaceMember, WorkspaceResolver};
