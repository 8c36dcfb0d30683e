//! `node_modules` layouts produced by the hoister.

use burrow_core::pkg::{
    pkg_codes, HoistedPackage, Manifest, PackageHoister, Remote, ResolverGraph,
};
use std::path::{Path, PathBuf};

/// Graph where every package is requested by its `name@version` uid.
struct Fixture {
    graph: ResolverGraph,
}

impl Fixture {
    fn new(packages: &[(&str, &[&str])]) -> Self {
        let mut graph = ResolverGraph::new();
        for (uid, deps) in packages {
            let (name, version) = split_uid(uid);
            let manifest = Manifest::new(
                name,
                version,
                Remote::Registry {
                    registry: "mock".to_string(),
                    tarball: format!("https://mock.test/{uid}.tgz"),
                    integrity: None,
                },
            );
            let id = graph.insert_reference(manifest);
            graph.add_pattern(uid, id);
            graph.reference_mut(id).location = Some(PathBuf::from(format!("/cache/{uid}")));
            graph
                .reference_mut(id)
                .set_dependencies(deps.iter().map(|d| (*d).to_string()).collect());
        }
        Self { graph }
    }

    fn ignore(mut self, uid: &str) -> Self {
        let id = self.graph.reference_for(uid).unwrap();
        self.graph.ignore_reference(id);
        self
    }

    fn hoist(&self, roots: &[&str], modules_root: &Path) -> Vec<HoistedPackage> {
        let mut hoister = PackageHoister::new(&self.graph, modules_root);
        hoister.seed(roots).unwrap();
        hoister.init().unwrap()
    }
}

fn split_uid(uid: &str) -> (&str, &str) {
    // scoped names start with `@`
    let at = uid[1..].find('@').map(|i| i + 1).unwrap();
    (&uid[..at], &uid[at + 1..])
}

fn root() -> PathBuf {
    PathBuf::from("/project/node_modules")
}

fn at(path: &[&str]) -> PathBuf {
    let mut dest = root();
    for (i, name) in path.iter().enumerate() {
        if i > 0 {
            dest.push("node_modules");
        }
        dest.push(name);
    }
    dest
}

/// `(dest, name@version)` pairs, in output order.
fn layout(packages: &[HoistedPackage]) -> Vec<(PathBuf, String)> {
    packages
        .iter()
        .map(|p| (p.dest.clone(), p.manifest.human()))
        .collect()
}

fn expected(entries: &[(&[&str], &str)]) -> Vec<(PathBuf, String)> {
    let mut out: Vec<(PathBuf, String)> = entries
        .iter()
        .map(|(path, uid)| (at(path), (*uid).to_string()))
        .collect();
    out.sort();
    out
}

#[test]
fn test_hoists_dependency_to_root() {
    let fixture = Fixture::new(&[("a@1.0.0", &["b@1.0.0"]), ("b@1.0.0", &[])]);
    let out = fixture.hoist(&["a@1.0.0"], &root());

    assert_eq!(
        layout(&out),
        expected(&[(&["a"], "a@1.0.0"), (&["b"], "b@1.0.0")])
    );
    let b = &out[1];
    assert_eq!(b.key, "b");
    assert_eq!(b.hoisted_from, vec!["a#b"]);
    assert_eq!(b.loc.as_deref(), Some(Path::new("/cache/b@1.0.0")));
    assert_eq!(out[0].require_reachable, vec![at(&["b"])]);
}

#[test]
fn test_version_conflict_stays_nested() {
    let fixture = Fixture::new(&[
        ("a@1.0.0", &["b@2.0.0"]),
        ("b@1.0.0", &[]),
        ("b@2.0.0", &[]),
    ]);
    let out = fixture.hoist(&["a@1.0.0", "b@1.0.0"], &root());

    assert_eq!(
        layout(&out),
        expected(&[
            (&["a"], "a@1.0.0"),
            (&["b"], "b@1.0.0"),
            (&["a", "b"], "b@2.0.0"),
        ])
    );
    let a = out.iter().find(|p| p.key == "a").unwrap();
    assert_eq!(a.require_reachable, vec![at(&["a", "b"])]);
}

#[test]
fn test_diamond_is_deduplicated() {
    let fixture = Fixture::new(&[
        ("a@1.0.0", &["b@1.0.0", "c@1.0.0"]),
        ("b@1.0.0", &["d@1.0.0"]),
        ("c@1.0.0", &["d@1.0.0"]),
        ("d@1.0.0", &[]),
    ]);
    let out = fixture.hoist(&["a@1.0.0"], &root());

    assert_eq!(
        layout(&out),
        expected(&[
            (&["a"], "a@1.0.0"),
            (&["b"], "b@1.0.0"),
            (&["c"], "c@1.0.0"),
            (&["d"], "d@1.0.0"),
        ])
    );
    let d = out.iter().find(|p| p.key == "d").unwrap();
    assert_eq!(d.hoisted_from, vec!["b#d", "c#d"]);
}

#[test]
fn test_conflicting_versions_each_keep_one_copy() {
    let fixture = Fixture::new(&[
        ("a@1.0.0", &["b@1.0.0", "d@1.0.0"]),
        ("b@1.0.0", &["c@1.0.0", "e@1.0.0"]),
        ("c@1.0.0", &["d@2.0.0"]),
        ("e@1.0.0", &["d@2.0.0"]),
        ("d@1.0.0", &[]),
        ("d@2.0.0", &[]),
    ]);
    let out = fixture.hoist(&["a@1.0.0"], &root());

    assert_eq!(out.len(), 7);
    assert_eq!(
        layout(&out),
        expected(&[
            (&["a"], "a@1.0.0"),
            (&["b"], "b@1.0.0"),
            (&["c"], "c@1.0.0"),
            (&["d"], "d@1.0.0"),
            (&["e"], "e@1.0.0"),
            (&["c", "d"], "d@2.0.0"),
            (&["e", "d"], "d@2.0.0"),
        ])
    );
}

#[test]
fn test_modules_folder_override() {
    let fixture = Fixture::new(&[
        ("a@1.0.0", &["b@2.0.0"]),
        ("b@1.0.0", &[]),
        ("b@2.0.0", &[]),
    ]);
    let custom = PathBuf::from("/elsewhere/vendor");
    let out = fixture.hoist(&["a@1.0.0", "b@1.0.0"], &custom);

    let dests: Vec<PathBuf> = out.into_iter().map(|p| p.dest).collect();
    assert_eq!(
        dests,
        vec![
            custom.join("a"),
            custom.join("a").join("node_modules").join("b"),
            custom.join("b"),
        ]
    );
}

#[test]
fn test_ignored_package_and_its_dependencies_are_dropped() {
    let fixture = Fixture::new(&[
        ("a@1.0.0", &["c@1.0.0"]),
        ("b@1.0.0", &[]),
        ("c@1.0.0", &[]),
    ])
    .ignore("a@1.0.0");
    let out = fixture.hoist(&["a@1.0.0", "b@1.0.0"], &root());

    assert_eq!(layout(&out), expected(&[(&["b"], "b@1.0.0")]));
}

#[test]
fn test_ignored_package_dependency_kept_when_shared() {
    let fixture = Fixture::new(&[
        ("a@1.0.0", &["c@1.0.0"]),
        ("b@1.0.0", &["c@1.0.0"]),
        ("c@1.0.0", &[]),
    ])
    .ignore("a@1.0.0");
    let out = fixture.hoist(&["a@1.0.0", "b@1.0.0"], &root());

    assert_eq!(
        layout(&out),
        expected(&[(&["b"], "b@1.0.0"), (&["c"], "c@1.0.0")])
    );
}

#[test]
fn test_ignored_package_still_blocks_its_slot() {
    let fixture = Fixture::new(&[
        ("a@1.0.0", &["d@1.0.0"]),
        ("d@1.0.0", &["c@2.0.0"]),
        ("b@3.0.0", &["c@5.0.0"]),
        ("c@2.0.0", &[]),
        ("c@5.0.0", &[]),
    ])
    .ignore("b@3.0.0");
    let out = fixture.hoist(&["a@1.0.0", "b@3.0.0"], &root());

    assert_eq!(
        layout(&out),
        expected(&[
            (&["a"], "a@1.0.0"),
            (&["d"], "d@1.0.0"),
            (&["d", "c"], "c@2.0.0"),
        ])
    );
}

#[test]
fn test_hoists_under_subdirectory() {
    let fixture = Fixture::new(&[
        ("a@1.0.0", &["b@1.0.0"]),
        ("b@1.0.0", &["c@1.0.0"]),
        ("c@1.0.0", &["d@1.0.0"]),
        ("d@1.0.0", &[]),
        ("b@2.0.0", &["c@2.0.0"]),
        ("c@2.0.0", &["d@2.0.0"]),
        ("d@2.0.0", &[]),
    ])
    .ignore("b@2.0.0");
    let out = fixture.hoist(&["a@1.0.0", "b@2.0.0"], &root());

    assert_eq!(
        layout(&out),
        expected(&[
            (&["a"], "a@1.0.0"),
            (&["a", "b"], "b@1.0.0"),
            (&["a", "c"], "c@1.0.0"),
            (&["a", "d"], "d@1.0.0"),
        ])
    );
}

#[test]
fn test_scoped_packages_nest_under_scope_dir() {
    let fixture = Fixture::new(&[
        ("app@1.0.0", &["@types/node@20.0.0"]),
        ("@types/node@18.0.0", &[]),
        ("@types/node@20.0.0", &[]),
    ]);
    let out = fixture.hoist(&["app@1.0.0", "@types/node@18.0.0"], &root());

    let dests: Vec<PathBuf> = out.iter().map(|p| p.dest.clone()).collect();
    assert!(dests.contains(&root().join("@types").join("node")));
    assert!(dests.contains(&root().join("app/node_modules/@types/node")));
}

#[test]
fn test_no_two_packages_share_a_directory() {
    let fixture = Fixture::new(&[
        ("a@1.0.0", &["x@1.0.0", "y@1.0.0"]),
        ("b@1.0.0", &["x@2.0.0", "y@1.0.0"]),
        ("x@1.0.0", &["y@2.0.0"]),
        ("x@2.0.0", &["y@1.0.0"]),
        ("y@1.0.0", &["x@2.0.0"]),
        ("y@2.0.0", &[]),
    ]);
    let out = fixture.hoist(&["a@1.0.0", "b@1.0.0"], &root());

    let mut dests: Vec<&PathBuf> = out.iter().map(|p| &p.dest).collect();
    let before = dests.len();
    dests.dedup();
    assert_eq!(dests.len(), before);

    // every dependency resolves, Node-style, to a package that is installed
    for package in &out {
        for dep in &package.require_reachable {
            assert!(out.iter().any(|p| &p.dest == dep));
        }
    }
}

#[test]
fn test_layout_is_deterministic() {
    let packages: &[(&str, &[&str])] = &[
        ("a@1.0.0", &["c@1.0.0", "d@1.0.0"]),
        ("b@1.0.0", &["c@2.0.0"]),
        ("c@1.0.0", &["d@2.0.0"]),
        ("c@2.0.0", &[]),
        ("d@1.0.0", &[]),
        ("d@2.0.0", &[]),
    ];
    let first = layout(&Fixture::new(packages).hoist(&["a@1.0.0", "b@1.0.0"], &root()));
    for _ in 0..5 {
        let again = layout(&Fixture::new(packages).hoist(&["a@1.0.0", "b@1.0.0"], &root()));
        assert_eq!(first, again);
    }
}

#[test]
fn test_unknown_root_is_an_error_free_skip() {
    let fixture = Fixture::new(&[("a@1.0.0", &[])]);
    let mut hoister = PackageHoister::new(&fixture.graph, root());
    hoister.seed(&["a@1.0.0", "nope@1.0.0"]).unwrap();
    assert_eq!(hoister.init().unwrap().len(), 1);

    // sanity: codes are exported for callers matching on failures
    assert_eq!(pkg_codes::PKG_HOIST_TOO_DEEP, "PKG_HOIST_TOO_DEEP");
}
