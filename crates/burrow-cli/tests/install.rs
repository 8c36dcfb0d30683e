//! Integration tests for `burrow install`.
//!
//! Projects here only use `file:` dependencies, so no registry is contacted.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::tempdir;

fn cargo_bin() -> Command {
    let mut cmd = Command::new(env!("CARGO"));
    cmd.args(["run", "-q", "-p", "burrow-cli", "--bin", "burrow", "--"]);
    cmd
}

fn write(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// `app -> local-lib -> nested`, plus a second `nested` range that converges.
fn create_project(root: &Path) {
    write(
        &root.join("package.json"),
        r#"{"name": "app", "version": "1.0.0", "dependencies": {"local-lib": "file:./libs/local-lib"}}"#,
    );
    write(
        &root.join("libs/local-lib/package.json"),
        r#"{"name": "local-lib", "version": "1.2.3", "dependencies": {"nested": "file:./libs/nested"}}"#,
    );
    write(&root.join("libs/local-lib/index.js"), "module.exports = 1;\n");
    write(
        &root.join("libs/nested/package.json"),
        r#"{"name": "nested", "version": "0.4.0"}"#,
    );
}

fn install(root: &Path, cache: &Path, extra: &[&str]) -> Output {
    cargo_bin()
        .args(["--json", "install", "--cwd"])
        .arg(root)
        .arg("--cache-folder")
        .arg(cache)
        .args(extra)
        .output()
        .expect("Failed to run burrow install")
}

fn stdout_json(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(&stdout).unwrap_or_else(|_| panic!("stdout should be valid JSON: {stdout}"))
}

#[test]
fn test_install_plans_layout_and_writes_lockfile() {
    let dir = tempdir().unwrap();
    let cache = tempdir().unwrap();
    create_project(dir.path());

    let output = install(dir.path(), cache.path(), &[]);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "install failed: {stderr}");

    let json = stdout_json(&output);
    assert_eq!(json["ok"], true);
    assert_eq!(json["lockfile_changed"], true);

    let keys: Vec<&str> = json["packages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["key"].as_str().unwrap())
        .collect();
    assert_eq!(keys, vec!["local-lib", "nested"]);

    let dest = json["packages"][0]["dest"].as_str().unwrap();
    assert_eq!(Path::new(dest), dir.path().join("node_modules").join("local-lib"));

    let lockfile = fs::read_to_string(dir.path().join("burrow.lock")).unwrap();
    assert!(lockfile.contains("\"local-lib@file:./libs/local-lib\""));
    assert!(lockfile.contains("\"nested@file:./libs/nested\""));

    // the copy landed in the cache, not in the project
    assert!(fs::read_dir(cache.path().join("local-lib")).unwrap().next().is_some());
}

#[test]
fn test_frozen_install_accepts_up_to_date_lockfile() {
    let dir = tempdir().unwrap();
    let cache = tempdir().unwrap();
    create_project(dir.path());

    assert!(install(dir.path(), cache.path(), &[]).status.success());
    let before = fs::read_to_string(dir.path().join("burrow.lock")).unwrap();

    let output = install(dir.path(), cache.path(), &["--frozen-lockfile"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(stdout_json(&output)["lockfile_changed"], false);
    assert_eq!(fs::read_to_string(dir.path().join("burrow.lock")).unwrap(), before);
}

#[test]
fn test_frozen_install_rejects_stale_lockfile() {
    let dir = tempdir().unwrap();
    let cache = tempdir().unwrap();
    create_project(dir.path());

    let output = install(dir.path(), cache.path(), &["--frozen-lockfile"]);
    assert!(!output.status.success());

    let json = stdout_json(&output);
    assert_eq!(json["ok"], false);
    assert_eq!(json["error"]["code"], "PKG_LOCK_STALE");
    assert!(!dir.path().join("burrow.lock").exists());
}

#[test]
fn test_modules_folder_flag() {
    let dir = tempdir().unwrap();
    let cache = tempdir().unwrap();
    create_project(dir.path());

    let output = install(dir.path(), cache.path(), &["--modules-folder", "vendor"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let json = stdout_json(&output);
    let dest = json["packages"][1]["dest"].as_str().unwrap();
    assert_eq!(Path::new(dest), dir.path().join("vendor").join("nested"));
}

#[test]
fn test_missing_local_dependency_reports_code() {
    let dir = tempdir().unwrap();
    let cache = tempdir().unwrap();
    write(
        &dir.path().join("package.json"),
        r#"{"dependencies": {"ghost": "file:./nowhere"}}"#,
    );

    let output = install(dir.path(), cache.path(), &[]);
    assert!(!output.status.success());
    let json = stdout_json(&output);
    assert_eq!(json["error"]["code"], "PKG_NOT_FOUND");
    assert!(json["error"]["message"].as_str().unwrap().contains("ghost"));
}

#[test]
fn test_version_json() {
    let output = cargo_bin()
        .args(["--json", "version"])
        .output()
        .expect("Failed to run burrow version");
    assert!(output.status.success());

    let json = stdout_json(&output);
    assert_eq!(json["ok"], true);
    assert!(json["user_agent"].as_str().unwrap().starts_with("burrow/"));
}
