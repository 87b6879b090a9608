#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use tempfile::TempDir;

fn setup_resource(revisioning: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("resource");
    cargo_bin_cmd!("strata")
        .args(["init", "--revisioning", revisioning, "--restore", "3"])
        .arg(&path)
        .assert()
        .success();
    (dir, path)
}

fn json(args: &[&str], dir: &Path, tail: &[&str]) -> Value {
    let output = cargo_bin_cmd!("strata")
        .args(["--format", "json"])
        .args(args)
        .arg(dir)
        .args(tail)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).expect("valid json")
}

#[test]
fn init_writes_configuration() {
    let (_dir, path) = setup_resource("sliding-snapshot");
    assert!(path.join("resource.json").exists());
    let info = json(&["info"], &path, &[]);
    assert_eq!(info["config"]["revisioning"], "sliding_snapshot");
    assert_eq!(info["config"]["revisions_to_restore"], 3);
    assert_eq!(info["stats"]["latest_revision"], 0);
}

#[test]
fn init_refuses_existing_resource() {
    let (_dir, path) = setup_resource("incremental");
    cargo_bin_cmd!("strata")
        .args(["init"])
        .arg(&path)
        .assert()
        .failure();
}

#[test]
fn put_then_get_across_revisions() {
    let (_dir, path) = setup_resource("differential");
    let first = json(&["put"], &path, &["42", "hello"]);
    assert_eq!(first["revision"], 1);
    let second = json(&["put"], &path, &["42", "world"]);
    assert_eq!(second["revision"], 2);

    let latest = json(&["get"], &path, &["42"]);
    assert_eq!(latest["value"], "world");
    assert_eq!(latest["revision"], 2);

    let old = json(&["get"], &path, &["42", "--revision", "1"]);
    assert_eq!(old["value"], "hello");

    let missing = json(&["get"], &path, &["7"]);
    assert!(missing["value"].is_null());

    let text = cargo_bin_cmd!("strata")
        .args(["get"])
        .arg(&path)
        .args(["42"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert_eq!(String::from_utf8_lossy(&text).trim(), "world");
}

#[test]
fn log_lists_every_revision() {
    let (_dir, path) = setup_resource("full-dump");
    json(&["put"], &path, &["1", "a"]);
    json(&["put"], &path, &["2", "b"]);
    let log = json(&["log"], &path, &[]);
    let entries = log.as_array().expect("array");
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[2]["revision"], 2);
    assert_eq!(entries[2]["revision_size"], 2);
    assert_eq!(entries[2]["max_node_key"], 2);
}

#[test]
fn unknown_revision_fails() {
    let (_dir, path) = setup_resource("incremental");
    let output = cargo_bin_cmd!("strata")
        .args(["get"])
        .arg(&path)
        .args(["1", "--revision", "9"])
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    assert!(String::from_utf8_lossy(&output).contains("revision 9 not found"));
}
