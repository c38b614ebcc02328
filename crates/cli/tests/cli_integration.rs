//! CLI integration tests for the `rdlc` subcommands.
//!
//! Uses `assert_cmd` to spawn the `rdlc` binary and verify exit codes,
//! stdout content, and stderr content. Inputs are parse-tree JSON files
//! written into a temporary directory per test.

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn rdlc() -> Command {
    cargo_bin_cmd!("rdlc")
}

/// Write `unit` as `name` inside `dir` and return its path.
fn write_unit(dir: &TempDir, name: &str, unit: serde_json::Value) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, serde_json::to_string_pretty(&unit).unwrap()).unwrap();
    path
}

fn field(name: &str, bits: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "item": "instance", "name": name,
        "type": { "inline": { "kind": "field" } },
        "bits": bits
    })
}

/// Two registers of one 8-bit field, instantiated as `regs[2]` in `top`.
fn simple_map() -> serde_json::Value {
    serde_json::json!({
        "file": "simple.rdl",
        "items": [
            { "item": "component", "kind": "reg", "name": "r_t", "body": [
                field("f", serde_json::json!({ "width": { "int": 8 } }))
            ] },
            { "item": "component", "kind": "addrmap", "name": "top", "body": [
                { "item": "instance", "name": "regs", "type": { "named": "r_t" },
                  "dims": [ { "int": 2 } ] },
                { "item": "instance", "name": "ctrl", "type": { "named": "r_t" } }
            ] }
        ]
    })
}

fn overlapping_map() -> serde_json::Value {
    serde_json::json!({
        "file": "overlap.rdl",
        "items": [
            { "item": "component", "kind": "addrmap", "name": "top", "body": [
                { "item": "instance", "name": "r", "type": { "inline": {
                    "kind": "reg", "body": [
                        field("a", serde_json::json!({ "range": { "msb": { "int": 3 }, "lsb": { "int": 0 } } })),
                        field("b", serde_json::json!({ "range": { "msb": { "int": 5 }, "lsb": { "int": 2 } } }))
                    ] } } }
            ] }
        ]
    })
}

// ──────────────────────────────────────────────
// 1. Help and version
// ──────────────────────────────────────────────

#[test]
fn help_exits_0_with_description() {
    rdlc()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Register-description elaborator"));
}

#[test]
fn version_exits_0() {
    rdlc()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("rdlc"));
}

#[test]
fn elaborate_help_lists_options() {
    rdlc()
        .args(["elaborate", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--top"))
        .stdout(predicate::str::contains("--param"));
}

// ──────────────────────────────────────────────
// 2. Elaborate subcommand
// ──────────────────────────────────────────────

#[test]
fn elaborate_prints_address_listing() {
    let dir = TempDir::new().unwrap();
    let path = write_unit(&dir, "simple.json", simple_map());

    rdlc()
        .arg("elaborate")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("0x00000000 top (addrmap, 12 bytes)"))
        .stdout(predicate::str::contains("0x00000000 regs[2] (reg, 8 bytes)"))
        .stdout(predicate::str::contains("0x00000008 ctrl (reg, 4 bytes)"))
        .stdout(predicate::str::contains("[7:0] f"));
}

#[test]
fn elaborate_inst_name_renames_top() {
    let dir = TempDir::new().unwrap();
    let path = write_unit(&dir, "simple.json", simple_map());

    rdlc()
        .arg("elaborate")
        .arg(&path)
        .args(["--inst-name", "soc"])
        .assert()
        .success()
        .stdout(predicate::str::contains("0x00000000 soc (addrmap"));
}

#[test]
fn elaborate_json_lists_every_node() {
    let dir = TempDir::new().unwrap();
    let path = write_unit(&dir, "simple.json", simple_map());

    let output = rdlc()
        .args(["--output", "json", "elaborate"])
        .arg(&path)
        .output()
        .unwrap();
    assert!(output.status.success());

    let nodes: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let nodes = nodes.as_array().unwrap();
    let paths: Vec<&str> = nodes.iter().map(|n| n["path"].as_str().unwrap()).collect();
    assert_eq!(paths, ["top", "top.regs[]", "top.regs[].f", "top.ctrl", "top.ctrl.f"]);

    let ctrl = &nodes[3];
    assert_eq!(ctrl["absolute_address"], 8);
    assert_eq!(ctrl["kind"], "reg");
    assert_eq!(ctrl["size"], 4);
}

#[test]
fn elaborate_unknown_top_fails() {
    let dir = TempDir::new().unwrap();
    let path = write_unit(&dir, "simple.json", simple_map());

    rdlc()
        .arg("elaborate")
        .arg(&path)
        .args(["--top", "missing"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn elaborate_top_level_param_not_implemented() {
    let dir = TempDir::new().unwrap();
    let path = write_unit(&dir, "simple.json", simple_map());

    rdlc()
        .args(["--output", "json", "elaborate"])
        .arg(&path)
        .args(["--param", "N=4"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("NotImplemented"));
}

#[test]
fn elaborate_field_overlap_reports_json_error() {
    let dir = TempDir::new().unwrap();
    let path = write_unit(&dir, "overlap.json", overlapping_map());

    let output = rdlc()
        .args(["--output", "json", "elaborate"])
        .arg(&path)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());

    let err: serde_json::Value = serde_json::from_slice(&output.stderr).unwrap();
    assert_eq!(err["kind"], "FieldOverlap");
    let diagnostics = err["diagnostics"].as_array().unwrap();
    assert!(diagnostics.iter().any(|d| d["kind"] == "FieldOverlap"));
}

#[test]
fn elaborate_missing_file_fails() {
    rdlc()
        .args(["elaborate", "does/not/exist.json"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("cannot read"));
}

#[test]
fn elaborate_invalid_json_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.json");
    fs::write(&path, "{ not json").unwrap();

    rdlc()
        .arg("elaborate")
        .arg(&path)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("invalid parse tree"));
}

// ──────────────────────────────────────────────
// 3. Check subcommand
// ──────────────────────────────────────────────

#[test]
fn check_valid_design_is_silent() {
    let dir = TempDir::new().unwrap();
    let path = write_unit(&dir, "simple.json", simple_map());

    rdlc()
        .arg("check")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn check_overlap_fails_in_text_mode() {
    let dir = TempDir::new().unwrap();
    let path = write_unit(&dir, "overlap.json", overlapping_map());

    rdlc()
        .arg("check")
        .arg(&path)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("error"));
}

#[test]
fn check_quiet_suppresses_text_errors() {
    let dir = TempDir::new().unwrap();
    let path = write_unit(&dir, "overlap.json", overlapping_map());

    rdlc()
        .args(["--quiet", "check"])
        .arg(&path)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::is_empty());
}

#[test]
fn check_compiles_units_in_order() {
    let dir = TempDir::new().unwrap();
    let types = write_unit(
        &dir,
        "types.json",
        serde_json::json!({
            "file": "types.rdl",
            "items": [
                { "item": "component", "kind": "reg", "name": "r_t", "body": [
                    field("f", serde_json::json!({ "width": { "int": 4 } }))
                ] }
            ]
        }),
    );
    let map = write_unit(
        &dir,
        "map.json",
        serde_json::json!({
            "file": "map.rdl",
            "items": [
                { "item": "component", "kind": "addrmap", "name": "top", "body": [
                    { "item": "instance", "name": "r", "type": { "named": "r_t" } }
                ] }
            ]
        }),
    );

    rdlc().arg("check").arg(&types).arg(&map).assert().success();
    rdlc().arg("check").arg(&map).assert().failure().code(1);
}
