//! CLI integration tests for all implemented subcommands.
//!
//! Uses `assert_cmd` to spawn the `signflow` binary and verify
//! exit codes, stdout content, and stderr content.
//!
//! All tests set `current_dir` to the workspace root so that relative
//! paths to test fixtures resolve correctly.

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const FIXTURES: &str = "crates/cli/tests/fixtures";

/// Locate the workspace root by walking up from CARGO_MANIFEST_DIR.
fn workspace_root() -> PathBuf {
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    // crates/cli -> workspace root is two levels up
    manifest_dir
        .parent()
        .and_then(|p| p.parent())
        .expect("workspace root")
        .to_path_buf()
}

/// Helper: create a Command for the `signflow` binary, rooted at workspace.
fn signflow() -> Command {
    let mut cmd = cargo_bin_cmd!("signflow");
    cmd.current_dir(workspace_root());
    cmd.env_remove("RUST_LOG");
    cmd
}

fn fixture(name: &str) -> String {
    format!("{}/{}", FIXTURES, name)
}

/// Run `signflow <args>` expecting success and parse stdout as JSON.
fn run_json(args: &[&str]) -> serde_json::Value {
    let out = signflow().args(args).assert().success().get_output().clone();
    serde_json::from_slice(&out.stdout).expect("stdout is JSON")
}

/// Create the sequential fixture flow and write it into `dir`.
fn created_flow(dir: &TempDir) -> (PathBuf, serde_json::Value) {
    let flow = run_json(&["create-flow", &fixture("new_flow_sequential.json")]);
    let path = dir.path().join("flow.json");
    fs::write(&path, serde_json::to_string_pretty(&flow).unwrap()).unwrap();
    (path, flow)
}

fn write(dir: &TempDir, name: &str, value: &serde_json::Value) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, serde_json::to_string_pretty(value).unwrap()).unwrap();
    path
}

// ──────────────────────────────────────────────
// 1. Help and version
// ──────────────────────────────────────────────

#[test]
fn help_exits_0_with_description() {
    signflow()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Document approval flows and qualified signatures",
        ));
}

#[test]
fn version_exits_0() {
    signflow()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("signflow"));
}

// ──────────────────────────────────────────────
// 2. Hash subcommand
// ──────────────────────────────────────────────

#[test]
fn hash_prints_sha256_hex() {
    signflow()
        .args(["hash", &fixture("document.txt")])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad",
        ));
}

#[test]
fn hash_json_names_algorithm() {
    let out = run_json(&["hash", &fixture("document.txt"), "--output", "json"]);
    assert_eq!(out["algorithm"], "sha256");
}

#[test]
fn hash_verify_mismatch_exits_1() {
    signflow()
        .args([
            "hash",
            &fixture("document.txt"),
            "--verify",
            "0000000000000000000000000000000000000000000000000000000000000000",
        ])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("hash mismatch"));
}

#[test]
fn hash_verify_match_exits_0() {
    signflow()
        .args([
            "hash",
            &fixture("document.txt"),
            "--verify",
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("match"));
}

#[test]
fn hash_nonexistent_file_exits_1() {
    signflow()
        .args(["hash", "nonexistent_document_xyz.txt"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("error reading file"));
}

// ──────────────────────────────────────────────
// 3. Create-flow and validate
// ──────────────────────────────────────────────

#[test]
fn create_flow_orders_steps_and_starts_pending() {
    let flow = run_json(&["create-flow", &fixture("new_flow_sequential.json")]);
    assert_eq!(flow["status"], "pending");
    assert_eq!(flow["current_step_number"], 1);
    assert_eq!(flow["steps"][0]["step_number"], 1);
    assert_eq!(flow["steps"][0]["signatures"].as_array().unwrap().len(), 2);
    assert_eq!(flow["steps"][1]["step_number"], 2);
}

#[test]
fn create_flow_invalid_exits_1() {
    signflow()
        .args(["create-flow", &fixture("new_flow_invalid.json")])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("invalid flow"))
        .stderr(predicate::str::contains("document id is required"));
}

#[test]
fn validate_created_flow_exits_0() {
    let tmp = TempDir::new().unwrap();
    let (path, _) = created_flow(&tmp);
    signflow()
        .args(["validate", path.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("valid"));
}

#[test]
fn validate_broken_flow_lists_errors() {
    let tmp = TempDir::new().unwrap();
    let (_, mut flow) = created_flow(&tmp);
    flow["steps"][0]["required_approvals"] = serde_json::json!(7);
    let path = write(&tmp, "broken.json", &flow);

    signflow()
        .args(["validate", path.to_str().unwrap()])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("invalid flow"))
        .stderr(predicate::str::contains("required approvals (7)"));
}

#[test]
fn validate_invalid_json_exits_1() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("bad.json");
    fs::write(&path, r#"{"not": "a flow"}"#).unwrap();

    signflow()
        .args(["validate", path.to_str().unwrap()])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("error parsing JSON"));
}

// ──────────────────────────────────────────────
// 4. Approve / reject / cancel
// ──────────────────────────────────────────────

#[test]
fn approve_by_step_number_advances_sequential_flow() {
    let tmp = TempDir::new().unwrap();
    let (path, _) = created_flow(&tmp);

    let flow = run_json(&[
        "approve",
        path.to_str().unwrap(),
        "--step",
        "1",
        "--approver",
        "rev-2",
        "--name",
        "Second Reviewer",
        "--comments",
        "ok",
    ]);
    assert_eq!(flow["current_step_number"], 2);
    assert_eq!(flow["steps"][0]["status"], "approved");
    assert_eq!(flow["steps"][0]["signatures"][1]["signer_name"], "Second Reviewer");

    let path = write(&tmp, "step2.json", &flow);
    let done = run_json(&[
        "approve",
        path.to_str().unwrap(),
        "--step",
        "2",
        "--approver",
        "dir-1",
    ]);
    assert_eq!(done["status"], "approved");
    assert!(done["completed_at"].is_string());
}

#[test]
fn approve_unknown_approver_is_ignored_by_default() {
    let tmp = TempDir::new().unwrap();
    let (path, flow) = created_flow(&tmp);
    let same = run_json(&[
        "approve",
        path.to_str().unwrap(),
        "--step",
        "1",
        "--approver",
        "intruder",
    ]);
    assert_eq!(same, flow);
}

#[test]
fn approve_unknown_approver_fails_in_strict_mode() {
    let tmp = TempDir::new().unwrap();
    let (path, _) = created_flow(&tmp);
    signflow()
        .args([
            "--config",
            &fixture("strict.toml"),
            "approve",
            path.to_str().unwrap(),
            "--step",
            "1",
            "--approver",
            "intruder",
        ])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("not an approver"));
}

#[test]
fn strict_errors_are_json_with_json_output() {
    let tmp = TempDir::new().unwrap();
    let (path, _) = created_flow(&tmp);
    let out = signflow()
        .args([
            "--config",
            &fixture("strict.toml"),
            "--output",
            "json",
            "approve",
            path.to_str().unwrap(),
            "--step",
            "no-such-step",
            "--approver",
            "rev-1",
        ])
        .assert()
        .failure()
        .code(1)
        .get_output()
        .clone();
    let err: serde_json::Value = serde_json::from_slice(&out.stderr).unwrap();
    assert!(err["error"].as_str().unwrap().contains("not found"));
}

#[test]
fn reject_closes_flow() {
    let tmp = TempDir::new().unwrap();
    let (path, _) = created_flow(&tmp);
    let flow = run_json(&[
        "reject",
        path.to_str().unwrap(),
        "--step",
        "1",
        "--approver",
        "rev-1",
        "--reason",
        "clause 4 is wrong",
    ]);
    assert_eq!(flow["status"], "rejected");
    assert_eq!(flow["steps"][0]["status"], "rejected");
    assert_eq!(
        flow["steps"][0]["signatures"][0]["rejection_reason"],
        "clause 4 is wrong"
    );
}

#[test]
fn cancel_records_reason() {
    let tmp = TempDir::new().unwrap();
    let (path, _) = created_flow(&tmp);
    let flow = run_json(&[
        "cancel",
        path.to_str().unwrap(),
        "--user",
        "pm-1",
        "--reason",
        "superseded",
    ]);
    assert_eq!(flow["status"], "cancelled");
    assert_eq!(flow["cancellation"]["reason"], "superseded");
    assert_eq!(flow["steps"][0]["status"], "pending");
}

// ──────────────────────────────────────────────
// 5. Progress
// ──────────────────────────────────────────────

#[test]
fn progress_text_and_json() {
    let tmp = TempDir::new().unwrap();
    let (path, _) = created_flow(&tmp);
    let flow = run_json(&[
        "approve",
        path.to_str().unwrap(),
        "--step",
        "1",
        "--approver",
        "rev-1",
    ]);
    let path = write(&tmp, "half.json", &flow);

    signflow()
        .args(["progress", path.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("1/2 steps (50%)"))
        .stdout(predicate::str::contains("1/3 signatures"));

    let p = run_json(&["progress", path.to_str().unwrap(), "--output", "json"]);
    assert_eq!(p["percentage"], 50);
    assert_eq!(p["completed_signatures"], 1);
}

// ──────────────────────────────────────────────
// 6. Request status
// ──────────────────────────────────────────────

#[test]
fn request_status_before_deadline() {
    signflow()
        .args([
            "request-status",
            &fixture("request_pending.json"),
            "--at",
            "2026-07-01T12:00:00Z",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("req-1: awaiting-otp, 6d 22h left"));
}

#[test]
fn request_status_after_deadline_is_expired() {
    let out = run_json(&[
        "request-status",
        &fixture("request_pending.json"),
        "--at",
        "2026-07-08T10:00:01Z",
        "--output",
        "json",
    ]);
    assert_eq!(out["effective_status"], "expired");
    assert_eq!(out["stored_status"], "awaiting-otp");
    assert_eq!(out["time_remaining"], "expired");
}

#[test]
fn request_status_bad_timestamp_exits_1() {
    signflow()
        .args([
            "request-status",
            &fixture("request_pending.json"),
            "--at",
            "yesterday",
        ])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("invalid --at timestamp"));
}

// ──────────────────────────────────────────────
// 7. Configuration
// ──────────────────────────────────────────────

#[test]
fn missing_config_file_exits_1() {
    signflow()
        .args(["--config", "nonexistent.toml", "hash", &fixture("document.txt")])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("error reading config"));
}

#[test]
fn malformed_config_file_exits_1() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("signflow.toml");
    fs::write(&path, "[flow]\nstrict = \"sometimes\"\n").unwrap();
    signflow()
        .args([
            "--config",
            path.to_str().unwrap(),
            "hash",
            &fixture("document.txt"),
        ])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("error parsing config"));
}

#[test]
fn out_of_range_lifetime_in_config_exits_1() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("signflow.toml");
    fs::write(&path, "[signature]\nrequest_ttl_days = 9223372036854775807\n").unwrap();
    signflow()
        .args([
            "--config",
            path.to_str().unwrap(),
            "hash",
            &fixture("document.txt"),
        ])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("invalid config"))
        .stderr(predicate::str::contains("signature.request_ttl_days"));
}
