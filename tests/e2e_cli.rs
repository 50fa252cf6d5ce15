//! CLI end-to-end tests
//!
//! Tests for the dashline command-line interface.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

/// Get a command for the dashline binary
#[allow(deprecated)]
fn dashline_cmd() -> Command {
    Command::cargo_bin("dashline").unwrap()
}

/// A short presentation that plays out in well under a second.
fn write_fast_config(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("dashline.toml");
    fs::write(
        &path,
        r#"
[buffer]
back_buffer = 10.0

[buffer.video]
prefetch_threshold = 6.0
append_enable_threshold = 4.0

[buffer.audio]
prefetch_threshold = 6.0
append_enable_threshold = 4.0

[simulation]
period_durations = [4.0, 4.0]
fetch_latency_ms = 5
append_latency_ms = 2
playback_rate = 20.0
"#,
    )
    .unwrap();
    path
}

#[test]
fn test_cli_no_args_shows_help() {
    let mut cmd = dashline_cmd();
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_help_flag() {
    let mut cmd = dashline_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("dashline"))
        .stdout(predicate::str::contains("simulate"));
}

#[test]
fn test_cli_version_command() {
    let mut cmd = dashline_cmd();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("dashline "));
}

#[test]
fn test_cli_validate_defaults() {
    let mut cmd = dashline_cmd();
    cmd.arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("using defaults"))
        .stdout(predicate::str::contains("Tolerance: 0.15s"));
}

#[test]
fn test_cli_validate_config_file() {
    let dir = tempdir().unwrap();
    let path = write_fast_config(dir.path());

    let mut cmd = dashline_cmd();
    cmd.arg("validate")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"))
        .stdout(predicate::str::contains("2 periods, 8s total"));
}

#[test]
fn test_cli_validate_rejects_bad_config() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    fs::write(&path, "[buffer]\ntolerance = -1.0\n").unwrap();

    let mut cmd = dashline_cmd();
    cmd.arg("validate")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("tolerance must be positive"));
}

#[test]
fn test_cli_simulate_json_report() {
    let dir = tempdir().unwrap();
    let path = write_fast_config(dir.path());

    let mut cmd = dashline_cmd();
    let output = cmd
        .arg("--config")
        .arg(&path)
        .args(["simulate", "--json", "--timeout", "30"])
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["snapshot"]["phase"], "ended");
    assert_eq!(report["timed_out"], false);
    assert!(report["events"]["ended"].as_u64().unwrap() >= 1);
}

#[test]
fn test_cli_simulate_rejects_bad_rate() {
    let mut cmd = dashline_cmd();
    cmd.args(["simulate", "--rate", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Playback rate must be positive"));
}
