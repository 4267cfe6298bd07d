//! CLI contract tests for `check`.

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;

const VALID: &str = r#"
[telegram]
channels = ["@technews"]

[whatsapp]
phone_number_id = "1098765"
recipient = "15551234567"

[[filters]]
name = "ads"
prompt = "Skip advertisements."
"#;

fn write_config(dir: &Path, contents: &str) -> PathBuf {
    let path = dir.join("config.toml");
    if let Err(err) = fs::write(&path, contents) {
        panic!("should write config: {err}");
    }
    path
}

fn relay() -> Command {
    match Command::cargo_bin("channel-relay") {
        Ok(cmd) => cmd,
        Err(err) => panic!("binary should build: {err}"),
    }
}

#[test]
fn check_accepts_valid_config() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let path = write_config(tmp.path(), VALID);

    let output = relay()
        .arg("check")
        .arg("--config")
        .arg(&path)
        .output()
        .expect("should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Channels: @technews"));
    assert!(stdout.contains("Filters: ads"));
    assert!(stdout.contains("Filtering: inactive"));
    assert!(stdout.trim_end().ends_with("OK"));
}

#[test]
fn check_rejects_invalid_config() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let path = write_config(
        tmp.path(),
        &VALID.replace("Skip advertisements.", "   "),
    );

    let output = relay()
        .arg("check")
        .arg("--config")
        .arg(&path)
        .output()
        .expect("should run");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("empty prompt"), "stderr: {stderr}");
}

#[test]
fn check_reports_missing_config() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let missing = tmp.path().join("absent.toml");

    relay()
        .arg("check")
        .arg("--config")
        .arg(&missing)
        .assert()
        .failure();
}

#[test]
fn config_path_can_come_from_the_environment() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let path = write_config(tmp.path(), VALID);

    relay()
        .arg("check")
        .env("CHANNEL_RELAY_CONFIG", &path)
        .assert()
        .success();
}

#[test]
fn unknown_subcommand_fails() {
    relay().arg("status").assert().failure();
}
