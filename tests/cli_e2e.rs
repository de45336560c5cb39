//! End-to-end CLI tests for the cratewalker binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// With no links and no input file, the run has nothing to do and exits 0.
#[test]
fn test_binary_with_no_input_exits_zero() {
    let app_storage = TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("cratewalker").unwrap();
    cmd.arg("--app-storage")
        .arg(app_storage.path())
        .assert()
        .success();
}

/// --help displays usage information and exits with code 0.
#[test]
fn test_binary_help_displays_usage() {
    let mut cmd = Command::cargo_bin("cratewalker").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("media scraper"));
}

/// --version displays version and exits with code 0.
#[test]
fn test_binary_version_displays_version() {
    let mut cmd = Command::cargo_bin("cratewalker").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("cratewalker"));
}

/// An unrecognized flag causes a non-zero exit and a clap usage error.
#[test]
fn test_binary_invalid_flag_returns_error() {
    let mut cmd = Command::cargo_bin("cratewalker").unwrap();
    cmd.arg("--not-a-real-flag")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

/// --retry-failed and --retry-all are mutually exclusive at the CLI layer.
#[test]
fn test_binary_conflicting_retry_modes_rejected() {
    let mut cmd = Command::cargo_bin("cratewalker").unwrap();
    cmd.arg("--retry-failed")
        .arg("--retry-all")
        .assert()
        .failure();
}

/// -v (verbose) is accepted and still exits 0 with nothing to do.
#[test]
fn test_binary_verbose_flag_accepted() {
    let app_storage = TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("cratewalker").unwrap();
    cmd.arg("-v")
        .arg("--app-storage")
        .arg(app_storage.path())
        .assert()
        .success();
}

/// -q (quiet) is accepted and still exits 0 with nothing to do.
#[test]
fn test_binary_quiet_flag_accepted() {
    let app_storage = TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("cratewalker").unwrap();
    cmd.arg("-q")
        .arg("--app-storage")
        .arg(app_storage.path())
        .assert()
        .success();
}

/// A malformed --completed-before date is rejected before any component
/// is constructed.
#[test]
fn test_binary_rejects_malformed_date_bound() {
    let app_storage = TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("cratewalker").unwrap();
    cmd.arg("--links")
        .arg("https://example.test/a.jpg")
        .arg("--completed-before")
        .arg("not-a-date")
        .arg("--app-storage")
        .arg(app_storage.path())
        .assert()
        .failure();
}

/// `--app-storage` creates the expected Cache/Cookies/Configs/Logs layout
/// even on a no-op run.
#[test]
fn test_binary_creates_persisted_state_layout() {
    let app_storage = TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("cratewalker").unwrap();
    cmd.arg("--app-storage")
        .arg(app_storage.path())
        .assert()
        .success();

    assert!(app_storage.path().join("Cache").is_dir());
    assert!(app_storage.path().join("Cookies").is_dir());
    assert!(app_storage.path().join("Configs").is_dir());
    assert!(app_storage.path().join("Logs").is_dir());
    assert!(app_storage.path().join("Cache/cyberdrop.db").is_file());
    assert!(app_storage.path().join("Cache/request_cache.db").is_file());
}
