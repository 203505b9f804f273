//! Tests for the offline `herald audience` subcommands.

use std::path::Path;

use assert_cmd::Command;

fn herald(workdir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("herald").expect("binary should build");
    cmd.current_dir(workdir)
        .env_remove("HERALD_CONFIG_PATH")
        .env_remove("HERALD_AUDIENCE_FILE")
        .env_remove("RUST_LOG");
    cmd
}

fn stdout_of(cmd: &mut Command) -> String {
    let output = cmd.output().expect("binary should run");
    assert!(
        output.status.success(),
        "herald failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn count_and_list_read_the_audience_file() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let file = tmp.path().join("users.txt");
    std::fs::write(&file, "30\n10\n20\n").expect("seed audience");

    let count = stdout_of(herald(tmp.path()).args(["audience", "--file"]).arg(&file).arg("count"));
    let list = stdout_of(herald(tmp.path()).args(["audience", "--file"]).arg(&file).arg("list"));

    assert_eq!(count.trim(), "3");
    assert_eq!(list, "10\n20\n30\n");
}

#[test]
fn missing_audience_file_counts_zero() {
    let tmp = tempfile::tempdir().expect("should create temp dir");

    let count = stdout_of(
        herald(tmp.path())
            .args(["audience", "--file"])
            .arg(tmp.path().join("absent.txt"))
            .arg("count"),
    );

    assert_eq!(count.trim(), "0");
}

#[test]
fn clear_empties_the_file() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let file = tmp.path().join("users.txt");
    std::fs::write(&file, "1\n2\n").expect("seed audience");

    let out = stdout_of(herald(tmp.path()).args(["audience", "--file"]).arg(&file).arg("clear"));

    assert!(out.starts_with("Audience cleared"));
    assert_eq!(std::fs::read_to_string(&file).expect("file exists"), "");
}

#[test]
fn default_path_comes_from_configuration() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    std::fs::write(tmp.path().join("processed_users.txt"), "5\n").expect("seed audience");

    let list = stdout_of(herald(tmp.path()).args(["audience", "list"]));

    assert_eq!(list, "5\n");
}

#[test]
fn corrupt_audience_file_fails_list() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let file = tmp.path().join("users.txt");
    std::fs::write(&file, "not-a-number\n").expect("seed audience");

    let output = herald(tmp.path())
        .args(["audience", "--file"])
        .arg(&file)
        .arg("list")
        .output()
        .expect("binary should run");

    assert!(!output.status.success());
}

#[test]
fn run_without_token_refuses_to_start() {
    let tmp = tempfile::tempdir().expect("should create temp dir");

    let output = herald(tmp.path())
        .env_remove("HERALD_BOT_TOKEN")
        .arg("run")
        .output()
        .expect("binary should run");

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("bot token"));
}
