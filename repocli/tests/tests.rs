//! Exit status and error reporting of the binary, without a repository server.
//!
//! Port 9 (discard) on the loopback interface is used as a repository that refuses connections.

use assert_cmd::Command;
use predicates::prelude::*;

const UNREACHABLE: &str = "http://127.0.0.1:9/repo";

fn repocli() -> Command {
    let mut cmd = Command::cargo_bin("repocli").unwrap();
    cmd.env_remove("REPOCLI_URL")
        .env_remove("REPOCLI_USERNAME")
        .env_remove("REPOCLI_PASSWORD")
        .env_remove("REPOCLI_LOG");
    cmd
}

#[test]
fn missing_url_is_reported() {
    repocli()
        .args(["ls"])
        .assert()
        .code(1)
        .stderr(predicates::str::contains("no repository url given"));
}

#[test]
fn url_from_environment_is_used() {
    repocli()
        .env("REPOCLI_URL", "ftp://repo.example.org")
        .args(["ls"])
        .assert()
        .code(1)
        .stderr(predicates::str::contains("http or https"));
}

#[test]
fn password_without_username_is_rejected() {
    repocli()
        .args(["--url", UNREACHABLE, "--password", "secret", "ls"])
        .assert()
        .code(1)
        .stderr(predicates::str::contains("requires a username"));
}

#[test]
fn invalid_connect_timeout_is_rejected() {
    repocli()
        .args(["--url", UNREACHABLE, "--connect-timeout", "soon", "ls"])
        .assert()
        .code(1)
        .stderr(predicates::str::contains("invalid connect timeout"));
}

#[test]
fn missing_local_source_is_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    let missing = tmp.path().join("nothing-here");
    repocli()
        .args(["--url", UNREACHABLE, "put"])
        .arg(&missing)
        .arg("/project")
        .assert()
        .code(1)
        .stderr(predicates::str::contains("no such file or directory"))
        .stderr(predicates::str::contains("no. succeeded: 0, no. failed: 0"));
}

#[test]
fn silent_fatal_error_omits_summary() {
    let tmp = tempfile::tempdir().unwrap();
    let missing = tmp.path().join("nothing-here");
    repocli()
        .args(["--url", UNREACHABLE, "-s", "put"])
        .arg(&missing)
        .arg("/project")
        .assert()
        .code(1)
        .stderr(predicates::str::contains("no such file or directory"))
        .stderr(predicates::str::contains("no. succeeded").not());
}

#[test]
fn quiet_fatal_error_prints_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let missing = tmp.path().join("nothing-here");
    repocli()
        .args(["--url", UNREACHABLE, "-q", "-s", "put"])
        .arg(&missing)
        .arg("/project")
        .assert()
        .code(1)
        .stderr(predicates::str::is_empty());
}

#[test]
fn unreachable_repository_is_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("a.txt");
    std::fs::write(&source, "0123456789").unwrap();
    repocli()
        .args(["--url", UNREACHABLE, "--connect-timeout", "2s", "-s", "put"])
        .arg(&source)
        .arg("/project")
        .assert()
        .code(1);
    repocli()
        .args(["--url", UNREACHABLE, "--connect-timeout", "2s", "ls", "-l"])
        .assert()
        .code(1);
}

#[test]
fn invalid_worker_count_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    repocli()
        .args(["--url", UNREACHABLE, "-n", "0", "put"])
        .arg(tmp.path())
        .arg("/project")
        .assert()
        .code(1);
}

#[test]
fn unwritable_error_file_is_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    repocli()
        .args(["--url", UNREACHABLE, "put", "-e"])
        .arg(tmp.path().join("missing").join("errors.log"))
        .arg(tmp.path())
        .arg("/project")
        .assert()
        .code(1)
        .stderr(predicates::str::contains("cannot open file"));
}
