//! CLI Argument Parsing Compatibility Tests
//!
//! These tests verify that command-line arguments are parsed correctly and keep working across
//! versions: global flags, their short forms, subcommand flags and accepted value formats.
//!
//! Tests in this file should NOT be modified to match new behavior unless it's intentional and
//! documented in the changelog.

use assert_cmd::Command;

fn repocli() -> Command {
    let mut cmd = Command::cargo_bin("repocli").unwrap();
    cmd.env_remove("REPOCLI_URL")
        .env_remove("REPOCLI_USERNAME")
        .env_remove("REPOCLI_PASSWORD");
    cmd
}

/// Test that --help output is generated without errors
#[test]
fn test_help_runs() {
    repocli().arg("--help").assert().success();
}

/// Test --version flag works
#[test]
fn test_version_runs() {
    repocli().arg("--version").assert().success();
}

/// Test that every subcommand has its own help
#[test]
fn test_subcommand_help_runs() {
    for subcommand in ["ls", "mkdir", "put", "get", "cp", "mv", "rm"] {
        repocli().args([subcommand, "--help"]).assert().success();
    }
}

/// Test that a subcommand is required
#[test]
fn test_missing_subcommand_fails() {
    repocli()
        .args(["--url", "http://127.0.0.1:9"])
        .assert()
        .failure();
}

/// Test that an unknown subcommand is rejected
#[test]
fn test_unknown_subcommand_fails() {
    repocli()
        .args(["sync", "/a", "/b"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("unrecognized subcommand"));
}

// ============================================================================
// ProgressType Argument Parsing Tests
// ============================================================================

/// Test that the "auto" format is accepted
#[test]
fn test_progress_type_auto_lowercase() {
    repocli()
        .args(["--progress-type", "auto", "--help"])
        .assert()
        .success();
}

/// Test that the "Auto" capitalized alias is accepted
#[test]
fn test_progress_type_auto_capitalized() {
    repocli()
        .args(["--progress-type", "Auto", "--help"])
        .assert()
        .success();
}

/// Test that the "ProgressBar" PascalCase format is accepted
#[test]
fn test_progress_type_progress_bar_pascal_case() {
    repocli()
        .args(["--progress-type", "ProgressBar", "--help"])
        .assert()
        .success();
}

/// Test that the "progress-bar" kebab-case format is accepted
#[test]
fn test_progress_type_progress_bar_kebab_case() {
    repocli()
        .args(["--progress-type", "progress-bar", "--help"])
        .assert()
        .success();
}

/// Test that the "TextUpdates" PascalCase format is accepted
#[test]
fn test_progress_type_text_updates_pascal_case() {
    repocli()
        .args(["--progress-type", "TextUpdates", "--help"])
        .assert()
        .success();
}

/// Test that the "text-updates" kebab-case format is accepted
#[test]
fn test_progress_type_text_updates_kebab_case() {
    repocli()
        .args(["--progress-type", "text-updates", "--help"])
        .assert()
        .success();
}

/// Test that invalid progress type values are rejected with appropriate error
#[test]
fn test_progress_type_invalid_value() {
    repocli()
        .args(["--progress-type", "invalid-value", "--help"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("invalid value 'invalid-value'"));
}

/// Test that --progress-delay accepts a human readable duration
#[test]
fn test_progress_delay_duration() {
    repocli()
        .args(["--progress-delay", "500ms", "--help"])
        .assert()
        .success();
}

// ============================================================================
// Global Flag Tests
// ============================================================================

/// Test repository connection flags
#[test]
fn test_repository_flags() {
    repocli()
        .args([
            "--url",
            "https://webdav.data.example.org",
            "--username",
            "alice",
            "--password",
            "secret",
            "--connect-timeout",
            "5s",
            "--help",
        ])
        .assert()
        .success();
}

/// Test short forms of the repository flags
#[test]
fn test_repository_short_flags() {
    repocli()
        .args(["-u", "https://webdav.data.example.org", "-C", "/project", "--help"])
        .assert()
        .success();
}

/// Test worker and queue settings
#[test]
fn test_nthreads_and_queue_depth() {
    repocli()
        .args(["-n", "8", "--queue-depth", "32", "--help"])
        .assert()
        .success();
    repocli()
        .args(["--nthreads", "2", "--help"])
        .assert()
        .success();
}

/// Test that a non numeric worker count is rejected
#[test]
fn test_nthreads_not_a_number() {
    repocli()
        .args(["-n", "many", "--help"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("invalid value 'many'"));
}

/// Test --silent and its short form
#[test]
fn test_silent_flag() {
    repocli().args(["--silent", "--help"]).assert().success();
    repocli().args(["-s", "--help"]).assert().success();
}

/// Test --quiet and its short form
#[test]
fn test_quiet_flag() {
    repocli().args(["--quiet", "--help"]).assert().success();
    repocli().args(["-q", "--help"]).assert().success();
}

/// Test verbosity levels
#[test]
fn test_verbose_levels() {
    for flags in [["-v"], ["-vv"], ["-vvv"], ["--verbose"]] {
        repocli().args(flags).arg("--help").assert().success();
    }
}

/// Test runtime and debug settings
#[test]
fn test_advanced_settings() {
    repocli()
        .args([
            "--max-workers",
            "4",
            "--max-blocking-threads",
            "16",
            "--debug-log-file",
            "/tmp/repocli-debug.log",
            "--help",
        ])
        .assert()
        .success();
}

/// Test that global flags are accepted after the subcommand
#[test]
fn test_global_flags_after_subcommand() {
    repocli()
        .args(["put", "-s", "-n", "2", "--url", "http://127.0.0.1:9", "--help"])
        .assert()
        .success();
}

// ============================================================================
// Subcommand Flag Tests
// ============================================================================

/// Test --overwrite and -f on every transfer subcommand
#[test]
fn test_overwrite_flag() {
    for subcommand in ["put", "get", "cp", "mv"] {
        repocli()
            .args([subcommand, "--overwrite", "--help"])
            .assert()
            .success();
        repocli()
            .args([subcommand, "-f", "--help"])
            .assert()
            .success();
    }
}

/// Test the error file option of put and get
#[test]
fn test_error_file_flag() {
    for subcommand in ["put", "get"] {
        repocli()
            .args([subcommand, "-e", "/tmp/errors.log", "--help"])
            .assert()
            .success();
        repocli()
            .args([subcommand, "--error", "/tmp/errors.log", "--help"])
            .assert()
            .success();
    }
}

/// Test that copy does not take an error file
#[test]
fn test_error_file_not_on_copy() {
    repocli()
        .args(["cp", "-e", "/tmp/errors.log", "/a", "/b"])
        .assert()
        .failure();
}

/// Test recursive removal flag
#[test]
fn test_recursive_flag() {
    repocli().args(["rm", "-r", "--help"]).assert().success();
    repocli()
        .args(["rm", "--recursive", "--help"])
        .assert()
        .success();
}

/// Test long listing flag
#[test]
fn test_long_listing_flag() {
    repocli().args(["ls", "-l", "--help"]).assert().success();
}

/// Test that transfers need both a source and a destination
#[test]
fn test_transfer_needs_two_paths() {
    repocli()
        .args(["--url", "http://127.0.0.1:9", "put", "/a"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("required"));
}
