//! CLI integration tests

use std::process::Command;

fn fedtel(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_fedtel"))
        .args(args)
        .output()
        .expect("Failed to execute command")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = fedtel(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(
        stdout.contains("federated telemetry pipeline"),
        "Should show app description"
    );
    assert!(stdout.contains("status"), "Should show status command");
    assert!(stdout.contains("sinks"), "Should show sinks command");
    assert!(stdout.contains("load"), "Should show load command");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = fedtel(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("fedtel"), "Should show binary name");
}

/// Test load subcommand help
#[test]
fn test_load_help() {
    let output = fedtel(&["load", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("--requests"));
    assert!(stdout.contains("--concurrency"));
    assert!(stdout.contains("--records-per-request"));
    assert!(stdout.contains("--cluster-hint"));
}

/// Test that an unreachable target fails with a non-zero exit
#[test]
fn test_status_against_unreachable_target_fails() {
    let output = fedtel(&["status", "--target", "http://127.0.0.1:1"]);

    assert!(!output.status.success());
    assert!(!String::from_utf8_lossy(&output.stderr).is_empty());
}

/// Test that invalid formats are rejected by argument parsing
#[test]
fn test_invalid_format_rejected() {
    let output = fedtel(&["--format", "yaml", "status"]);

    assert!(!output.status.success());
}
