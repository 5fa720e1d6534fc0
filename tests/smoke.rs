//! Smoke tests -- verify the binary runs and key subcommands load.

use assert_cmd::Command;

#[test]
fn test_cli_help() {
    Command::cargo_bin("apipulse")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains(
            "Self-hosted API test runner with recurring schedules",
        ));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("apipulse")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("apipulse"));
}

#[test]
fn test_serve_subcommand_exists() {
    Command::cargo_bin("apipulse")
        .unwrap()
        .args(["serve", "--help"])
        .assert()
        .success();
}

#[test]
fn test_schedule_subcommands_exist() {
    for sub in ["add", "list", "remove", "enable", "disable", "run-now", "next-runs"] {
        Command::cargo_bin("apipulse")
            .unwrap()
            .args(["schedule", sub, "--help"])
            .assert()
            .success();
    }
}

#[test]
fn test_collection_subcommands_exist() {
    for sub in ["add", "add-test", "list", "run"] {
        Command::cargo_bin("apipulse")
            .unwrap()
            .args(["collection", sub, "--help"])
            .assert()
            .success();
    }
}

#[test]
fn test_run_list_subcommand_exists() {
    Command::cargo_bin("apipulse")
        .unwrap()
        .args(["run", "list", "--help"])
        .assert()
        .success();
}
