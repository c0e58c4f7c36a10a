use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn prints_version() {
    Command::cargo_bin("board-tui")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn prints_help() {
    Command::cargo_bin("board-tui")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("board-tui"))
        .stdout(predicate::str::contains("--server"));
}

#[test]
fn rejects_unknown_arguments() {
    Command::cargo_bin("board-tui")
        .unwrap()
        .arg("--frobnicate")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unknown argument --frobnicate"));
}

#[test]
fn server_flag_needs_a_value() {
    Command::cargo_bin("board-tui")
        .unwrap()
        .arg("--server")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--server needs a url"));
}
