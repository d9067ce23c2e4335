//! Smoke tests for the operator CLI's argument surface.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_lists_all_subcommands() {
    Command::cargo_bin("memprof-cli")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("subscribe"))
        .stdout(predicate::str::contains("publish"))
        .stdout(predicate::str::contains("tail"));
}

#[test]
fn publish_without_required_topic_is_rejected() {
    Command::cargo_bin("memprof-cli")
        .unwrap()
        .args(["publish", "--payload", "hello"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--topic"));
}

#[test]
fn tail_without_addr_uses_the_documented_default() {
    // No broker/viewer is listening on the default loopback port in this
    // test environment, so the command must fail fast on connect rather
    // than hang or panic.
    Command::cargo_bin("memprof-cli")
        .unwrap()
        .arg("tail")
        .assert()
        .failure();
}
