//! CLI-surface checks: argument validation happens before any external
//! tool is touched, so these run anywhere.

use assert_cmd::Command;
use predicates::prelude::*;

fn vbclone() -> Command {
    Command::cargo_bin("vbclone").unwrap()
}

#[test]
fn help_works() {
    vbclone()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Linked-clone VM provisioning"));
}

#[test]
fn clone_requires_its_arguments() {
    vbclone()
        .args(["clone", "--base", "img"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--name"));
}

#[test]
fn nic_index_is_bounded() {
    vbclone()
        .args([
            "clone", "--base", "img", "--name", "vm-1", "--config-nic", "9", "--network", "nat",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("config-nic"));
}

#[test]
fn unknown_network_mode_is_rejected() {
    vbclone()
        .args([
            "clone", "--base", "img", "--name", "vm-1", "--config-nic", "1", "--network",
            "bridge",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("network"));
}

#[test]
fn unknown_stage_name_is_rejected() {
    vbclone()
        .args([
            "clone", "--base", "img", "--name", "vm-1", "--config-nic", "1", "--network", "nat",
            "--stop-after", "boot",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("stop-after"));
}

#[test]
fn keys_requires_one_operation() {
    vbclone().arg("keys").assert().failure();
}

#[test]
fn print_vars_reports_the_resolved_configuration() {
    vbclone()
        .args([
            "clone",
            "--base",
            "img",
            "--name",
            "vm-1",
            "--hostname",
            "worker-a",
            "--config-nic",
            "2",
            "--network",
            "hostonly",
            "--print-vars",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"hostname\": \"worker-a\""))
        .stdout(predicate::str::contains("\"network\": \"hostonly\""));
}

#[test]
fn guest_tool_help_works() {
    Command::cargo_bin("github-ssh-key")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("GitHub SSH key"));
}
