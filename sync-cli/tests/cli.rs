//! Drive the resync binary end to end.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn resync(data_dir: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("resync").unwrap();
    cmd.arg("--data-dir").arg(data_dir).env("RUST_LOG", "warn");
    cmd
}

#[test]
fn enqueue_sync_status() {
    let dir = tempdir().unwrap();

    resync(dir.path())
        .args([
            "enqueue",
            "tasks",
            "create",
            r#"{"id": "t1", "title": "Ship"}"#,
            "--priority",
            "high",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Queued create on tasks"));

    resync(dir.path())
        .arg("sync")
        .assert()
        .success()
        .stdout(predicate::str::contains("Uploaded:           1"));

    resync(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Pending:   0"));
}

#[test]
fn unknown_store_fails() {
    let dir = tempdir().unwrap();

    resync(dir.path())
        .args(["enqueue", "notes", "create", r#"{"id": "n1"}"#])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to enqueue mutation"));
}

#[test]
fn resolve_requires_a_decision() {
    let dir = tempdir().unwrap();

    resync(dir.path())
        .args(["resolve", "1b4e28ba-2fa1-11d2-883f-0016d3cca427"])
        .assert()
        .failure();
}

#[test]
fn offline_sync_is_skipped() {
    let dir = tempdir().unwrap();

    resync(dir.path())
        .env("RUST_LOG", "info")
        .args(["sync", "--offline"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cycle skipped: Offline"))
        .stderr(predicate::str::contains("remote marked unreachable"));
}
