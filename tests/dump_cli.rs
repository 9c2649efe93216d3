//! Integration tests for the `logbase-dump` CLI binary.

use assert_cmd::Command;
use logbase::{Logbase, Value};
use predicates::prelude::*;
use tempfile::tempdir;

fn seeded_logbase(dir: &std::path::Path) {
    let logbase = Logbase::open(dir).unwrap();
    logbase.put(Value::String("a".into()), Value::String("alpha".into())).unwrap();
    logbase.put(Value::String("b".into()), Value::String("bravo".into())).unwrap();
    logbase.save().unwrap();
}

#[test]
fn dump_master_lists_every_key() {
    let dir = tempdir().unwrap();
    seeded_logbase(dir.path());

    Command::cargo_bin("logbase-dump")
        .unwrap()
        .args(["-p", dir.path().to_str().unwrap(), "-m"])
        .assert()
        .success()
        .stdout(predicate::str::contains("String(\"a\")"))
        .stdout(predicate::str::contains("String(\"b\")"));
}

#[test]
fn dump_log_lists_every_record_in_append_order() {
    let dir = tempdir().unwrap();
    seeded_logbase(dir.path());

    Command::cargo_bin("logbase-dump")
        .unwrap()
        .args(["-p", dir.path().to_str().unwrap(), "-l", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("key="));
}

#[test]
fn path_blocked_by_a_plain_file_exits_nonzero() {
    let dir = tempdir().unwrap();
    let blocked = dir.path().join("not_a_directory");
    std::fs::write(&blocked, b"not a logbase").unwrap();

    Command::cargo_bin("logbase-dump")
        .unwrap()
        .args(["-p", blocked.to_str().unwrap(), "-m"])
        .assert()
        .failure()
        .code(1);
}
