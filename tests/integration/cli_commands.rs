#![allow(missing_docs)]

use assert_cmd::cargo::cargo_bin_cmd;
use sombra_ids::{IdType, RecordFormat};
use tempfile::TempDir;

fn stdout_of(args: &[&str]) -> String {
    let output = cargo_bin_cmd!("sombra-ids")
        .args(args)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    String::from_utf8(output).expect("utf8 stdout")
}

#[test]
fn create_info_and_rebuild_round_trip() {
    let dir = TempDir::new().expect("tempdir");
    let db = dir.path().join("graph");
    let db_arg = db.to_str().expect("utf8 path");

    let created = stdout_of(&["create", db_arg]);
    assert!(created.contains("created 13 stores"));

    let info = stdout_of(&["info", db_arg]);
    assert!(info.contains("string_block"));
    assert!(info.contains("clean"));

    let node_id_file = db.join(RecordFormat::of(IdType::Node).id_file_name());
    std::fs::remove_file(&node_id_file).expect("remove id file");
    let info = stdout_of(&["info", db_arg]);
    assert!(info.contains("missing"));

    let rebuilt = stdout_of(&["rebuild", "--fast", db_arg]);
    assert!(rebuilt.contains("node"));
    assert!(node_id_file.exists());
}

#[test]
fn dump_and_high_id_read_a_single_file() {
    let dir = TempDir::new().expect("tempdir");
    let db = dir.path().join("graph");
    let db_arg = db.to_str().expect("utf8 path");
    stdout_of(&["create", db_arg]);

    let id_file = db.join(RecordFormat::of(IdType::PropertyKeyTokenName).id_file_name());
    let id_arg = id_file.to_str().expect("utf8 path");
    assert_eq!(stdout_of(&["high-id", id_arg]).trim(), "1");

    let dump = stdout_of(&["dump", id_arg]);
    assert!(dump.contains("clean"));
    assert!(dump.contains("High Id"));
}

#[test]
fn missing_file_fails_with_error_message() {
    let dir = TempDir::new().expect("tempdir");
    let missing = dir.path().join("nothing.db.id");
    let output = cargo_bin_cmd!("sombra-ids")
        .arg("high-id")
        .arg(&missing)
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    assert!(String::from_utf8_lossy(&output).contains("error:"));
}
