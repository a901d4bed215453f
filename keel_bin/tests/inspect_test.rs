use std::fs;
use std::process::Command;

use keel::{BufferPoolConfig, Database, Field, Tuple};
use keel_bin::inspect;
use serial_test::serial;
use tempfile::tempdir;

fn populate(dir: &std::path::Path) {
    fs::write(
        dir.join("catalog.txt"),
        "users (id int pk, name string)\nevents (user_id int, at int)\n",
    )
    .unwrap();

    let db = Database::open(dir.join("keel.wal"), BufferPoolConfig::default()).unwrap();
    db.catalog().load_schema(dir.join("catalog.txt")).unwrap();
    let users = db.catalog().table(db.catalog().table_id("users").unwrap()).unwrap();

    let tx = db.begin();
    for (id, name) in [(1, "ada"), (2, "grace"), (3, "barbara")] {
        let mut row =
            Tuple::new(users.schema().clone(), vec![Field::Int(id), Field::string(name)]).unwrap();
        tx.insert_tuple(users.id(), &mut row).unwrap();
    }
    tx.commit().unwrap();
}

#[test]
fn test_inspect_counts_tuples_per_table() {
    let dir = tempdir().unwrap();
    populate(dir.path());

    let summaries = inspect(
        &dir.path().join("catalog.txt"),
        &dir.path().join("keel.wal"),
        BufferPoolConfig::default(),
    )
    .unwrap();

    let found: Vec<_> = summaries
        .iter()
        .map(|s| (s.name.as_str(), s.pages, s.tuples))
        .collect();
    assert_eq!(found, vec![("events", 0, 0), ("users", 1, 3)]);
}

#[test]
fn test_inspect_reports_bad_catalog() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("catalog.txt"), "users id int\n").unwrap();
    let err = inspect(
        &dir.path().join("catalog.txt"),
        &dir.path().join("keel.wal"),
        BufferPoolConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, keel::DbError::Catalog(_)));
}

#[test]
#[serial]
fn test_binary_prints_summary() {
    let dir = tempdir().unwrap();
    populate(dir.path());

    let output = Command::new(env!("CARGO_BIN_EXE_keel_bin"))
        .arg(dir.path().join("catalog.txt"))
        .arg(dir.path().join("keel.wal"))
        .env("KEEL_POOL_PAGES", "8")
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let stdout = String::from_utf8(output.stdout).unwrap();
    let lines: Vec<_> = stdout.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("events\t"));
    assert!(lines[1].starts_with("users\t"));
    assert!(lines[1].ends_with("\t1 pages\t3 tuples"));
}

#[test]
#[serial]
fn test_binary_rejects_bad_config() {
    let dir = tempdir().unwrap();
    populate(dir.path());

    let output = Command::new(env!("CARGO_BIN_EXE_keel_bin"))
        .arg(dir.path().join("catalog.txt"))
        .arg(dir.path().join("keel.wal"))
        .env("KEEL_POOL_PAGES", "lots")
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("error"));
}
