mod common;

use std::fs;

use assert_cmd::Command;
use common::{TestWorkspace, table_rows};
use predicates::str::contains;
use tabular_loader::analyzer::ColumnStats;

fn loader() -> Command {
    Command::cargo_bin("tabular-loader").expect("binary exists")
}

#[test]
fn analyze_prints_stats_and_writes_yaml() {
    let ws = TestWorkspace::new();
    let input = ws.write("orders.csv", "Order #|Customer\n1|héllo\n22|\n");
    let stats = ws.path().join("orders.stats.yml");
    loader()
        .args([
            "analyze",
            "-i",
            input.to_str().unwrap(),
            "--delimiter",
            "pipe",
            "--dialect",
            "oracle",
            "-o",
            stats.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(contains("ORDER_NO"))
        .stdout(contains("VARCHAR2(1000)"))
        .stdout(contains("2 record(s) analyzed"));

    let saved = ColumnStats::load(&stats).expect("load stats");
    assert_eq!(saved.len(), 2);
    assert_eq!(saved.columns[1].sanitized_name, "CUSTOMER");
    assert_eq!(saved.columns[1].max_len, 6);
    assert_eq!(saved.columns[1].min_len, 0);
}

#[test]
fn load_uses_saved_stats_and_reports_row_count() {
    let ws = TestWorkspace::new();
    let input = ws.write("people.tsv", "name\tage\nAda\t36\nGrace\t85\n");
    let stats = ws.path().join("people.yml");
    let db = ws.path().join("people.db");
    let credentials = ws.sqlite_credentials(&db);

    loader()
        .args([
            "analyze",
            "-i",
            input.to_str().unwrap(),
            "--dialect",
            "sqlite",
            "-o",
            stats.to_str().unwrap(),
        ])
        .assert()
        .success();

    loader()
        .args([
            "load",
            "-i",
            input.to_str().unwrap(),
            "--dialect",
            "sqlite",
            "--credentials",
            credentials.to_str().unwrap(),
            "--table",
            "people",
            "--stats",
            stats.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(contains("Loaded 2 record(s) into PEOPLE"));

    assert_eq!(
        table_rows(&db, "PEOPLE"),
        vec![vec!["Ada", "36"], vec!["Grace", "85"]]
    );
}

#[test]
fn load_conflict_exits_with_error() {
    let ws = TestWorkspace::new();
    let input = ws.write("people.csv", "name\nAda\n");
    let db = ws.path().join("people.db");
    let credentials = ws.sqlite_credentials(&db);
    let args = [
        "load",
        "-i",
        input.to_str().unwrap(),
        "--dialect",
        "sqlite",
        "--credentials",
        credentials.to_str().unwrap(),
        "--table",
        "people",
        "--if-exists",
        "truncate",
    ];
    loader().args(args).assert().success();
    loader()
        .args(args)
        .assert()
        .failure()
        .stderr(contains("load failed (unsupported)"));
}

#[test]
fn load_rejects_stats_with_missing_fields() {
    let ws = TestWorkspace::new();
    let input = ws.write("people.csv", "name\nAda\n");
    let db = ws.path().join("people.db");
    let credentials = ws.sqlite_credentials(&db);
    let stats = ws.write("bad.yml", "columns:\n  - name: name\n    max_len: 3\n");
    loader()
        .args([
            "load",
            "-i",
            input.to_str().unwrap(),
            "--dialect",
            "sqlite",
            "--credentials",
            credentials.to_str().unwrap(),
            "--table",
            "people",
            "--stats",
            stats.to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(contains("column stats mismatch"));
}

#[test]
fn load_requires_credentials_for_the_dialect() {
    let ws = TestWorkspace::new();
    let input = ws.write("people.csv", "name\nAda\n");
    let credentials = ws.write("creds.yaml", "postgresql:\n  host: db\n  user: u\n");
    loader()
        .args([
            "load",
            "-i",
            input.to_str().unwrap(),
            "--dialect",
            "postgresql",
            "--credentials",
            credentials.to_str().unwrap(),
            "--table",
            "people",
        ])
        .assert()
        .failure()
        .stderr(contains("password,dbname"));
}

#[test]
fn detect_encoding_reports_fallback() {
    let ws = TestWorkspace::new();
    let utf8 = ws.write("clean.csv", "name\nhéllo\n");
    let latin = ws.write_bytes("latin.csv", b"name\ncaf\xe9\n");
    loader()
        .args(["detect-encoding", "-i", utf8.to_str().unwrap()])
        .assert()
        .success()
        .stdout("utf8\n");
    loader()
        .args(["detect-encoding", "-i", latin.to_str().unwrap()])
        .assert()
        .success()
        .stdout("cp1252\n");
}

#[test]
fn unknown_input_encoding_fails_cleanly() {
    let ws = TestWorkspace::new();
    let input = ws.write("a.csv", "a\n1\n");
    loader()
        .args([
            "analyze",
            "-i",
            input.to_str().unwrap(),
            "--input-encoding",
            "martian",
        ])
        .assert()
        .failure()
        .stderr(contains("Unknown encoding 'martian'"));
    assert!(fs::metadata(ws.path().join("a.csv")).is_ok());
}
