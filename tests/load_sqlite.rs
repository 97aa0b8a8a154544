mod common;

use std::sync::Arc;

use common::{TestWorkspace, dbf_image, table_columns, table_rows};
use tabular_loader::{
    Dialect, ErrorKind, Status, TableExistsPolicy,
    credentials::Credentials,
    session::{Destination, LoadSession},
    source::{ChunkedSource, DbfConfig, FlatFileConfig, MemoryTable, SourceConfig, SourceOptions},
    value::{SourceValue, ValueConverter},
};

const PEOPLE: &str = "Name,City #,Notes\nAda,London,\"first, programmer\"\nGrace,Arlington,\nLinus,Helsinki,kernel\n";

fn flat_source(ws: &TestWorkspace, contents: &str, chunk_size: usize) -> ChunkedSource {
    let path = ws.write("people.csv", contents);
    ChunkedSource::with_options(
        SourceConfig::Flat(FlatFileConfig::new(path).with_qualifier(true)),
        SourceOptions {
            chunk_size,
            converter: None,
        },
    )
    .expect("flat source")
}

fn destination(ws: &TestWorkspace, policy: TableExistsPolicy) -> Destination {
    Destination::new(
        "people list",
        Dialect::Sqlite,
        Credentials::sqlite(ws.path().join("load.db")),
    )
    .with_policy(policy)
}

#[test]
fn analyze_then_load_round_trips_rows_and_column_order() {
    let ws = TestWorkspace::new();
    let session = LoadSession::new(
        flat_source(&ws, PEOPLE, 2),
        destination(&ws, TableExistsPolicy::Error),
    );

    let analysis = session.analyze();
    assert!(analysis.is_ok(), "{}", analysis.message);
    assert_eq!(analysis.record_count, 3);
    let names = analysis.column_stats.sanitized_names();
    assert_eq!(names, vec!["NAME", "CITY_NO", "NOTES"]);

    let result = session.load(Some(&analysis.column_stats));
    assert!(result.is_ok(), "{}", result.message);
    assert_eq!(result.records_inserted, Some(3));
    assert_eq!(result.table_name, "PEOPLE_LIST");

    let db = ws.path().join("load.db");
    let columns = table_columns(&db, "PEOPLE_LIST");
    assert_eq!(
        columns,
        vec![
            ("NAME".to_string(), "TEXT".to_string()),
            ("CITY_NO".to_string(), "TEXT".to_string()),
            ("NOTES".to_string(), "TEXT".to_string()),
        ]
    );
    let rows = table_rows(&db, "PEOPLE_LIST");
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0], vec!["Ada", "London", "first, programmer"]);
    assert_eq!(rows[1], vec!["Grace", "Arlington", ""]);
}

#[test]
fn existing_table_with_error_policy_is_a_conflict() {
    let ws = TestWorkspace::new();
    let first = LoadSession::new(
        flat_source(&ws, PEOPLE, 10),
        destination(&ws, TableExistsPolicy::Error),
    )
    .load(None);
    assert!(first.is_ok(), "{}", first.message);

    let second = LoadSession::new(
        flat_source(&ws, PEOPLE, 10),
        destination(&ws, TableExistsPolicy::Error),
    )
    .load(None);
    assert_eq!(second.status, Status::Error(ErrorKind::Conflict));
    assert!(second.message.contains("already exists"));
    assert_eq!(table_rows(&ws.path().join("load.db"), "PEOPLE_LIST").len(), 3);
}

#[test]
fn append_adds_rows_to_a_matching_table() {
    let ws = TestWorkspace::new();
    for _ in 0..2 {
        let result = LoadSession::new(
            flat_source(&ws, PEOPLE, 10),
            destination(&ws, TableExistsPolicy::Append),
        )
        .load(None);
        assert!(result.is_ok(), "{}", result.message);
    }
    assert_eq!(table_rows(&ws.path().join("load.db"), "PEOPLE_LIST").len(), 6);
}

#[test]
fn append_with_a_missing_column_inserts_nothing() {
    let ws = TestWorkspace::new();
    let narrow = "Name,City #\nAda,London\n";
    let created = LoadSession::new(
        flat_source(&ws, narrow, 10),
        destination(&ws, TableExistsPolicy::Error),
    )
    .load(None);
    assert!(created.is_ok(), "{}", created.message);

    let result = LoadSession::new(
        flat_source(&ws, PEOPLE, 10),
        destination(&ws, TableExistsPolicy::Append),
    )
    .load(None);
    assert_eq!(result.status, Status::Error(ErrorKind::Conflict));
    assert!(result.message.contains("NOTES is missing from the table"));
    assert_eq!(table_rows(&ws.path().join("load.db"), "PEOPLE_LIST").len(), 1);
}

#[test]
fn truncate_is_unsupported_on_sqlite() {
    let ws = TestWorkspace::new();
    let created = LoadSession::new(
        flat_source(&ws, PEOPLE, 10),
        destination(&ws, TableExistsPolicy::Error),
    )
    .load(None);
    assert!(created.is_ok());

    let result = LoadSession::new(
        flat_source(&ws, PEOPLE, 10),
        destination(&ws, TableExistsPolicy::Truncate),
    )
    .load(None);
    assert_eq!(result.status, Status::Error(ErrorKind::Unsupported));
    assert_eq!(table_rows(&ws.path().join("load.db"), "PEOPLE_LIST").len(), 3);
}

#[test]
fn drop_replaces_the_existing_table() {
    let ws = TestWorkspace::new();
    let narrow = "Name\nAda\nGrace\n";
    let created = LoadSession::new(
        flat_source(&ws, narrow, 10),
        destination(&ws, TableExistsPolicy::Error),
    )
    .load(None);
    assert!(created.is_ok());

    let result = LoadSession::new(
        flat_source(&ws, PEOPLE, 10),
        destination(&ws, TableExistsPolicy::Drop),
    )
    .load(None);
    assert!(result.is_ok(), "{}", result.message);
    let db = ws.path().join("load.db");
    assert_eq!(table_columns(&db, "PEOPLE_LIST").len(), 3);
    assert_eq!(table_rows(&db, "PEOPLE_LIST").len(), 3);
}

#[test]
fn in_memory_table_with_custom_converter() {
    let ws = TestWorkspace::new();
    let table = MemoryTable::new(
        vec!["amount".into(), "flag".into()],
        vec![
            vec![SourceValue::Float(3.0), SourceValue::Boolean(true)],
            vec![SourceValue::Null, SourceValue::Boolean(false)],
        ],
    );
    let converter: ValueConverter = Arc::new(|value| match value {
        SourceValue::Null => "NA".to_string(),
        other => tabular_loader::value::stringify(other, encoding_rs::UTF_8),
    });
    let source = ChunkedSource::with_options(
        SourceConfig::Memory(Arc::new(table)),
        SourceOptions {
            chunk_size: 1,
            converter: Some(converter),
        },
    )
    .unwrap();
    let result = LoadSession::new(source, destination(&ws, TableExistsPolicy::Error)).load(None);
    assert!(result.is_ok(), "{}", result.message);
    let rows = table_rows(&ws.path().join("load.db"), "PEOPLE_LIST");
    assert_eq!(rows, vec![vec!["3", "TRUE"], vec!["NA", "FALSE"]]);
}

#[test]
fn cp1252_dbf_is_detected_and_loaded() {
    let ws = TestWorkspace::new();
    let image = dbf_image(
        &[("CITY", 10), ("CODE", 4)],
        &[
            &[&b"M\xfcnchen"[..], &b"MUC"[..]],
            &[&b"Z\xfcrich"[..], &b"ZRH"[..]],
        ],
    );
    let path = ws.write_bytes("cities.dbf", &image);
    let source = ChunkedSource::new(SourceConfig::Dbf(DbfConfig::new(path))).unwrap();
    assert_eq!(source.encoding(), encoding_rs::WINDOWS_1252);

    let result = LoadSession::new(source, destination(&ws, TableExistsPolicy::Error)).load(None);
    assert!(result.is_ok(), "{}", result.message);
    let rows = table_rows(&ws.path().join("load.db"), "PEOPLE_LIST");
    assert_eq!(rows[0], vec!["München", "MUC"]);
    assert_eq!(rows[1], vec!["Zürich", "ZRH"]);
}

#[test]
fn missing_sqlite_host_is_a_configuration_error() {
    let ws = TestWorkspace::new();
    let destination = Destination::new("t", Dialect::Sqlite, Credentials::default());
    let result = LoadSession::new(flat_source(&ws, PEOPLE, 10), destination).load(None);
    assert_eq!(result.status, Status::Error(ErrorKind::Configuration));
}

#[test]
fn backends_without_a_connector_fail_to_connect() {
    let ws = TestWorkspace::new();
    let credentials: Credentials = [("host", "h"), ("user", "u"), ("password", "p"), ("dbname", "d")]
        .into_iter()
        .collect();
    let destination = Destination::new("t", Dialect::Postgres, credentials);
    let result = LoadSession::new(flat_source(&ws, PEOPLE, 10), destination).load(None);
    assert_eq!(result.status, Status::Error(ErrorKind::Connection));
}
