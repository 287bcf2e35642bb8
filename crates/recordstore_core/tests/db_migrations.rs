use recordstore_core::db::migrations::latest_version;
use recordstore_core::db::{open_db, open_db_in_memory, DbError};
use recordstore_core::{SqliteStore, StoreConfig, StoreError};
use rusqlite::Connection;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(1);

#[test]
fn in_memory_database_reaches_latest_schema() {
    let conn = open_db_in_memory(TIMEOUT).unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "entities");
    assert_table_exists(&conn, "records");
}

#[test]
fn reopening_a_file_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");

    let first = open_db(&path, TIMEOUT).unwrap();
    assert_eq!(schema_version(&first), latest_version());
    drop(first);

    let second = open_db(&path, TIMEOUT).unwrap();
    assert_eq!(schema_version(&second), latest_version());
    assert_table_exists(&second, "records");
}

#[test]
fn newer_schema_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    match open_db(&path, TIMEOUT).unwrap_err() {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }

    let err = SqliteStore::open(&StoreConfig::at_path("future", &path))
        .err()
        .unwrap();
    assert!(matches!(
        err,
        StoreError::Db(DbError::UnsupportedSchemaVersion { .. })
    ));
}

#[test]
fn unreachable_path_reports_where_open_failed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("store.db");

    let err = open_db(&path, TIMEOUT).unwrap_err();
    assert_eq!(err.code(), "db_open_failed");
    match &err {
        DbError::Open { location, .. } => assert!(location.ends_with("store.db")),
        other => panic!("unexpected error: {other}"),
    }

    let err = SqliteStore::open(&StoreConfig::at_path("missing", &path))
        .err()
        .unwrap();
    assert!(matches!(err, StoreError::Db(DbError::Open { .. })));
}

#[test]
fn records_require_a_registered_entity_and_json_body() {
    let conn = open_db_in_memory(TIMEOUT).unwrap();

    let orphan = conn.execute(
        "INSERT INTO records (id, entity, body) VALUES ('a', 'Missing', '{}');",
        [],
    );
    assert!(orphan.is_err());

    conn.execute("INSERT INTO entities (name) VALUES ('Note');", [])
        .unwrap();
    let not_json = conn.execute(
        "INSERT INTO records (id, entity, body) VALUES ('b', 'Note', 'not json');",
        [],
    );
    assert!(not_json.is_err());
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1);",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "expected table `{table_name}` to exist");
}
