use nightdesk_core::db::migrations::latest_version;
use nightdesk_core::db::{open_db, open_db_in_memory, DbError};
use nightdesk_core::model::resource::{Parent, ResourceDraft, ResourceKind};
use nightdesk_core::repo::{ContentRepository, StoreError};
use nightdesk_core::SqliteContentRepository;
use rusqlite::Connection;

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "resources");
    assert_table_exists(&conn, "database_properties");
    assert_table_exists(&conn, "record_values");
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sandbox.db");

    let conn_first = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_first), latest_version());
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    assert_table_exists(&conn_second, "resources");
}

#[test]
fn sandbox_store_rejects_unmigrated_connection() {
    let conn = Connection::open_in_memory().unwrap();
    let err = SqliteContentRepository::try_new(&conn).err().unwrap();
    assert!(matches!(err, StoreError::InvalidData(_)), "unexpected error: {err}");
}

#[test]
fn sandbox_contents_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sandbox.db");

    let page_id = {
        let conn = open_db(&path).unwrap();
        let repo = SqliteContentRepository::try_new(&conn).unwrap();
        repo.create(&ResourceDraft::new(
            ResourceKind::Page,
            Parent::Workspace,
            "Night Desk (Sandbox)",
        ))
        .unwrap()
        .id
    };

    let conn = open_db(&path).unwrap();
    let repo = SqliteContentRepository::try_new(&conn).unwrap();
    let page = repo.retrieve(ResourceKind::Page, page_id).unwrap();
    assert_eq!(page.title, "Night Desk (Sandbox)");
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
