//! Integration tests for Database open/close, backup and collection lifecycle
//!
//! These tests verify:
//! - Creating new databases and reopening existing ones
//! - Collection metadata and indexes surviving a reopen
//! - Master key mismatch detection
//! - Backup / load round trips
//! - Behavior after close

use cellar_core::{Error, Filter, ValueType};
use cellar_engine::database::{CONFIG_FILE_NAME, SNAPSHOT_FILE_NAME};
use cellar_engine::{CellarConfig, Database, Query};
use serde_json::json;
use tempfile::TempDir;

const KEY: [u8; 32] = [7u8; 32];

#[tokio::test]
async fn test_open_creates_config() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("fresh");

    let db = Database::open(&db_path, KEY).await.unwrap();
    assert!(db_path.join(CONFIG_FILE_NAME).exists());
    assert_eq!(db.config(), &CellarConfig::default());
    assert_eq!(db.data_dir(), Some(db_path.as_path()));
    assert!(db.collections().is_empty());
    db.close().await.unwrap();

    assert!(db_path.join(SNAPSHOT_FILE_NAME).exists());
}

#[tokio::test]
async fn test_open_rejects_invalid_config() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(temp_dir.path().join(CONFIG_FILE_NAME), "query_limit = 0\n").unwrap();

    assert!(matches!(
        Database::open(temp_dir.path(), KEY).await,
        Err(Error::InvalidInput(_))
    ));
}

#[tokio::test]
async fn test_reopen_restores_records_and_indexes() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("lifecycle");

    // Phase 1: create, index and write
    {
        let db = Database::open(&db_path, KEY).await.unwrap();
        let people = db.use_collection("people").await.unwrap();
        people.set_index("age", ValueType::Int, "age").await.unwrap();
        people.put("a", &json!({ "age": 20 })).await.unwrap();
        people.put("b", &json!({ "age": 40 })).await.unwrap();
        db.close().await.unwrap();
    }

    // Phase 2: reopen and verify
    {
        let db = Database::open(&db_path, KEY).await.unwrap();
        assert_eq!(db.collections(), vec!["people"]);

        let people = db.collection("people").unwrap();
        assert_eq!(people.indexes().len(), 1);

        let doc: serde_json::Value = people.get("b").await.unwrap();
        assert_eq!(doc["age"], 40);

        let found = people
            .query_ids(&Query::new().get(Filter::greater("age", 30)))
            .await
            .unwrap();
        assert_eq!(found, vec!["b"]);
        db.close().await.unwrap();
    }
}

#[tokio::test]
async fn test_reopen_with_wrong_key_fails() {
    let temp_dir = TempDir::new().unwrap();

    let db = Database::open(temp_dir.path(), KEY).await.unwrap();
    db.use_collection("secrets").await.unwrap();
    db.close().await.unwrap();

    assert!(matches!(
        Database::open(temp_dir.path(), [8u8; 32]).await,
        Err(Error::AuthenticationFailed)
    ));
}

#[tokio::test]
async fn test_multiple_reopen_cycles() {
    let temp_dir = TempDir::new().unwrap();

    for round in 0..3 {
        let db = Database::open(temp_dir.path(), KEY).await.unwrap();
        let log = db.use_collection("log").await.unwrap();
        log.put(&format!("entry{}", round), &json!({ "round": round }))
            .await
            .unwrap();
        db.close().await.unwrap();
    }

    let db = Database::open(temp_dir.path(), KEY).await.unwrap();
    let log = db.collection("log").unwrap();
    for round in 0..3 {
        let doc: serde_json::Value = log.get(&format!("entry{}", round)).await.unwrap();
        assert_eq!(doc["round"], round);
    }
}

#[tokio::test]
async fn test_create_collection_rejects_empty_name() {
    let db = Database::open_in_memory(KEY).await.unwrap();
    assert!(matches!(
        db.create_collection("").await,
        Err(Error::InvalidInput(_))
    ));
}

#[tokio::test]
async fn test_create_collection_rejects_overlong_name() {
    let db = Database::open_in_memory(KEY).await.unwrap();
    let name = "c".repeat(70_000);
    assert!(matches!(
        db.use_collection(&name).await,
        Err(Error::InvalidInput(_))
    ));
    assert!(db.collections().is_empty());
}

#[tokio::test]
async fn test_use_collection_returns_same_instance() {
    let db = Database::open_in_memory(KEY).await.unwrap();
    let first = db.use_collection("docs").await.unwrap();
    let second = db.use_collection("docs").await.unwrap();
    assert!(std::sync::Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn test_delete_collection_removes_everything() {
    let db = Database::open_in_memory(KEY).await.unwrap();
    let docs = db.use_collection("docs").await.unwrap();
    docs.set_index("n", ValueType::Int, "n").await.unwrap();
    docs.put("a", &json!({ "n": 1 })).await.unwrap();
    docs.kv().put(b"term", b"posting").await.unwrap();

    db.delete_collection("docs").await.unwrap();

    assert!(db.collection("docs").is_none());
    assert!(matches!(docs.get_bytes("a").await, Err(Error::NotFound(_))));
    assert!(matches!(
        db.delete_collection("docs").await,
        Err(Error::NotFound(_))
    ));

    // a new collection with the same name starts empty
    let docs = db.use_collection("docs").await.unwrap();
    assert!(docs.indexes().is_empty());
    assert!(matches!(docs.get_bytes("a").await, Err(Error::NotFound(_))));
    assert_eq!(docs.kv().get(b"term").unwrap(), None);
}

#[tokio::test]
async fn test_backup_and_load() {
    let db = Database::open_in_memory(KEY).await.unwrap();
    let people = db.use_collection("people").await.unwrap();
    people.set_index("age", ValueType::Int, "age").await.unwrap();
    people.put("kept", &json!({ "age": 10 })).await.unwrap();

    let mut backup = Vec::new();
    db.backup(&mut backup).unwrap();

    people.put("later", &json!({ "age": 11 })).await.unwrap();
    db.use_collection("scratch").await.unwrap();

    db.load(&mut backup.as_slice()).await.unwrap();

    assert_eq!(db.collections(), vec!["people"]);
    let people = db.collection("people").unwrap();
    assert!(matches!(
        people.get_bytes("later").await,
        Err(Error::NotFound(_))
    ));
    let found = people
        .query_ids(&Query::new().get(Filter::exists("age")))
        .await
        .unwrap();
    assert_eq!(found, vec!["kept"]);
}

#[tokio::test]
async fn test_backup_loads_into_other_database() {
    let source = Database::open_in_memory(KEY).await.unwrap();
    source
        .use_collection("docs")
        .await
        .unwrap()
        .put("a", &json!({ "x": 1 }))
        .await
        .unwrap();
    let mut backup = Vec::new();
    source.backup(&mut backup).unwrap();

    let target = Database::open_in_memory(KEY).await.unwrap();
    target.load(&mut backup.as_slice()).await.unwrap();
    let doc: serde_json::Value = target.collection("docs").unwrap().get("a").await.unwrap();
    assert_eq!(doc["x"], 1);
}

#[tokio::test]
async fn test_operations_after_close_fail() {
    let db = Database::open_in_memory(KEY).await.unwrap();
    let docs = db.use_collection("docs").await.unwrap();
    db.close().await.unwrap();
    // closing twice is fine
    db.close().await.unwrap();

    assert!(db.is_closed());
    assert!(matches!(
        docs.put("a", &json!({})).await,
        Err(Error::ClosedDatabase)
    ));
    assert!(matches!(docs.get_bytes("a").await, Err(Error::ClosedDatabase)));
    assert!(matches!(
        db.use_collection("other").await,
        Err(Error::ClosedDatabase)
    ));
    assert!(matches!(
        db.files().read_file("f").await,
        Err(Error::ClosedDatabase)
    ));
}
