//! TTL sweeper tests
//!
//! Records and files written with a TTL must disappear, together with
//! their index entries, once the TTL elapses. Rewriting without a TTL
//! cancels the pending expiry.

use std::time::Duration;

use cellar_core::{Error, Filter, ValueType};
use cellar_engine::{CellarConfig, Database, Query};
use serde_json::json;

const KEY: [u8; 32] = [3u8; 32];

async fn open() -> Database {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .try_init();
    let config = CellarConfig {
        ttl_max_interval_ms: 50,
        ..Default::default()
    };
    Database::open_with_config(None, KEY, config).await.unwrap()
}

async fn wait_until_gone(db: &Database, collection: &str, id: &str) -> bool {
    let coll = db.collection(collection).unwrap();
    for _ in 0..100 {
        if matches!(coll.get_bytes(id).await, Err(Error::NotFound(_))) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_record_expires() {
    let db = open().await;
    let sessions = db.use_collection("sessions").await.unwrap();
    sessions.set_index("user", ValueType::String, "user").await.unwrap();

    sessions
        .put_with_ttl("s1", &json!({ "user": "ann" }), Duration::from_millis(50))
        .await
        .unwrap();
    sessions.put("s2", &json!({ "user": "bob" })).await.unwrap();
    assert!(sessions.get_bytes("s1").await.is_ok());

    assert!(wait_until_gone(&db, "sessions", "s1").await);

    let found = sessions
        .query_ids(&Query::new().get(Filter::exists("user")))
        .await
        .unwrap();
    assert_eq!(found, vec!["s2"]);
    db.close().await.unwrap();
}

#[tokio::test]
async fn test_overwrite_without_ttl_cancels_expiry() {
    let db = open().await;
    let sessions = db.use_collection("sessions").await.unwrap();

    sessions
        .put_with_ttl("s1", &json!({ "v": 1 }), Duration::from_millis(50))
        .await
        .unwrap();
    sessions.put("s1", &json!({ "v": 2 })).await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    let doc: serde_json::Value = sessions.get("s1").await.unwrap();
    assert_eq!(doc["v"], 2);
}

#[tokio::test]
async fn test_concurrent_overwrite_without_ttl_cancels_expiry() {
    let db = open().await;
    let sessions = db.use_collection("sessions").await.unwrap();

    let v1 = json!({ "v": 1 });
    let v2 = json!({ "v": 2 });
    let (first, second) = tokio::join!(
        sessions.put_with_ttl("s1", &v1, Duration::from_millis(100)),
        sessions.put("s1", &v2)
    );
    first.unwrap();
    second.unwrap();

    tokio::time::sleep(Duration::from_millis(600)).await;
    let doc: serde_json::Value = sessions.get("s1").await.unwrap();
    assert_eq!(doc["v"], 2);
}

#[tokio::test]
async fn test_concurrent_ttl_writes_keep_one_queue_entry() {
    let db = open().await;
    let sessions = db.use_collection("sessions").await.unwrap();

    let v1 = json!({ "v": 1 });
    let v2 = json!({ "v": 2 });
    let (first, second) = tokio::join!(
        sessions.put_with_ttl("s1", &v1, Duration::from_millis(100)),
        sessions.put_with_ttl("s1", &v2, Duration::from_secs(60))
    );
    first.unwrap();
    second.unwrap();

    tokio::time::sleep(Duration::from_millis(600)).await;
    let doc: serde_json::Value = sessions.get("s1").await.unwrap();
    assert_eq!(doc["v"], 2);
}

#[tokio::test]
async fn test_ttl_can_be_extended() {
    let db = open().await;
    let sessions = db.use_collection("sessions").await.unwrap();

    sessions
        .put_with_ttl("s1", &json!({ "v": 1 }), Duration::from_millis(50))
        .await
        .unwrap();
    sessions
        .put_with_ttl("s1", &json!({ "v": 2 }), Duration::from_secs(60))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(sessions.get_bytes("s1").await.is_ok());
}

#[tokio::test]
async fn test_delete_clears_pending_expiry() {
    let db = open().await;
    let sessions = db.use_collection("sessions").await.unwrap();

    sessions
        .put_with_ttl("s1", &json!({ "v": 1 }), Duration::from_millis(50))
        .await
        .unwrap();
    sessions.delete("s1").await.unwrap();
    // a new record under the same id must not inherit the old TTL
    sessions.put("s1", &json!({ "v": 2 })).await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(sessions.get_bytes("s1").await.is_ok());
}

#[tokio::test]
async fn test_file_expires() {
    let db = open().await;
    let files = db.files();

    files
        .put_file_with_ttl("tmp.bin", b"scratch", Duration::from_millis(50))
        .await
        .unwrap();
    assert_eq!(files.read_file("tmp.bin").await.unwrap(), b"scratch");

    let mut gone = false;
    for _ in 0..100 {
        if matches!(files.read_file("tmp.bin").await, Err(Error::NotFound(_))) {
            gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(gone);
}

#[tokio::test]
async fn test_expired_records_of_deleted_collection_are_ignored() {
    let db = open().await;
    let sessions = db.use_collection("sessions").await.unwrap();
    sessions
        .put_with_ttl("s1", &json!({}), Duration::from_millis(30))
        .await
        .unwrap();
    db.delete_collection("sessions").await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    let sessions = db.use_collection("sessions").await.unwrap();
    assert!(matches!(
        sessions.get_bytes("s1").await,
        Err(Error::NotFound(_))
    ));
}
