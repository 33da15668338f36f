//! Integration tests for collections
//!
//! These tests drive records through the full write path:
//! - Put / get / delete with index maintenance
//! - Queries against indexed fields
//! - Index creation on populated collections
//! - Error cases (empty ids, duplicate names)

use std::time::Duration;

use cellar_core::{keys, Error, Filter, ValueType};
use cellar_engine::{Database, Query};
use serde::{Deserialize, Serialize};
use serde_json::json;

const KEY: [u8; 32] = [42u8; 32];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Person {
    name: String,
    age: i64,
}

async fn people_db() -> Database {
    let db = Database::open_in_memory(KEY).await.unwrap();
    let people = db.use_collection("people").await.unwrap();
    people.set_index("age", ValueType::Int, "age").await.unwrap();
    for (id, age) in [("teen", 15i64), ("adult", 30), ("ancient", i64::MAX)] {
        people
            .put(id, &json!({ "name": id, "age": age }))
            .await
            .unwrap();
    }
    db
}

async fn ids(db: &Database, query: Query) -> Vec<String> {
    db.collection("people")
        .unwrap()
        .query_ids(&query)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_put_get_round_trip() {
    let db = Database::open_in_memory(KEY).await.unwrap();
    let people = db.use_collection("people").await.unwrap();

    let alice = Person {
        name: "alice".into(),
        age: 31,
    };
    people.put("alice", &alice).await.unwrap();

    let read: Person = people.get("alice").await.unwrap();
    assert_eq!(read, alice);
    db.close().await.unwrap();
}

#[tokio::test]
async fn test_get_missing_is_not_found() {
    let db = Database::open_in_memory(KEY).await.unwrap();
    let people = db.use_collection("people").await.unwrap();
    assert!(matches!(
        people.get::<Person>("nobody").await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_empty_id_is_rejected() {
    let db = Database::open_in_memory(KEY).await.unwrap();
    let people = db.use_collection("people").await.unwrap();
    assert!(matches!(
        people.put("", &json!({"age": 1})).await,
        Err(Error::EmptyId)
    ));
    assert!(matches!(people.get_bytes("").await, Err(Error::EmptyId)));
    assert!(matches!(people.delete("").await, Err(Error::EmptyId)));
}

#[tokio::test]
async fn test_overlong_id_is_rejected() {
    let db = people_db().await;
    let people = db.collection("people").unwrap();
    let id = "x".repeat(70_000);

    assert!(matches!(
        people.put(&id, &json!({ "age": 30 })).await,
        Err(Error::InvalidInput(_))
    ));
    assert!(matches!(people.get_bytes(&id).await, Err(Error::InvalidInput(_))));
    assert!(matches!(people.delete(&id).await, Err(Error::InvalidInput(_))));

    // the longest allowed id still round-trips through the index
    let id = "y".repeat(keys::MAX_NAME_LEN);
    people.put(&id, &json!({ "age": 77 })).await.unwrap();
    assert_eq!(
        ids(&db, Query::new().get(Filter::equal("age", 77))).await,
        vec![id]
    );
}

#[tokio::test]
async fn test_query_times_out_with_no_results() {
    let db = people_db().await;
    let people = db.collection("people").unwrap();

    // the filter tasks have not been polled when the deadline is checked
    let query = Query::new()
        .get(Filter::exists("age"))
        .timeout(Duration::ZERO);
    assert_eq!(people.query_ids(&query).await, Err(Error::Timeout));
    assert!(matches!(people.query(&query).await, Err(Error::Timeout)));
}

#[tokio::test]
async fn test_query_table() {
    let db = people_db().await;

    let cases: Vec<(Query, Vec<&str>)> = vec![
        (Query::new().get(Filter::equal("age", 30)), vec!["adult"]),
        (Query::new().get(Filter::equal("age", i64::MAX)), vec!["ancient"]),
        (
            Query::new().get(Filter::greater("age", 15)),
            vec!["adult", "ancient"],
        ),
        (
            Query::new().get(Filter::greater("age", 15).or_equal()),
            vec!["teen", "adult", "ancient"],
        ),
        (Query::new().get(Filter::less("age", 30)), vec!["teen"]),
        (
            Query::new().get(Filter::less("age", 30).or_equal()),
            vec!["adult", "teen"],
        ),
        (
            Query::new().get(Filter::between("age", 15, 30)),
            Vec::new(),
        ),
        (
            Query::new().get(Filter::between("age", 15, 30).or_equal()),
            vec!["teen", "adult"],
        ),
        (
            Query::new().get(Filter::exists("age")),
            vec!["teen", "adult", "ancient"],
        ),
        (
            Query::new()
                .get(Filter::exists("age"))
                .keep(Filter::greater("age", 20)),
            vec!["teen"],
        ),
        (
            Query::new().get(Filter::exists("age")).reverse(),
            vec!["ancient", "adult", "teen"],
        ),
    ];

    for (query, expected) in cases {
        assert_eq!(ids(&db, query.clone()).await, expected, "query {:?}", query);
    }
    db.close().await.unwrap();
}

#[tokio::test]
async fn test_query_returns_decrypted_records() {
    let db = people_db().await;
    let people = db.collection("people").unwrap();

    let records = people
        .query(&Query::new().get(Filter::greater("age", 20)))
        .await
        .unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].id, "adult");
    let doc: serde_json::Value = records[0].decode().unwrap();
    assert_eq!(doc["age"], 30);
}

#[tokio::test]
async fn test_overwrite_moves_index_entry() {
    let db = people_db().await;
    let people = db.collection("people").unwrap();

    people
        .put("teen", &json!({ "name": "teen", "age": 45 }))
        .await
        .unwrap();

    assert!(ids(&db, Query::new().get(Filter::equal("age", 15))).await.is_empty());
    assert_eq!(
        ids(&db, Query::new().get(Filter::equal("age", 45))).await,
        vec!["teen"]
    );
}

#[tokio::test]
async fn test_overwrite_is_idempotent() {
    let db = people_db().await;
    let people = db.collection("people").unwrap();
    let doc = json!({ "name": "adult", "age": 30 });

    people.put("adult", &doc).await.unwrap();
    people.put("adult", &doc).await.unwrap();

    assert_eq!(
        ids(&db, Query::new().get(Filter::equal("age", 30))).await,
        vec!["adult"]
    );
    let read: serde_json::Value = people.get("adult").await.unwrap();
    assert_eq!(read, doc);
}

#[tokio::test]
async fn test_delete_removes_index_entries() {
    let db = people_db().await;
    let people = db.collection("people").unwrap();

    people.delete("adult").await.unwrap();
    // deleting again is a no-op
    people.delete("adult").await.unwrap();

    assert!(matches!(
        people.get_bytes("adult").await,
        Err(Error::NotFound(_))
    ));
    assert_eq!(
        ids(&db, Query::new().get(Filter::exists("age"))).await,
        vec!["teen", "ancient"]
    );
}

#[tokio::test]
async fn test_field_missing_or_zero_is_not_indexed() {
    let db = Database::open_in_memory(KEY).await.unwrap();
    let people = db.use_collection("people").await.unwrap();
    people.set_index("age", ValueType::Int, "age").await.unwrap();

    people.put("unborn", &json!({ "age": 0 })).await.unwrap();
    people.put("anon", &json!({ "name": "x" })).await.unwrap();
    people.put("text", &json!({ "age": "old" })).await.unwrap();

    let found = people
        .query_ids(&Query::new().get(Filter::exists("age")))
        .await
        .unwrap();
    assert!(found.is_empty());
}

#[tokio::test]
async fn test_bytes_overwrite_drops_index_entry() {
    let db = people_db().await;
    let people = db.collection("people").unwrap();

    people.put_bytes("adult", b"\x00\x01opaque").await.unwrap();

    assert_eq!(people.get_bytes("adult").await.unwrap(), b"\x00\x01opaque");
    assert!(ids(&db, Query::new().get(Filter::equal("age", 30))).await.is_empty());
}

#[tokio::test]
async fn test_nested_selector() {
    let db = Database::open_in_memory(KEY).await.unwrap();
    let users = db.use_collection("users").await.unwrap();
    users
        .set_index("city", ValueType::String, "address.city")
        .await
        .unwrap();

    users
        .put("u1", &json!({ "address": { "city": "Lyon" } }))
        .await
        .unwrap();
    users
        .put("u2", &json!({ "address": { "city": "Oslo" } }))
        .await
        .unwrap();

    let found = users
        .query_ids(&Query::new().get(Filter::equal("address.city", "lyon")))
        .await
        .unwrap();
    assert_eq!(found, vec!["u1"]);
}

#[tokio::test]
async fn test_set_index_backfills_existing_records() {
    let db = Database::open_in_memory(KEY).await.unwrap();
    let people = db.use_collection("people").await.unwrap();
    people.put("a", &json!({ "age": 10 })).await.unwrap();
    people.put("b", &json!({ "age": 20 })).await.unwrap();

    people.set_index("age", ValueType::Int, "age").await.unwrap();

    let found = people
        .query_ids(&Query::new().get(Filter::greater("age", 5)))
        .await
        .unwrap();
    assert_eq!(found, vec!["a", "b"]);
    assert_eq!(people.indexes().len(), 1);
    assert_eq!(people.indexes()[0].name, "age");
}

#[tokio::test]
async fn test_duplicate_names_are_rejected() {
    let db = people_db().await;
    let people = db.collection("people").unwrap();

    assert!(matches!(
        people.set_index("age", ValueType::Int, "age").await,
        Err(Error::NameAlreadyExists(_))
    ));
    assert!(matches!(
        db.create_collection("people").await,
        Err(Error::NameAlreadyExists(_))
    ));
}

#[tokio::test]
async fn test_concurrent_puts_all_land() {
    let db = Database::open_in_memory(KEY).await.unwrap();
    let people = db.use_collection("people").await.unwrap();
    people.set_index("age", ValueType::Int, "age").await.unwrap();

    let mut tasks = Vec::new();
    for i in 1..=50i64 {
        let people = std::sync::Arc::clone(&people);
        tasks.push(tokio::spawn(async move {
            people
                .put(&format!("p{:02}", i), &json!({ "age": i }))
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let found = people
        .query_ids(&Query::new().get(Filter::exists("age")).limit(100))
        .await
        .unwrap();
    assert_eq!(found.len(), 50);
    assert_eq!(found[0], "p01");
    assert_eq!(found[49], "p50");
}
