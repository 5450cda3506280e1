//! Integration tests for deferred write batches.

use futures::stream;
use serde_json::json;
use silt::{DatabaseConfig, SiltDb};

async fn test_db(name: &str) -> SiltDb {
    SiltDb::open(DatabaseConfig::in_memory(name)).await.unwrap()
}

#[tokio::test]
async fn test_batch_commits_atomically() {
    let db = test_db("batch_commit_test").await;
    let todos = db.collection("todos").await.unwrap();

    let mut batch = db.batch();
    for i in 0..5 {
        batch.add(&todos, json!({"id": format!("doc{i}"), "n": i})).unwrap();
    }

    // nothing visible before the flush
    assert_eq!(todos.count().await.unwrap(), 0);
    assert_eq!(batch.len(), 5);

    let committed = batch.execute().await.unwrap();
    assert_eq!(committed, 5);
    assert!(batch.is_empty());
    assert_eq!(todos.count().await.unwrap(), 5);
}

#[tokio::test]
async fn test_failed_batch_rolls_back_and_keeps_queue() {
    let db = test_db("batch_rollback_test").await;
    let todos = db.collection("todos").await.unwrap();
    let orphans = db.collection("orphans").await.unwrap();

    let mut batch = db.batch();
    batch.add(&todos, json!({"id": "a"})).unwrap();
    batch.add(&orphans, json!({"id": "b"})).unwrap();
    batch.add(&todos, json!({"id": "c"})).unwrap();

    // make the middle write fail
    db.drop_collection("orphans").await.unwrap();

    assert!(batch.execute().await.is_err());
    assert_eq!(batch.len(), 3);
    assert_eq!(todos.count().await.unwrap(), 0);

    // once the table is back the same queue commits whole
    db.collection("orphans").await.unwrap();
    assert_eq!(batch.execute().await.unwrap(), 3);
    assert_eq!(todos.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_empty_execute_is_a_no_op() {
    let db = test_db("batch_empty_test").await;
    let mut batch = db.batch();
    assert_eq!(batch.execute().await.unwrap(), 0);
}

#[tokio::test]
async fn test_fill_flushes_in_chunks() {
    let db = test_db("batch_fill_test").await;
    let todos = db.collection("todos").await.unwrap();

    let mut batch = todos.batch();
    let total = batch
        .fill(
            0..10,
            |batch, i| batch.add(&todos, json!({"id": format!("doc{i}")})),
            4,
        )
        .await
        .unwrap();

    assert_eq!(total, 10);
    assert_eq!(todos.count().await.unwrap(), 10);
}

#[tokio::test]
async fn test_fill_stream() {
    let db = test_db("batch_stream_test").await;
    let todos = db.collection("todos").await.unwrap();

    let items = stream::iter(vec!["a", "b", "c"]);
    let mut batch = todos.batch();
    let total = batch
        .fill_stream(items, |batch, id| batch.add(&todos, json!({"id": id})), 2)
        .await
        .unwrap();

    assert_eq!(total, 3);
    assert_eq!(todos.count().await.unwrap(), 3);
}
