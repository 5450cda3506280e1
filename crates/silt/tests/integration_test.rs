//! Integration tests for the document store surface.

use serde_json::json;
use silt::{
    CollectionConfig, DatabaseConfig, IndexField, IndexKind, IndexSpec, Op, Query, SiltDb,
    SiltError,
};
use std::time::{SystemTime, UNIX_EPOCH};
use tempfile::TempDir;

fn unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

async fn todos_db() -> SiltDb {
    SiltDb::open(
        DatabaseConfig::in_memory("todos_test").with_collection(
            CollectionConfig::new("todos")
                .with_index(IndexSpec::on_with("done", IndexKind::Boolean)),
        ),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_upsert_round_trip() {
    let db = todos_db().await;
    let todos = db.collection("todos").await.unwrap();

    let before = unix_ms();
    todos
        .save(json!({"id": "a", "title": "x", "done": false}))
        .await
        .unwrap();
    let after = unix_ms();

    let doc = todos.get("a").await.unwrap().unwrap();
    assert_eq!(doc["id"], json!("a"));
    assert_eq!(doc["title"], json!("x"));
    assert_eq!(doc["done"], json!(false));

    let saved = doc["saved"].as_i64().unwrap();
    assert!(saved >= before && saved <= after);

    // overwrite by primary key
    todos
        .save(json!({"id": "a", "title": "y", "done": true}))
        .await
        .unwrap();
    assert_eq!(todos.count().await.unwrap(), 1);
    let doc = todos.get("a").await.unwrap().unwrap();
    assert_eq!(doc["title"], json!("y"));
}

#[tokio::test]
async fn test_save_mints_id_when_absent() {
    let db = todos_db().await;
    let todos = db.collection("todos").await.unwrap();

    let doc = todos.save(json!({"title": "anonymous"})).await.unwrap();
    let id = doc["id"].as_str().unwrap().to_string();
    assert_eq!(id.len(), 32);

    let loaded = todos.get(&id).await.unwrap().unwrap();
    assert_eq!(loaded["id"], json!(id));
}

#[tokio::test]
async fn test_find_by_boolean_index() {
    let db = todos_db().await;
    let todos = db.collection("todos").await.unwrap();

    todos
        .save(json!({"id": "a", "title": "x", "done": false}))
        .await
        .unwrap();

    let open = todos
        .find(&Query::new().field("done", false))
        .await
        .unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0]["id"], json!("a"));
    assert_eq!(open[0]["title"], json!("x"));
    assert!(open[0]["saved"].is_i64());

    let closed = todos.find(&Query::new().field("done", true)).await.unwrap();
    assert!(closed.is_empty());
}

#[tokio::test]
async fn test_compound_index_query() {
    let db = SiltDb::open(
        DatabaseConfig::in_memory("compound_test").with_collection(
            CollectionConfig::new("tasks").with_index(IndexSpec::compound(vec![
                IndexField::new("user.id"),
                IndexField::with_kind("priority", IndexKind::Int),
            ])),
        ),
    )
    .await
    .unwrap();
    let tasks = db.collection("tasks").await.unwrap();

    tasks
        .save(json!({"id": "t1", "user": {"id": "u1"}, "priority": 2}))
        .await
        .unwrap();
    tasks
        .save(json!({"id": "t2", "user": {"id": "u2"}, "priority": 5}))
        .await
        .unwrap();

    let columns: Vec<String> = tasks
        .describe()
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(columns, vec!["id", "json", "date", "user__id", "priority"]);

    let found = tasks
        .find(&Query::new().field("user__id", "u1").filter("priority", Op::Gt, 1))
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["id"], json!("t1"));
}

#[tokio::test]
async fn test_find_one_deletes_duplicates() {
    let db = todos_db().await;
    let todos = db.collection("todos").await.unwrap();

    // two documents colliding on the indexed value
    todos
        .save(json!({"id": "a", "done": false}))
        .await
        .unwrap();
    todos
        .save(json!({"id": "b", "done": false}))
        .await
        .unwrap();

    let survivor = todos
        .find_one(&Query::new().field("done", false))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(survivor["id"], json!("a"));

    assert_eq!(todos.count().await.unwrap(), 1);
    assert!(todos.get("b").await.unwrap().is_none());
}

#[tokio::test]
async fn test_update_merges_patch() {
    let db = todos_db().await;
    let todos = db.collection("todos").await.unwrap();

    todos
        .save(json!({"id": "a", "title": "x", "done": false}))
        .await
        .unwrap();
    let updated = todos
        .update("a", json!({"done": true, "note": "finished"}))
        .await
        .unwrap();

    assert_eq!(updated["title"], json!("x"));
    assert_eq!(updated["done"], json!(true));
    assert_eq!(updated["note"], json!("finished"));

    let loaded = todos.get("a").await.unwrap().unwrap();
    assert_eq!(loaded["done"], json!(true));
    // the read-side splice is not persisted into the stored document
    assert_eq!(loaded.as_object().unwrap().keys().len(), 5);
}

#[tokio::test]
async fn test_update_missing_id_is_not_found() {
    let db = todos_db().await;
    let todos = db.collection("todos").await.unwrap();

    let err = todos.update("ghost", json!({"done": true})).await.unwrap_err();
    assert!(matches!(err, SiltError::NotFound(_)));
}

#[tokio::test]
async fn test_delete_one_requires_equality() {
    let db = todos_db().await;
    let todos = db.collection("todos").await.unwrap();

    todos.save(json!({"id": "a", "done": false})).await.unwrap();
    todos.save(json!({"id": "b", "done": true})).await.unwrap();

    todos
        .delete_one(&Query::new().field("done", true))
        .await
        .unwrap();
    assert_eq!(todos.count().await.unwrap(), 1);
    assert!(todos.get("b").await.unwrap().is_none());

    let err = todos
        .delete_one(&Query::new().filter("done", Op::Ne, true))
        .await
        .unwrap_err();
    assert!(matches!(err, SiltError::Schema(_)));
}

#[tokio::test]
async fn test_date_saved_and_wipe() {
    let db = todos_db().await;
    let todos = db.collection("todos").await.unwrap();

    assert_eq!(todos.date_saved("a").await.unwrap(), None);
    todos.save(json!({"id": "a"})).await.unwrap();
    assert!(todos.date_saved("a").await.unwrap().is_some());

    todos.save(json!({"id": "b"})).await.unwrap();
    todos.wipe().await.unwrap();
    assert_eq!(todos.count().await.unwrap(), 0);
    assert!(todos.all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reset_recreates_declared_schema() {
    let db = todos_db().await;
    let todos = db.collection("todos").await.unwrap();
    todos.save(json!({"id": "a", "done": false})).await.unwrap();

    db.reset().await.unwrap();
    assert!(db.list_collections().await.unwrap().is_empty());

    // next access re-creates the declared schema, empty
    let todos = db.collection("todos").await.unwrap();
    assert_eq!(todos.count().await.unwrap(), 0);
    let columns: Vec<String> = todos
        .describe()
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(columns, vec!["id", "json", "date", "done"]);
}

#[tokio::test]
async fn test_drop_collection() {
    let db = todos_db().await;
    let todos = db.collection("todos").await.unwrap();
    todos.save(json!({"id": "a"})).await.unwrap();

    db.drop_collection("todos").await.unwrap();
    assert!(db.list_collections().await.unwrap().is_empty());

    // re-created empty on next access
    let todos = db.collection("todos").await.unwrap();
    assert_eq!(todos.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_reopen_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let config = DatabaseConfig::new("reopen_test")
        .with_path(temp.path().join("reopen.db"))
        .with_collection(
            CollectionConfig::new("todos").with_index(IndexSpec::on("owner.id")),
        );

    {
        let db = SiltDb::open(config.clone()).await.unwrap();
        let todos = db.collection("todos").await.unwrap();
        todos
            .save(json!({"id": "a", "owner": {"id": "u1"}}))
            .await
            .unwrap();
    }

    let db = SiltDb::open(config).await.unwrap();
    let todos = db.collection("todos").await.unwrap();
    assert_eq!(todos.count().await.unwrap(), 1);

    let columns: Vec<String> = todos
        .describe()
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(columns, vec!["id", "json", "date", "owner__id"]);

    let found = todos
        .find(&Query::new().field("owner__id", "u1"))
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
}
