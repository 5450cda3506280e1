//! SQL triggers that append document mutations to the `_events` log.
//!
//! Triggers fire inside the writing transaction, so an event row is atomic
//! with the document write it describes. Names follow the persisted format:
//! `{col}_{kind}` for single-kind triggers, `{col}_write_insert` and
//! `{col}_write_update` for the `write` pair.

use crate::gateway::Gateway;
use crate::schema::check_ident;
use silt_core::{EventKind, Result};

/// Millisecond timestamp computed by the engine inside the trigger.
const TRIGGER_TS: &str = "CAST(unixepoch('subsec') * 1000 AS INTEGER)";

fn trigger_ddl(name: &str, col: &str, hook: &str, kind: &str, before: &str, after: &str) -> String {
    format!(
        "CREATE TRIGGER IF NOT EXISTS {name} AFTER {hook} ON {col} BEGIN \
         INSERT INTO _events (col, id, type, date, before, after) \
         VALUES ('{col}', {id}, '{kind}', {TRIGGER_TS}, {before}, {after}); \
         END",
        id = if hook == "INSERT" { "new.id" } else { "old.id" },
    )
}

/// Install the trigger(s) for one `(collection, kind)` pair. Idempotent.
pub(crate) async fn install(gateway: &Gateway, collection: &str, kind: EventKind) -> Result<()> {
    check_ident(collection)?;

    let statements = match kind {
        EventKind::Insert => vec![trigger_ddl(
            &format!("{collection}_insert"),
            collection,
            "INSERT",
            "insert",
            "NULL",
            "new.json",
        )],
        EventKind::Update => vec![trigger_ddl(
            &format!("{collection}_update"),
            collection,
            "UPDATE",
            "update",
            "old.json",
            "new.json",
        )],
        EventKind::Write => vec![
            trigger_ddl(
                &format!("{collection}_write_insert"),
                collection,
                "INSERT",
                "write",
                "NULL",
                "new.json",
            ),
            trigger_ddl(
                &format!("{collection}_write_update"),
                collection,
                "UPDATE",
                "write",
                "old.json",
                "new.json",
            ),
        ],
        EventKind::Delete => vec![trigger_ddl(
            &format!("{collection}_delete"),
            collection,
            "DELETE",
            "delete",
            "old.json",
            "NULL",
        )],
    };

    for ddl in statements {
        gateway.run(&ddl, vec![]).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ensure_collection, ensure_feed_tables};
    use rusqlite::types::Value as SqlValue;
    use silt_core::DatabaseConfig;

    async fn feed_gateway() -> Gateway {
        let gw = Gateway::open(&DatabaseConfig::in_memory("test")).unwrap();
        ensure_feed_tables(&gw).await.unwrap();
        ensure_collection(&gw, "todos", &[]).await.unwrap();
        gw
    }

    async fn trigger_names(gw: &Gateway) -> Vec<String> {
        gw.query(
            "SELECT name FROM sqlite_master WHERE type = 'trigger' ORDER BY name",
            vec![],
        )
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.text("name").unwrap())
        .collect()
    }

    #[tokio::test]
    async fn test_write_installs_both_variants() {
        let gw = feed_gateway().await;
        install(&gw, "todos", EventKind::Write).await.unwrap();
        install(&gw, "todos", EventKind::Write).await.unwrap();

        assert_eq!(
            trigger_names(&gw).await,
            vec!["todos_write_insert", "todos_write_update"]
        );
    }

    #[tokio::test]
    async fn test_event_row_is_atomic_with_write() {
        let gw = feed_gateway().await;
        install(&gw, "todos", EventKind::Insert).await.unwrap();
        install(&gw, "todos", EventKind::Delete).await.unwrap();

        gw.run(
            "INSERT INTO todos (id, json, date) VALUES (?1, ?2, ?3)",
            vec![
                SqlValue::Text("a".into()),
                SqlValue::Text(r#"{"id":"a"}"#.into()),
                SqlValue::Integer(1),
            ],
        )
        .await
        .unwrap();
        gw.run("DELETE FROM todos WHERE id = 'a'", vec![]).await.unwrap();

        let rows = gw
            .query(
                "SELECT col, id, type, before, after FROM _events ORDER BY rowid",
                vec![],
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);

        assert_eq!(rows[0].text("type").unwrap(), "insert");
        assert_eq!(rows[0].opt_text("before").unwrap(), None);
        assert_eq!(rows[0].text("after").unwrap(), r#"{"id":"a"}"#);

        assert_eq!(rows[1].text("type").unwrap(), "delete");
        assert_eq!(rows[1].text("before").unwrap(), r#"{"id":"a"}"#);
        assert_eq!(rows[1].opt_text("after").unwrap(), None);
    }

    #[tokio::test]
    async fn test_trigger_timestamp_is_millis() {
        let gw = feed_gateway().await;
        install(&gw, "todos", EventKind::Insert).await.unwrap();

        gw.run(
            "INSERT INTO todos (id, json, date) VALUES ('a', '{}', 1)",
            vec![],
        )
        .await
        .unwrap();

        let row = gw
            .find_one("SELECT date FROM _events", vec![])
            .await
            .unwrap()
            .unwrap();
        let date = row.integer("date").unwrap();
        // sanity: later than 2020-01-01 in milliseconds
        assert!(date > 1_577_836_800_000);
    }
}
