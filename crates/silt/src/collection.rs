//! Per-collection document operations.
//!
//! A [`Collection`] is a cheap handle over the shared gateway; the owning
//! database memoizes handles by name. Documents are stored as serialized JSON
//! in the `json` column, mirrored into the collection's index columns, and
//! stamped with the write time in `date`.

use crate::batch::Batcher;
use crate::bus::{BusEvent, LightBus};
use crate::db::now_ms;
use crate::gateway::{json_to_sql, Gateway, Row};
use crate::query::{path_lookup, Query};
use crate::schema;
use rusqlite::types::Value as SqlValue;
use serde_json::{json, Value};
use silt_core::{ColumnInfo, Document, EventKind, IndexSpec, Result, SiltError};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// A fully composed upsert, ready to execute directly or inside a batch.
pub(crate) struct ComposedWrite {
    pub sql: String,
    pub args: Vec<SqlValue>,
    pub doc: Document,
    pub id: String,
    pub date: i64,
}

/// Build the upsert for one document: id minted if absent, id embedded in the
/// stored JSON, index columns projected from their dotted paths.
pub(crate) fn compose_upsert(
    collection: &str,
    indexes: &[IndexSpec],
    mut doc: Document,
) -> Result<ComposedWrite> {
    let obj = doc
        .as_object_mut()
        .ok_or_else(|| SiltError::Serialization("document must be a JSON object".into()))?;

    let id = match obj.get("id") {
        None => {
            let id = Uuid::new_v4().simple().to_string();
            obj.insert("id".into(), json!(id));
            id
        }
        Some(Value::String(id)) => id.clone(),
        Some(other) => {
            return Err(SiltError::Serialization(format!(
                "document id must be a string, got {other}"
            )))
        }
    };

    let date = now_ms();
    let json_text = serde_json::to_string(&doc)
        .map_err(|e| SiltError::Serialization(e.to_string()))?;

    // Index columns, deduplicated across specs, declaration order.
    let mut projected = Vec::new();
    let mut seen = HashSet::new();
    for spec in indexes {
        for field in &spec.fields {
            let column = field.column();
            if seen.insert(column.clone()) {
                let value = path_lookup(&doc, &field.path)
                    .map(json_to_sql)
                    .unwrap_or(SqlValue::Null);
                projected.push((column, value));
            }
        }
    }

    let mut columns = vec!["id".to_string(), "json".to_string(), "date".to_string()];
    let mut args = vec![
        SqlValue::Text(id.clone()),
        SqlValue::Text(json_text),
        SqlValue::Integer(date),
    ];
    for (column, value) in projected {
        columns.push(column);
        args.push(value);
    }

    let placeholders = vec!["?"; columns.len()].join(", ");
    let updates = columns
        .iter()
        .skip(1) // id is the conflict key
        .map(|c| format!("{c} = excluded.{c}"))
        .collect::<Vec<_>>()
        .join(", ");

    let sql = format!(
        "INSERT INTO {collection} ({}) VALUES ({placeholders}) \
         ON CONFLICT(id) DO UPDATE SET {updates}",
        columns.join(", ")
    );

    Ok(ComposedWrite {
        sql,
        args,
        doc,
        id,
        date,
    })
}

/// Parse a stored row back into a document, splicing in `saved`.
fn hydrate(row: &Row) -> Result<Document> {
    let text = row.text("json")?;
    let mut doc: Value = serde_json::from_str(&text)
        .map_err(|e| SiltError::Serialization(format!("bad stored document: {e}")))?;
    if let Some(obj) = doc.as_object_mut() {
        obj.insert("saved".into(), json!(row.integer("date")?));
    }
    Ok(doc)
}

/// Handle for one named collection.
pub struct Collection {
    name: String,
    indexes: Vec<IndexSpec>,
    gateway: Gateway,
    bus: Arc<LightBus>,
}

impl Collection {
    pub(crate) fn new(
        name: String,
        indexes: Vec<IndexSpec>,
        gateway: Gateway,
        bus: Arc<LightBus>,
    ) -> Self {
        Self {
            name,
            indexes,
            gateway,
            bus,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn indexes(&self) -> &[IndexSpec] {
        &self.indexes
    }

    /// Upsert a document by primary key. Returns the stored document (read
    /// back via `RETURNING`, with `saved` spliced in); the id is embedded,
    /// minted when absent.
    pub async fn save(&self, doc: Document) -> Result<Document> {
        let write = compose_upsert(&self.name, &self.indexes, doc)?;
        let returned = self
            .gateway
            .insert(&format!("{} RETURNING json, date", write.sql), write.args)
            .await?;

        self.bus.publish(&BusEvent {
            collection: self.name.clone(),
            id: write.id,
            kind: EventKind::Write,
            date: write.date,
            data: Some(write.doc.clone()),
        });

        match returned {
            Some(row) => hydrate(&row),
            None => Ok(write.doc),
        }
    }

    pub async fn get(&self, id: &str) -> Result<Option<Document>> {
        let row = self
            .gateway
            .get(
                &format!("SELECT id, json, date FROM {} WHERE id = ?1", self.name),
                vec![SqlValue::Text(id.to_string())],
            )
            .await?;
        row.as_ref().map(hydrate).transpose()
    }

    pub async fn all(&self) -> Result<Vec<Document>> {
        let rows = self
            .gateway
            .query(&format!("SELECT id, json, date FROM {}", self.name), vec![])
            .await?;
        rows.iter().map(hydrate).collect()
    }

    pub async fn find(&self, query: &Query) -> Result<Vec<Document>> {
        let (sql, args) = query.to_sql(&self.name);
        let rows = self.gateway.query(&sql, args).await?;
        rows.iter().map(hydrate).collect()
    }

    /// First match of a query.
    ///
    /// When more than one row matches (which a unique index should have
    /// prevented), all but the first in scan order are deleted and a warning
    /// is logged.
    pub async fn find_one(&self, query: &Query) -> Result<Option<Document>> {
        let (sql, args) = query.to_sql(&self.name);
        let rows = self.gateway.query(&sql, args).await?;

        if rows.len() > 1 {
            let extras: Vec<String> = rows[1..]
                .iter()
                .map(|r| r.text("id"))
                .collect::<Result<_>>()?;
            tracing::warn!(
                collection = %self.name,
                duplicates = extras.len(),
                "find_one matched multiple rows, deleting duplicates"
            );
            let placeholders = vec!["?"; extras.len()].join(", ");
            self.gateway
                .run(
                    &format!("DELETE FROM {} WHERE id IN ({placeholders})", self.name),
                    extras.into_iter().map(SqlValue::Text).collect(),
                )
                .await?;
        }

        rows.first().map(hydrate).transpose()
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let affected = self
            .gateway
            .run(
                &format!("DELETE FROM {} WHERE id = ?1", self.name),
                vec![SqlValue::Text(id.to_string())],
            )
            .await?;

        if affected > 0 {
            self.bus.publish(&BusEvent {
                collection: self.name.clone(),
                id: id.to_string(),
                kind: EventKind::Delete,
                date: now_ms(),
                data: None,
            });
        }
        Ok(())
    }

    /// Delete the first match of an equality-only query.
    pub async fn delete_one(&self, query: &Query) -> Result<()> {
        if !query.is_equality_only() {
            return Err(SiltError::Schema(
                "delete_one accepts equality conditions only".into(),
            ));
        }

        let (sql, args) = query.to_sql(&self.name);
        let row = self.gateway.find_one(&format!("{sql} LIMIT 1"), args).await?;
        if let Some(row) = row {
            self.delete(&row.text("id")?).await?;
        }
        Ok(())
    }

    pub async fn wipe(&self) -> Result<()> {
        self.gateway
            .run(&format!("DELETE FROM {}", self.name), vec![])
            .await?;
        Ok(())
    }

    /// Drop the backing table. The owning database forgets the handle via
    /// `SiltDb::drop_collection`.
    #[allow(clippy::should_implement_trait)]
    pub async fn drop(&self) -> Result<()> {
        self.gateway
            .run(&format!("DROP TABLE IF EXISTS {}", self.name), vec![])
            .await?;
        Ok(())
    }

    pub async fn count(&self) -> Result<i64> {
        let row = self
            .gateway
            .get(&format!("SELECT COUNT(*) AS n FROM {}", self.name), vec![])
            .await?
            .ok_or_else(|| SiltError::Internal("count returned no row".into()))?;
        row.integer("n")
    }

    pub async fn describe(&self) -> Result<Vec<ColumnInfo>> {
        schema::table_info(&self.gateway, &self.name).await
    }

    /// Read-modify-write: shallow-merge `patch` into the stored document.
    /// Fails with [`SiltError::NotFound`] when the id does not exist.
    pub async fn update(&self, id: &str, patch: Document) -> Result<Document> {
        let mut doc = self
            .get(id)
            .await?
            .ok_or_else(|| SiltError::NotFound(format!("{}/{id}", self.name)))?;

        let patch_obj = patch
            .as_object()
            .ok_or_else(|| SiltError::Serialization("patch must be a JSON object".into()))?;
        let obj = doc
            .as_object_mut()
            .ok_or_else(|| SiltError::Serialization("stored document is not an object".into()))?;

        // `saved` is a read-side splice, not part of the stored document
        obj.remove("saved");
        for (key, value) in patch_obj {
            obj.insert(key.clone(), value.clone());
        }
        obj.insert("id".into(), json!(id));

        self.save(doc).await
    }

    /// The stored `date` of a document, if present.
    pub async fn date_saved(&self, id: &str) -> Result<Option<i64>> {
        let row = self
            .gateway
            .find_one(
                &format!("SELECT date FROM {} WHERE id = ?1", self.name),
                vec![SqlValue::Text(id.to_string())],
            )
            .await?;
        row.map(|r| r.integer("date")).transpose()
    }

    /// Start a deferred write batch against this database.
    pub fn batch(&self) -> Batcher {
        Batcher::new(self.gateway.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use silt_core::IndexField;
    use silt_core::IndexKind;

    #[test]
    fn test_compose_mints_32_char_id() {
        let write = compose_upsert("todos", &[], json!({"title": "x"})).unwrap();
        assert_eq!(write.id.len(), 32);
        assert_eq!(write.doc["id"], json!(write.id));

        // stored json embeds the minted id
        let stored: Value = match &write.args[1] {
            SqlValue::Text(text) => serde_json::from_str(text).unwrap(),
            other => panic!("json arg should be text, got {other:?}"),
        };
        assert_eq!(stored["id"], json!(write.id));
    }

    #[test]
    fn test_compose_projects_index_columns() {
        let indexes = vec![IndexSpec::compound(vec![
            IndexField::new("user.id"),
            IndexField::with_kind("priority", IndexKind::Int),
        ])];
        let write = compose_upsert(
            "tasks",
            &indexes,
            json!({"id": "t1", "user": {"id": "u1"}, "priority": 2}),
        )
        .unwrap();

        assert_eq!(
            write.sql,
            "INSERT INTO tasks (id, json, date, user__id, priority) VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET json = excluded.json, date = excluded.date, \
             user__id = excluded.user__id, priority = excluded.priority"
        );
        assert_eq!(write.args[3], SqlValue::Text("u1".into()));
        assert_eq!(write.args[4], SqlValue::Integer(2));
    }

    #[test]
    fn test_compose_missing_path_is_null() {
        let indexes = vec![IndexSpec::on("owner.id")];
        let write = compose_upsert("tasks", &indexes, json!({"id": "t1"})).unwrap();
        assert_eq!(write.args[3], SqlValue::Null);
    }

    #[test]
    fn test_compose_rejects_non_objects() {
        assert!(compose_upsert("todos", &[], json!([1, 2])).is_err());
        assert!(compose_upsert("todos", &[], json!({"id": 7})).is_err());
    }
}
