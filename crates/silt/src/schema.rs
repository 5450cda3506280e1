//! Collection DDL and additive index-column evolution.
//!
//! Every collection is one table with the fixed `id`/`json`/`date` spine plus
//! one type-dynamic column per declared index field. Reconciliation on open is
//! idempotent: existing columns and indexes are left alone, missing ones are
//! added. Nothing is ever dropped here.

use crate::gateway::Gateway;
use rusqlite::types::Value as SqlValue;
use silt_core::{ColumnInfo, IndexSpec, Result, SiltError};
use std::collections::HashSet;

/// Guard for names interpolated into DDL (table, column, index, trigger).
pub(crate) fn check_ident(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let head_ok = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if head_ok && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(SiltError::Schema(format!("invalid identifier '{name}'")))
    }
}

/// Read the materialized columns of a table.
pub(crate) async fn table_info(gateway: &Gateway, table: &str) -> Result<Vec<ColumnInfo>> {
    check_ident(table)?;

    let rows = gateway
        .query(&format!("PRAGMA table_info({table})"), vec![])
        .await?;

    rows.into_iter()
        .map(|row| {
            Ok(ColumnInfo {
                cid: row.integer("cid")?,
                name: row.text("name")?,
                col_type: row.opt_text("type")?.unwrap_or_default(),
                notnull: row.integer("notnull")? != 0,
                pk: row.integer("pk")? != 0,
            })
        })
        .collect()
}

/// Create the collection table and reconcile its declared indexes.
pub(crate) async fn ensure_collection(
    gateway: &Gateway,
    name: &str,
    indexes: &[IndexSpec],
) -> Result<()> {
    check_ident(name)?;

    gateway
        .run(
            &format!(
                "CREATE TABLE IF NOT EXISTS {name} \
                 (id VARCHAR(32) PRIMARY KEY, json TEXT NOT NULL, date INTEGER NOT NULL)"
            ),
            vec![],
        )
        .await?;

    let existing: HashSet<String> = table_info(gateway, name)
        .await?
        .into_iter()
        .map(|c| c.name)
        .collect();

    // Required index columns, deduplicated across specs, declaration order.
    let mut required = Vec::new();
    let mut seen = HashSet::new();
    for spec in indexes {
        for column in spec.columns() {
            check_ident(&column)?;
            if seen.insert(column.clone()) {
                required.push(column);
            }
        }
    }

    for column in &required {
        if !existing.contains(column) {
            // Type-dynamic column; a concurrent duplicate is not fatal.
            gateway
                .try_run(&format!("ALTER TABLE {name} ADD COLUMN {column}"))
                .await?;
        }
    }

    for spec in indexes {
        let index_name = spec.name();
        check_ident(&index_name)?;
        let unique = if spec.unique { "UNIQUE " } else { "" };
        gateway
            .run(
                &format!(
                    "CREATE {unique}INDEX IF NOT EXISTS {index_name} ON {name} ({})",
                    spec.columns().join(", ")
                ),
                vec![],
            )
            .await?;
    }

    Ok(())
}

/// DDL for the event log and cursor tables.
const CREATE_EVENTS: &str = "\
CREATE TABLE IF NOT EXISTS _events (
    col    VARCHAR(32) NOT NULL,
    id     VARCHAR(32) NOT NULL,
    type   VARCHAR(32) NOT NULL,
    date   INTEGER NOT NULL,
    before TEXT,
    after  TEXT
)";

const CREATE_EVENTS_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS date_col_type ON _events (date, col, type)";

const CREATE_CURSORS: &str = "\
CREATE TABLE IF NOT EXISTS _cursors (
    name VARCHAR(32) PRIMARY KEY NOT NULL,
    date INTEGER NOT NULL
)";

const CREATE_META: &str = "\
CREATE TABLE IF NOT EXISTS _meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
)";

/// Create the `_events` / `_cursors` tables used by the change feed.
pub(crate) async fn ensure_feed_tables(gateway: &Gateway) -> Result<()> {
    gateway.run(CREATE_EVENTS, vec![]).await?;
    gateway.run(CREATE_EVENTS_INDEX, vec![]).await?;
    gateway.run(CREATE_CURSORS, vec![]).await?;
    Ok(())
}

/// Create the `_meta` table and record the open parameters.
pub(crate) async fn ensure_meta(gateway: &Gateway, version: &str, description: &str) -> Result<()> {
    gateway.run(CREATE_META, vec![]).await?;
    gateway
        .run(
            "INSERT OR REPLACE INTO _meta (key, value) VALUES ('version', ?1), ('description', ?2)",
            vec![
                SqlValue::Text(version.to_string()),
                SqlValue::Text(description.to_string()),
            ],
        )
        .await?;
    Ok(())
}
