//! Domain types for documents and change events.
//!
//! Change events exist in two forms: the raw [`EventRecord`] as stored in the
//! `_events` table (`before`/`after` are serialized JSON text), and the
//! inflated [`ChangeEvent`] handed to subscribers (`before`/`after` parsed
//! into values, with per-kind nullability encoded in the [`Change`] variants).

use crate::error::{Result, SiltError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// A document is a JSON object keyed by a 32-character string `id`.
pub type Document = Value;

/// Kind of a document mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Insert,
    Update,
    /// Insert-or-update; subscribing to `Write` also matches `Insert` and `Update`.
    Write,
    Delete,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Insert => "insert",
            EventKind::Update => "update",
            EventKind::Write => "write",
            EventKind::Delete => "delete",
        }
    }

    /// Whether a subscription to `self` should receive an event of `kind`.
    pub fn accepts(&self, kind: EventKind) -> bool {
        *self == kind
            || (*self == EventKind::Write
                && matches!(
                    kind,
                    EventKind::Insert | EventKind::Update | EventKind::Write
                ))
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = SiltError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "insert" => Ok(EventKind::Insert),
            "update" => Ok(EventKind::Update),
            "write" => Ok(EventKind::Write),
            "delete" => Ok(EventKind::Delete),
            other => Err(SiltError::Serialization(format!(
                "unknown event kind '{other}'"
            ))),
        }
    }
}

/// An `_events` row as stored: JSON payloads still serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub collection: String,
    pub id: String,
    pub kind: EventKind,
    /// Unix milliseconds, computed inside the trigger.
    pub date: i64,
    pub before: Option<String>,
    pub after: Option<String>,
}

impl EventRecord {
    /// Parse the serialized payloads into a [`ChangeEvent`].
    ///
    /// Fails with [`SiltError::Serialization`] when a payload required by the
    /// event kind is missing or is not valid JSON.
    pub fn inflate(self) -> Result<ChangeEvent> {
        let parse = |side: &'static str, text: &str| -> Result<Value> {
            serde_json::from_str(text).map_err(|e| {
                SiltError::Serialization(format!(
                    "bad {side} payload for {}/{}: {e}",
                    self.collection, self.id
                ))
            })
        };

        let before = self.before.as_deref().map(|t| parse("before", t)).transpose()?;
        let after = self.after.as_deref().map(|t| parse("after", t)).transpose()?;

        let missing = |side: &str| {
            SiltError::Serialization(format!(
                "{} event for {}/{} is missing its {side} payload",
                self.kind, self.collection, self.id
            ))
        };

        let change = match self.kind {
            EventKind::Insert => Change::Insert {
                after: after.ok_or_else(|| missing("after"))?,
            },
            EventKind::Update => Change::Update {
                before: before.ok_or_else(|| missing("before"))?,
                after: after.ok_or_else(|| missing("after"))?,
            },
            EventKind::Write => Change::Write {
                before,
                after: after.ok_or_else(|| missing("after"))?,
            },
            EventKind::Delete => Change::Delete {
                before: before.ok_or_else(|| missing("before"))?,
            },
        };

        Ok(ChangeEvent {
            collection: self.collection,
            id: self.id,
            date: self.date,
            change,
        })
    }
}

/// A document mutation delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub collection: String,
    pub id: String,
    /// Unix milliseconds of the mutation.
    pub date: i64,
    pub change: Change,
}

/// The mutation itself, with per-kind payload nullability.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Insert { after: Value },
    Update { before: Value, after: Value },
    /// A `write` trigger fired; `before` is absent when the row was inserted.
    Write { before: Option<Value>, after: Value },
    Delete { before: Value },
}

impl ChangeEvent {
    pub fn kind(&self) -> EventKind {
        match self.change {
            Change::Insert { .. } => EventKind::Insert,
            Change::Update { .. } => EventKind::Update,
            Change::Write { .. } => EventKind::Write,
            Change::Delete { .. } => EventKind::Delete,
        }
    }

    /// Document state before the mutation, if any.
    pub fn before(&self) -> Option<&Value> {
        match &self.change {
            Change::Insert { .. } => None,
            Change::Update { before, .. } => Some(before),
            Change::Write { before, .. } => before.as_ref(),
            Change::Delete { before } => Some(before),
        }
    }

    /// Document state after the mutation, if any.
    pub fn after(&self) -> Option<&Value> {
        match &self.change {
            Change::Insert { after } => Some(after),
            Change::Update { after, .. } => Some(after),
            Change::Write { after, .. } => Some(after),
            Change::Delete { .. } => None,
        }
    }
}

/// One column from `PRAGMA table_info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub cid: i64,
    pub name: String,
    /// Declared SQL type; empty for type-dynamic index columns.
    pub col_type: String,
    pub notnull: bool,
    pub pk: bool,
}
