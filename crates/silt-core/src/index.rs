//! Secondary index specifications and the path-to-column naming contract.
//!
//! A dotted document path like `owner.id` is materialized as a table column
//! named `owner__id`; a compound index over several paths is named by joining
//! the member columns with `___`. Both directions of the mapping are part of
//! the persisted format and must not change.

use serde::{Deserialize, Serialize};

/// Storage kind declared for an indexed column.
///
/// Columns are added without a SQL type (SQLite is type-dynamic); the kind is
/// carried as declaration metadata and for schema introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IndexKind {
    V8,
    V16,
    #[default]
    V32,
    Int,
    Real,
    Boolean,
    Blob,
    Text,
}

/// One indexed field: a dotted path into the document plus its kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexField {
    pub path: String,

    #[serde(default)]
    pub kind: IndexKind,
}

impl IndexField {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: IndexKind::default(),
        }
    }

    pub fn with_kind(path: impl Into<String>, kind: IndexKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    /// Column backing this field (`owner.id` -> `owner__id`).
    pub fn column(&self) -> String {
        path_to_column(&self.path)
    }
}

/// A declared secondary index: one or more fields plus a uniqueness flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub fields: Vec<IndexField>,

    #[serde(default)]
    pub unique: bool,
}

impl IndexSpec {
    /// Single-field index with the default kind.
    pub fn on(path: impl Into<String>) -> Self {
        Self {
            fields: vec![IndexField::new(path)],
            unique: false,
        }
    }

    /// Single-field index with an explicit kind.
    pub fn on_with(path: impl Into<String>, kind: IndexKind) -> Self {
        Self {
            fields: vec![IndexField::with_kind(path, kind)],
            unique: false,
        }
    }

    /// Compound index over an ordered list of fields.
    pub fn compound(fields: Vec<IndexField>) -> Self {
        Self {
            fields,
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Index name: member columns joined pairwise by `___`.
    pub fn name(&self) -> String {
        self.fields
            .iter()
            .map(|f| f.column())
            .collect::<Vec<_>>()
            .join("___")
    }

    /// Columns covered by this index, in field order.
    pub fn columns(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.column()).collect()
    }
}

/// Dots become `__` so the path survives as a legal column name.
pub fn path_to_column(path: &str) -> String {
    path.replace('.', "__")
}

/// Inverse of [`path_to_column`], needed when reading schema back.
pub fn column_to_path(column: &str) -> String {
    column.replace("__", ".")
}
