//! Structured queries and their translation to SQL.
//!
//! A query is an ordered list of field conditions joined by `AND`. The same
//! operator set is implemented twice on purpose: once as SQL emission and once
//! as the in-memory [`Query::matches`] predicate, so server-side and
//! client-side filtering agree.

use crate::gateway::json_to_sql;
use rusqlite::types::Value as SqlValue;
use serde_json::Value;
use silt_core::column_to_path;

/// Comparison operator for one query clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Gt,
    Lt,
    Ge,
    Le,
    Ne,
    In,
    NotIn,
    /// Raw SQL `LIKE`; the caller supplies wildcards.
    Like,
}

impl Op {
    pub fn sql(&self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Gt => ">",
            Op::Lt => "<",
            Op::Ge => ">=",
            Op::Le => "<=",
            Op::Ne => "!=",
            Op::In => "IN",
            Op::NotIn => "NOT IN",
            Op::Like => "LIKE",
        }
    }
}

#[derive(Debug, Clone)]
struct Clause {
    field: String,
    op: Op,
    value: Value,
}

/// An ordered conjunction of field conditions.
///
/// Fields name table columns, so an indexed path like `user.id` is queried by
/// its column name `user__id`.
#[derive(Debug, Clone, Default)]
pub struct Query {
    clauses: Vec<Clause>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Equality condition.
    pub fn field(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, Op::Eq, value)
    }

    /// Condition with an explicit operator. For `In`/`NotIn` the value must
    /// be an array; each element becomes one placeholder.
    pub fn filter(mut self, field: impl Into<String>, op: Op, value: impl Into<Value>) -> Self {
        self.clauses.push(Clause {
            field: field.into(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Whether every clause is a bare equality (required by `delete_one`).
    pub fn is_equality_only(&self) -> bool {
        self.clauses.iter().all(|c| c.op == Op::Eq)
    }

    /// Emit the `WHERE` tail and its arguments, clause order preserved.
    pub fn to_where(&self) -> (String, Vec<SqlValue>) {
        let mut parts = Vec::with_capacity(self.clauses.len());
        let mut args = Vec::new();

        for clause in &self.clauses {
            match clause.op {
                Op::In | Op::NotIn => {
                    let elements: &[Value] = match &clause.value {
                        Value::Array(items) => items,
                        other => std::slice::from_ref(other),
                    };
                    let placeholders = vec!["?"; elements.len()].join(", ");
                    parts.push(format!(
                        "{} {} ({placeholders})",
                        clause.field,
                        clause.op.sql()
                    ));
                    args.extend(elements.iter().map(json_to_sql));
                }
                op => {
                    parts.push(format!("{} {} ?", clause.field, op.sql()));
                    args.push(json_to_sql(&clause.value));
                }
            }
        }

        (parts.join(" AND "), args)
    }

    /// Full document select for a collection.
    pub fn to_sql(&self, collection: &str) -> (String, Vec<SqlValue>) {
        let base = format!("SELECT id, json, date FROM {collection}");
        if self.clauses.is_empty() {
            return (base, Vec::new());
        }
        let (where_sql, args) = self.to_where();
        (format!("{base} WHERE {where_sql}"), args)
    }

    /// Query-plan diagnostics variant of [`to_sql`](Self::to_sql).
    pub fn explain(&self, collection: &str) -> (String, Vec<SqlValue>) {
        let (sql, args) = self.to_sql(collection);
        (format!("EXPLAIN QUERY PLAN {sql}"), args)
    }

    /// Evaluate this query against an in-memory document.
    ///
    /// Field names are column names; they are mapped back to dotted paths
    /// before lookup.
    pub fn matches(&self, doc: &Value) -> bool {
        self.clauses.iter().all(|clause| {
            let path = column_to_path(&clause.field);
            let actual = path_lookup(doc, &path).unwrap_or(&Value::Null);
            clause_matches(clause.op, actual, &clause.value)
        })
    }
}

/// Resolve a dotted path against a document.
pub(crate) fn path_lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn clause_matches(op: Op, actual: &Value, expected: &Value) -> bool {
    match op {
        Op::Eq => loose_eq(actual, expected),
        Op::Ne => !loose_eq(actual, expected),
        Op::Gt => compare(actual, expected).map(|o| o.is_gt()).unwrap_or(false),
        Op::Lt => compare(actual, expected).map(|o| o.is_lt()).unwrap_or(false),
        Op::Ge => compare(actual, expected).map(|o| o.is_ge()).unwrap_or(false),
        Op::Le => compare(actual, expected).map(|o| o.is_le()).unwrap_or(false),
        Op::In => match expected {
            Value::Array(items) => items.iter().any(|item| loose_eq(actual, item)),
            other => loose_eq(actual, other),
        },
        Op::NotIn => match expected {
            Value::Array(items) => !items.iter().any(|item| loose_eq(actual, item)),
            other => !loose_eq(actual, other),
        },
        Op::Like => match (actual, expected) {
            (Value::String(text), Value::String(pattern)) => like_match(pattern, text),
            _ => false,
        },
    }
}

/// Equality after the SQL projection, so `true` matches the stored `1`.
fn loose_eq(a: &Value, b: &Value) -> bool {
    json_to_sql(a) == json_to_sql(b)
}

fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// SQL `LIKE` semantics: `%` any run, `_` any one char, ASCII case-insensitive.
fn like_match(pattern: &str, text: &str) -> bool {
    fn rec(p: &[u8], t: &[u8]) -> bool {
        match p.first() {
            None => t.is_empty(),
            Some(b'%') => rec(&p[1..], t) || (!t.is_empty() && rec(p, &t[1..])),
            Some(b'_') => !t.is_empty() && rec(&p[1..], &t[1..]),
            Some(c) => {
                t.first().map(|d| c.eq_ignore_ascii_case(d)).unwrap_or(false)
                    && rec(&p[1..], &t[1..])
            }
        }
    }
    rec(pattern.as_bytes(), text.as_bytes())
}
