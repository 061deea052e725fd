//! Row filters shared by remote selects and in-memory cache reads.
//!
//! The local store has no query language, so the same filter a remote select
//! sends as query parameters is evaluated row by row against the cached
//! collection when the read falls back to local data.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::local_db_model::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Gte,
    Lt,
}

impl FilterOp {
    /// PostgREST operator prefix.
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub column: String,
    pub op: FilterOp,
    pub value: JsonValue,
}

/// Conjunction of conditions. An empty filter matches every row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub conditions: Vec<Condition>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(self, column: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.with(column, FilterOp::Eq, value)
    }

    pub fn gte(self, column: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.with(column, FilterOp::Gte, value)
    }

    pub fn lt(self, column: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.with(column, FilterOp::Lt, value)
    }

    fn with(mut self, column: impl Into<String>, op: FilterOp, value: impl Into<JsonValue>) -> Self {
        self.conditions.push(Condition {
            column: column.into(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn matches(&self, row: &Record) -> bool {
        self.conditions.iter().all(|cond| {
            let Some(field) = row.get(&cond.column) else {
                return false;
            };
            match (cond.op, compare(field, &cond.value)) {
                (FilterOp::Eq, Some(Ordering::Equal)) => true,
                (FilterOp::Gte, Some(Ordering::Greater | Ordering::Equal)) => true,
                (FilterOp::Lt, Some(Ordering::Less)) => true,
                _ => false,
            }
        })
    }

    /// Keeps only the matching rows.
    pub fn apply(&self, rows: Vec<Record>) -> Vec<Record> {
        if self.is_empty() {
            return rows;
        }
        rows.into_iter().filter(|row| self.matches(row)).collect()
    }

    /// Renders as `(column, "op.value")` query pairs.
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        self.conditions
            .iter()
            .map(|cond| {
                let value = match &cond.value {
                    JsonValue::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (cond.column.clone(), format!("{}.{}", cond.op.as_str(), value))
            })
            .collect()
    }
}

/// Numbers compare numerically, strings lexicographically (which orders ISO
/// dates correctly), booleans only for equality. Mixed types never match.
fn compare(left: &JsonValue, right: &JsonValue) -> Option<Ordering> {
    match (left, right) {
        (JsonValue::Number(a), JsonValue::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (JsonValue::String(a), JsonValue::String(b)) => Some(a.cmp(b)),
        (JsonValue::Bool(a), JsonValue::Bool(b)) if a == b => Some(Ordering::Equal),
        _ => None,
    }
}
