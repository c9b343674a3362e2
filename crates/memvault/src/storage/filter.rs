//! Filter types for record listing and search
//!
//! A filter renders to a parameterised SQL clause for the metadata store and
//! can also be evaluated in memory against hydrated search hits.

use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use serde_json::Value;

use crate::record::{Importance, Record, RecordState};

/// Filter criteria for record queries.
///
/// All fields are optional - when `None`, that filter is not applied.
/// Multiple filters are combined with AND logic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    /// Match any of these memory types
    pub memory_types: Option<Vec<String>>,
    pub sub_type: Option<String>,
    /// Match any of these lifecycle states
    pub states: Option<Vec<RecordState>>,
    /// Minimum importance (inclusive)
    pub min_importance: Option<Importance>,
    /// Only records created at or after this time
    pub since: Option<DateTime<Utc>>,
    /// Metadata key/value pairs that must all match exactly
    pub metadata: Vec<(String, Value)>,
}

/// A WHERE clause fragment with positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SqlClause {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl RecordFilter {
    /// Create a new empty filter (no filtering applied)
    pub fn new() -> Self {
        Self::default()
    }

    /// Only active records
    pub fn active() -> Self {
        Self::new().with_states(vec![RecordState::Active])
    }

    pub fn with_memory_types(mut self, types: Vec<String>) -> Self {
        self.memory_types = Some(types);
        self
    }

    pub fn with_sub_type(mut self, sub_type: impl Into<String>) -> Self {
        self.sub_type = Some(sub_type.into());
        self
    }

    pub fn with_states(mut self, states: Vec<RecordState>) -> Self {
        self.states = Some(states);
        self
    }

    pub fn with_min_importance(mut self, importance: Importance) -> Self {
        self.min_importance = Some(importance);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    /// Require `metadata[key] == value`; this is how user, agent and run
    /// scoping is expressed.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }

    /// Check if this filter is empty (no conditions set)
    pub fn is_empty(&self) -> bool {
        self.memory_types.is_none()
            && self.sub_type.is_none()
            && self.states.is_none()
            && self.min_importance.is_none()
            && self.since.is_none()
            && self.metadata.is_empty()
    }

    /// Build a SQL WHERE clause from this filter.
    /// Returns `None` if no filters are set.
    pub fn to_sql(&self) -> Option<SqlClause> {
        let mut conditions = Vec::new();
        let mut params = Vec::new();

        if let Some(types) = self.memory_types.as_ref().filter(|t| !t.is_empty()) {
            let placeholders = vec!["?"; types.len()].join(", ");
            conditions.push(format!("memory_type IN ({placeholders})"));
            params.extend(types.iter().cloned().map(SqlValue::Text));
        }

        if let Some(sub_type) = &self.sub_type {
            conditions.push("sub_type = ?".to_string());
            params.push(SqlValue::Text(sub_type.clone()));
        }

        if let Some(states) = self.states.as_ref().filter(|s| !s.is_empty()) {
            let placeholders = vec!["?"; states.len()].join(", ");
            conditions.push(format!("state IN ({placeholders})"));
            params.extend(states.iter().map(|s| SqlValue::Text(s.as_str().to_string())));
        }

        if let Some(importance) = self.min_importance {
            conditions.push("importance >= ?".to_string());
            params.push(SqlValue::Integer(i64::from(importance.get())));
        }

        // created_at is stored as microseconds since epoch
        if let Some(since) = &self.since {
            conditions.push("created_at >= ?".to_string());
            params.push(SqlValue::Integer(since.timestamp_micros()));
        }

        for (key, value) in &self.metadata {
            conditions.push("json_extract(metadata, ?) = ?".to_string());
            params.push(SqlValue::Text(json_path(key)));
            params.push(json_scalar(value));
        }

        if conditions.is_empty() {
            None
        } else {
            Some(SqlClause {
                sql: conditions.join(" AND "),
                params,
            })
        }
    }

    /// Evaluate the filter against a record in memory.
    pub fn matches(&self, record: &Record) -> bool {
        if let Some(types) = self.memory_types.as_ref().filter(|t| !t.is_empty()) {
            if !types.iter().any(|t| *t == record.memory_type) {
                return false;
            }
        }
        if let Some(sub_type) = &self.sub_type {
            if *sub_type != record.sub_type {
                return false;
            }
        }
        if let Some(states) = self.states.as_ref().filter(|s| !s.is_empty()) {
            if !states.contains(&record.state()) {
                return false;
            }
        }
        if let Some(importance) = self.min_importance {
            if record.importance < importance {
                return false;
            }
        }
        if let Some(since) = self.since {
            if record.created_at < since {
                return false;
            }
        }
        self.metadata
            .iter()
            .all(|(key, value)| record.metadata.get(key) == Some(value))
    }
}

/// JSON path for a top-level key, quoted so any key text is literal.
fn json_path(key: &str) -> String {
    format!("$.\"{}\"", key.replace('\\', "\\\\").replace('"', "\\\""))
}

/// The value `json_extract` yields for a JSON value.
fn json_scalar(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        // Containers come back as minified JSON text
        other => SqlValue::Text(other.to_string()),
    }
}
