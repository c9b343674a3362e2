//! Record types for memvault
//!
//! Defines the memory record and the enums that describe its lifecycle.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::validate::{Importance, ValidationError, new_id, sanitize_content};

/// Classification used when the caller does not supply one
pub const DEFAULT_MEMORY_TYPE: &str = "general";

/// Importance lost per idle day, before rounding
pub const DEFAULT_DECAY_RATE: f64 = 0.1;

/// Current time at the microsecond precision the stores keep
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Implements `as_str`, `Display` and `FromStr` over a fixed set of labels.
macro_rules! labelled_enum {
    ($name:ident, $field:literal { $($variant:ident => $label:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $(if s.eq_ignore_ascii_case($label) {
                    return Ok($name::$variant);
                })+
                Err(ValidationError::new($field, format!("unknown value `{s}`")))
            }
        }
    };
}

pub(crate) use labelled_enum;

/// The last operation applied to a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Add,
    Update,
    Delete,
    Noop,
}

labelled_enum!(Operation, "operation" {
    Add => "ADD",
    Update => "UPDATE",
    Delete => "DELETE",
    Noop => "NOOP",
});

/// Where a record sits in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordState {
    /// Present in the metadata store and, when it has an embedding, in the index
    Active,
    /// Replaced by a newer record; kept for the chain, removed from the index
    Superseded,
    /// The two stores disagree after a failed rollback
    Inconsistent,
}

labelled_enum!(RecordState, "state" {
    Active => "active",
    Superseded => "superseded",
    Inconsistent => "inconsistent",
});

/// Roll-forward step that brings an inconsistent record back in line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepairAction {
    /// Put the vector in the index and mark the record active
    Index,
    /// Remove the vector and mark the record superseded
    Unindex,
    /// Remove the vector and then the record
    Purge,
}

labelled_enum!(RepairAction, "repair" {
    Index => "index",
    Unindex => "unindex",
    Purge => "purge",
});

/// A single unit of agent memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Immutable identifier
    pub id: Uuid,
    /// Sanitized text of the memory
    pub content: String,
    /// Vector for the content, present iff the record is indexed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub importance: Importance,
    pub memory_type: String,
    pub sub_type: String,
    /// Caller-owned key/value data, opaque to the engine
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
    pub access_count: u32,
    /// Per-record decay coefficient, per idle day
    pub decay_rate: f64,
    /// Record this one superseded
    pub previous_id: Option<Uuid>,
    pub(crate) operation: Operation,
    pub(crate) state: RecordState,
    pub(crate) superseded_by: Option<Uuid>,
    pub(crate) repair: Option<RepairAction>,
}

impl Record {
    /// Create a new record with default classification and timestamps set to now.
    pub fn new(content: impl AsRef<str>, importance: Importance) -> Self {
        let now = now();
        Self {
            id: new_id(),
            content: sanitize_content(content.as_ref()),
            embedding: None,
            importance,
            memory_type: DEFAULT_MEMORY_TYPE.to_string(),
            sub_type: DEFAULT_MEMORY_TYPE.to_string(),
            metadata: Map::new(),
            created_at: now,
            updated_at: now,
            accessed_at: now,
            access_count: 0,
            decay_rate: DEFAULT_DECAY_RATE,
            previous_id: None,
            operation: Operation::Add,
            state: RecordState::Active,
            superseded_by: None,
            repair: None,
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_memory_type(mut self, memory_type: impl Into<String>) -> Self {
        self.memory_type = memory_type.into();
        self
    }

    pub fn with_sub_type(mut self, sub_type: impl Into<String>) -> Self {
        self.sub_type = sub_type.into();
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_decay_rate(mut self, decay_rate: f64) -> Self {
        self.decay_rate = decay_rate;
        self
    }

    /// Build the record that replaces this one.
    ///
    /// Classification, metadata and decay rate carry over; the new record gets
    /// a fresh id and links back through `previous_id`.
    pub fn superseding(&self, content: impl AsRef<str>, importance: Importance) -> Self {
        let mut next = Record::new(content, importance)
            .with_memory_type(self.memory_type.clone())
            .with_sub_type(self.sub_type.clone())
            .with_metadata(self.metadata.clone())
            .with_decay_rate(self.decay_rate);
        next.previous_id = Some(self.id);
        next.operation = Operation::Update;
        next
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn state(&self) -> RecordState {
        self.state
    }

    pub fn superseded_by(&self) -> Option<Uuid> {
        self.superseded_by
    }

    pub fn repair(&self) -> Option<RepairAction> {
        self.repair
    }

    pub fn is_active(&self) -> bool {
        self.state == RecordState::Active
    }

    pub fn is_indexed(&self) -> bool {
        self.embedding.is_some()
    }

    /// Advance `updated_at`, never moving it backwards or before creation.
    pub fn stamp_updated(&mut self, at: DateTime<Utc>) {
        self.updated_at = at.max(self.updated_at).max(self.created_at);
    }

    /// Record a touching read
    pub fn mark_accessed(&mut self, at: DateTime<Utc>) {
        self.access_count = self.access_count.saturating_add(1);
        self.accessed_at = at.max(self.accessed_at);
    }

    /// Ranking signal: importance reinforced by use and faded by idle hours.
    pub fn strength(&self, now: DateTime<Utc>) -> f64 {
        let idle_hours = (now - self.accessed_at).num_seconds().max(0) as f64 / 3600.0;
        f64::from(self.importance.get()) * (1.0 + f64::from(self.access_count))
            / (1.0 + idle_hours)
    }

    pub(crate) fn set_operation(&mut self, operation: Operation) {
        self.operation = operation;
    }

    pub(crate) fn mark_superseded(&mut self, by: Uuid, at: DateTime<Utc>) {
        self.state = RecordState::Superseded;
        self.superseded_by = Some(by);
        self.operation = Operation::Update;
        self.stamp_updated(at);
    }

    pub(crate) fn mark_inconsistent(&mut self, repair: RepairAction) {
        self.state = RecordState::Inconsistent;
        self.repair = Some(repair);
    }

    pub(crate) fn mark_repaired(&mut self, state: RecordState, at: DateTime<Utc>) {
        self.state = state;
        self.repair = None;
        self.stamp_updated(at);
    }
}
