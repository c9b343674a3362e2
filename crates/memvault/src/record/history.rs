//! Append-only audit trail of record mutations

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::{Operation, labelled_enum};
use super::validate::ValidationError;

/// Who asked for a mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Actor {
    /// The triage pipeline
    Engine,
    /// A direct caller request (explicit add or delete)
    User,
    /// The decay scheduler
    Scheduler,
    /// The reconciliation sweep
    Reconciler,
}

labelled_enum!(Actor, "actor" {
    Engine => "engine",
    User => "user",
    Scheduler => "scheduler",
    Reconciler => "reconciler",
});

/// How a unit of work ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Applied,
    Inconsistent,
}

labelled_enum!(Outcome, "outcome" {
    Applied => "applied",
    Inconsistent => "inconsistent",
});

/// A persisted audit row. Never updated, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Store-assigned, strictly increasing
    pub sequence: i64,
    /// Client-assigned; a commit that is retried appends the entry once
    pub entry_id: Uuid,
    pub record_id: Uuid,
    pub operation: Operation,
    pub actor: Actor,
    pub outcome: Outcome,
    pub timestamp: DateTime<Utc>,
    pub old_content: Option<String>,
    pub new_content: Option<String>,
    /// The other record of a supersede pair
    pub related_id: Option<Uuid>,
    pub detail: Option<String>,
}

/// An audit row waiting for its sequence number
#[derive(Debug, Clone, PartialEq)]
pub struct NewHistoryEntry {
    pub entry_id: Uuid,
    pub record_id: Uuid,
    pub operation: Operation,
    pub actor: Actor,
    pub outcome: Outcome,
    pub timestamp: DateTime<Utc>,
    pub old_content: Option<String>,
    pub new_content: Option<String>,
    pub related_id: Option<Uuid>,
    pub detail: Option<String>,
}

impl NewHistoryEntry {
    pub fn new(record_id: Uuid, operation: Operation, actor: Actor) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            record_id,
            operation,
            actor,
            outcome: Outcome::Applied,
            timestamp: super::types::now(),
            old_content: None,
            new_content: None,
            related_id: None,
            detail: None,
        }
    }

    pub fn old_content(mut self, content: impl Into<String>) -> Self {
        self.old_content = Some(content.into());
        self
    }

    pub fn new_content(mut self, content: impl Into<String>) -> Self {
        self.new_content = Some(content.into());
        self
    }

    pub fn related(mut self, id: Uuid) -> Self {
        self.related_id = Some(id);
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// The entry recording that the unit of work left the stores apart.
    /// It is a separate row from the applied entry, so it gets its own id.
    pub fn inconsistent(mut self) -> Self {
        self.entry_id = Uuid::new_v4();
        self.outcome = Outcome::Inconsistent;
        self
    }

    pub fn with_sequence(self, sequence: i64) -> HistoryEntry {
        HistoryEntry {
            sequence,
            entry_id: self.entry_id,
            record_id: self.record_id,
            operation: self.operation,
            actor: self.actor,
            outcome: self.outcome,
            timestamp: self.timestamp,
            old_content: self.old_content,
            new_content: self.new_content,
            related_id: self.related_id,
            detail: self.detail,
        }
    }
}
