//! Decision oracle types
//!
//! The oracle speaks a loosely typed wire shape ([`RawDecision`]); the engine
//! only ever sees a [`Decision`] that has passed the contract checks here.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MemvaultError;
use crate::record::{Importance, Operation, Record};

/// The oracle-facing view of a stored record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub id: Uuid,
    pub content: String,
    pub importance: u8,
    pub memory_type: String,
    /// Cosine distance to the closest query; `None` for keyword matches
    pub distance: Option<f32>,
}

impl Candidate {
    pub fn from_record(record: &Record, distance: Option<f32>) -> Self {
        Self {
            id: record.id,
            content: record.content.clone(),
            importance: record.importance.get(),
            memory_type: record.memory_type.clone(),
            distance,
        }
    }
}

/// Decision payload as the oracle produced it, before contract checks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDecision {
    #[serde(alias = "operation", alias = "event")]
    pub op: String,
    pub importance: i64,
    #[serde(default, alias = "target", alias = "id")]
    pub target_id: Option<String>,
    #[serde(default, alias = "reason")]
    pub rationale: Option<String>,
}

/// A validated triage decision
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub op: Operation,
    pub importance: Importance,
    pub target_id: Option<Uuid>,
    pub rationale: Option<String>,
}

impl Decision {
    pub fn add(importance: Importance) -> Self {
        Self {
            op: Operation::Add,
            importance,
            target_id: None,
            rationale: None,
        }
    }

    pub fn update(target: Uuid, importance: Importance) -> Self {
        Self {
            op: Operation::Update,
            importance,
            target_id: Some(target),
            rationale: None,
        }
    }

    pub fn delete(target: Uuid, importance: Importance) -> Self {
        Self {
            op: Operation::Delete,
            importance,
            target_id: Some(target),
            rationale: None,
        }
    }

    pub fn noop(target: Option<Uuid>, importance: Importance) -> Self {
        Self {
            op: Operation::Noop,
            importance,
            target_id: target,
            rationale: None,
        }
    }

    pub fn because(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }
}

impl TryFrom<RawDecision> for Decision {
    type Error = OracleError;

    fn try_from(raw: RawDecision) -> Result<Self, Self::Error> {
        let op = raw.op.trim().parse::<Operation>().map_err(|_| {
            OracleError::violation("op", format!("unknown operation `{}`", raw.op), &raw)
        })?;

        let importance = Importance::new(raw.importance)
            .map_err(|e| OracleError::violation("importance", e.reason, &raw))?;

        let target_id = match raw.target_id.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(value) => Some(Uuid::parse_str(value).map_err(|_| {
                OracleError::violation("target_id", format!("`{value}` is not a record id"), &raw)
            })?),
        };

        if matches!(op, Operation::Update | Operation::Delete) && target_id.is_none() {
            return Err(OracleError::violation(
                "target_id",
                format!("{op} requires a target"),
                &raw,
            ));
        }

        Ok(Decision {
            op,
            importance,
            target_id,
            rationale: raw.rationale.clone(),
        })
    }
}

/// Oracle-specific errors
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    /// The oracle could not be reached or refused the request
    #[error("Oracle unavailable: {0}")]
    Unavailable(String),

    /// The oracle answered, but the answer breaks the decision contract
    #[error("Contract violation on `{field}`: {reason}")]
    ContractViolation {
        field: &'static str,
        reason: String,
        /// The offending payload, for callers with an explicit repair policy
        raw: Option<Box<RawDecision>>,
    },
}

impl OracleError {
    pub fn violation(field: &'static str, reason: impl Into<String>, raw: &RawDecision) -> Self {
        OracleError::ContractViolation {
            field,
            reason: reason.into(),
            raw: Some(Box::new(raw.clone())),
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        OracleError::ContractViolation {
            field: "payload",
            reason: reason.into(),
            raw: None,
        }
    }
}

impl From<OracleError> for MemvaultError {
    fn from(e: OracleError) -> Self {
        match e {
            OracleError::Unavailable(cause) => MemvaultError::OracleUnavailable(cause),
            OracleError::ContractViolation { field, reason, .. } => {
                MemvaultError::OracleContractViolation { field, reason }
            }
        }
    }
}
