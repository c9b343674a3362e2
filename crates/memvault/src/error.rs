//! Error types for memvault

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::record::{Operation, ValidationError};

/// Main error type for memvault operations
#[derive(Error, Debug)]
pub enum MemvaultError {
    /// Bad input shape. Fatal to the call, never retried.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Embedding backend could not be reached or refused the request
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Decision oracle could not be reached or refused the request
    #[error("Decision oracle unavailable: {0}")]
    OracleUnavailable(String),

    /// Decision oracle answered with a payload that breaks the decision contract
    #[error("Decision oracle contract violation on `{field}`: {reason}")]
    OracleContractViolation { field: &'static str, reason: String },

    /// Connection-level store failure (busy, locked, unreachable)
    #[error("{backend} store unavailable: {cause}")]
    StoreUnavailable { backend: &'static str, cause: String },

    /// Store failure that a retry will not fix (schema, decoding, constraint)
    #[error("{backend} store error: {cause}")]
    Storage { backend: &'static str, cause: String },

    /// A port call did not complete within its budget
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Record not found: {0}")]
    NotFound(Uuid),

    /// The record changed between triage and apply
    #[error("Conflicting write on record {id}: {reason}")]
    Conflict { id: Uuid, reason: String },

    /// A unit of work failed and was fully rolled back
    #[error("{operation} failed{}: {cause}", fmt_record(.record_id))]
    MemoryOperationFailed {
        operation: Operation,
        record_id: Option<Uuid>,
        cause: Box<MemvaultError>,
    },

    /// A unit of work failed and its rollback failed too; the records are flagged
    #[error("{operation} left records {record_ids:?} inconsistent: {cause}")]
    InconsistentState {
        operation: Operation,
        record_ids: Vec<Uuid>,
        cause: Box<MemvaultError>,
    },

    /// A unit of work reached both stores but its history entries were not
    /// written. The mutation stands; retrying it would apply it twice.
    #[error("{operation} applied to record {record_id} but its history entry is missing: {cause}")]
    HistoryMissing {
        operation: Operation,
        record_id: Uuid,
        cause: Box<MemvaultError>,
    },

    /// Reset did not clear every backend
    #[error("Reset incomplete (index: {}, metadata: {})", fmt_reset(.index), fmt_reset(.metadata))]
    Reset {
        index: Option<String>,
        metadata: Option<String>,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

fn fmt_record(id: &Option<Uuid>) -> String {
    id.map(|id| format!(" for record {id}")).unwrap_or_default()
}

fn fmt_reset(cause: &Option<String>) -> &str {
    cause.as_deref().unwrap_or("ok")
}

impl MemvaultError {
    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MemvaultError::EmbeddingUnavailable(_)
                | MemvaultError::OracleUnavailable(_)
                | MemvaultError::StoreUnavailable { .. }
                | MemvaultError::Timeout { .. }
        )
    }
}

impl From<serde_json::Error> for MemvaultError {
    fn from(e: serde_json::Error) -> Self {
        MemvaultError::Serialization(e.to_string())
    }
}

/// Result type alias for memvault operations
pub type Result<T> = std::result::Result<T, MemvaultError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        let unavailable = MemvaultError::StoreUnavailable {
            backend: "sqlite",
            cause: "database is locked".to_string(),
        };
        assert!(unavailable.is_transient());
        assert!(
            MemvaultError::Timeout {
                operation: "vector upsert",
                after: Duration::from_millis(10),
            }
            .is_transient()
        );
        assert!(!MemvaultError::NotFound(Uuid::new_v4()).is_transient());
        assert!(
            !MemvaultError::Storage {
                backend: "sqlite",
                cause: "constraint failed".to_string(),
            }
            .is_transient()
        );
    }

    #[test]
    fn operation_failed_names_record() {
        let id = Uuid::new_v4();
        let err = MemvaultError::MemoryOperationFailed {
            operation: Operation::Add,
            record_id: Some(id),
            cause: Box::new(MemvaultError::Timeout {
                operation: "vector upsert",
                after: Duration::from_secs(1),
            }),
        };
        let message = err.to_string();
        assert!(message.starts_with("ADD failed for record"));
        assert!(message.contains(&id.to_string()));
    }

    #[test]
    fn history_missing_is_not_retryable() {
        let id = Uuid::new_v4();
        let err = MemvaultError::HistoryMissing {
            operation: Operation::Add,
            record_id: id,
            cause: Box::new(MemvaultError::StoreUnavailable {
                backend: "sqlite",
                cause: "database is locked".to_string(),
            }),
        };
        assert!(!err.is_transient());
        assert!(err.to_string().contains("applied to record"));
    }

    #[test]
    fn reset_error_reports_each_backend() {
        let err = MemvaultError::Reset {
            index: Some("lance unreachable".to_string()),
            metadata: None,
        };
        assert_eq!(
            err.to_string(),
            "Reset incomplete (index: lance unreachable, metadata: ok)"
        );
    }
}
