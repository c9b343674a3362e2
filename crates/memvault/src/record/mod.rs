//! The canonical memory record, its audit trail, and validation.

pub mod history;
pub mod types;
pub mod validate;

pub use history::{Actor, HistoryEntry, NewHistoryEntry, Outcome};
pub use types::{
    DEFAULT_DECAY_RATE, DEFAULT_MEMORY_TYPE, Operation, Record, RecordState, RepairAction, now,
};
pub use validate::{
    Importance, MAX_CONTENT_CHARS, ValidationError, new_id, sanitize_content, validate_content,
};
