//! Validation for records and their fields.
//!
//! Nothing here touches a store: every check is a pure function of the value.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::types::Record;

/// Upper bound on record content, in Unicode scalar values
pub const MAX_CONTENT_CHARS: usize = 10_000;

/// A field failed validation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Validation error on `{field}`: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Importance score, always within `[1, 10]`.
///
/// Out-of-range values are rejected at construction. Clamping is available
/// through [`Importance::clamped`] for callers that have made that an explicit
/// policy decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct Importance(u8);

impl Importance {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 10;

    pub fn new(value: i64) -> Result<Self, ValidationError> {
        if value < i64::from(Self::MIN) || value > i64::from(Self::MAX) {
            return Err(ValidationError::new(
                "importance",
                format!("{value} is outside [{}, {}]", Self::MIN, Self::MAX),
            ));
        }
        Ok(Self(value as u8))
    }

    /// Force a value into range
    pub fn clamped(value: i64) -> Self {
        Self(value.clamp(i64::from(Self::MIN), i64::from(Self::MAX)) as u8)
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for Importance {
    type Error = ValidationError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Importance> for u8 {
    fn from(importance: Importance) -> Self {
        importance.0
    }
}

impl std::fmt::Display for Importance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fresh record identifier
pub fn new_id() -> Uuid {
    Uuid::new_v4()
}

/// Strip control characters (newline and tab survive) and surrounding whitespace.
pub fn sanitize_content(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect::<String>()
        .trim()
        .to_string()
}

/// Validate content that is about to become a record.
pub fn validate_content(content: &str) -> Result<(), ValidationError> {
    if content.trim().is_empty() {
        return Err(ValidationError::new("content", "must not be empty"));
    }
    let chars = content.chars().count();
    if chars > MAX_CONTENT_CHARS {
        return Err(ValidationError::new(
            "content",
            format!("{chars} characters exceeds the {MAX_CONTENT_CHARS} limit"),
        ));
    }
    if content
        .chars()
        .any(|c| c.is_control() && c != '\n' && c != '\t')
    {
        return Err(ValidationError::new(
            "content",
            "contains control characters",
        ));
    }
    Ok(())
}

impl Record {
    /// Check every field invariant of the record.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_content(&self.content)?;

        if let Some(embedding) = &self.embedding {
            if embedding.is_empty() {
                return Err(ValidationError::new("embedding", "must not be empty"));
            }
            if embedding.iter().any(|v| !v.is_finite()) {
                return Err(ValidationError::new(
                    "embedding",
                    "contains non-finite values",
                ));
            }
        }

        if self.memory_type.trim().is_empty() {
            return Err(ValidationError::new("memory_type", "must not be empty"));
        }
        if self.sub_type.trim().is_empty() {
            return Err(ValidationError::new("sub_type", "must not be empty"));
        }
        if !(self.decay_rate.is_finite() && self.decay_rate > 0.0) {
            return Err(ValidationError::new(
                "decay_rate",
                format!("{} is not a positive finite number", self.decay_rate),
            ));
        }
        if self.updated_at < self.created_at {
            return Err(ValidationError::new(
                "updated_at",
                "is earlier than created_at",
            ));
        }
        if self.previous_id == Some(self.id) {
            return Err(ValidationError::new(
                "previous_id",
                "a record cannot supersede itself",
            ));
        }
        Ok(())
    }

    /// Check that the embedding, if present, has the deployment's dimension.
    pub fn validate_dimension(&self, expected: usize) -> Result<(), ValidationError> {
        match &self.embedding {
            Some(embedding) if embedding.len() != expected => Err(ValidationError::new(
                "embedding",
                format!("dimension {} does not match {expected}", embedding.len()),
            )),
            _ => Ok(()),
        }
    }
}
