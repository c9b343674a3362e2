use std::fmt;

use memvault::MemvaultError;

/// Process exit status of a failed command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Failure = 1,
    /// Bad arguments or input rejected before anything was written
    Usage = 2,
    NotFound = 3,
    /// The record changed underneath the command; rerunning may succeed
    Conflict = 4,
    /// A write landed partially; run `memvault reconcile`
    Inconsistent = 5,
    /// A backend or the oracle could not be reached
    Unavailable = 6,
}

#[derive(Debug)]
pub struct CliError {
    message: String,
    status: ExitStatus,
}

impl CliError {
    pub fn new(message: impl Into<String>, status: ExitStatus) -> Self {
        Self {
            message: message.into(),
            status,
        }
    }

    pub fn status(&self) -> ExitStatus {
        self.status
    }

    pub fn exit_code(&self) -> i32 {
        self.status as i32
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        if self.status == ExitStatus::Inconsistent {
            write!(f, " (run `memvault reconcile` to repair)")?;
        }
        Ok(())
    }
}

impl std::error::Error for CliError {}

impl From<String> for CliError {
    fn from(s: String) -> Self {
        CliError::new(s, ExitStatus::Usage)
    }
}

impl From<&str> for CliError {
    fn from(s: &str) -> Self {
        CliError::new(s, ExitStatus::Usage)
    }
}

fn status_of(e: &MemvaultError) -> ExitStatus {
    match e {
        MemvaultError::Validation(_) | MemvaultError::Config(_) => ExitStatus::Usage,
        MemvaultError::NotFound(_) => ExitStatus::NotFound,
        MemvaultError::Conflict { .. } => ExitStatus::Conflict,
        MemvaultError::InconsistentState { .. } | MemvaultError::HistoryMissing { .. } => {
            ExitStatus::Inconsistent
        }
        MemvaultError::EmbeddingUnavailable(_)
        | MemvaultError::OracleUnavailable(_)
        | MemvaultError::StoreUnavailable { .. }
        | MemvaultError::Timeout { .. } => ExitStatus::Unavailable,
        MemvaultError::MemoryOperationFailed { cause, .. } => status_of(cause),
        _ => ExitStatus::Failure,
    }
}

impl From<MemvaultError> for CliError {
    fn from(e: MemvaultError) -> Self {
        CliError::new(e.to_string(), status_of(&e))
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        CliError::new(format!("JSON error: {e}"), ExitStatus::Failure)
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError::new(format!("IO error: {e}"), ExitStatus::Failure)
    }
}

pub type CliResult<T> = Result<T, CliError>;
