//! Decision oracle port
//!
//! The oracle triages new content against retrieved candidates and, when
//! extraction is on, splits input into atomic facts. Calls have no side
//! effects, so callers may time them out and retry freely.

pub mod prompts;
pub mod remote;
pub mod types;

pub use remote::RemoteOracle;
pub use types::{Candidate, Decision, OracleError, RawDecision};

use async_trait::async_trait;

/// Trait for decision oracles (remote LLM, scripted stubs)
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    /// Classify `content` as ADD, UPDATE, DELETE or NOOP against `candidates`.
    ///
    /// UPDATE and DELETE name their target through `target_id`.
    async fn triage(
        &self,
        content: &str,
        candidates: &[Candidate],
    ) -> Result<Decision, OracleError>;

    /// Split `content` into atomic facts. An empty result means "use the content as is".
    async fn extract_facts(&self, content: &str) -> Result<Vec<String>, OracleError>;

    /// Oracle name for logging
    fn name(&self) -> &'static str;
}
