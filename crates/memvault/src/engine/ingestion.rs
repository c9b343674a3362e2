//! Triage pipeline and direct insertion

use std::collections::HashSet;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::MemoryEngine;
use crate::config::ImportancePolicy;
use crate::error::{MemvaultError, Result};
use crate::oracle::{Candidate, Decision, DecisionOracle, OracleError, RawDecision};
use crate::record::{Actor, Importance, Operation, Record, sanitize_content, validate_content};

/// Caller-supplied attributes for records created by `infer`
#[derive(Debug, Clone, Default)]
pub struct InferOptions {
    pub memory_type: Option<String>,
    pub sub_type: Option<String>,
    /// Stored on new records; `user_id`, `agent_id` and `run_id` also scope
    /// retrieval
    pub metadata: Map<String, Value>,
}

/// Options for direct insertion
#[derive(Debug, Clone, Default)]
pub struct AddOptions {
    /// Defaults to `engine.default_importance`
    pub importance: Option<Importance>,
    pub memory_type: Option<String>,
    pub sub_type: Option<String>,
    pub metadata: Map<String, Value>,
}

/// Pipeline stage, for logging
#[derive(Debug, Clone, Copy)]
enum Stage {
    Extract,
    Retrieve,
    Triage,
    Apply,
    Done,
}

impl Stage {
    fn as_str(self) -> &'static str {
        match self {
            Stage::Extract => "extract",
            Stage::Retrieve => "retrieve",
            Stage::Triage => "triage",
            Stage::Apply => "apply",
            Stage::Done => "done",
        }
    }
}

impl MemoryEngine {
    /// Decide what `text` means for the store and apply it.
    pub async fn infer(&self, text: &str) -> Result<Record> {
        self.infer_with(text, InferOptions::default()).await
    }

    /// `infer` with classification and metadata for any record it creates.
    ///
    /// Returns the added or replacement record for ADD and UPDATE, the
    /// removed record for DELETE, and for NOOP the matched record (or an
    /// unsaved record carrying the NOOP history id), each with `operation`
    /// set to what was applied.
    pub async fn infer_with(&self, text: &str, options: InferOptions) -> Result<Record> {
        let oracle = self
            .oracle
            .clone()
            .ok_or_else(|| MemvaultError::OracleUnavailable("no decision oracle configured".to_string()))?;

        let content = sanitize_content(text);
        validate_content(&content)?;

        self.enter(Stage::Extract, &content);
        let queries = self.extract(oracle.as_ref(), &content).await?;

        self.enter(Stage::Retrieve, &content);
        let filter = Self::scope_filter(&options.metadata);
        let retrieval = self.retrieve(&queries, &filter).await?;

        self.enter(Stage::Triage, &content);
        let candidates: Vec<Candidate> = retrieval
            .candidates
            .iter()
            .map(|(record, distance)| Candidate::from_record(record, *distance))
            .collect();
        let decision = self.triage(oracle.as_ref(), &content, &candidates).await?;
        debug!(
            op = %decision.op,
            importance = %decision.importance,
            target = ?decision.target_id,
            candidates = candidates.len(),
            "Oracle decided"
        );

        let target = match decision.target_id {
            Some(id) => Some(
                retrieval
                    .candidates
                    .iter()
                    .find(|(record, _)| record.id == id)
                    .map(|(record, _)| record.clone())
                    .ok_or_else(|| MemvaultError::OracleContractViolation {
                        field: "target_id",
                        reason: format!("{id} is not among the retrieved candidates"),
                    })?,
            ),
            None => None,
        };

        self.enter(Stage::Apply, &content);
        let result = match (decision.op, target) {
            (Operation::Add, _) => {
                let record = self.new_record(
                    &content,
                    decision.importance,
                    options.memory_type,
                    options.sub_type,
                    options.metadata,
                    retrieval.content_vector,
                );
                self.coordinator.add(record, Actor::Engine).await?
            }
            (Operation::Update, Some(previous)) => {
                let mut replacement = previous.superseding(&content, decision.importance);
                if let Some(memory_type) = options.memory_type {
                    replacement.memory_type = memory_type;
                }
                if let Some(sub_type) = options.sub_type {
                    replacement.sub_type = sub_type;
                }
                replacement.metadata.extend(options.metadata);
                if let Some(vector) = retrieval.content_vector {
                    replacement = replacement.with_embedding(vector);
                }
                self.coordinator
                    .supersede(previous.id, replacement, Actor::Engine)
                    .await?
            }
            (Operation::Delete, Some(previous)) => {
                let mut removed = self.coordinator.delete(previous.id, Actor::Engine).await?;
                removed.set_operation(Operation::Delete);
                removed
            }
            (Operation::Noop, target) => {
                let entry = self
                    .coordinator
                    .record_noop(target.as_ref().map(|r| r.id), &content, Actor::Engine)
                    .await?;
                let mut record = match target {
                    Some(record) => record,
                    None => {
                        let mut unsaved = Record::new(&content, decision.importance);
                        unsaved.id = entry.record_id;
                        unsaved
                    }
                };
                record.set_operation(Operation::Noop);
                record
            }
            (op, None) => {
                return Err(MemvaultError::OracleContractViolation {
                    field: "target_id",
                    reason: format!("{op} requires a target"),
                });
            }
        };

        self.enter(Stage::Done, &content);
        info!(op = %result.operation(), id = %result.id, "Infer complete");
        Ok(result)
    }

    /// Store `text` as a new record without triage (history actor `user`).
    pub async fn add(&self, text: &str, options: AddOptions) -> Result<Record> {
        let content = sanitize_content(text);
        validate_content(&content)?;

        let vector = self
            .embed_texts(std::slice::from_ref(&content))
            .await?
            .and_then(|vectors| vectors.into_iter().next());
        let record = self.new_record(
            &content,
            options.importance.unwrap_or(self.default_importance),
            options.memory_type,
            options.sub_type,
            options.metadata,
            vector,
        );
        self.coordinator.add(record, Actor::User).await
    }

    fn enter(&self, stage: Stage, content: &str) {
        debug!(stage = stage.as_str(), content = %self.describe(content), "Infer stage");
    }

    fn new_record(
        &self,
        content: &str,
        importance: Importance,
        memory_type: Option<String>,
        sub_type: Option<String>,
        metadata: Map<String, Value>,
        vector: Option<Vec<f32>>,
    ) -> Record {
        let mut record = Record::new(content, importance)
            .with_metadata(metadata)
            .with_decay_rate(self.default_decay_rate);
        if let Some(memory_type) = memory_type {
            record = record.with_memory_type(memory_type);
        }
        if let Some(sub_type) = sub_type {
            record = record.with_sub_type(sub_type);
        }
        if let Some(vector) = vector {
            record = record.with_embedding(vector);
        }
        record
    }

    /// EXTRACT stage: the content itself followed by any distinct facts.
    async fn extract(&self, oracle: &dyn DecisionOracle, content: &str) -> Result<Vec<String>> {
        let mut queries = vec![content.to_string()];
        if !self.config.extract_facts {
            return Ok(queries);
        }

        let policy = self
            .coordinator
            .retry_policy()
            .with_timeout(self.config.oracle_timeout());
        let facts = policy
            .run("fact extraction", || async {
                oracle.extract_facts(content).await.map_err(MemvaultError::from)
            })
            .await?;

        let mut seen: HashSet<String> = HashSet::from([content.to_lowercase()]);
        for fact in facts {
            let fact = sanitize_content(&fact);
            if !fact.is_empty() && validate_content(&fact).is_ok() && seen.insert(fact.to_lowercase()) {
                queries.push(fact);
            }
        }
        debug!(facts = queries.len() - 1, "Extracted facts");
        Ok(queries)
    }

    /// TRIAGE stage. No locks are held here.
    async fn triage(
        &self,
        oracle: &dyn DecisionOracle,
        content: &str,
        candidates: &[Candidate],
    ) -> Result<Decision> {
        let policy = self
            .coordinator
            .retry_policy()
            .with_timeout(self.config.oracle_timeout());

        // Unavailability is retried; contract violations come back as values
        let answer = policy
            .run("oracle triage", || async {
                match oracle.triage(content, candidates).await {
                    Err(OracleError::Unavailable(cause)) => {
                        Err(MemvaultError::OracleUnavailable(cause))
                    }
                    other => Ok(other),
                }
            })
            .await?;

        match answer {
            Ok(decision) => Ok(decision),
            Err(OracleError::ContractViolation {
                field: "importance",
                raw: Some(raw),
                ..
            }) if self.config.importance_policy == ImportancePolicy::Clamp => {
                Self::clamp_importance(*raw)
            }
            Err(e) => {
                warn!(oracle = oracle.name(), "Oracle broke the decision contract: {e}");
                Err(e.into())
            }
        }
    }

    fn clamp_importance(raw: RawDecision) -> Result<Decision> {
        let clamped = Importance::clamped(raw.importance);
        warn!(
            original = raw.importance,
            clamped = %clamped,
            "Clamping out-of-range oracle importance"
        );
        let repaired = RawDecision {
            importance: i64::from(clamped.get()),
            ..raw
        };
        Decision::try_from(repaired).map_err(MemvaultError::from)
    }
}
