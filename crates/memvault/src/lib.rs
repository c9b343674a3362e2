//! memvault - long-term memory for AI agents
//!
//! Free-form statements go through [`MemoryEngine::infer`], which retrieves
//! similar records, asks a decision oracle whether the input adds, updates,
//! deletes or repeats existing knowledge, and applies the answer to two
//! stores: a SQLite metadata store (system of record and audit trail) and a
//! vector index. The [`coordinator`] keeps the two in agreement, and the
//! [`decay`] scheduler ages unused records over time.

pub mod bootstrap;
pub mod config;
pub mod coordinator;
pub mod decay;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod oracle;
pub mod reconcile;
pub mod record;
pub mod storage;
pub mod testing;

pub use engine::{AddOptions, InferOptions, MemoryEngine, SearchHit};
pub use error::{MemvaultError, Result};
