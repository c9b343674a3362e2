use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{MemvaultError, Result};

/// Main configuration structure for memvault
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Where the metadata store and vector index live
    #[serde(default)]
    pub storage: StorageConfig,
    /// Embedding port selection
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Decision oracle endpoint
    #[serde(default)]
    pub oracle: OracleConfig,
    /// Triage pipeline tuning
    #[serde(default)]
    pub engine: EngineConfig,
    /// Retry and timeout policy for store writes
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    /// Importance decay
    #[serde(default)]
    pub decay: DecayConfig,
}

impl Config {
    /// Load configuration from an explicit path, or from the first default
    /// location that exists, or fall back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        if let Some(path) = path {
            tracing::info!("Loading config from: {}", path.display());
            return Self::from_file(path);
        }

        let default_paths = [
            dirs::home_dir().map(|h| h.join(".memvault").join("config.toml")),
            dirs::config_dir().map(|c| c.join("memvault").join("config.toml")),
            Some(PathBuf::from("config.toml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Config::default())
    }

    fn from_file(path: &Path) -> Result<Config> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            MemvaultError::Config(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;
        toml::from_str(&content)
            .map_err(|e| MemvaultError::Config(format!("Failed to parse config: {e}")))
    }
}

/// Which vector index implementation backs the deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    /// LanceDB table on disk
    Lance,
    /// Process-local index, lost on exit
    Memory,
}

/// Storage location configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Base directory for all storage data
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_vector_backend")]
    pub vector_backend: VectorBackend,
    /// SQLite database file; defaults to `<data_dir>/memvault.db`
    #[serde(default)]
    pub metadata_path: Option<PathBuf>,
}

impl StorageConfig {
    pub fn metadata_path(&self) -> PathBuf {
        self.metadata_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("memvault.db"))
    }

    pub fn vector_path(&self) -> PathBuf {
        self.data_dir.join("vectors")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            vector_backend: default_vector_backend(),
            metadata_path: None,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".memvault"))
        .unwrap_or_else(|| PathBuf::from(".memvault"))
}

fn default_vector_backend() -> VectorBackend {
    VectorBackend::Lance
}

/// Where embeddings come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    /// In-process fastembed model
    Local,
    /// OpenAI-compatible `/embeddings` endpoint
    Remote,
}

/// Embedding model configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: EmbeddingProviderKind,
    /// Model identifier for the remote endpoint
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Vector length, fixed for the lifetime of an index
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,
    /// Entries kept in the embedding LRU cache; 0 disables it
    #[serde(default = "default_embedding_cache_size")]
    pub cache_size: usize,
    #[serde(default)]
    pub api_url: String,
    #[serde(default = "default_embedding_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            batch_size: default_embedding_batch_size(),
            cache_size: default_embedding_cache_size(),
            api_url: String::new(),
            api_key_env: default_embedding_api_key_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> EmbeddingProviderKind {
    EmbeddingProviderKind::Local
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimension() -> usize {
    384
}

fn default_embedding_batch_size() -> usize {
    32
}

fn default_embedding_cache_size() -> usize {
    1024
}

fn default_embedding_api_key_env() -> String {
    "MEMVAULT_EMBEDDING_API_KEY".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

/// Remote decision oracle configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OracleConfig {
    /// API endpoint URL
    #[serde(default)]
    pub api_url: String,
    /// Environment variable name for API key
    #[serde(default = "default_oracle_api_key_env")]
    pub api_key_env: String,
    /// Model identifier for remote API
    #[serde(default = "default_oracle_model")]
    pub model: String,
    #[serde(default = "default_oracle_temperature")]
    pub temperature: f32,
    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Attempts made when the endpoint answers 429 or the transport fails
    #[serde(default = "default_rate_limit_retries")]
    pub max_rate_limit_retries: u32,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            api_key_env: default_oracle_api_key_env(),
            model: default_oracle_model(),
            temperature: default_oracle_temperature(),
            timeout_secs: default_timeout_secs(),
            max_rate_limit_retries: default_rate_limit_retries(),
        }
    }
}

fn default_oracle_api_key_env() -> String {
    "MEMVAULT_ORACLE_API_KEY".to_string()
}

fn default_oracle_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_oracle_temperature() -> f32 {
    0.0
}

fn default_rate_limit_retries() -> u32 {
    3
}

/// What retrieval does when the embedding port is down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingFallback {
    /// Surface `EmbeddingUnavailable` to the caller
    Fail,
    /// Retrieve by keyword from the metadata store and store records unindexed
    Keyword,
}

/// What the engine does with an out-of-range oracle importance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportancePolicy {
    /// Fail the call with `OracleContractViolation`
    Reject,
    /// Clamp into range and log a warning
    Clamp,
}

/// Decision engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Candidates retrieved per fact
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Largest cosine distance considered related
    #[serde(default = "default_max_distance")]
    pub max_distance: f32,
    /// Split input into atomic facts before retrieval
    #[serde(default = "default_extract_facts")]
    pub extract_facts: bool,
    #[serde(default = "default_embedding_fallback")]
    pub embedding_fallback: EmbeddingFallback,
    #[serde(default = "default_importance_policy")]
    pub importance_policy: ImportancePolicy,
    /// Importance for records added without triage
    #[serde(default = "default_importance")]
    pub default_importance: u8,
    /// Allow record content in debug logs
    #[serde(default)]
    pub log_content: bool,
    /// Count search hits as accesses
    #[serde(default)]
    pub touch_on_search: bool,
    #[serde(default = "default_embedding_timeout_ms")]
    pub embedding_timeout_ms: u64,
    #[serde(default = "default_oracle_timeout_ms")]
    pub oracle_timeout_ms: u64,
}

impl EngineConfig {
    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_millis(self.embedding_timeout_ms)
    }

    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_millis(self.oracle_timeout_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_distance: default_max_distance(),
            extract_facts: default_extract_facts(),
            embedding_fallback: default_embedding_fallback(),
            importance_policy: default_importance_policy(),
            default_importance: default_importance(),
            log_content: false,
            touch_on_search: false,
            embedding_timeout_ms: default_embedding_timeout_ms(),
            oracle_timeout_ms: default_oracle_timeout_ms(),
        }
    }
}

fn default_top_k() -> usize {
    5
}

fn default_max_distance() -> f32 {
    0.8
}

fn default_extract_facts() -> bool {
    true
}

fn default_embedding_fallback() -> EmbeddingFallback {
    EmbeddingFallback::Fail
}

fn default_importance_policy() -> ImportancePolicy {
    ImportancePolicy::Reject
}

fn default_importance() -> u8 {
    5
}

fn default_embedding_timeout_ms() -> u64 {
    10_000
}

fn default_oracle_timeout_ms() -> u64 {
    60_000
}

/// Retry and timeout policy for store I/O inside a unit of work
#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorConfig {
    /// Attempts per store call, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Budget for a single store call
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            store_timeout_ms: default_store_timeout_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    2_000
}

fn default_store_timeout_ms() -> u64 {
    5_000
}

/// Importance decay configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DecayConfig {
    /// Run the scheduler alongside long-lived processes
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_decay_interval_secs")]
    pub interval_secs: u64,
    /// Idle time before a record starts to decay
    #[serde(default = "default_grace_period_hours")]
    pub grace_period_hours: u64,
    /// Records whose decayed importance falls below this are deleted
    #[serde(default = "default_min_importance")]
    pub min_importance: u8,
    /// Weight of access count in slowing decay
    #[serde(default = "default_access_boost")]
    pub access_boost: f64,
    /// Decay rate given to new records
    #[serde(default = "default_decay_rate")]
    pub default_decay_rate: f64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_decay_interval_secs(),
            grace_period_hours: default_grace_period_hours(),
            min_importance: default_min_importance(),
            access_boost: default_access_boost(),
            default_decay_rate: default_decay_rate(),
        }
    }
}

fn default_decay_interval_secs() -> u64 {
    3600
}

fn default_grace_period_hours() -> u64 {
    24
}

fn default_min_importance() -> u8 {
    1
}

fn default_access_boost() -> f64 {
    0.1
}

fn default_decay_rate() -> f64 {
    crate::record::DEFAULT_DECAY_RATE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.storage.vector_backend, VectorBackend::Lance);
        assert!(config.storage.metadata_path.is_none());
        assert_eq!(config.embedding.provider, EmbeddingProviderKind::Local);
        assert_eq!(config.embedding.dimension, 384);
        assert_eq!(config.embedding.cache_size, 1024);
        assert_eq!(config.engine.top_k, 5);
        assert_eq!(config.engine.max_distance, 0.8);
        assert!(config.engine.extract_facts);
        assert_eq!(config.engine.embedding_fallback, EmbeddingFallback::Fail);
        assert_eq!(config.engine.importance_policy, ImportancePolicy::Reject);
        assert!(!config.engine.log_content);
        assert_eq!(config.coordinator.max_attempts, 3);
        assert!(!config.decay.enabled);
        assert_eq!(config.decay.min_importance, 1);
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_str = r#"
[storage]
data_dir = "/tmp/memvault"
vector_backend = "memory"

[embedding]
provider = "remote"
model = "text-embedding-3-large"
dimension = 1536
cache_size = 0
api_url = "https://api.openai.com/v1"

[oracle]
api_url = "https://api.openai.com/v1"
model = "gpt-4o"
timeout_secs = 10

[engine]
top_k = 10
max_distance = 0.5
extract_facts = false
embedding_fallback = "keyword"
importance_policy = "clamp"

[coordinator]
max_attempts = 5
initial_backoff_ms = 10

[decay]
enabled = true
interval_secs = 60
grace_period_hours = 1
min_importance = 2
"#;

        let config: Config = toml::from_str(toml_str).expect("Failed to parse TOML");
        assert_eq!(config.storage.data_dir, PathBuf::from("/tmp/memvault"));
        assert_eq!(config.storage.vector_backend, VectorBackend::Memory);
        assert_eq!(
            config.storage.metadata_path(),
            PathBuf::from("/tmp/memvault/memvault.db")
        );
        assert_eq!(config.embedding.provider, EmbeddingProviderKind::Remote);
        assert_eq!(config.embedding.dimension, 1536);
        assert_eq!(config.embedding.cache_size, 0);
        assert_eq!(config.oracle.model, "gpt-4o");
        assert_eq!(config.oracle.timeout_secs, 10);
        assert_eq!(config.oracle.api_key_env, "MEMVAULT_ORACLE_API_KEY");
        assert_eq!(config.engine.top_k, 10);
        assert!(!config.engine.extract_facts);
        assert_eq!(config.engine.embedding_fallback, EmbeddingFallback::Keyword);
        assert_eq!(config.engine.importance_policy, ImportancePolicy::Clamp);
        assert_eq!(config.coordinator.max_attempts, 5);
        assert_eq!(config.coordinator.max_backoff_ms, 2_000);
        assert!(config.decay.enabled);
        assert_eq!(config.decay.min_importance, 2);
        assert_eq!(config.decay.access_boost, 0.1);
    }

    #[test]
    fn test_toml_partial_deserialization() {
        let toml_str = r#"
[engine]
top_k = 3
"#;

        let config: Config = toml::from_str(toml_str).expect("Failed to parse partial TOML");
        assert_eq!(config.engine.top_k, 3);
        assert_eq!(config.engine.max_distance, 0.8);
        assert_eq!(config.storage.vector_backend, VectorBackend::Lance);
        assert_eq!(config.decay.interval_secs, 3600);
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let toml_str = r#"
[storage]
vector_backend = "chroma"
"#;
        assert!(toml::from_str::<Config>(toml_str).is_err());
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memvault.toml");
        std::fs::write(&path, "[engine]\ntop_k = 9\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.engine.top_k, 9);
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, MemvaultError::Config(_)));
    }
}
