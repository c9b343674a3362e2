//! Wiring from configuration to a running engine

use std::num::NonZeroUsize;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{Config, EmbeddingProviderKind, VectorBackend};
use crate::coordinator::RetryPolicy;
use crate::decay::{DecayHandle, DecayPolicy, DecayScheduler};
use crate::embedding::{CachedEmbedder, EmbeddingProvider, LocalEmbedder, RemoteEmbedder};
use crate::engine::MemoryEngine;
use crate::error::Result;
use crate::oracle::{DecisionOracle, RemoteOracle};
use crate::storage::{InMemoryVectorIndex, LanceIndex, MetadataStore, SqliteStore, VectorIndex};

/// Build the embedder named by `[embedding]`, cached when `cache_size > 0`.
pub fn open_embedder(config: &Config) -> Result<Arc<dyn EmbeddingProvider>> {
    let embedding = &config.embedding;
    let provider: Arc<dyn EmbeddingProvider> = match embedding.provider {
        EmbeddingProviderKind::Local => Arc::new(LocalEmbedder::new(embedding.batch_size)?),
        EmbeddingProviderKind::Remote => Arc::new(RemoteEmbedder::new(embedding)?),
    };

    Ok(match NonZeroUsize::new(embedding.cache_size) {
        Some(capacity) => Arc::new(CachedEmbedder::new(provider, capacity)),
        None => provider,
    })
}

/// The remote oracle, or `None` when none is configured or it cannot start.
/// Without one the engine still serves everything except `infer`.
pub fn open_oracle(config: &Config) -> Option<Arc<dyn DecisionOracle>> {
    if config.oracle.api_url.trim().is_empty() {
        return None;
    }
    match RemoteOracle::new(&config.oracle) {
        Ok(oracle) => Some(Arc::new(oracle)),
        Err(e) => {
            warn!("Decision oracle disabled: {e}");
            None
        }
    }
}

/// Open both stores and assemble a [`MemoryEngine`].
pub async fn open_engine(config: &Config) -> Result<MemoryEngine> {
    let embedder = open_embedder(config)?;
    open_engine_with(config, embedder, open_oracle(config)).await
}

/// Same as [`open_engine`] with the model-backed collaborators supplied.
pub async fn open_engine_with(
    config: &Config,
    embedder: Arc<dyn EmbeddingProvider>,
    oracle: Option<Arc<dyn DecisionOracle>>,
) -> Result<MemoryEngine> {
    let metadata_path = config.storage.metadata_path();
    let metadata: Arc<dyn MetadataStore> = Arc::new(SqliteStore::open(&metadata_path)?);

    let dimension = embedder.dimension();
    let index: Arc<dyn VectorIndex> = match config.storage.vector_backend {
        VectorBackend::Lance => {
            Arc::new(LanceIndex::connect(&config.storage.vector_path(), dimension).await?)
        }
        VectorBackend::Memory => Arc::new(InMemoryVectorIndex::new(dimension)),
    };

    info!(
        metadata = %metadata_path.display(),
        index = index.backend(),
        embedder = embedder.name(),
        dimension,
        "Opened memory stores"
    );

    let mut builder = MemoryEngine::builder()
        .index(index)
        .metadata(metadata)
        .embedder(embedder)
        .config(config.engine.clone())
        .retry_policy(RetryPolicy::from_config(&config.coordinator))
        .default_decay_rate(config.decay.default_decay_rate);
    if let Some(oracle) = oracle {
        builder = builder.oracle(oracle);
    }
    builder.build()
}

/// Scheduler over the engine's stores using `[decay]`.
pub fn decay_scheduler(engine: &MemoryEngine, config: &Config) -> Result<DecayScheduler> {
    let policy = DecayPolicy::from_config(&config.decay)?;
    Ok(DecayScheduler::new(Arc::clone(engine.coordinator()), policy))
}

/// Start the background decay loop when `[decay] enabled = true`.
pub fn spawn_decay(engine: &MemoryEngine, config: &Config) -> Result<Option<DecayHandle>> {
    if !config.decay.enabled {
        info!("Decay scheduler disabled");
        return Ok(None);
    }
    let scheduler = Arc::new(decay_scheduler(engine, config)?);
    info!(
        interval_secs = config.decay.interval_secs,
        "Starting decay scheduler"
    );
    Ok(Some(scheduler.spawn()))
}
