//! OpenAI-compatible embedding endpoint

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{EmbeddingProvider, check_batch};
use crate::config::EmbeddingConfig;
use crate::error::{MemvaultError, Result};

/// Remote embedder speaking the OpenAI `/embeddings` protocol
#[derive(Debug)]
pub struct RemoteEmbedder {
    client: Client,
    api_url: String,
    model: String,
    dimension: usize,
    batch_size: usize,
    api_key: String,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
    index: usize,
}

impl RemoteEmbedder {
    /// Create a remote embedder, reading the API key from `config.api_key_env`.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = env::var(&config.api_key_env).map_err(|_| {
            MemvaultError::Config(format!(
                "API key env var '{}' not set",
                config.api_key_env
            ))
        })?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &EmbeddingConfig, api_key: impl Into<String>) -> Result<Self> {
        if config.api_url.is_empty() {
            return Err(MemvaultError::Config(
                "embedding.api_url is required for the remote provider".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| MemvaultError::Config(e.to_string()))?;

        info!(
            "RemoteEmbedder initialized with model: {}, api_url: {}",
            config.model, config.api_url
        );

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dimension: config.dimension,
            batch_size: config.batch_size.max(1),
            api_key: api_key.into(),
        })
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.api_url);
        debug!(count = texts.len(), "Requesting embeddings from {}", url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| MemvaultError::EmbeddingUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(MemvaultError::EmbeddingUnavailable(format!(
                "API returned {status}: {error_text}"
            )));
        }

        let mut body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| MemvaultError::EmbeddingUnavailable(format!("Malformed response: {e}")))?;

        // Providers may reorder; `index` is authoritative
        body.data.sort_by_key(|d| d.index);
        Ok(body.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            let mut chunk_vectors = self.request(chunk).await?;
            check_batch(self.name(), chunk.len(), self.dimension, &chunk_vectors)?;
            vectors.append(&mut chunk_vectors);
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_test_config(api_url: String) -> EmbeddingConfig {
        EmbeddingConfig {
            api_url,
            dimension: 3,
            batch_size: 2,
            ..EmbeddingConfig::default()
        }
    }

    #[test]
    fn test_remote_embedder_requires_url() {
        let config = create_test_config(String::new());
        assert!(matches!(
            RemoteEmbedder::with_api_key(&config, "key"),
            Err(MemvaultError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_remote_embedder_restores_input_order() {
        let mock_server = MockServer::start().await;

        let response_body = serde_json::json!({
            "data": [
                { "embedding": [0.0, 1.0, 0.0], "index": 1 },
                { "embedding": [1.0, 0.0, 0.0], "index": 0 }
            ]
        });

        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(header("Authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(response_body))
            .mount(&mock_server)
            .await;

        let embedder =
            RemoteEmbedder::with_api_key(&create_test_config(mock_server.uri()), "test-key")
                .unwrap();
        let vectors = embedder
            .embed_batch(&["first".to_string(), "second".to_string()])
            .await
            .unwrap();

        assert_eq!(vectors, vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]]);
    }

    #[tokio::test]
    async fn test_remote_embedder_server_error_is_unavailable() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&mock_server)
            .await;

        let embedder =
            RemoteEmbedder::with_api_key(&create_test_config(mock_server.uri()), "test-key")
                .unwrap();
        let err = embedder.embed("hello").await.unwrap_err();

        assert!(err.is_transient());
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_remote_embedder_rejects_wrong_dimension() {
        let mock_server = MockServer::start().await;

        let response_body = serde_json::json!({
            "data": [{ "embedding": [1.0, 0.0], "index": 0 }]
        });

        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(response_body))
            .mount(&mock_server)
            .await;

        let embedder =
            RemoteEmbedder::with_api_key(&create_test_config(mock_server.uri()), "test-key")
                .unwrap();
        let err = embedder.embed("hello").await.unwrap_err();

        assert!(matches!(err, MemvaultError::Validation(_)));
    }
}
