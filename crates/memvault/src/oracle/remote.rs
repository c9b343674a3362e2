//! Remote decision oracle using OpenAI-compatible APIs
//!
//! Any best-effort cleanup of model output (code fences, chatter around the
//! JSON) happens here; what leaves this module is schema-checked.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::OracleConfig;
use crate::oracle::DecisionOracle;
use crate::oracle::prompts::{EXTRACTION_PROMPT, TRIAGE_PROMPT};
use crate::oracle::types::{Candidate, Decision, OracleError, RawDecision};

/// Remote oracle using OpenAI-compatible HTTP APIs
#[derive(Debug)]
pub struct RemoteOracle {
    client: Client,
    config: OracleConfig,
    api_key: String,
    initial_backoff: Duration,
}

/// OpenAI-compatible chat completion request
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

/// OpenAI-compatible chat completion response
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

impl RemoteOracle {
    /// Create a new remote oracle with the given configuration
    ///
    /// Reads the API key from the environment variable named by `config.api_key_env`.
    pub fn new(config: &OracleConfig) -> Result<Self, OracleError> {
        let api_key = env::var(&config.api_key_env).map_err(|_| {
            OracleError::Unavailable(format!(
                "API key env var '{}' not set",
                config.api_key_env
            ))
        })?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &OracleConfig, api_key: impl Into<String>) -> Result<Self, OracleError> {
        if config.api_url.is_empty() {
            return Err(OracleError::Unavailable(
                "oracle.api_url is not configured".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| OracleError::Unavailable(e.to_string()))?;

        info!(
            "RemoteOracle initialized with model: {}, api_url: {}",
            config.model, config.api_url
        );

        Ok(Self {
            client,
            config: config.clone(),
            api_key: api_key.into(),
            initial_backoff: Duration::from_secs(1),
        })
    }

    /// Shorten the rate-limit backoff (tests)
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// Call the remote API with exponential backoff for rate limiting
    async fn call_api(&self, prompt: &str) -> Result<String, OracleError> {
        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: "You answer with JSON only.".to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            temperature: self.config.temperature,
            max_tokens: 512,
        };

        let url = format!("{}/chat/completions", self.config.api_url.trim_end_matches('/'));
        debug!("Calling remote oracle at: {}", url);

        let max_attempts = self.config.max_rate_limit_retries.max(1);
        let mut last_error = None;
        let mut delay = self.initial_backoff;

        for attempt in 0..max_attempts {
            match self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status();

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        warn!(
                            "Rate limited on attempt {}/{}, waiting {:?}",
                            attempt + 1,
                            max_attempts,
                            delay
                        );
                        last_error = Some("rate limited".to_string());
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                        continue;
                    }

                    if !status.is_success() {
                        let error_text = response
                            .text()
                            .await
                            .unwrap_or_else(|_| "Unknown error".to_string());
                        return Err(OracleError::Unavailable(format!(
                            "API returned {status}: {error_text}"
                        )));
                    }

                    let completion: ChatCompletionResponse = response
                        .json()
                        .await
                        .map_err(|e| OracleError::malformed(e.to_string()))?;

                    return completion
                        .choices
                        .into_iter()
                        .next()
                        .map(|c| c.message.content)
                        .ok_or_else(|| OracleError::malformed("response has no choices"));
                }
                Err(e) => {
                    let err_msg = e.to_string();
                    last_error = Some(err_msg.clone());
                    if attempt + 1 < max_attempts {
                        warn!(
                            "Request failed on attempt {}/{}, retrying: {}",
                            attempt + 1,
                            max_attempts,
                            err_msg
                        );
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }

        Err(OracleError::Unavailable(format!(
            "Failed after {} attempts: {}",
            max_attempts,
            last_error.unwrap_or_else(|| "Unknown error".to_string())
        )))
    }
}

/// Pull the JSON payload out of model output that may wrap it in prose or fences.
fn extract_json(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

#[async_trait]
impl DecisionOracle for RemoteOracle {
    async fn triage(
        &self,
        content: &str,
        candidates: &[Candidate],
    ) -> Result<Decision, OracleError> {
        let candidates_json = serde_json::to_string_pretty(candidates)
            .map_err(|e| OracleError::malformed(e.to_string()))?;
        let prompt = TRIAGE_PROMPT
            .replace("{content}", content)
            .replace("{candidates}", &candidates_json);

        let response = self.call_api(&prompt).await?;
        let payload = extract_json(&response, '{', '}')
            .ok_or_else(|| OracleError::malformed("no JSON object in triage response"))?;
        let raw: RawDecision = serde_json::from_str(payload)
            .map_err(|e| OracleError::malformed(format!("Failed to parse decision JSON: {e}")))?;

        let decision = Decision::try_from(raw)?;
        debug!(op = %decision.op, importance = %decision.importance, "Oracle decision");
        Ok(decision)
    }

    async fn extract_facts(&self, content: &str) -> Result<Vec<String>, OracleError> {
        let prompt = EXTRACTION_PROMPT.replace("{content}", content);
        let response = self.call_api(&prompt).await?;
        let payload = extract_json(&response, '[', ']')
            .ok_or_else(|| OracleError::malformed("no JSON array in extraction response"))?;
        let facts: Vec<String> = serde_json::from_str(payload)
            .map_err(|e| OracleError::malformed(format!("Failed to parse extraction JSON: {e}")))?;

        Ok(facts
            .into_iter()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect())
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Operation;
    use uuid::Uuid;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_test_config(api_url: String) -> OracleConfig {
        OracleConfig {
            api_url,
            api_key_env: "MEMVAULT_TEST_ORACLE_KEY".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            timeout_secs: 30,
            max_rate_limit_retries: 3,
        }
    }

    fn completion(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{ "message": { "content": content } }]
        })
    }

    async fn oracle_for(server: &MockServer) -> RemoteOracle {
        RemoteOracle::with_api_key(&create_test_config(server.uri()), "test-key")
            .unwrap()
            .with_initial_backoff(Duration::from_millis(1))
    }

    #[test]
    fn test_remote_oracle_missing_api_key() {
        let config = create_test_config("https://api.example.com/v1".to_string());
        let err = RemoteOracle::new(&config).unwrap_err().to_string();
        assert!(err.contains("MEMVAULT_TEST_ORACLE_KEY"));
    }

    #[test]
    fn test_extract_json() {
        let fenced = "```json\n{\"op\": \"ADD\"}\n```";
        assert_eq!(extract_json(fenced, '{', '}'), Some("{\"op\": \"ADD\"}"));
        assert_eq!(extract_json("no json here", '{', '}'), None);
        assert_eq!(extract_json("[\"a\", \"b\"] trailing", '[', ']'), Some("[\"a\", \"b\"]"));
    }

    #[tokio::test]
    async fn test_triage_update() {
        let mock_server = MockServer::start().await;
        let target = Uuid::new_v4();
        let body = format!(
            "```json\n{{\"op\": \"UPDATE\", \"importance\": 7, \"target_id\": \"{target}\", \"rationale\": \"preference changed\"}}\n```"
        );

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(&body)))
            .mount(&mock_server)
            .await;

        let oracle = oracle_for(&mock_server).await;
        let candidates = vec![Candidate {
            id: target,
            content: "User's favorite color is blue".to_string(),
            importance: 5,
            memory_type: "general".to_string(),
            distance: Some(0.2),
        }];
        let decision = oracle
            .triage("Actually, user prefers green", &candidates)
            .await
            .unwrap();

        assert_eq!(decision.op, Operation::Update);
        assert_eq!(decision.target_id, Some(target));
        assert_eq!(decision.importance.get(), 7);
        assert_eq!(decision.rationale.as_deref(), Some("preference changed"));
    }

    #[tokio::test]
    async fn test_triage_out_of_range_importance_is_contract_violation() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(
                r#"{"op": "ADD", "importance": 12}"#,
            )))
            .mount(&mock_server)
            .await;

        let oracle = oracle_for(&mock_server).await;
        let err = oracle.triage("new fact", &[]).await.unwrap_err();

        assert!(matches!(
            err,
            OracleError::ContractViolation { field: "importance", .. }
        ));
    }

    #[tokio::test]
    async fn test_triage_prose_is_contract_violation() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(completion("I think you should add it.")),
            )
            .mount(&mock_server)
            .await;

        let oracle = oracle_for(&mock_server).await;
        let err = oracle.triage("new fact", &[]).await.unwrap_err();

        assert!(matches!(
            err,
            OracleError::ContractViolation { field: "payload", .. }
        ));
    }

    #[tokio::test]
    async fn test_extract_facts() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(
                r#"["User lives in Lisbon", " ", "User works remotely"]"#,
            )))
            .mount(&mock_server)
            .await;

        let oracle = oracle_for(&mock_server).await;
        let facts = oracle
            .extract_facts("I live in Lisbon and work remotely")
            .await
            .unwrap();

        assert_eq!(facts, vec!["User lives in Lisbon", "User works remotely"]);
    }

    #[tokio::test]
    async fn test_rate_limit_retry_then_success() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(
                r#"{"op": "NOOP", "importance": 2}"#,
            )))
            .mount(&mock_server)
            .await;

        let oracle = oracle_for(&mock_server).await;
        let decision = oracle.triage("already known", &[]).await.unwrap();
        assert_eq!(decision.op, Operation::Noop);
    }

    #[tokio::test]
    async fn test_rate_limit_exhausted_is_unavailable() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&mock_server)
            .await;

        let oracle = oracle_for(&mock_server).await;
        let err = oracle.triage("anything", &[]).await.unwrap_err();
        assert!(matches!(err, OracleError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&mock_server)
            .await;

        let oracle = oracle_for(&mock_server).await;
        let err = oracle.extract_facts("anything").await.unwrap_err();
        assert!(err.to_string().contains("500"));
    }
}
