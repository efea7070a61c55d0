use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("HTTP request failed: {0}")]
    Http(#[source] reqwest::Error),
    #[error("Timeout exceeded after {0}s")]
    Timeout(u64),
    #[error("Inference service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Base URL of the Ollama service
    pub base_url: String,
    /// Model used for every generation request
    pub model: String,
    /// Per-request timeout in seconds
    pub timeout_seconds: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "mistral:7b-instruct".to_string(),
            timeout_seconds: 60,
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Text in, text out. Implementations make exactly one backend call per
/// `generate` and never retry; retry policy belongs to the caller.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, InferenceError>;
    async fn health_check(&self) -> Result<bool, InferenceError>;
}

#[derive(Clone, Debug)]
pub struct OllamaClient {
    config: OllamaConfig,
    client: Client,
}

impl OllamaClient {
    pub fn new(config: OllamaConfig) -> Result<Self, InferenceError> {
        Self::validate_url(&config.base_url)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(InferenceError::Http)?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    fn validate_url(url_str: &str) -> Result<(), InferenceError> {
        let url = Url::parse(url_str)
            .map_err(|e| InferenceError::InvalidUrl(format!("Failed to parse URL: {e}")))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(InferenceError::InvalidUrl(format!(
                "Unsupported scheme '{}', expected http or https",
                url.scheme()
            )));
        }

        if url.host_str().is_none() {
            return Err(InferenceError::InvalidUrl(
                "URL must contain a host".to_string(),
            ));
        }

        Ok(())
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn classify(&self, error: reqwest::Error) -> InferenceError {
        if error.is_timeout() {
            InferenceError::Timeout(self.config.timeout_seconds)
        } else if error.is_decode() {
            InferenceError::MalformedResponse(error.to_string())
        } else {
            InferenceError::Http(error)
        }
    }
}

#[async_trait]
impl InferenceClient for OllamaClient {
    async fn generate(&self, prompt: &str) -> Result<String, InferenceError> {
        let url = self.endpoint("api/generate");
        let request = GenerateRequest {
            model: &self.config.model,
            prompt,
            stream: false,
        };

        debug!(model = %self.config.model, prompt_len = prompt.len(), "Sending generate request to {}", url);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            warn!("Ollama returned HTTP {}", status);
            return Err(InferenceError::ServiceUnavailable(format!("HTTP {status}")));
        }

        let body: GenerateResponse = response.json().await.map_err(|e| self.classify(e))?;
        let text = body.response.trim().to_string();

        debug!(response_len = text.len(), "Received generate response");
        Ok(text)
    }

    async fn health_check(&self) -> Result<bool, InferenceError> {
        let url = self.endpoint("api/version");

        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let is_healthy = response.status().is_success();
        if !is_healthy {
            warn!("Ollama health check failed: HTTP {}", response.status());
        }
        Ok(is_healthy)
    }
}

/// Scripted client for tests and offline runs.
///
/// Replies are consumed in order; once the script is exhausted the default
/// reply is returned. Every call is recorded.
#[derive(Clone, Default)]
pub struct MockInferenceClient {
    script: Arc<Mutex<VecDeque<MockReply>>>,
    default_reply: Arc<Mutex<Option<MockReply>>>,
    prompts: Arc<Mutex<Vec<String>>>,
}

#[derive(Clone, Debug)]
pub enum MockReply {
    Text(String),
    Unavailable,
    Timeout,
}

impl MockInferenceClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Client that answers every prompt with the same text.
    pub fn always(text: impl Into<String>) -> Self {
        let client = Self::new();
        client.set_default(MockReply::Text(text.into()));
        client
    }

    /// Client whose every call fails as if the backend were down.
    pub fn with_failure() -> Self {
        let client = Self::new();
        client.set_default(MockReply::Unavailable);
        client
    }

    pub fn push(&self, reply: MockReply) -> &Self {
        self.script
            .lock()
            .expect("mock script lock poisoned")
            .push_back(reply);
        self
    }

    pub fn push_text(&self, text: impl Into<String>) -> &Self {
        self.push(MockReply::Text(text.into()))
    }

    pub fn set_default(&self, reply: MockReply) {
        *self.default_reply.lock().expect("mock default lock poisoned") = Some(reply);
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().expect("mock prompts lock poisoned").len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("mock prompts lock poisoned").clone()
    }
}

#[async_trait]
impl InferenceClient for MockInferenceClient {
    async fn generate(&self, prompt: &str) -> Result<String, InferenceError> {
        self.prompts
            .lock()
            .expect("mock prompts lock poisoned")
            .push(prompt.to_string());

        let reply = self
            .script
            .lock()
            .expect("mock script lock poisoned")
            .pop_front()
            .or_else(|| {
                self.default_reply
                    .lock()
                    .expect("mock default lock poisoned")
                    .clone()
            });

        match reply {
            Some(MockReply::Text(text)) => Ok(text.trim().to_string()),
            Some(MockReply::Timeout) => Err(InferenceError::Timeout(0)),
            Some(MockReply::Unavailable) | None => Err(InferenceError::ServiceUnavailable(
                "Mock client configured to fail".to_string(),
            )),
        }
    }

    async fn health_check(&self) -> Result<bool, InferenceError> {
        let default = self
            .default_reply
            .lock()
            .expect("mock default lock poisoned")
            .clone();
        Ok(matches!(default, Some(MockReply::Text(_))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = OllamaConfig::default();
        assert_eq!(config.base_url, "http://localhost:11434");
        assert_eq!(config.model, "mistral:7b-instruct");
        assert_eq!(config.timeout_seconds, 60);
    }

    #[test]
    fn test_url_validation() {
        assert!(OllamaClient::validate_url("http://localhost:11434").is_ok());
        assert!(OllamaClient::validate_url("http://192.168.1.110:11434").is_ok());
        assert!(OllamaClient::validate_url("https://ollama.internal").is_ok());

        assert!(OllamaClient::validate_url("not_a_url").is_err());
        assert!(OllamaClient::validate_url("ftp://localhost:11434").is_err());
    }

    #[test]
    fn test_client_creation_with_invalid_url() {
        let config = OllamaConfig {
            base_url: "localhost:11434/without/scheme".to_string(),
            ..OllamaConfig::default()
        };
        match OllamaClient::new(config) {
            Err(InferenceError::InvalidUrl(_)) => {}
            other => panic!("Expected InvalidUrl, got {other:?}"),
        }
    }

    #[test]
    fn test_endpoint_tolerates_trailing_slash() {
        let client = OllamaClient::new(OllamaConfig {
            base_url: "http://localhost:11434/".to_string(),
            ..OllamaConfig::default()
        })
        .unwrap();
        assert_eq!(client.endpoint("api/generate"), "http://localhost:11434/api/generate");
    }

    #[tokio::test]
    async fn test_mock_client_follows_script_then_default() {
        let client = MockInferenceClient::always("null");
        client.push_text("  {\"titles\": [\"A\"]}  ").push(MockReply::Timeout);

        assert_eq!(client.generate("p1").await.unwrap(), "{\"titles\": [\"A\"]}");
        assert!(matches!(
            client.generate("p2").await,
            Err(InferenceError::Timeout(_))
        ));
        assert_eq!(client.generate("p3").await.unwrap(), "null");
        assert_eq!(client.call_count(), 3);
        assert_eq!(client.prompts()[1], "p2");
    }

    #[tokio::test]
    async fn test_mock_client_failure() {
        let client = MockInferenceClient::with_failure();
        assert!(matches!(
            client.generate("anything").await,
            Err(InferenceError::ServiceUnavailable(_))
        ));
        assert!(!client.health_check().await.unwrap());
    }
}
