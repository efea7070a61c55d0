//! Mock Ollama server for integration tests
//!
//! Serves `/api/generate` and `/api/version` on an ephemeral local port with
//! scripted replies, so the real HTTP client can be exercised without a model.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

/// What the server does for one generate request.
#[derive(Clone, Debug)]
pub enum MockGenerate {
    /// Reply with `{response: text}`.
    Text(String),
    /// Reply with the given status and no envelope.
    Status(StatusCode),
    /// Reply 200 with a body that is not the generate envelope.
    Garbage,
}

#[derive(Clone)]
pub struct MockOllamaConfig {
    pub model: String,
    /// Used once the script is exhausted.
    pub default_reply: MockGenerate,
    pub response_delay_ms: Option<u64>,
}

impl Default for MockOllamaConfig {
    fn default() -> Self {
        Self {
            model: "mistral:7b-instruct".to_string(),
            default_reply: MockGenerate::Text("null".to_string()),
            response_delay_ms: None,
        }
    }
}

#[derive(Clone)]
struct MockState {
    config: MockOllamaConfig,
    script: Arc<RwLock<VecDeque<MockGenerate>>>,
    requests: Arc<RwLock<Vec<GenerateRequest>>>,
}

pub struct MockOllamaServer {
    state: MockState,
}

impl MockOllamaServer {
    pub fn new(config: MockOllamaConfig) -> Self {
        Self {
            state: MockState {
                config,
                script: Arc::new(RwLock::new(VecDeque::new())),
                requests: Arc::new(RwLock::new(Vec::new())),
            },
        }
    }

    /// Queue a reply ahead of the default one.
    pub async fn push(&self, reply: MockGenerate) {
        self.state.script.write().await.push_back(reply);
    }

    pub async fn request_count(&self) -> usize {
        self.state.requests.read().await.len()
    }

    pub async fn requests(&self) -> Vec<GenerateRequest> {
        self.state.requests.read().await.clone()
    }

    /// Bind to an ephemeral port and serve in the background. Returns the base URL.
    pub async fn start(&self) -> Result<String, Box<dyn std::error::Error>> {
        let app = Router::new()
            .route("/api/generate", post(generate_handler))
            .route("/api/version", get(version_handler))
            .with_state(self.state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Ok(format!("http://{}", addr))
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub stream: Option<bool>,
}

#[derive(Serialize)]
struct GenerateResponse {
    model: String,
    created_at: String,
    response: String,
    done: bool,
}

async fn version_handler() -> Json<serde_json::Value> {
    Json(json!({ "version": "0.1.48" }))
}

async fn generate_handler(
    State(state): State<MockState>,
    Json(request): Json<GenerateRequest>,
) -> Response {
    state.requests.write().await.push(request.clone());

    if let Some(delay) = state.config.response_delay_ms {
        tokio::time::sleep(tokio::time::Duration::from_millis(delay)).await;
    }

    let reply = state
        .script
        .write()
        .await
        .pop_front()
        .unwrap_or_else(|| state.config.default_reply.clone());

    match reply {
        MockGenerate::Text(text) => Json(GenerateResponse {
            model: request.model,
            created_at: chrono::Utc::now().to_rfc3339(),
            response: text,
            done: true,
        })
        .into_response(),
        MockGenerate::Status(status) => status.into_response(),
        MockGenerate::Garbage => Json(json!({ "unexpected": true })).into_response(),
    }
}
