//! vLLM client for OpenAI-compatible chat completion and embedding APIs.
//!
//! One client serves both backend contracts: `/v1/chat/completions` for
//! utterance generation and `/v1/embeddings` for embedding capture. In
//! multi-model setups the model name travels per request, so a single vLLM
//! router (or several instances behind one base URL) can serve every agent
//! in the ensemble.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use trajectory_kernel::DialogueContext;

use crate::backend::{BackendError, EmbeddingBackend, ModelBackend};

/// Default per-request timeout.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// vLLM client for chat completions and embeddings.
#[derive(Debug, Clone)]
pub struct VllmClient {
    client: reqwest::Client,
    base_url: String,
}

/// A chat message with role and content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Request body for /v1/chat/completions.
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
}

/// Response from /v1/chat/completions.
#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Request body for /v1/embeddings.
#[derive(Serialize)]
struct EmbeddingRequest {
    model: String,
    input: String,
}

/// Response from /v1/embeddings.
#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

impl VllmClient {
    /// Create a new client for the given base URL
    /// (e.g. "http://localhost:8000").
    pub fn new(base_url: &str) -> Self {
        Self::with_timeout(base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a client with an explicit per-request timeout.
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Generate a completion with a custom system prompt.
    pub async fn generate_with_system(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        top_p: f32,
        max_tokens: u32,
    ) -> Result<String, BackendError> {
        let request = ChatRequest {
            model: model.to_string(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system_prompt.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user_prompt.to_string(),
                },
            ],
            max_tokens,
            temperature,
            top_p,
        };

        let url = format!("{}/v1/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Transport(format!(
                "chat request failed with status {status}: {body}"
            )));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Malformed(e.to_string()))?;

        chat.choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| BackendError::Malformed("no choices in chat response".to_string()))
    }

    /// Embed a single text.
    pub async fn embed(&self, model: &str, input: &str) -> Result<Vec<f32>, BackendError> {
        let request = EmbeddingRequest {
            model: model.to_string(),
            input: input.to_string(),
        };

        let url = format!("{}/v1/embeddings", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Transport(format!(
                "embedding request failed with status {status}: {body}"
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Malformed(e.to_string()))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| BackendError::Malformed("no data in embedding response".to_string()))
    }

    /// Check if the server is healthy.
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> BackendError {
    if e.is_timeout() {
        BackendError::Timeout
    } else {
        BackendError::Transport(e.to_string())
    }
}

/// `ModelBackend` over a vLLM chat endpoint.
///
/// The agent's persona is the system prompt; the rendered dialogue context
/// is the user prompt; the backend id is the model routed per request.
#[derive(Debug, Clone)]
pub struct VllmModelBackend {
    client: VllmClient,
    top_p: f32,
    max_tokens: u32,
}

impl VllmModelBackend {
    pub fn new(client: VllmClient) -> Self {
        Self {
            client,
            top_p: 0.95,
            max_tokens: 256,
        }
    }

    pub fn with_sampling(client: VllmClient, top_p: f32, max_tokens: u32) -> Self {
        Self {
            client,
            top_p,
            max_tokens,
        }
    }
}

#[async_trait]
impl ModelBackend for VllmModelBackend {
    async fn generate(
        &self,
        persona: &str,
        backend_id: &str,
        temperature: f32,
        context: &DialogueContext<'_>,
    ) -> Result<String, BackendError> {
        let utterance = self
            .client
            .generate_with_system(
                backend_id,
                persona,
                &context.render(),
                temperature,
                self.top_p,
                self.max_tokens,
            )
            .await?;
        let trimmed = utterance.trim();
        if trimmed.is_empty() {
            return Err(BackendError::EmptyUtterance);
        }
        Ok(trimmed.to_string())
    }
}

/// `EmbeddingBackend` over a vLLM embedding endpoint with a fixed model.
#[derive(Debug, Clone)]
pub struct VllmEmbeddingBackend {
    client: VllmClient,
    model: String,
}

impl VllmEmbeddingBackend {
    pub fn new(client: VllmClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl EmbeddingBackend for VllmEmbeddingBackend {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        let vector = self.client.embed(&self.model, text).await?;
        if vector.is_empty() {
            return Err(BackendError::Malformed(
                "embedding response carried an empty vector".to_string(),
            ));
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = VllmClient::new("http://localhost:8000");
        assert_eq!(client.base_url, "http://localhost:8000");

        // Trailing slash removal.
        let client = VllmClient::new("http://localhost:8000/");
        assert_eq!(client.base_url, "http://localhost:8000");
    }

    #[test]
    fn chat_request_serializes_model_per_call() {
        let request = ChatRequest {
            model: "Qwen/Qwen2.5-1.5B".to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: "hi".to_string(),
            }],
            max_tokens: 16,
            temperature: 0.7,
            top_p: 0.95,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"model\":\"Qwen/Qwen2.5-1.5B\""));
    }
}
