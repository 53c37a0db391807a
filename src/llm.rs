//! Language model client for unattended auto-replies.
//!
//! Talks to an Ollama-style `/api/chat` endpoint:
//! request `{model, messages: [{role, content}], stream: false, options: {max_tokens}}`,
//! reply text read from `message.content`. Non-2xx statuses and bodies without that
//! field are failures.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::bridge::conversation::ConversationTurn;
use crate::config::LlmConfig;

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("language model did not answer within {0:?}")]
    Timeout(Duration),
    #[error("language model returned status {status}")]
    Status { status: u16 },
    #[error("language model request failed: {0}")]
    Transport(String),
    #[error("language model response was malformed: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Complete one chat turn given the full prompt (system instruction first).
    async fn complete(&self, messages: &[ConversationTurn]) -> Result<String, UpstreamError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ConversationTurn],
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// Extract `message.content` from a response body.
pub fn parse_chat_response(body: &str) -> Result<String, UpstreamError> {
    serde_json::from_str::<ChatResponse>(body)
        .map(|r| r.message.content)
        .map_err(|e| UpstreamError::Malformed(e.to_string()))
}

/// HTTP client for a local Ollama-compatible server.
pub struct OllamaClient {
    endpoint: String,
    model: String,
    max_tokens: u32,
    client: reqwest::Client,
}

impl OllamaClient {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LanguageModel for OllamaClient {
    async fn complete(&self, messages: &[ConversationTurn]) -> Result<String, UpstreamError> {
        let body = ChatRequest {
            model: &self.model,
            messages,
            stream: false,
            options: ChatOptions {
                max_tokens: self.max_tokens,
            },
        };
        debug!("Requesting completion from {} ({} turns)", self.endpoint, messages.len());
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(UpstreamError::Status {
                status: response.status().as_u16(),
            });
        }
        let text = response
            .text()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;
        parse_chat_response(&text)
    }
}
