//! Extraction capability client
//!
//! The extraction model is an opaque text-in/text-out capability. The
//! production adapter speaks the OpenAI-compatible chat completions protocol
//! and retries transient failures with exponential backoff.

use crate::config::ExtractionConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Text completion capability used to extract graph structure
#[async_trait]
pub trait ExtractionClient: Send + Sync {
    /// Run the model with a system prompt over one document text
    async fn complete(&self, system_prompt: &str, document_text: &str) -> Result<String>;

    /// Capability name, used as the rate-limit key
    fn name(&self) -> &str;
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

/// OpenAI-compatible chat completions client
pub struct ChatCompletionClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_retry: Duration,
}

impl ChatCompletionClient {
    /// Build from configuration; fails when no API key is configured
    pub fn from_config(config: &ExtractionConfig) -> Result<Self> {
        let api_key = config.credential().ok_or_else(|| AppError::Configuration {
            message: "extraction.api_key is not set".to_string(),
        })?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: api_key.to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_retry: Duration::from_secs(config.max_retry_secs),
        })
    }

    async fn call_once(&self, system_prompt: &str, document_text: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: document_text,
                },
            ],
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("API error {}: {}", status, body);
            // 429 and 5xx are worth another attempt
            return Err(if status.as_u16() == 429 || status.is_server_error() {
                AppError::Extraction { message }
            } else {
                AppError::InvalidInput { message }
            });
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AppError::Extraction {
                message: "Empty completion".to_string(),
            })
    }
}

#[async_trait]
impl ExtractionClient for ChatCompletionClient {
    async fn complete(&self, system_prompt: &str, document_text: &str) -> Result<String> {
        let policy = ExponentialBackoff {
            max_elapsed_time: Some(self.max_retry),
            ..ExponentialBackoff::default()
        };

        retry(policy, || async {
            self.call_once(system_prompt, document_text).await.map_err(|e| {
                if e.is_transient() {
                    warn!(error = %e, model = %self.model, "Extraction call failed, retrying");
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        })
        .await
        .inspect(|text| debug!(chars = text.len(), "Extraction call completed"))
    }

    fn name(&self) -> &str {
        &self.model
    }
}
