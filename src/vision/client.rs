//! # Vision Client
//!
//! Confine con la vision API esterna: payload JPEG in base64 + prompt + modello
//! in ingresso, testo in uscita oppure un errore.

use crate::error::VisionError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// One image description request
#[derive(Debug, Clone)]
pub struct VisionRequest {
    pub model: String,
    pub prompt: String,
    /// Base64 JPEG, built right before the call and never persisted
    pub image_base64: String,
}

/// External vision collaborator
#[async_trait]
pub trait VisionClient: Send + Sync {
    /// Returns the completion text, `None` when the model answered with nothing
    async fn complete(&self, request: &VisionRequest) -> Result<Option<String>, VisionError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// OpenAI-compatible chat completions client
pub struct OpenAiVisionClient {
    client: Client,
    base_url: String,
    api_key: String,
    max_tokens: u32,
}

impl OpenAiVisionClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, VisionError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VisionError::Api(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            max_tokens: 300,
        })
    }
}

#[async_trait]
impl VisionClient for OpenAiVisionClient {
    async fn complete(&self, request: &VisionRequest) -> Result<Option<String>, VisionError> {
        let body = ChatRequest {
            model: &request.model,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text {
                        text: &request.prompt,
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: format!("data:image/jpeg;base64,{}", request.image_base64),
                        },
                    },
                ],
            }],
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| VisionError::Transient(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = format!("API error ({}): {}", status, text);
            return Err(if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                VisionError::Transient(message)
            } else {
                VisionError::Api(message)
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| VisionError::Api(format!("Failed to parse response: {}", e)))?;

        let content = parsed.choices.into_iter().next().and_then(|c| c.message.content);
        debug!("Vision completion received ({} chars)", content.as_deref().map_or(0, str::len));
        Ok(content)
    }
}
