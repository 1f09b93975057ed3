//! Anthropic Messages API backend

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{
    ContentBlock, Message, ModelBackend, ModelRequest, ModelResponse, StopReason, TokenUsage,
    ToolSpec,
};
use crate::config::ModelConfig;
use crate::error::ModelError;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicBackend {
    client: Client,
    api_key: String,
    base_url: String,
    model_id: String,
}

impl AnthropicBackend {
    pub fn new(
        api_key: impl Into<String>,
        model_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ModelError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ModelError::unknown(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model_id: model_id.into(),
        })
    }

    pub fn from_config(
        config: &ModelConfig,
        api_key: impl Into<String>,
    ) -> Result<Self, ModelError> {
        let backend = Self::new(api_key, &config.model, Duration::from_secs(config.timeout_secs))?;
        Ok(match &config.base_url {
            Some(url) => backend.with_base_url(url),
            None => backend,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl ModelBackend for AnthropicBackend {
    async fn send(&self, request: &ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        let body = AnthropicRequest::from(request);
        debug!(model = %body.model, messages = body.messages.len(), "Sending model request");

        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ModelError::network(format!("Request timeout: {}", e))
                } else if e.is_connect() {
                    ModelError::network(format!("Connection failed: {}", e))
                } else {
                    ModelError::unknown(format!("Request failed: {}", e))
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ModelError::network(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(classify_error(status.as_u16(), &text));
        }

        parse_response(&text)
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

fn classify_error(status: u16, body: &str) -> ModelError {
    match status {
        401 | 403 => ModelError::auth(format!("Authentication failed: {}", body)),
        429 => ModelError::rate_limit(format!("Rate limited: {}", body)),
        400 => ModelError::invalid_request(format!("Invalid request: {}", body)),
        500..=599 => ModelError::server_error(format!("Server error: {}", body)),
        _ => ModelError::unknown(format!("HTTP {}: {}", status, body)),
    }
}

fn parse_response(body: &str) -> Result<ModelResponse, ModelError> {
    let response: AnthropicResponse = serde_json::from_str(body).map_err(|e| {
        ModelError::unknown(format!("Failed to parse response: {} - body: {}", e, body))
    })?;

    let content = response
        .content
        .into_iter()
        .filter_map(|block| match block {
            WireBlock::Text { text } => Some(ContentBlock::Text { text }),
            WireBlock::ToolUse { id, name, input } => {
                Some(ContentBlock::ToolUse { id, name, input })
            }
            WireBlock::Unsupported => None,
        })
        .collect();

    Ok(ModelResponse {
        stop_reason: StopReason::from(response.stop_reason.as_deref().unwrap_or("unknown")),
        content,
        usage: TokenUsage {
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
        },
    })
}

// Anthropic API types

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "is_blank")]
    system: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "no_tools")]
    tools: &'a [ToolSpec],
}

fn is_blank(system: &&str) -> bool {
    system.is_empty()
}

fn no_tools(tools: &&[ToolSpec]) -> bool {
    tools.is_empty()
}

impl<'a> From<&ModelRequest<'a>> for AnthropicRequest<'a> {
    fn from(request: &ModelRequest<'a>) -> Self {
        Self {
            model: &request.params.model,
            max_tokens: request.params.max_tokens,
            temperature: request.params.temperature,
            system: request.system,
            messages: request.messages,
            tools: request.tools,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    /// Thinking, citations and anything newer
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<WireBlock>,
    stop_reason: Option<String>,
    #[serde(default)]
    usage: AnthropicUsage,
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}
