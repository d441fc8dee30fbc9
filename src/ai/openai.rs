//! OpenAI API integration.
//!
//! Implements the LlmProvider trait for OpenAI chat models and any
//! compatible endpoint reachable through `base_url`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{AIError, LlmProvider, Prompt};
use crate::core::LlmConfig;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI API provider.
pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider with default model settings.
    pub fn new(api_key: impl Into<String>) -> Self {
        let defaults = LlmConfig::default();
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            model: defaults.model,
            base_url: DEFAULT_BASE_URL.to_string(),
            temperature: defaults.temperature,
            max_tokens: defaults.max_tokens,
        }
    }

    /// Create from the `[llm]` configuration section.
    pub fn from_config(config: &LlmConfig) -> Result<Self, AIError> {
        let api_key =
            config.api_key.clone().ok_or_else(|| AIError::MissingApiKey("openai".to_string()))?;

        let mut provider = Self::new(api_key).with_model(&config.model);
        provider.temperature = config.temperature;
        provider.max_tokens = config.max_tokens;
        if let Some(url) = &config.base_url {
            provider = provider.with_base_url(url);
        }
        Ok(provider)
    }

    /// Create with a specific model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Create with a custom base URL (for Azure OpenAI or compatible APIs).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    fn build_request(&self, prompt: &Prompt) -> OpenAIRequest {
        OpenAIRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage { role: "system".to_string(), content: prompt.system.clone() },
                ChatMessage { role: "user".to_string(), content: prompt.user.clone() },
            ],
            max_tokens: Some(self.max_tokens),
            temperature: Some(self.temperature),
            response_format: prompt
                .expect_json
                .then(|| ResponseFormat { format_type: "json_object".to_string() }),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAIProvider {
    async fn complete(&self, prompt: &Prompt) -> anyhow::Result<String> {
        let request = self.build_request(prompt);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AIError::ApiError { status, body }.into());
        }

        let response: OpenAIResponse = response.json().await?;

        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AIError::NoResponse.into())
    }

    fn name(&self) -> &str {
        "openai"
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}
