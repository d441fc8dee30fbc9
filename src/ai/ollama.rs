//! Ollama local LLM integration.
//!
//! Implements the LlmProvider trait for Ollama (local LLM).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{AIError, LlmProvider, Prompt};
use crate::core::LlmConfig;

/// Ollama API provider for local LLM.
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
    temperature: f32,
}

impl OllamaProvider {
    /// Create a new Ollama provider with default settings.
    ///
    /// Uses localhost:11434 by default.
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: std::env::var("OLLAMA_HOST")
                .unwrap_or_else(|_| "http://localhost:11434".to_string()),
            model: std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| "llama3.2".to_string()),
            temperature: 0.1,
        }
    }

    /// Create from the `[llm]` configuration section.
    ///
    /// The OpenAI default model name is not meaningful to Ollama and is ignored.
    pub fn from_config(config: &LlmConfig) -> Self {
        let mut provider = Self::new();
        provider.temperature = config.temperature;
        if config.model != LlmConfig::default().model {
            provider = provider.with_model(&config.model);
        }
        if let Some(url) = &config.base_url {
            provider = provider.with_base_url(url);
        }
        provider
    }

    /// Create with a specific base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Create with a specific model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn build_request(&self, prompt: &Prompt) -> OllamaRequest {
        OllamaRequest {
            model: self.model.clone(),
            system: prompt.system.clone(),
            prompt: prompt.user.clone(),
            stream: false,
            format: prompt.expect_json.then(|| "json".to_string()),
            options: OllamaOptions { temperature: self.temperature },
        }
    }
}

impl Default for OllamaProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn complete(&self, prompt: &Prompt) -> anyhow::Result<String> {
        let request = self.build_request(prompt);

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AIError::ApiError { status, body }.into());
        }

        let response: OllamaResponse = response.json().await?;
        if response.response.trim().is_empty() {
            return Err(AIError::NoResponse.into());
        }
        Ok(response.response)
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    system: String,
    prompt: String,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<String>,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}
