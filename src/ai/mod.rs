//! AI integration module.
//!
//! Wraps language-model providers behind one trait and builds the two
//! model-backed workflow stages on top of it:
//!
//! - Code generation from a work item, with evaluation feedback
//! - Code evaluation against the work item, as a structured verdict

mod evaluation;
mod generation;
mod ollama;
mod openai;

pub use evaluation::{extract_json_object, parse_verdict, EvaluationFault, LlmEvaluator};
pub use generation::{strip_code_fences, LlmGenerator};
pub use ollama::OllamaProvider;
pub use openai::OpenAIProvider;

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::LlmConfig;

/// A single request to a language model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    /// System instructions
    pub system: String,
    /// User message
    pub user: String,
    /// Ask the provider to answer with a JSON object
    pub expect_json: bool,
}

impl Prompt {
    /// Create a free-text prompt.
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self { system: system.into(), user: user.into(), expect_json: false }
    }

    /// Request a JSON answer.
    pub fn json(mut self) -> Self {
        self.expect_json = true;
        self
    }
}

/// Trait for language-model providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a prompt and return the model's text reply.
    async fn complete(&self, prompt: &Prompt) -> anyhow::Result<String>;

    /// Get the provider name.
    fn name(&self) -> &str;
}

/// AI error types.
#[derive(Debug, thiserror::Error)]
pub enum AIError {
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Missing API key for {0}")]
    MissingApiKey(String),

    #[error("API error ({status}): {body}")]
    ApiError { status: u16, body: String },

    #[error("No response from AI")]
    NoResponse,
}

/// Build the provider selected by `llm.provider`.
pub fn provider_from_config(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, AIError> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAIProvider::from_config(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::from_config(config))),
        other => Err(AIError::UnknownProvider(other.to_string())),
    }
}
