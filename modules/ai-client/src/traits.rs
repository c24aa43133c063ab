use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AiError {
    #[error("Rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Provider error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Empty response from provider")]
    Empty,

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl AiError {
    /// Auth failures and client-side request errors are terminal; everything
    /// else is worth a retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            AiError::RateLimited { .. } | AiError::Empty => true,
            AiError::Api { status, .. } => *status >= 500,
            AiError::Auth(_) => false,
            AiError::Http(e) => !e.is_builder(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone)]
pub struct GenerationResponse {
    pub text: String,
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl GenerationResponse {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Seam between the pipeline and the model provider. Workers hold a
/// `dyn TextGenerator`; tests substitute a scripted fake.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, AiError>;

    fn model(&self) -> &str;
}
