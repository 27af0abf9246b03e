pub mod mock;
pub mod ollama;
pub mod sanitize;

pub use mock::*;
pub use ollama::*;
pub use sanitize::*;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Language model service is not reachable at {0}")]
    Connection(String),

    #[error("Language model service returned error (status {status}): {body}")]
    Http { status: u16, body: String },

    #[error("Response parsing error: {0}")]
    ResponseParsing(String),

    #[error("No configured model is installed")]
    NoModelAvailable,
}

/// One generate call: prompt plus the per-stage sampling settings.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub model: String,
    pub temperature: f32,
    pub num_ctx: u32,
}

/// Text generation boundary (allows mocking).
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError>;
}

/// Embeds the retrieval query into the fragment embedding space.
#[async_trait]
pub trait QueryEmbedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;
}
