use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{GenerationRequest, LlmError, QueryEmbedder, TextGenerator};
use crate::config::{self, PipelineConfig};

/// Ollama HTTP client for local LLM inference.
pub struct OllamaClient {
    base_url: String,
    client: reqwest::Client,
    timeout_secs: u64,
    embedding_model: String,
}

impl OllamaClient {
    /// Create a new OllamaClient pointing at a local Ollama instance.
    pub fn new(base_url: &str, timeout_secs: u64) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            timeout_secs,
            embedding_model: config::DEFAULT_EMBEDDING_MODEL.to_string(),
        }
    }

    /// Default Ollama instance at localhost:11434 with a 2-minute transport timeout.
    pub fn default_local() -> Self {
        Self::new(config::DEFAULT_OLLAMA_URL, 120)
    }

    /// Client for the URL and embedding model of a pipeline configuration.
    /// The transport timeout covers the slowest stage; stages apply their own.
    pub fn from_config(config: &PipelineConfig) -> Self {
        let slowest = [
            config.classify.timeout,
            config.evolution.timeout,
            config.current_status.timeout,
            config.plan.timeout,
            config.specialty.timeout,
        ]
        .into_iter()
        .max()
        .unwrap_or(Duration::from_secs(120));
        Self::new(&config.ollama_url, slowest.as_secs().max(1))
            .with_embedding_model(&config.embedding_model)
    }

    pub fn with_embedding_model(mut self, model: &str) -> Self {
        self.embedding_model = model.to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Names of the models installed on the service.
    pub async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(self.timeout_secs))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let parsed: OllamaTagsResponse = Self::read_json(response).await?;
        Ok(parsed.models.into_iter().map(|m| m.name).collect())
    }

    /// First candidate that is installed, in candidate order.
    pub async fn find_available_model(&self, candidates: &[String]) -> Result<String, LlmError> {
        let available = self.list_models().await?;
        candidates
            .iter()
            .find(|c| available.iter().any(|m| m.starts_with(c.as_str())))
            .cloned()
            .ok_or(LlmError::NoModelAvailable)
    }

    fn transport_error(&self, e: reqwest::Error) -> LlmError {
        if e.is_timeout() {
            LlmError::Timeout(self.timeout_secs)
        } else if e.is_connect() {
            LlmError::Connection(self.base_url.clone())
        } else {
            LlmError::ResponseParsing(e.to_string())
        }
    }

    async fn read_json<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<T, LlmError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Http {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| LlmError::ResponseParsing(e.to_string()))
    }
}

/// Request body for Ollama /api/generate
#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    top_p: f32,
    repeat_penalty: f32,
    num_ctx: u32,
}

/// Response body from Ollama /api/generate
#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

#[derive(Serialize)]
struct OllamaEmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

/// Response body from Ollama /api/tags
#[derive(Deserialize)]
struct OllamaTagsResponse {
    models: Vec<OllamaModel>,
}

#[derive(Deserialize)]
struct OllamaModel {
    name: String,
}

fn generate_body(request: &GenerationRequest) -> OllamaGenerateRequest<'_> {
    OllamaGenerateRequest {
        model: &request.model,
        prompt: &request.prompt,
        stream: false,
        options: OllamaOptions {
            temperature: request.temperature,
            top_p: config::TOP_P,
            repeat_penalty: config::REPEAT_PENALTY,
            num_ctx: request.num_ctx,
        },
    }
}

#[async_trait]
impl TextGenerator for OllamaClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError> {
        let url = format!("{}/api/generate", self.base_url);
        let response = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(self.timeout_secs))
            .json(&generate_body(request))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let parsed: OllamaGenerateResponse = Self::read_json(response).await?;
        Ok(parsed.response)
    }
}

#[async_trait]
impl QueryEmbedder for OllamaClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let url = format!("{}/api/embeddings", self.base_url);
        let response = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(self.timeout_secs))
            .json(&OllamaEmbeddingRequest {
                model: &self.embedding_model,
                prompt: text,
            })
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let parsed: OllamaEmbeddingResponse = Self::read_json(response).await?;
        if parsed.embedding.is_empty() {
            return Err(LlmError::ResponseParsing("empty embedding".into()));
        }
        Ok(parsed.embedding)
    }
}

impl PipelineConfig {
    /// Point every stage at the first installed model among the primary and
    /// fallback models. Leaves the configuration untouched when the service
    /// cannot be reached or nothing is installed.
    pub async fn resolve_models(&mut self, client: &OllamaClient) {
        let candidates = self.model_candidates();
        match client.find_available_model(&candidates).await {
            Ok(model) => {
                if model != self.evolution.model {
                    tracing::warn!(
                        configured = %self.evolution.model,
                        resolved = %model,
                        "Configured model not installed, using fallback"
                    );
                }
                self.set_model(&model);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Model resolution failed, keeping configured model");
            }
        }
    }
}
