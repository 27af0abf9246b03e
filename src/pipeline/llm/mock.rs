use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{GenerationRequest, LlmError, QueryEmbedder, TextGenerator};

struct Rule {
    needle: String,
    delay: Option<Duration>,
    reply: Result<String, LlmError>,
}

/// Scripted generator for testing: the first rule whose needle occurs in the
/// prompt decides the reply. Every request is recorded.
pub struct ScriptedGenerator {
    rules: Vec<Rule>,
    default_reply: Result<String, LlmError>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            default_reply: Err(LlmError::Connection("scripted: no matching rule".into())),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Reply with `text` when the prompt contains `needle`.
    pub fn on(mut self, needle: &str, text: &str) -> Self {
        self.rules.push(Rule {
            needle: needle.to_string(),
            delay: None,
            reply: Ok(text.to_string()),
        });
        self
    }

    /// Fail with `error` when the prompt contains `needle`.
    pub fn fail_on(mut self, needle: &str, error: LlmError) -> Self {
        self.rules.push(Rule {
            needle: needle.to_string(),
            delay: None,
            reply: Err(error),
        });
        self
    }

    /// Sleep for `delay`, then reply with `text`, when the prompt contains `needle`.
    pub fn delay_on(mut self, needle: &str, delay: Duration, text: &str) -> Self {
        self.rules.push(Rule {
            needle: needle.to_string(),
            delay: Some(delay),
            reply: Ok(text.to_string()),
        });
        self
    }

    /// Reply used when no rule matches.
    pub fn otherwise(mut self, text: &str) -> Self {
        self.default_reply = Ok(text.to_string());
        self
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn prompts_containing(&self, needle: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.prompt.contains(needle))
            .count()
    }
}

impl Default for ScriptedGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError> {
        if let Ok(mut log) = self.requests.lock() {
            log.push(request.clone());
        }

        let rule = self
            .rules
            .iter()
            .find(|r| request.prompt.contains(&r.needle));

        match rule {
            Some(rule) => {
                if let Some(delay) = rule.delay {
                    tokio::time::sleep(delay).await;
                }
                rule.reply.clone()
            }
            None => self.default_reply.clone(),
        }
    }
}

/// Embedder returning a fixed vector (or error) for every query.
pub struct FixedEmbedder {
    reply: Result<Vec<f32>, LlmError>,
}

impl FixedEmbedder {
    pub fn new(vector: Vec<f32>) -> Self {
        Self { reply: Ok(vector) }
    }

    pub fn failing(error: LlmError) -> Self {
        Self { reply: Err(error) }
    }
}

#[async_trait]
impl QueryEmbedder for FixedEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, LlmError> {
        self.reply.clone()
    }
}
