use std::time::Instant;

use super::types::FallbackReason;
use crate::config::StageConfig;
use crate::pipeline::llm::{sanitize_llm_output, GenerationRequest, TextGenerator};

/// One model call under the stage's own timeout. Resolves to sanitized,
/// non-empty text or the reason it fell back; never cancels anything else.
pub async fn call_model(
    generator: &dyn TextGenerator,
    stage: &StageConfig,
    stage_name: &'static str,
    prompt: String,
) -> Result<String, FallbackReason> {
    let request = GenerationRequest {
        prompt,
        model: stage.model.clone(),
        temperature: stage.temperature,
        num_ctx: stage.num_ctx,
    };

    let started = Instant::now();
    let outcome = tokio::time::timeout(stage.timeout, generator.generate(&request)).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    let raw = match outcome {
        Err(_) => {
            tracing::warn!(
                stage = stage_name,
                timeout_ms = stage.timeout.as_millis() as u64,
                "Model call timed out"
            );
            return Err(FallbackReason::Timeout);
        }
        Ok(Err(e)) => {
            tracing::warn!(stage = stage_name, elapsed_ms, error = %e, "Model call failed");
            return Err(FallbackReason::from(e));
        }
        Ok(Ok(raw)) => raw,
    };

    let text = sanitize_llm_output(&raw);
    if text.is_empty() {
        tracing::warn!(stage = stage_name, elapsed_ms, "Model returned empty response");
        return Err(FallbackReason::EmptyResponse);
    }

    tracing::debug!(stage = stage_name, elapsed_ms, chars = text.len(), "Model call complete");
    Ok(text)
}
