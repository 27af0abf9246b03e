//! Post-generation output cleanup.
//!
//! Strips model artifacts (reasoning preambles, unused tokens) before any
//! stage parses the text.

use std::sync::LazyLock;

use regex::Regex;

static UNUSED_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<unused\d+>").expect("valid regex"));

static THINK_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("valid regex"));

/// Strip model-specific artifacts from raw LLM output.
///
/// Handles:
/// 1. Gemma-style reasoning preambles (`<unusedN>thought\n...`)
/// 2. `<think>...</think>` blocks emitted by reasoning-tuned models
/// 3. Stray `<unusedN>` tokens
/// 4. Leading/trailing whitespace left behind
pub fn sanitize_llm_output(raw: &str) -> String {
    let mut text = raw.to_string();

    if let Some(idx) = text.find("<unused") {
        if let Some(thought_offset) = text[idx..].find("thought\n") {
            text = text[idx + thought_offset + "thought\n".len()..].to_string();
        }
    }

    text = THINK_BLOCK_RE.replace_all(&text, "").to_string();
    text = UNUSED_TOKEN_RE.replace_all(&text, "").to_string();

    text.trim().to_string()
}
