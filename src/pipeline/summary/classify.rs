use super::prompt::classify_prompt;
use super::stage::call_model;
use super::types::{Extraction, FallbackReason};
use crate::config::StageConfig;
use crate::models::{ReportType, Specialty};
use crate::pipeline::llm::TextGenerator;

const ONCOLOGY_TERMS: &[&str] = &["oncology", "oncolog", "cancer", "tumor", "tumour"];
const SPEECH_TERMS: &[&str] = &["speech", "audio", "hearing"];

/// Match a free-form model reply against the label set. Exact labels win,
/// then keyword presence. `None` when nothing matches.
pub fn parse_specialty_label(raw: &str) -> Option<Specialty> {
    let lower = raw.trim().to_lowercase();
    let first_word = lower
        .split(|c: char| !c.is_alphabetic())
        .find(|w| !w.is_empty())
        .unwrap_or("");

    if let Ok(exact) = first_word.parse::<Specialty>() {
        return Some(exact);
    }
    if ONCOLOGY_TERMS.iter().any(|t| lower.contains(t)) {
        Some(Specialty::Oncology)
    } else if SPEECH_TERMS.iter().any(|t| lower.contains(t)) {
        Some(Specialty::Speech)
    } else if lower.contains("general") {
        Some(Specialty::General)
    } else {
        None
    }
}

/// Single low-temperature call labelling the case. Any failure or an
/// unrecognised reply is a fallback; callers treat that as `General`.
pub async fn classify_specialty(
    generator: &dyn TextGenerator,
    stage: &StageConfig,
    context: &str,
    report_types: &[ReportType],
) -> Extraction<Specialty> {
    let prompt = classify_prompt(context, report_types);

    let result = match call_model(generator, stage, "classify", prompt).await {
        Ok(raw) => parse_specialty_label(&raw).ok_or_else(|| {
            FallbackReason::Unparseable(format!("no specialty label in {} chars", raw.len()))
        }),
        Err(reason) => Err(reason),
    };

    match &result {
        Ok(specialty) => tracing::info!(specialty = specialty.as_str(), "Specialty classified"),
        Err(reason) => {
            tracing::warn!(reason = %reason, "Specialty classification fell back to general")
        }
    }

    result.into()
}
