use super::prompt::{
    clean_narrative, current_status_prompt, evolution_prompt, parse_bullets, plan_prompt,
};
use super::stage::call_model;
use super::types::{Extraction, FallbackReason};
use crate::config::{PipelineConfig, StageConfig};
use crate::models::{Specialty, UniversalSummary};
use crate::pipeline::llm::TextGenerator;

/// Context text handed to each universal stage, already fit to its budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UniversalContexts<'a> {
    pub evolution: &'a str,
    pub current_status: &'a str,
    pub plan: &'a str,
}

impl<'a> UniversalContexts<'a> {
    pub fn same(context: &'a str) -> Self {
        Self {
            evolution: context,
            current_status: context,
            plan: context,
        }
    }
}

/// The three universal results, each resolved independently.
#[derive(Debug, Clone, PartialEq)]
pub struct UniversalOutcome {
    pub evolution: Extraction<String>,
    pub current_status: Extraction<Vec<String>>,
    pub plan: Extraction<Vec<String>>,
}

impl UniversalOutcome {
    pub fn fallback_reasons(&self) -> Vec<&FallbackReason> {
        [
            self.evolution.fallback_reason(),
            self.current_status.fallback_reason(),
            self.plan.fallback_reason(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    pub fn all_failed(&self) -> bool {
        self.fallback_reasons().len() == 3
    }

    pub fn any_failed(&self) -> bool {
        !self.fallback_reasons().is_empty()
    }

    /// Collapse into the summary block, substituting a marker for every
    /// stage that fell back.
    pub fn into_summary(self) -> UniversalSummary {
        UniversalSummary {
            evolution: self.evolution.unwrap_or_marker(|m| m),
            current_status: self.current_status.unwrap_or_marker(|m| vec![m]),
            plan: self.plan.unwrap_or_marker(|m| vec![m]),
        }
    }
}

pub async fn extract_evolution(
    generator: &dyn TextGenerator,
    stage: &StageConfig,
    context: &str,
    specialty: Option<Specialty>,
) -> Extraction<String> {
    let prompt = evolution_prompt(context, specialty);
    let result = call_model(generator, stage, "evolution", prompt)
        .await
        .and_then(|raw| {
            let narrative = clean_narrative(&raw);
            if narrative.is_empty() {
                Err(FallbackReason::EmptyResponse)
            } else {
                Ok(narrative)
            }
        });
    result.into()
}

async fn extract_list(
    generator: &dyn TextGenerator,
    stage: &StageConfig,
    stage_name: &'static str,
    prompt: String,
) -> Extraction<Vec<String>> {
    let result = call_model(generator, stage, stage_name, prompt)
        .await
        .and_then(|raw| {
            let bullets = parse_bullets(&raw);
            if bullets.is_empty() {
                Err(FallbackReason::Unparseable("no bullet items".into()))
            } else {
                Ok(bullets)
            }
        });
    result.into()
}

pub async fn extract_current_status(
    generator: &dyn TextGenerator,
    stage: &StageConfig,
    context: &str,
    specialty: Option<Specialty>,
) -> Extraction<Vec<String>> {
    let prompt = current_status_prompt(context, specialty);
    extract_list(generator, stage, "current_status", prompt).await
}

pub async fn extract_plan(
    generator: &dyn TextGenerator,
    stage: &StageConfig,
    context: &str,
    specialty: Option<Specialty>,
) -> Extraction<Vec<String>> {
    let prompt = plan_prompt(context, specialty);
    extract_list(generator, stage, "plan", prompt).await
}

/// Run the three universal stages concurrently and wait for all of them.
/// A timeout in one leaves its siblings running to completion.
pub async fn extract_universal(
    generator: &dyn TextGenerator,
    config: &PipelineConfig,
    contexts: UniversalContexts<'_>,
    specialty: Option<Specialty>,
) -> UniversalOutcome {
    let (evolution, current_status, plan) = tokio::join!(
        extract_evolution(generator, &config.evolution, contexts.evolution, specialty),
        extract_current_status(
            generator,
            &config.current_status,
            contexts.current_status,
            specialty
        ),
        extract_plan(generator, &config.plan, contexts.plan, specialty),
    );

    let outcome = UniversalOutcome {
        evolution,
        current_status,
        plan,
    };
    tracing::info!(
        evolution_ok = !outcome.evolution.is_fallback(),
        current_status_ok = !outcome.current_status.is_fallback(),
        plan_ok = !outcome.plan.is_fallback(),
        "Universal extraction complete"
    );
    outcome
}
