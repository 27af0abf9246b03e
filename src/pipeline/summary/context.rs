use crate::config::{PipelineConfig, StageConfig};
use crate::models::*;

use super::types::{RetrievedContext, ScoredFragment};
use super::universal::UniversalContexts;

const BLOCK_SEPARATOR: &str = "\n\n";
const NEW_REPORTS_LABEL: &str = "NEW REPORTS";

/// Kinds of labeled context block, highest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    PriorEvolution,
    PriorStatus,
    PriorSpecialty(Specialty),
    NewReports,
}

impl BlockKind {
    /// Provenance of the block as a whole. Fragments inside `NewReports`
    /// carry their own.
    pub fn provenance(self) -> Option<Provenance> {
        match self {
            BlockKind::NewReports => None,
            _ => Some(Provenance::Continuity),
        }
    }
}

/// One labeled section of the model context.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextBlock {
    pub kind: BlockKind,
    pub label: String,
    pub body: String,
}

impl ContextBlock {
    fn new(kind: BlockKind, label: String, body: String) -> Self {
        Self { kind, label, body }
    }

    pub fn render(&self) -> String {
        format!("[{}]\n{}", self.label, self.body)
    }

    fn rendered_len(&self) -> usize {
        self.label.chars().count() + 3 + self.body.chars().count()
    }
}

/// Assembled context: labeled blocks, their rendered text, and the fragments
/// that made it in.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledContext {
    pub text: String,
    /// Rendered continuity blocks only (empty when there is no prior summary).
    pub continuity: String,
    pub blocks: Vec<ContextBlock>,
    pub retrieved: RetrievedContext,
}

impl AssembledContext {
    pub fn has_continuity(&self) -> bool {
        !self.continuity.is_empty()
    }

    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    /// Every reason something was put in this context, continuity first.
    pub fn provenance(&self) -> Vec<Provenance> {
        let mut seen: Vec<Provenance> = Vec::new();
        let tags = self
            .blocks
            .iter()
            .filter_map(|b| b.kind.provenance())
            .chain(self.retrieved.fragments.iter().map(|f| f.provenance));
        for tag in tags {
            if !seen.contains(&tag) {
                seen.push(tag);
            }
        }
        seen
    }
}

/// One assembled context per model stage, each fit to that stage's own
/// character budget so every prompt keeps whole blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct StageContexts {
    pub classify: AssembledContext,
    pub evolution: AssembledContext,
    pub current_status: AssembledContext,
    pub plan: AssembledContext,
    pub specialty: AssembledContext,
}

impl StageContexts {
    /// Assemble for every stage. `max_chars` caps all stage budgets.
    pub fn assemble(
        candidates: &[ScoredFragment],
        prior: Option<&Summary>,
        config: &PipelineConfig,
        max_chars: usize,
    ) -> Self {
        let fit = |stage: &StageConfig| {
            assemble_context(candidates, prior, stage.context_chars.min(max_chars))
        };
        Self {
            classify: fit(&config.classify),
            evolution: fit(&config.evolution),
            current_status: fit(&config.current_status),
            plan: fit(&config.plan),
            specialty: fit(&config.specialty),
        }
    }

    pub fn universal(&self) -> UniversalContexts<'_> {
        UniversalContexts {
            evolution: &self.evolution.text,
            current_status: &self.current_status.text,
            plan: &self.plan.text,
        }
    }

    pub fn all(&self) -> [&AssembledContext; 5] {
        [
            &self.classify,
            &self.evolution,
            &self.current_status,
            &self.plan,
            &self.specialty,
        ]
    }

    pub fn has_continuity(&self) -> bool {
        self.all().iter().any(|c| c.has_continuity())
    }

    /// Largest stage context, in characters.
    pub fn max_char_len(&self) -> usize {
        self.all().iter().map(|c| c.char_len()).max().unwrap_or(0)
    }
}

/// Fragments that appear in at least one of `contexts`, chronologically.
pub fn seen_by<'a>(
    contexts: impl IntoIterator<Item = &'a AssembledContext>,
) -> RetrievedContext {
    let mut fragments: Vec<ScoredFragment> = Vec::new();
    for context in contexts {
        for scored in &context.retrieved.fragments {
            if !fragments.iter().any(|f| f.fragment.id == scored.fragment.id) {
                fragments.push(scored.clone());
            }
        }
    }
    fragments.sort_by_key(|f| f.fragment.position());
    RetrievedContext { fragments }
}

pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

// ═══════════════════════════════════════════
// Continuity
// ═══════════════════════════════════════════

fn prior_label(section: &str) -> String {
    format!("PREVIOUS SUMMARY — {section}")
}

/// Labeled blocks extracted from a prior summary, highest priority first.
/// Failure markers and hand-built fallbacks carry nothing worth continuing.
pub fn continuity_blocks(prior: &Summary) -> Vec<ContextBlock> {
    if prior.is_fallback() {
        return Vec::new();
    }

    let mut blocks = Vec::new();

    let evolution = prior
        .universal
        .evolution
        .trim_start_matches(DEGRADED_PREFIX)
        .trim();
    if !evolution.is_empty() && !is_failure_marker(evolution) {
        blocks.push(ContextBlock::new(
            BlockKind::PriorEvolution,
            prior_label("EVOLUTION"),
            evolution.to_string(),
        ));
    }

    let status: Vec<String> = prior
        .universal
        .current_status
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty() && !is_failure_marker(s))
        .map(|s| format!("- {s}"))
        .collect();
    if !status.is_empty() {
        blocks.push(ContextBlock::new(
            BlockKind::PriorStatus,
            prior_label("CURRENT STATUS"),
            status.join("\n"),
        ));
    }

    if let Some(data) = prior.oncology.as_ref().filter(|d| !d.is_empty()) {
        blocks.push(ContextBlock::new(
            BlockKind::PriorSpecialty(Specialty::Oncology),
            prior_label("ONCOLOGY"),
            render_oncology(data),
        ));
    } else if let Some(data) = prior.speech.as_ref().filter(|d| !d.is_empty()) {
        blocks.push(ContextBlock::new(
            BlockKind::PriorSpecialty(Specialty::Speech),
            prior_label("SPEECH"),
            render_speech(data),
        ));
    }

    blocks
}

pub(crate) fn render_oncology(data: &OncologyData) -> String {
    let mut lines = Vec::new();
    if let Some(ref t) = data.cancer_type {
        lines.push(format!("Cancer type: {t}"));
    }
    if let Some(ref s) = data.tnm_staging {
        lines.push(format!("TNM staging: {s}"));
    }
    if let Some(ref g) = data.grade {
        lines.push(format!("Grade: {g}"));
    }
    if !data.tumor_size_trend.is_empty() {
        let sizes = data
            .tumor_size_trend
            .iter()
            .map(|m| match m.status {
                Some(status) => format!("{} {} cm ({})", m.date, m.size_cm, status.as_str()),
                None => format!("{} {} cm", m.date, m.size_cm),
            })
            .collect::<Vec<_>>()
            .join("; ");
        lines.push(format!("Tumor size: {sizes}"));
    }
    if let Some(ref markers) = data.biomarkers {
        let joined = markers
            .iter()
            .map(|(k, v)| format!("{k} {v}"))
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!("Biomarkers: {joined}"));
    }
    if let Some(ref r) = data.treatment_response {
        lines.push(format!("Treatment response: {r}"));
    }
    if let Some(ref negatives) = data.pertinent_negatives {
        lines.push(format!("Pertinent negatives: {}", negatives.join("; ")));
    }
    lines.join("\n")
}

fn render_ear(ear: &EarThresholds) -> String {
    const FREQS: [&str; 5] = ["500Hz", "1000Hz", "2000Hz", "4000Hz", "8000Hz"];
    FREQS
        .iter()
        .zip(ear.values())
        .filter_map(|(freq, value)| value.map(|v| format!("{freq} {v} dB")))
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn render_speech(data: &SpeechData) -> String {
    let mut lines = Vec::new();
    let loss = [data.hearing_loss_severity.as_deref(), data.hearing_loss_type.as_deref()]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");
    if !loss.is_empty() {
        lines.push(format!("Hearing loss: {loss}"));
    }
    if let Some(ref audiogram) = data.audiogram {
        if let Some(left) = audiogram.left.as_ref().filter(|e| !e.is_empty()) {
            lines.push(format!("Left ear: {}", render_ear(left)));
        }
        if let Some(right) = audiogram.right.as_ref().filter(|e| !e.is_empty()) {
            lines.push(format!("Right ear: {}", render_ear(right)));
        }
        if let Some(ref date) = audiogram.test_date {
            lines.push(format!("Audiogram date: {date}"));
        }
    }
    if let Some(ref scores) = data.speech_scores {
        let mut parts = Vec::new();
        if let Some(srt) = scores.srt_db {
            parts.push(format!("SRT {srt} dB"));
        }
        if let Some(wrs) = scores.wrs_percent {
            parts.push(format!("WRS {wrs}%"));
        }
        if !parts.is_empty() {
            lines.push(format!("Speech scores: {}", parts.join(", ")));
        }
    }
    if let Some(ref trend) = data.hearing_trend {
        lines.push(format!("Trend: {trend}"));
    }
    if let Some(tinnitus) = data.tinnitus {
        lines.push(format!("Tinnitus: {}", if tinnitus { "yes" } else { "no" }));
    }
    if let Some(balance) = data.balance_issues {
        lines.push(format!("Balance issues: {}", if balance { "yes" } else { "no" }));
    }
    if let Some(ref amp) = data.amplification {
        lines.push(format!("Amplification: {amp}"));
    }
    if let Some(ref negatives) = data.pertinent_negatives {
        lines.push(format!("Pertinent negatives: {}", negatives.join("; ")));
    }
    lines.join("\n")
}

/// Fit continuity blocks into `cap` characters: drop lowest priority blocks
/// first, truncate the last survivor only if it alone is too long.
fn fit_continuity(mut blocks: Vec<ContextBlock>, cap: usize) -> Vec<ContextBlock> {
    let total = |blocks: &[ContextBlock]| -> usize {
        blocks.iter().map(ContextBlock::rendered_len).sum::<usize>()
            + BLOCK_SEPARATOR.len() * blocks.len().saturating_sub(1)
    };

    while blocks.len() > 1 && total(&blocks) > cap {
        if let Some(dropped) = blocks.pop() {
            tracing::debug!(label = %dropped.label, "Continuity block dropped for budget");
        }
    }

    let Some(only) = blocks.first_mut() else {
        return blocks;
    };
    if only.rendered_len() > cap {
        let overhead = only.label.chars().count() + 3;
        if cap <= overhead {
            return Vec::new();
        }
        only.body = truncate_chars(&only.body, cap - overhead);
    }

    blocks
}

// ═══════════════════════════════════════════
// Fragment rendering
// ═══════════════════════════════════════════

fn format_fragment(scored: &ScoredFragment) -> String {
    let f = &scored.fragment;
    let page = f
        .page
        .map(|p| p.to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "[Report {} | {} | Page {} | Fragment {}]\n{}",
        f.report_id,
        f.report_type.as_str(),
        page,
        f.fragment_index,
        f.text.trim()
    )
}

/// Assemble the model context: continuity blocks (at most half the budget)
/// followed by `[NEW REPORTS]`. Candidates are admitted in priority order
/// while they fit, then rendered chronologically. The result never exceeds
/// `max_chars` characters.
pub fn assemble_context(
    candidates: &[ScoredFragment],
    prior: Option<&Summary>,
    max_chars: usize,
) -> AssembledContext {
    let continuity = fit_continuity(
        prior.map(continuity_blocks).unwrap_or_default(),
        max_chars / 2,
    );
    let continuity_text = continuity
        .iter()
        .map(ContextBlock::render)
        .collect::<Vec<_>>()
        .join(BLOCK_SEPARATOR);

    let mut used = continuity_text.chars().count();
    if used > 0 {
        used += BLOCK_SEPARATOR.len();
    }
    let header_len = NEW_REPORTS_LABEL.len() + 3;

    let mut admitted: Vec<(ScoredFragment, String)> = Vec::new();
    if used + header_len < max_chars {
        let mut remaining = max_chars - used - header_len;
        for candidate in candidates {
            let rendered = format_fragment(candidate);
            let cost = rendered.chars().count()
                + if admitted.is_empty() { 0 } else { BLOCK_SEPARATOR.len() };
            if cost <= remaining {
                remaining -= cost;
                admitted.push((candidate.clone(), rendered));
            } else if admitted.is_empty() {
                // Highest-priority fragment alone overflows: keep its head.
                admitted.push((candidate.clone(), truncate_chars(&rendered, remaining)));
                break;
            }
        }
    }

    admitted.sort_by_key(|(s, _)| s.fragment.position());

    let mut blocks = continuity;
    if !admitted.is_empty() {
        blocks.push(ContextBlock::new(
            BlockKind::NewReports,
            NEW_REPORTS_LABEL.to_string(),
            admitted
                .iter()
                .map(|(_, rendered)| rendered.as_str())
                .collect::<Vec<_>>()
                .join(BLOCK_SEPARATOR),
        ));
    }

    let text = blocks
        .iter()
        .map(ContextBlock::render)
        .collect::<Vec<_>>()
        .join(BLOCK_SEPARATOR);

    tracing::debug!(
        chars = text.chars().count(),
        budget = max_chars,
        fragments = admitted.len(),
        continuity_blocks = blocks.len() - usize::from(!admitted.is_empty()),
        "Context assembled"
    );

    AssembledContext {
        text,
        continuity: continuity_text,
        blocks,
        retrieved: RetrievedContext {
            fragments: admitted.into_iter().map(|(s, _)| s).collect(),
        },
    }
}
