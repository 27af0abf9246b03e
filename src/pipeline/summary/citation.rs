use std::collections::HashSet;

use super::context::{render_oncology, render_speech};
use super::types::{RetrievedContext, ScoredFragment};
use crate::models::*;

const PREVIEW_CHARS: usize = 200;
const MIN_SHARED_WORDS: usize = 2;
const MIN_WORD_LEN: usize = 4;

const STOPWORDS: &[&str] = &[
    "with", "from", "that", "this", "were", "have", "been", "will", "into", "there", "their",
    "which", "after", "about", "also", "than", "then", "patient", "report",
];

const ONCOLOGY_VOCAB: &[&str] = &[
    "tumor", "tumour", "cancer", "carcinoma", "malignan", "metasta", "lesion", "mass", "biopsy",
    "chemo", "radiation", "staging", "oncolog", "lymph",
];

const SPEECH_VOCAB: &[&str] = &[
    "hearing", "audiogram", "audiolog", "tinnitus", "speech", "threshold", "cochlear", "db hl",
    "tympan", "amplification",
];

const PLAN_VOCAB: &[&str] = &["plan", "follow-up", "follow up", "recommend", "schedule", "refer"];

fn content_words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= MIN_WORD_LEN)
        .map(str::to_lowercase)
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .collect()
}

fn overlaps(fragment_words: &HashSet<String>, section_words: &HashSet<String>) -> bool {
    fragment_words.intersection(section_words).count() >= MIN_SHARED_WORDS
}

fn mentions(lower_text: &str, vocab: &[&str]) -> bool {
    vocab.iter().any(|v| lower_text.contains(v))
}

fn section_text(items: &[String]) -> String {
    items
        .iter()
        .filter(|s| !is_failure_marker(s))
        .cloned()
        .collect::<Vec<_>>()
        .join("\n")
}

/// Word sets of each summary section, computed once per run.
struct SectionIndex {
    evolution: HashSet<String>,
    current_status: HashSet<String>,
    plan: HashSet<String>,
    specialty: Option<(SummarySection, HashSet<String>, &'static [&'static str])>,
}

impl SectionIndex {
    fn new(summary: &Summary) -> Self {
        let u = &summary.universal;
        let evolution = if is_failure_marker(&u.evolution) {
            HashSet::new()
        } else {
            content_words(&u.evolution)
        };

        let specialty = SummarySection::for_specialty(summary.specialty).and_then(|section| {
            let (rendered, vocab) = match section {
                SummarySection::Oncology => {
                    (render_oncology(summary.oncology.as_ref()?), ONCOLOGY_VOCAB)
                }
                SummarySection::Speech => (render_speech(summary.speech.as_ref()?), SPEECH_VOCAB),
                _ => return None,
            };
            Some((section, content_words(&rendered), vocab))
        });

        Self {
            evolution,
            current_status: content_words(&section_text(&u.current_status)),
            plan: content_words(&section_text(&u.plan)),
            specialty,
        }
    }

    fn tags_for(&self, scored: &ScoredFragment) -> Vec<SummarySection> {
        let text = &scored.fragment.text;
        let lower = text.to_lowercase();
        let words = content_words(text);

        let mut evolution = overlaps(&words, &self.evolution);
        let mut current_status = overlaps(&words, &self.current_status);
        let plan = overlaps(&words, &self.plan) || mentions(&lower, PLAN_VOCAB);
        let mut specialty = match &self.specialty {
            Some((_, section_words, vocab)) => {
                overlaps(&words, section_words) || mentions(&lower, vocab)
            }
            None => false,
        };

        if scored.structural {
            evolution = true;
            current_status = true;
            specialty = self.specialty.is_some();
        }

        let untagged = !(evolution || current_status || plan || specialty);
        let mut tags = Vec::new();
        for (section, hit) in [
            (SummarySection::Evolution, evolution),
            (SummarySection::CurrentStatus, current_status),
            (SummarySection::Plan, plan),
        ] {
            if hit || untagged {
                tags.push(section);
            }
        }
        if let Some((section, _, _)) = &self.specialty {
            if specialty || untagged {
                tags.push(*section);
            }
        }
        tags
    }
}

/// One citation per fragment the model saw, in context order.
pub fn map_citations(context: &RetrievedContext, summary: &Summary) -> Vec<Citation> {
    let index = SectionIndex::new(summary);

    let citations: Vec<Citation> = context
        .fragments
        .iter()
        .map(|scored| {
            let f = &scored.fragment;
            Citation {
                fragment_id: f.id,
                report_id: f.report_id,
                report_type: f.report_type,
                page: f.page,
                fragment_index: f.fragment_index,
                provenance: scored.provenance,
                preview_text: f.text.chars().take(PREVIEW_CHARS).collect(),
                full_text: f.text.clone(),
                section_tags: index.tags_for(scored),
            }
        })
        .collect();

    tracing::debug!(citations = citations.len(), "Citations mapped");
    citations
}
