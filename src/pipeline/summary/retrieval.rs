use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use super::types::{ScoredFragment, SummaryOptions};
use crate::models::{Fragment, Provenance};

/// Score added per distinct supplied keyword found in a fragment.
const KEYWORD_BOOST: f32 = 0.25;

static STRUCTURAL_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)^\s*(?:(?:CLINICAL|IMAGING|FINAL)\s+)?(?:FINDINGS|IMPRESSION|CONCLUSIONS?|ASSESSMENT|DIAGNOSIS)\s*(?::|$)",
    )
    .expect("valid regex")
});

/// True when the fragment carries a findings/impression-style section header.
pub fn is_structural(text: &str) -> bool {
    STRUCTURAL_HEADER_RE.is_match(text)
}

/// Lower-case, whitespace-collapsed form used for duplicate detection.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Distinct keywords (case-insensitive) present in `text`.
fn keyword_hits(text: &str, keywords: &[String]) -> usize {
    let lower = text.to_lowercase();
    keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect::<HashSet<_>>()
        .iter()
        .filter(|k| lower.contains(k.as_str()))
        .count()
}

/// Drop fragments whose normalised text repeats an earlier one (position order).
pub fn dedup_fragments(fragments: &[Fragment]) -> Vec<&Fragment> {
    let mut ordered: Vec<&Fragment> = fragments.iter().collect();
    ordered.sort_by_key(|f| f.position());

    let mut seen = HashSet::new();
    ordered
        .into_iter()
        .filter(|f| {
            let norm = normalize_text(&f.text);
            !norm.is_empty() && seen.insert(norm)
        })
        .collect()
}

fn by_score_then_position(a: &ScoredFragment, b: &ScoredFragment) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.fragment.position().cmp(&b.fragment.position()))
}

/// Hybrid selection: structural fragments first (up to the cap), then the
/// rest by similarity plus keyword boost. Returns at most `max_fragments`
/// candidates in priority order. Deterministic for a fixed fragment set.
pub fn select_candidates(
    fragments: &[Fragment],
    query_embedding: Option<&[f32]>,
    options: &SummaryOptions,
) -> Vec<ScoredFragment> {
    let scored: Vec<ScoredFragment> = dedup_fragments(fragments)
        .into_iter()
        .map(|f| {
            let similarity = query_embedding
                .map(|q| cosine_similarity(q, &f.embedding))
                .unwrap_or(0.0);
            let hits = keyword_hits(&f.text, &options.keywords);
            let structural = is_structural(&f.text);
            let provenance = if hits > 0 {
                Provenance::Keyword
            } else {
                Provenance::Vector
            };
            ScoredFragment {
                fragment: f.clone(),
                score: similarity + KEYWORD_BOOST * hits as f32,
                provenance,
                structural,
            }
        })
        .collect();

    let (mut structural, mut ranked): (Vec<_>, Vec<_>) =
        scored.into_iter().partition(|s| s.structural);

    structural.sort_by(by_score_then_position);
    let overflow = structural.split_off(options.structural_cap.min(structural.len()));
    for s in &mut structural {
        s.provenance = Provenance::Structural;
    }

    ranked.extend(overflow);
    ranked.sort_by(by_score_then_position);

    let mut selected = structural;
    selected.extend(ranked);
    selected.truncate(options.max_fragments);

    tracing::debug!(
        candidates = fragments.len(),
        selected = selected.len(),
        structural = selected
            .iter()
            .filter(|s| s.provenance == Provenance::Structural)
            .count(),
        "Retrieval ranking complete"
    );

    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReportType;

    fn frag(id: i64, report_id: i64, index: u32, text: &str, embedding: Vec<f32>) -> Fragment {
        Fragment {
            id,
            report_id,
            report_type: ReportType::Radiology,
            fragment_index: index,
            page: Some(1),
            offset: None,
            text: text.into(),
            embedding,
        }
    }

    #[test]
    fn structural_headers_detected() {
        assert!(is_structural("FINDINGS: mass in left lobe"));
        assert!(is_structural("History\nImpression:\nStable"));
        assert!(is_structural("CLINICAL ASSESSMENT: improving"));
        assert!(is_structural("FINAL DIAGNOSIS\nadenocarcinoma"));
        assert!(is_structural("Conclusions: none"));
        assert!(!is_structural("No significant findings were noted"));
        assert!(!is_structural("IMPRESSIONABLE patient"));
    }

    #[test]
    fn cosine_similarity_edge_cases() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn dedup_keeps_earliest_position() {
        let fragments = vec![
            frag(3, 2, 0, "Tumor  measures 2.3 cm", vec![]),
            frag(1, 1, 0, "tumor measures 2.3 CM", vec![]),
            frag(2, 1, 1, "Different text", vec![]),
            frag(4, 1, 2, "   ", vec![]),
        ];
        let kept: Vec<i64> = dedup_fragments(&fragments).iter().map(|f| f.id).collect();
        assert_eq!(kept, vec![1, 2]);
    }

    #[test]
    fn structural_fragments_come_first_and_respect_cap() {
        let fragments = vec![
            frag(1, 1, 0, "IMPRESSION: stable", vec![0.0, 1.0]),
            frag(2, 1, 1, "narrative", vec![1.0, 0.0]),
            frag(3, 2, 0, "FINDINGS: new lesion", vec![0.0, 1.0]),
        ];
        let options = SummaryOptions {
            structural_cap: 1,
            ..Default::default()
        };
        let selected = select_candidates(&fragments, Some(&[1.0, 0.0][..]), &options);
        assert_eq!(selected[0].fragment.id, 1);
        assert_eq!(selected[0].provenance, Provenance::Structural);
        // Overflow structural fragment competes on score.
        assert_eq!(selected[1].fragment.id, 2);
        assert_eq!(selected[2].fragment.id, 3);
        assert_eq!(selected[2].provenance, Provenance::Vector);
    }

    #[test]
    fn keywords_boost_but_never_filter() {
        let fragments = vec![
            frag(1, 1, 0, "blood pressure normal", vec![0.2, 1.0]),
            frag(2, 1, 1, "Hearing aid fitted", vec![0.0, 1.0]),
        ];
        let options = SummaryOptions {
            keywords: vec!["hearing".into(), "HEARING".into(), "aid".into()],
            ..Default::default()
        };
        let selected = select_candidates(&fragments, Some(&[1.0, 0.0][..]), &options);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].fragment.id, 2);
        assert_eq!(selected[0].provenance, Provenance::Keyword);
        assert!((selected[0].score - 0.5).abs() < 1e-6);
    }

    #[test]
    fn ties_break_by_position_without_query() {
        let fragments = vec![
            frag(5, 2, 0, "c", vec![]),
            frag(4, 1, 1, "b", vec![]),
            frag(3, 1, 0, "a", vec![]),
        ];
        let selected = select_candidates(&fragments, None, &SummaryOptions::default());
        let ids: Vec<i64> = selected.iter().map(|s| s.fragment.id).collect();
        assert_eq!(ids, vec![3, 4, 5]);
    }

    #[test]
    fn max_fragments_truncates() {
        let fragments: Vec<Fragment> = (0..20)
            .map(|i| frag(i, 1, i as u32, &format!("note {i}"), vec![]))
            .collect();
        let options = SummaryOptions {
            max_fragments: 4,
            ..Default::default()
        };
        assert_eq!(select_candidates(&fragments, None, &options).len(), 4);
    }

    #[test]
    fn selection_is_deterministic() {
        let fragments = vec![
            frag(1, 1, 0, "FINDINGS: a", vec![0.3, 0.7]),
            frag(2, 1, 1, "b", vec![0.7, 0.3]),
            frag(3, 2, 0, "c", vec![0.5, 0.5]),
        ];
        let q = [0.6_f32, 0.4];
        let a = select_candidates(&fragments, Some(&q[..]), &SummaryOptions::default());
        let b = select_candidates(&fragments, Some(&q[..]), &SummaryOptions::default());
        assert_eq!(a, b);
    }
}
