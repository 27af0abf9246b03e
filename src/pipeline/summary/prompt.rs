use std::sync::LazyLock;

use regex::Regex;

use crate::models::{ReportType, Specialty};

/// Maximum bullets kept from a list stage.
pub const MAX_BULLETS: usize = 5;

const CONTINUITY_RULE: &str = "If a PREVIOUS SUMMARY block is present, treat it as the baseline \
and update it with the NEW REPORTS. Do not repeat it unchanged.";

// ═══════════════════════════════════════════
// Classification
// ═══════════════════════════════════════════

pub fn classify_prompt(context: &str, report_types: &[ReportType]) -> String {
    let types = if report_types.is_empty() {
        "unknown".to_string()
    } else {
        report_types
            .iter()
            .map(ReportType::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!(
        "Analyze the following medical report excerpts and classify the patient specialty.

RETURN ONLY ONE WORD: oncology, speech, or general

Rules:
- oncology: cancer, tumors, chemotherapy, radiation, TNM staging, oncology visits
- speech: audiology, hearing loss, audiograms, speech therapy, tinnitus, hearing aids
- general: any other medical case (cardiology, internal medicine, etc.)

Report types on file: {types}

Medical Reports:
{context}

Classification (one word only):"
    )
}

// ═══════════════════════════════════════════
// Universal stages
// ═══════════════════════════════════════════

fn specialty_focus(specialty: Option<Specialty>) -> &'static str {
    match specialty {
        Some(Specialty::Oncology) => {
            "This is an oncology case: cover tumor measurements, staging and treatment response.\n"
        }
        Some(Specialty::Speech) => {
            "This is an audiology case: cover hearing thresholds, speech scores and amplification.\n"
        }
        Some(Specialty::General) | None => "",
    }
}

pub fn evolution_prompt(context: &str, specialty: Option<Specialty>) -> String {
    let focus = specialty_focus(specialty);
    format!(
        "You are a medical AI. Write a concise 2-3 sentence narrative describing the patient's \
clinical course from diagnosis to current state.
{focus}
Focus on:
- Initial presentation or diagnosis
- Key treatments or interventions
- Current state

{CONTINUITY_RULE}

Medical Reports:
{context}

Narrative (2-3 sentences):"
    )
}

pub fn current_status_prompt(context: &str, specialty: Option<Specialty>) -> String {
    let focus = specialty_focus(specialty);
    format!(
        "Extract the patient's CURRENT clinical status as 3-5 concise bullet points.
{focus}
Focus on:
- Current symptoms or conditions
- Latest test results or findings
- Current treatment status
- Active issues

{CONTINUITY_RULE}
RETURN ONLY bullet points, one per line, starting with a dash. No other text.

Medical Reports:
{context}

Current Status:
-"
    )
}

pub fn plan_prompt(context: &str, specialty: Option<Specialty>) -> String {
    let focus = specialty_focus(specialty);
    format!(
        "Extract the treatment PLAN and next steps as 3-5 concise bullet points.
{focus}
Focus on:
- Planned treatments or procedures
- Follow-up appointments
- Monitoring or testing
- Recommendations

{CONTINUITY_RULE}
RETURN ONLY bullet points, one per line, starting with a dash. No other text.

Medical Reports:
{context}

Plan:
-"
    )
}

// ═══════════════════════════════════════════
// Specialty stages
// ═══════════════════════════════════════════

pub fn oncology_prompt(context: &str) -> String {
    format!(
        r#"Extract oncology data from the medical reports and return ONLY valid JSON.

Extract:
1. Tumor size measurements with dates (measurements in cm)
2. TNM staging (e.g., T2N0M0)
3. Cancer type
4. Grade
5. Biomarkers (ER, PR, HER2, Ki-67, etc.)
6. Treatment response
7. Pertinent negatives (e.g., "No metastasis")

RETURN ONLY THIS JSON STRUCTURE (use null for missing data):
{{
  "tumor_size_trend": [
    {{"date": "YYYY-MM-DD", "size_cm": 0.0, "location": null}}
  ],
  "tnm_staging": null,
  "cancer_type": null,
  "grade": null,
  "biomarkers": {{"ER": "positive"}},
  "treatment_response": null,
  "pertinent_negatives": []
}}

Medical Reports:
{context}

JSON:"#
    )
}

pub fn speech_prompt(context: &str) -> String {
    format!(
        r#"Extract audiology data from the medical reports and return ONLY valid JSON.

Extract:
1. Audiogram thresholds (500Hz, 1000Hz, 2000Hz, 4000Hz, 8000Hz) for left and right ears in dB HL
2. Speech scores (SRT in dB, WRS as percentage, MCL and UCL in dB)
3. Hearing loss type (Sensorineural, Conductive, Mixed)
4. Severity (Mild, Moderate, Severe, Profound)
5. Hearing trend (IMPROVING, WORSENING, STABLE)
6. Tinnitus and balance issues (true/false)
7. Amplification device
8. Pertinent negatives (e.g., "No conductive loss")

RETURN ONLY THIS JSON STRUCTURE (use null for missing data):
{{
  "audiogram": {{
    "left": {{"500Hz": null, "1000Hz": null, "2000Hz": null, "4000Hz": null, "8000Hz": null}},
    "right": {{"500Hz": null, "1000Hz": null, "2000Hz": null, "4000Hz": null, "8000Hz": null}},
    "test_date": "YYYY-MM-DD"
  }},
  "speech_scores": {{"srt_db": null, "wrs_percent": null, "mcl_db": null, "ucl_db": null}},
  "hearing_loss_type": null,
  "hearing_loss_severity": null,
  "hearing_trend": null,
  "tinnitus": null,
  "balance_issues": null,
  "amplification": null,
  "pertinent_negatives": []
}}

Medical Reports:
{context}

JSON:"#
    )
}

// ═══════════════════════════════════════════
// Output parsing
// ═══════════════════════════════════════════

static BULLET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[-•*]\s*|\d{1,2}[.)]\s+)").expect("valid regex")
});

/// Parse a bullet list. Accepts `-`, `•`, `*`, `1.` and `1)` markers; a
/// leading unmarked line is the first bullet (the prompt primes a dash);
/// other unmarked lines continue the previous bullet.
pub fn parse_bullets(text: &str) -> Vec<String> {
    let mut bullets: Vec<String> = Vec::new();

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(m) = BULLET_RE.find(line) {
            let item = line[m.end()..].trim();
            if !item.is_empty() {
                bullets.push(item.to_string());
            }
        } else if let Some(last) = bullets.last_mut() {
            last.push(' ');
            last.push_str(line);
        } else if !line.ends_with(':') {
            bullets.push(line.to_string());
        }
    }

    bullets.truncate(MAX_BULLETS);
    bullets
}

/// Narrative cleanup: drop an echoed label and surrounding quotes, collapse
/// whitespace.
pub fn clean_narrative(text: &str) -> String {
    let mut body = text.trim();
    for label in ["Narrative (2-3 sentences):", "Narrative:", "Evolution:"] {
        if body
            .get(..label.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(label))
        {
            body = body[label.len()..].trim();
        }
    }
    body.trim_matches('"')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn universal_prompts_carry_continuity_rule() {
        for prompt in [
            evolution_prompt("ctx", None),
            current_status_prompt("ctx", None),
            plan_prompt("ctx", None),
        ] {
            assert!(prompt.contains(CONTINUITY_RULE));
        }
    }

    #[test]
    fn classify_prompt_lists_report_types() {
        let prompt = classify_prompt("ctx", &[ReportType::Radiology, ReportType::Pathology]);
        assert!(prompt.contains("Report types on file: radiology, pathology"));
        assert!(prompt.contains("ctx"));
    }

    #[test]
    fn universal_prompts_are_specialty_aware() {
        let onc = current_status_prompt("ctx", Some(Specialty::Oncology));
        assert!(onc.contains("oncology case"));
        let generic = current_status_prompt("ctx", None);
        assert!(!generic.contains("oncology case"));
        assert!(!plan_prompt("ctx", Some(Specialty::General)).contains("case:"));
        assert!(evolution_prompt("ctx", Some(Specialty::Speech)).contains("audiology case"));
    }

    #[test]
    fn status_prompt_primes_a_dash() {
        assert!(current_status_prompt("ctx", None).ends_with("Current Status:\n-"));
        assert!(plan_prompt("ctx", None).ends_with("Plan:\n-"));
    }

    #[test]
    fn specialty_prompts_embed_json_skeleton() {
        assert!(oncology_prompt("ctx").contains("\"tumor_size_trend\""));
        assert!(speech_prompt("ctx").contains("\"500Hz\""));
    }

    #[test]
    fn bullets_with_mixed_markers() {
        let text = "- First\n• Second\n* Third\n1. Fourth\n2) Fifth\n- Sixth";
        assert_eq!(
            parse_bullets(text),
            vec!["First", "Second", "Third", "Fourth", "Fifth"]
        );
    }

    #[test]
    fn decimal_numbers_are_not_markers() {
        assert_eq!(parse_bullets("- Mass\n3.5 cm on CT"), vec!["Mass 3.5 cm on CT"]);
    }

    #[test]
    fn leading_unmarked_line_is_first_bullet() {
        let text = "Tumor stable at 2.3 cm\n- Mild fatigue";
        assert_eq!(parse_bullets(text), vec!["Tumor stable at 2.3 cm", "Mild fatigue"]);
    }

    #[test]
    fn continuation_lines_join() {
        let text = "- Follow-up CT\n  in three months\n- Labs";
        assert_eq!(parse_bullets(text), vec!["Follow-up CT in three months", "Labs"]);
    }

    #[test]
    fn header_lines_skipped_and_empty_input() {
        assert_eq!(parse_bullets("Plan:\n- Repeat CT"), vec!["Repeat CT"]);
        assert!(parse_bullets("").is_empty());
        assert!(parse_bullets("-\n- ").is_empty());
    }

    #[test]
    fn narrative_cleanup() {
        assert_eq!(
            clean_narrative("Narrative: \"Diagnosed in 2023.\n  Now stable.\""),
            "Diagnosed in 2023. Now stable."
        );
        assert_eq!(clean_narrative("Plain text."), "Plain text.");
    }
}
