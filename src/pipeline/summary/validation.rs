// Final gate between stage results and the caller. Whatever the upstream
// stages produced, the value leaving `assemble_summary` passes `validate_summary`.

use super::specialty::normalize_measurement_date;
use super::types::FallbackReason;
use super::universal::UniversalOutcome;
use crate::models::*;

/// Which fallback narrative to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Timeout,
    Error,
}

const THRESHOLD_RANGE: (f64, f64) = (-10.0, 130.0);

// ═══════════════════════════════════════════
// Validation
// ═══════════════════════════════════════════

/// Every rule violation, not just the first.
pub fn validate_summary(summary: &Summary) -> Vec<String> {
    let mut violations = Vec::new();

    validate_universal(&summary.universal, &mut violations);
    validate_specialty_blocks(summary, &mut violations);
    if let Some(oncology) = &summary.oncology {
        validate_oncology(oncology, &mut violations);
    }
    if let Some(speech) = &summary.speech {
        validate_speech(speech, &mut violations);
    }

    violations
}

fn validate_universal(universal: &UniversalSummary, violations: &mut Vec<String>) {
    if universal.evolution.trim().is_empty() {
        violations.push("universal.evolution is blank".into());
    }
    for (name, items) in [
        ("current_status", &universal.current_status),
        ("plan", &universal.plan),
    ] {
        if items.is_empty() {
            violations.push(format!("universal.{name} is empty"));
        } else if items.iter().any(|s| s.trim().is_empty()) {
            violations.push(format!("universal.{name} has a blank item"));
        }
    }
}

fn validate_specialty_blocks(summary: &Summary, violations: &mut Vec<String>) {
    if summary.populated_specialty_blocks() > 1 {
        violations.push("more than one specialty block is populated".into());
    }
    if summary.oncology.is_some() && summary.specialty != Specialty::Oncology {
        violations.push(format!(
            "oncology block present but specialty is {}",
            summary.specialty
        ));
    }
    if summary.speech.is_some() && summary.specialty != Specialty::Speech {
        violations.push(format!(
            "speech block present but specialty is {}",
            summary.specialty
        ));
    }
}

fn validate_oncology(data: &OncologyData, violations: &mut Vec<String>) {
    for (i, m) in data.tumor_size_trend.iter().enumerate() {
        if normalize_measurement_date(&m.date).as_deref() != Some(m.date.as_str()) {
            violations.push(format!("oncology.tumor_size_trend[{i}].date '{}' is invalid", m.date));
        }
        if !m.size_cm.is_finite() || m.size_cm < 0.0 {
            violations.push(format!("oncology.tumor_size_trend[{i}].size_cm is out of range"));
        }
    }
}

fn check_range(
    value: Option<f64>,
    (min, max): (f64, f64),
    field: &str,
    violations: &mut Vec<String>,
) {
    if let Some(v) = value {
        if !v.is_finite() || v < min || v > max {
            violations.push(format!("{field} = {v} outside [{min}, {max}]"));
        }
    }
}

fn validate_speech(data: &SpeechData, violations: &mut Vec<String>) {
    if let Some(scores) = &data.speech_scores {
        check_range(scores.srt_db, (0.0, 120.0), "speech.srt_db", violations);
        check_range(scores.wrs_percent, (0.0, 100.0), "speech.wrs_percent", violations);
        check_range(scores.mcl_db, (0.0, 130.0), "speech.mcl_db", violations);
        check_range(scores.ucl_db, (0.0, 130.0), "speech.ucl_db", violations);
    }
    if let Some(audiogram) = &data.audiogram {
        for (ear, thresholds) in [("left", &audiogram.left), ("right", &audiogram.right)] {
            let Some(thresholds) = thresholds else { continue };
            for value in thresholds.values() {
                check_range(value, THRESHOLD_RANGE, &format!("speech.audiogram.{ear}"), violations);
            }
        }
    }
}

// ═══════════════════════════════════════════
// Fallback and assembly
// ═══════════════════════════════════════════

/// Hand-built summary carrying no clinical content, valid by construction.
pub fn fallback_summary(class: FailureClass, reason: &str) -> Summary {
    let evolution = match class {
        FailureClass::Timeout => format!("{FALLBACK_NARRATIVE_PREFIX} timed out"),
        FailureClass::Error => format!("{FALLBACK_NARRATIVE_PREFIX} failed"),
    };
    let reason = if reason.trim().is_empty() { "unknown" } else { reason.trim() };

    Summary::new(
        UniversalSummary {
            evolution,
            current_status: vec![format!("Data extraction error: {reason}")],
            plan: vec!["Review medical records manually".to_string()],
        },
        Specialty::General,
        None,
    )
}

fn describe_reasons(reasons: &[&FallbackReason]) -> String {
    let mut distinct: Vec<String> = Vec::new();
    for reason in reasons {
        let text = reason.to_string();
        if !distinct.contains(&text) {
            distinct.push(text);
        }
    }
    distinct.join("; ")
}

/// Merge the classifier label, universal results and the optional specialty
/// payload into a summary that always passes validation.
pub fn assemble_summary(
    specialty: Specialty,
    universal: UniversalOutcome,
    payload: Option<SpecialtyPayload>,
) -> Summary {
    if universal.all_failed() {
        let reasons = universal.fallback_reasons();
        let class = if reasons.iter().all(|r| **r == FallbackReason::Timeout) {
            FailureClass::Timeout
        } else {
            FailureClass::Error
        };
        let reason = describe_reasons(&reasons);
        tracing::warn!(reason = %reason, "All universal stages failed; emitting fallback summary");
        return fallback_summary(class, &reason);
    }

    let degraded = universal.any_failed();
    let mut block = universal.into_summary();
    if degraded {
        block.evolution = format!("{DEGRADED_PREFIX}{}", block.evolution);
    }

    let summary = Summary::new(block, specialty, payload);
    let violations = validate_summary(&summary);
    if !violations.is_empty() {
        for v in &violations {
            tracing::warn!(violation = %v, "Summary validation failed");
        }
        return fallback_summary(
            FailureClass::Error,
            &format!("schema validation failed ({} violations)", violations.len()),
        );
    }

    tracing::debug!(specialty = summary.specialty.as_str(), degraded, "Summary assembled");
    summary
}
