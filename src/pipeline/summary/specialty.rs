use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde_json::{Map, Value};

use super::prompt::{oncology_prompt, speech_prompt};
use super::stage::call_model;
use super::types::{Extraction, FallbackReason};
use crate::config::StageConfig;
use crate::models::*;
use crate::pipeline::llm::TextGenerator;

/// Size difference (cm) under which consecutive measurements are STABLE.
const STABLE_TOLERANCE_CM: f64 = 0.1;

const SRT_RANGE: (f64, f64) = (0.0, 120.0);
const WRS_RANGE: (f64, f64) = (0.0, 100.0);
const LEVEL_RANGE: (f64, f64) = (0.0, 130.0);
const THRESHOLD_RANGE: (f64, f64) = (-10.0, 130.0);

static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d+(?:\.\d+)?").expect("valid regex"));

static TRAILING_COMMA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([}\]])").expect("valid regex"));

static PARTIAL_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})-(\d{2})$").expect("valid regex"));

// ═══════════════════════════════════════════
// JSON recovery
// ═══════════════════════════════════════════

/// Locate the JSON object in a model reply: fenced block first, then the
/// span from the first `{` to the last `}`.
fn extract_json_block(response: &str) -> Option<&str> {
    let trimmed = response.trim();

    if let Some(start) = trimmed.find("```json") {
        let after_fence = &trimmed[start + 7..];
        if let Some(end) = after_fence.find("```") {
            return Some(after_fence[..end].trim());
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after_fence = &trimmed[start + 3..];
        if let Some(end) = after_fence.find("```") {
            let block = after_fence[..end].trim();
            if block.starts_with('{') {
                return Some(block);
            }
        }
    }

    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => Some(&trimmed[start..=end]),
        _ => None,
    }
}

/// Parse the reply's JSON object, retrying once with trailing commas removed.
pub fn parse_json_object(response: &str) -> Result<Map<String, Value>, FallbackReason> {
    let block = extract_json_block(response)
        .ok_or_else(|| FallbackReason::Unparseable("no JSON object in reply".into()))?;

    let value = serde_json::from_str::<Value>(block).or_else(|first| {
        let repaired = TRAILING_COMMA_RE.replace_all(block, "$1");
        serde_json::from_str::<Value>(&repaired)
            .map_err(|_| FallbackReason::Unparseable(format!("invalid JSON: {first}")))
    })?;

    match value {
        Value::Object(map) => Ok(map),
        _ => Err(FallbackReason::Unparseable("JSON is not an object".into())),
    }
}

// ═══════════════════════════════════════════
// Lenient field coercion
// ═══════════════════════════════════════════

fn as_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => {
            let s = s.trim();
            let placeholder = ["", "null", "none", "n/a", "unknown"]
                .iter()
                .any(|p| s.eq_ignore_ascii_case(p));
            (!placeholder).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Numbers and numeric strings such as `"2.3 cm"`.
fn as_number(value: Option<&Value>) -> Option<f64> {
    let n = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => NUMBER_RE.find(s)?.as_str().parse().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn in_range(value: Option<f64>, (min, max): (f64, f64)) -> Option<f64> {
    value.filter(|v| (min..=max).contains(v))
}

fn as_bool(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "y" => Some(true),
            "false" | "no" | "n" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn as_text_list(value: Option<&Value>) -> Option<Vec<String>> {
    let items: Vec<String> = match value? {
        Value::Array(items) => items.iter().filter_map(|v| as_text(Some(v))).collect(),
        Value::String(_) => as_text(value).into_iter().collect(),
        _ => return None,
    };
    (!items.is_empty()).then_some(items)
}

/// `YYYY-MM-DD` (a real calendar date) or `YYYY-MM`.
pub fn normalize_measurement_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date.format("%Y-%m-%d").to_string());
    }
    let caps = PARTIAL_DATE_RE.captures(raw)?;
    let month: u32 = caps[2].parse().ok()?;
    (1..=12).contains(&month).then(|| raw.to_string())
}

// ═══════════════════════════════════════════
// Oncology
// ═══════════════════════════════════════════

fn parse_measurement(value: &Value) -> Option<TumorMeasurement> {
    let obj = value.as_object()?;
    let date = normalize_measurement_date(&as_text(obj.get("date"))?)?;
    let size_cm = as_number(obj.get("size_cm").or_else(|| obj.get("size")))?;
    if size_cm < 0.0 {
        return None;
    }
    let status = as_text(obj.get("status")).and_then(|s| s.to_uppercase().parse().ok());

    Some(TumorMeasurement {
        date,
        size_cm,
        location: as_text(obj.get("location")),
        status,
    })
}

fn trend_between(previous: f64, current: f64) -> TrendStatus {
    let delta = current - previous;
    if delta.abs() <= STABLE_TOLERANCE_CM {
        TrendStatus::Stable
    } else if delta < 0.0 {
        TrendStatus::Improving
    } else {
        TrendStatus::Worsening
    }
}

/// Valid measurements, de-duplicated on (date, size), date-ordered, with
/// missing trend tags derived from the preceding measurement.
pub fn normalize_tumor_trend(items: &[Value]) -> Vec<TumorMeasurement> {
    let mut trend: Vec<TumorMeasurement> = Vec::new();
    for m in items.iter().filter_map(parse_measurement) {
        let duplicate = trend
            .iter()
            .any(|t| t.date == m.date && (t.size_cm - m.size_cm).abs() < f64::EPSILON);
        if !duplicate {
            trend.push(m);
        }
    }

    trend.sort_by(|a, b| a.date.cmp(&b.date));

    for i in 1..trend.len() {
        if trend[i].status.is_none() {
            trend[i].status = Some(trend_between(trend[i - 1].size_cm, trend[i].size_cm));
        }
    }
    trend
}

fn parse_biomarkers(value: Option<&Value>) -> Option<BTreeMap<String, String>> {
    let map: BTreeMap<String, String> = value?
        .as_object()?
        .iter()
        .filter_map(|(name, v)| Some((name.trim().to_string(), as_text(Some(v))?)))
        .filter(|(name, _)| !name.is_empty())
        .collect();
    (!map.is_empty()).then_some(map)
}

pub fn parse_oncology(obj: &Map<String, Value>) -> OncologyData {
    let tumor_size_trend = obj
        .get("tumor_size_trend")
        .and_then(Value::as_array)
        .map(|items| normalize_tumor_trend(items))
        .unwrap_or_default();

    OncologyData {
        tumor_size_trend,
        tnm_staging: as_text(obj.get("tnm_staging")),
        cancer_type: as_text(obj.get("cancer_type")),
        grade: as_text(obj.get("grade")),
        biomarkers: parse_biomarkers(obj.get("biomarkers")),
        treatment_response: as_text(obj.get("treatment_response")),
        pertinent_negatives: as_text_list(obj.get("pertinent_negatives")),
    }
}

// ═══════════════════════════════════════════
// Speech / audiology
// ═══════════════════════════════════════════

fn threshold(obj: &Map<String, Value>, hz: u32) -> Option<f64> {
    let value = [
        format!("{hz}Hz"),
        format!("freq_{hz}hz"),
        format!("{hz}hz"),
        hz.to_string(),
    ]
    .iter()
    .find_map(|key| obj.get(key.as_str()));
    in_range(as_number(value), THRESHOLD_RANGE)
}

fn parse_ear(value: Option<&Value>) -> Option<EarThresholds> {
    let obj = value?.as_object()?;
    let ear = EarThresholds {
        hz_500: threshold(obj, 500),
        hz_1000: threshold(obj, 1000),
        hz_2000: threshold(obj, 2000),
        hz_4000: threshold(obj, 4000),
        hz_8000: threshold(obj, 8000),
    };
    (!ear.is_empty()).then_some(ear)
}

fn parse_audiogram(value: Option<&Value>) -> Option<Audiogram> {
    let obj = value?.as_object()?;
    let audiogram = Audiogram {
        left: parse_ear(obj.get("left")),
        right: parse_ear(obj.get("right")),
        test_date: as_text(obj.get("test_date")),
        status: as_text(obj.get("status")),
    };
    (audiogram != Audiogram::default()).then_some(audiogram)
}

fn parse_speech_scores(value: Option<&Value>) -> Option<SpeechScores> {
    let obj = value?.as_object()?;
    let scores = SpeechScores {
        srt_db: in_range(as_number(obj.get("srt_db")), SRT_RANGE),
        wrs_percent: in_range(as_number(obj.get("wrs_percent")), WRS_RANGE),
        mcl_db: in_range(as_number(obj.get("mcl_db")), LEVEL_RANGE),
        ucl_db: in_range(as_number(obj.get("ucl_db")), LEVEL_RANGE),
    };
    (scores != SpeechScores::default()).then_some(scores)
}

pub fn parse_speech(obj: &Map<String, Value>) -> SpeechData {
    SpeechData {
        audiogram: parse_audiogram(obj.get("audiogram")),
        speech_scores: parse_speech_scores(obj.get("speech_scores")),
        hearing_loss_type: as_text(obj.get("hearing_loss_type")),
        hearing_loss_severity: as_text(obj.get("hearing_loss_severity")),
        hearing_trend: as_text(obj.get("hearing_trend")).map(|s| s.to_uppercase()),
        tinnitus: as_bool(obj.get("tinnitus")),
        balance_issues: as_bool(obj.get("balance_issues")),
        amplification: as_text(obj.get("amplification")),
        pertinent_negatives: as_text_list(obj.get("pertinent_negatives")),
    }
}

// ═══════════════════════════════════════════
// Stage
// ═══════════════════════════════════════════

/// Parse a reply into the payload for `specialty`. `Ok(None)` when the
/// reply parsed but carried no fields.
pub fn parse_specialty_reply(
    specialty: Specialty,
    raw: &str,
) -> Result<Option<SpecialtyPayload>, FallbackReason> {
    let obj = parse_json_object(raw)?;
    let payload = match specialty {
        Specialty::Oncology => {
            let data = parse_oncology(&obj);
            (!data.is_empty()).then_some(SpecialtyPayload::Oncology(data))
        }
        Specialty::Speech => {
            let data = parse_speech(&obj);
            (!data.is_empty()).then_some(SpecialtyPayload::Speech(data))
        }
        Specialty::General => None,
    };
    Ok(payload)
}

/// Specialty extraction over the context fit to the specialty budget.
/// `General` makes no model call.
pub async fn extract_specialty(
    generator: &dyn TextGenerator,
    stage: &StageConfig,
    context: &str,
    specialty: Specialty,
) -> Extraction<Option<SpecialtyPayload>> {
    let prompt = match specialty {
        Specialty::Oncology => oncology_prompt(context),
        Specialty::Speech => speech_prompt(context),
        Specialty::General => return Extraction::Ok(None),
    };

    let result = call_model(generator, stage, "specialty", prompt)
        .await
        .and_then(|raw| parse_specialty_reply(specialty, &raw));

    match &result {
        Ok(Some(_)) => tracing::info!(specialty = specialty.as_str(), "Specialty block extracted"),
        Ok(None) => tracing::info!(specialty = specialty.as_str(), "Specialty reply had no fields"),
        Err(reason) => tracing::warn!(
            specialty = specialty.as_str(),
            reason = %reason,
            "Specialty extraction fell back; block left empty"
        ),
    }

    result.into()
}
