use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::citation::Citation;
use super::enums::{Specialty, TrendStatus};

/// Prefix of every per-stage failure marker.
pub const FAILURE_MARKER_PREFIX: &str = "extraction failed:";

/// Leading glyph on the narrative of any degraded summary.
pub const DEGRADED_PREFIX: &str = "⚠ ";

/// Narrative opening of the hand-built fallback summary.
pub const FALLBACK_NARRATIVE_PREFIX: &str = "⚠ Summary generation";

/// True when `text` is a per-stage failure marker rather than model output.
pub fn is_failure_marker(text: &str) -> bool {
    text.trim_start()
        .get(..FAILURE_MARKER_PREFIX.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(FAILURE_MARKER_PREFIX))
}

// ═══════════════════════════════════════════
// Universal block
// ═══════════════════════════════════════════

/// Always present, always fully populated (possibly with markers).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniversalSummary {
    pub evolution: String,
    pub current_status: Vec<String>,
    pub plan: Vec<String>,
}

// ═══════════════════════════════════════════
// Oncology
// ═══════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TumorMeasurement {
    /// `YYYY-MM-DD` or `YYYY-MM`.
    pub date: String,
    pub size_cm: f64,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub status: Option<TrendStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OncologyData {
    #[serde(default)]
    pub tumor_size_trend: Vec<TumorMeasurement>,
    #[serde(default)]
    pub tnm_staging: Option<String>,
    #[serde(default)]
    pub cancer_type: Option<String>,
    #[serde(default)]
    pub grade: Option<String>,
    #[serde(default)]
    pub biomarkers: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub treatment_response: Option<String>,
    #[serde(default)]
    pub pertinent_negatives: Option<Vec<String>>,
}

impl OncologyData {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

// ═══════════════════════════════════════════
// Speech / audiology
// ═══════════════════════════════════════════

/// Thresholds in dB HL at the standard audiometric frequencies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EarThresholds {
    #[serde(rename = "500Hz", alias = "freq_500hz", default)]
    pub hz_500: Option<f64>,
    #[serde(rename = "1000Hz", alias = "freq_1000hz", default)]
    pub hz_1000: Option<f64>,
    #[serde(rename = "2000Hz", alias = "freq_2000hz", default)]
    pub hz_2000: Option<f64>,
    #[serde(rename = "4000Hz", alias = "freq_4000hz", default)]
    pub hz_4000: Option<f64>,
    #[serde(rename = "8000Hz", alias = "freq_8000hz", default)]
    pub hz_8000: Option<f64>,
}

impl EarThresholds {
    pub fn values(&self) -> [Option<f64>; 5] {
        [self.hz_500, self.hz_1000, self.hz_2000, self.hz_4000, self.hz_8000]
    }

    pub fn is_empty(&self) -> bool {
        self.values().iter().all(Option::is_none)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Audiogram {
    #[serde(default)]
    pub left: Option<EarThresholds>,
    #[serde(default)]
    pub right: Option<EarThresholds>,
    #[serde(default)]
    pub test_date: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpeechScores {
    #[serde(default)]
    pub srt_db: Option<f64>,
    #[serde(default)]
    pub wrs_percent: Option<f64>,
    #[serde(default)]
    pub mcl_db: Option<f64>,
    #[serde(default)]
    pub ucl_db: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpeechData {
    #[serde(default)]
    pub audiogram: Option<Audiogram>,
    #[serde(default)]
    pub speech_scores: Option<SpeechScores>,
    #[serde(default)]
    pub hearing_loss_type: Option<String>,
    #[serde(default)]
    pub hearing_loss_severity: Option<String>,
    #[serde(default)]
    pub hearing_trend: Option<String>,
    #[serde(default)]
    pub tinnitus: Option<bool>,
    #[serde(default)]
    pub balance_issues: Option<bool>,
    #[serde(default)]
    pub amplification: Option<String>,
    #[serde(default)]
    pub pertinent_negatives: Option<Vec<String>>,
}

impl SpeechData {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Exactly one specialty payload, as produced by the specialty extractor.
#[derive(Debug, Clone, PartialEq)]
pub enum SpecialtyPayload {
    Oncology(OncologyData),
    Speech(SpeechData),
}

impl SpecialtyPayload {
    pub fn specialty(&self) -> Specialty {
        match self {
            Self::Oncology(_) => Specialty::Oncology,
            Self::Speech(_) => Specialty::Speech,
        }
    }
}

// ═══════════════════════════════════════════
// Summary
// ═══════════════════════════════════════════

/// Pipeline output. Serializes to the persisted wire shape; citations are
/// stored separately and skipped here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub universal: UniversalSummary,
    #[serde(default)]
    pub oncology: Option<OncologyData>,
    #[serde(default)]
    pub speech: Option<SpeechData>,
    pub specialty: Specialty,
    pub generated_at: DateTime<Utc>,
    #[serde(skip)]
    pub citations: Vec<Citation>,
}

impl Summary {
    /// Build a summary from universal fields and an optional specialty payload.
    /// The specialty label follows the payload when one is present.
    pub fn new(
        universal: UniversalSummary,
        specialty: Specialty,
        payload: Option<SpecialtyPayload>,
    ) -> Self {
        let mut summary = Self {
            universal,
            oncology: None,
            speech: None,
            specialty,
            generated_at: Utc::now(),
            citations: Vec::new(),
        };
        match payload {
            Some(SpecialtyPayload::Oncology(data)) => {
                summary.specialty = Specialty::Oncology;
                summary.oncology = Some(data);
            }
            Some(SpecialtyPayload::Speech(data)) => {
                summary.specialty = Specialty::Speech;
                summary.speech = Some(data);
            }
            None => {}
        }
        summary
    }

    /// Number of non-null specialty blocks (0 or 1 for a valid summary).
    pub fn populated_specialty_blocks(&self) -> usize {
        usize::from(self.oncology.is_some()) + usize::from(self.speech.is_some())
    }

    /// True for partially degraded summaries and hand-built fallbacks alike.
    pub fn is_degraded(&self) -> bool {
        let u = &self.universal;
        u.evolution.starts_with(DEGRADED_PREFIX)
            || is_failure_marker(&u.evolution)
            || u.current_status.iter().any(|s| is_failure_marker(s))
            || u.plan.iter().any(|s| is_failure_marker(s))
    }

    /// True for the hand-built fallback, which carries no clinical content.
    pub fn is_fallback(&self) -> bool {
        self.universal.evolution.starts_with(FALLBACK_NARRATIVE_PREFIX)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
