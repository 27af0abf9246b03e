use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::enums::ReportType;

/// A source report. Groups fragments; immutable once ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: i64,
    pub patient_id: i64,
    pub report_type: ReportType,
    pub report_date: Option<NaiveDate>,
    pub title: Option<String>,
}

/// Immutable unit of evidence: one chunk of decrypted report text with its
/// embedding and positional metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub id: i64,
    pub report_id: i64,
    pub report_type: ReportType,
    /// Ordering key within the report.
    pub fragment_index: u32,
    pub page: Option<u32>,
    pub offset: Option<u32>,
    pub text: String,
    #[serde(skip)]
    pub embedding: Vec<f32>,
}

impl Fragment {
    /// Report-relative position: report id then fragment index.
    pub fn position(&self) -> (i64, u32) {
        (self.report_id, self.fragment_index)
    }
}
