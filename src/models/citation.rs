use serde::{Deserialize, Serialize};

use super::enums::{Provenance, ReportType, SummarySection};

/// Glass-box citation: one fragment the model saw, with the output sections
/// it could have supported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub fragment_id: i64,
    pub report_id: i64,
    pub report_type: ReportType,
    pub page: Option<u32>,
    pub fragment_index: u32,
    pub provenance: Provenance,
    pub preview_text: String,
    pub full_text: String,
    pub section_tags: Vec<SummarySection>,
}

impl Citation {
    pub fn supports(&self, section: SummarySection) -> bool {
        self.section_tags.contains(&section)
    }
}
