use thiserror::Error;

use crate::db::DatabaseError;
use crate::models::*;
use crate::pipeline::llm::LlmError;

// ═══════════════════════════════════════════
// Consumed store interfaces
// ═══════════════════════════════════════════

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("No fragments for patient {0}")]
    NotFound(i64),

    #[error("Database error: {0}")]
    Database(DatabaseError),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl From<DatabaseError> for StoreError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::Corrupt { table, reason } => Self::Corrupt(format!("{table}: {reason}")),
            other => Self::Database(other),
        }
    }
}

/// Read-only source of a patient's decrypted fragments.
pub trait ChunkStore: Send + Sync {
    /// All fragments ordered by report id then fragment index.
    /// `NotFound` when the patient has none.
    fn get_fragments(&self, patient_id: i64) -> Result<Vec<Fragment>, StoreError>;
}

/// Summary history: newest row is the current summary.
pub trait SummaryStore: Send + Sync {
    fn get_prior_summary(&self, patient_id: i64) -> Result<Option<Summary>, StoreError>;

    fn persist_summary(&self, patient_id: i64, summary: &Summary) -> Result<(), StoreError>;
}

// ═══════════════════════════════════════════
// Run options and retrieval results
// ═══════════════════════════════════════════

/// Per-call options of `run_summarization`.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryOptions {
    pub max_fragments: usize,
    pub max_context_chars: usize,
    /// Upper bound on fragments forced in by structural headers.
    pub structural_cap: usize,
    pub chief_complaint: Option<String>,
    pub keywords: Vec<String>,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        Self {
            max_fragments: 12,
            max_context_chars: 12_000,
            structural_cap: 6,
            chief_complaint: None,
            keywords: Vec::new(),
        }
    }
}

/// A fragment with the reason and score it was selected with.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredFragment {
    pub fragment: Fragment,
    pub score: f32,
    pub provenance: Provenance,
    pub structural: bool,
}

/// Fragments the model actually sees, in chronological order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievedContext {
    pub fragments: Vec<ScoredFragment>,
}

impl RetrievedContext {
    pub fn fragment_ids(&self) -> Vec<i64> {
        self.fragments.iter().map(|f| f.fragment.id).collect()
    }

    pub fn report_types(&self) -> Vec<ReportType> {
        let mut types: Vec<ReportType> = Vec::new();
        for f in &self.fragments {
            if !types.contains(&f.fragment.report_type) {
                types.push(f.fragment.report_type);
            }
        }
        types
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

// ═══════════════════════════════════════════
// Stage results
// ═══════════════════════════════════════════

/// Why a model stage produced no usable value.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FallbackReason {
    #[error("timed out")]
    Timeout,

    #[error("model unavailable ({0})")]
    Transport(String),

    #[error("empty response")]
    EmptyResponse,

    #[error("unparseable output ({0})")]
    Unparseable(String),
}

impl FallbackReason {
    /// Marker text substituted for the stage's value.
    pub fn marker(&self) -> String {
        format!("{FAILURE_MARKER_PREFIX} {self}")
    }
}

impl From<LlmError> for FallbackReason {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Timeout(_) => Self::Timeout,
            other => Self::Transport(other.to_string()),
        }
    }
}

/// Tagged stage result: a real value or the reason it fell back.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction<T> {
    Ok(T),
    Fallback(FallbackReason),
}

impl<T> Extraction<T> {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback(_))
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Self::Ok(v) => Some(v),
            Self::Fallback(_) => None,
        }
    }

    pub fn fallback_reason(&self) -> Option<&FallbackReason> {
        match self {
            Self::Ok(_) => None,
            Self::Fallback(reason) => Some(reason),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Extraction<U> {
        match self {
            Self::Ok(v) => Extraction::Ok(f(v)),
            Self::Fallback(reason) => Extraction::Fallback(reason),
        }
    }

    /// The value, or the fallback marker rendered through `on_fallback`.
    pub fn unwrap_or_marker(self, on_fallback: impl FnOnce(String) -> T) -> T {
        match self {
            Self::Ok(v) => v,
            Self::Fallback(reason) => on_fallback(reason.marker()),
        }
    }
}

impl<T> From<Result<T, FallbackReason>> for Extraction<T> {
    fn from(result: Result<T, FallbackReason>) -> Self {
        match result {
            Ok(v) => Self::Ok(v),
            Err(reason) => Self::Fallback(reason),
        }
    }
}
