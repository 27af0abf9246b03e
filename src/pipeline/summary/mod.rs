pub mod types;
pub mod retrieval;
pub mod context;
pub mod stage;
pub mod prompt;
pub mod classify;
pub mod universal;
pub mod specialty;
pub mod validation;
pub mod citation;
pub mod orchestrator;
pub mod store;

pub use orchestrator::SummarizationPipeline;
pub use store::InMemoryStore;
pub use types::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SummaryError {
    #[error("No fragments found for patient {0}")]
    NoFragments(i64),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Failed to persist summary: {0}")]
    Persistence(StoreError),
}
