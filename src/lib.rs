pub mod config;
pub mod models;
pub mod db;
pub mod pipeline; // LLM boundary + summarization stages

pub use db::SqliteStore;
pub use pipeline::llm::{OllamaClient, QueryEmbedder, TextGenerator};
pub use pipeline::summary::{
    InMemoryStore, SummarizationPipeline, SummaryError, SummaryOptions,
};

use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber, honouring `RUST_LOG` and falling back to
/// `config::default_log_filter()`. Later calls are no-ops.
pub fn init_tracing() {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("{} v{} tracing initialised", config::APP_NAME, config::APP_VERSION);
    }
}
