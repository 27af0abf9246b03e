use std::time::Duration;

/// Application-level constants
pub const APP_NAME: &str = "summaid";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llama3:8b";
pub const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text";
pub const DEFAULT_NUM_CTX: u32 = 4096;
pub const DEFAULT_QUERY: &str = "patient summary";

/// Installed-model fallbacks, tried in order when the primary model is missing.
pub const DEFAULT_FALLBACK_MODELS: &[&str] = &[
    "qwen2.5:7b-instruct-q4_K_M",
    "qwen2.5:3b-instruct-q4_K_M",
    "llama3.2:3b-instruct-q4_K_M",
];

/// Sampling options sent with every generate call.
pub const TOP_P: f32 = 0.9;
pub const REPEAT_PENALTY: f32 = 1.1;

/// Default tracing filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "summaid=info,warn"
}

/// Settings for one model-backed stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageConfig {
    pub model: String,
    pub temperature: f32,
    pub timeout: Duration,
    /// How much of the assembled context this stage sees.
    pub context_chars: usize,
    pub num_ctx: u32,
}

impl StageConfig {
    fn new(temperature: f32, timeout_secs: u64, context_chars: usize) -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature,
            timeout: Duration::from_secs(timeout_secs),
            context_chars,
            num_ctx: DEFAULT_NUM_CTX,
        }
    }
}

/// Explicit pipeline configuration, passed into the pipeline constructor.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub ollama_url: String,
    pub embedding_model: String,
    pub fallback_models: Vec<String>,
    pub classify: StageConfig,
    pub evolution: StageConfig,
    pub current_status: StageConfig,
    pub plan: StageConfig,
    pub specialty: StageConfig,
    /// Run classification alongside universal extraction. Universal prompts
    /// then lose their specialty framing.
    pub classify_concurrently: bool,
    /// Retrieval query when no chief complaint is supplied.
    pub default_query: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            fallback_models: DEFAULT_FALLBACK_MODELS.iter().map(|m| m.to_string()).collect(),
            classify: StageConfig::new(0.0, 30, 3_000),
            evolution: StageConfig::new(0.2, 90, 8_000),
            current_status: StageConfig::new(0.1, 90, 8_000),
            plan: StageConfig::new(0.1, 90, 8_000),
            specialty: StageConfig::new(0.0, 120, 6_000),
            classify_concurrently: false,
            default_query: DEFAULT_QUERY.to_string(),
        }
    }
}

impl PipelineConfig {
    /// Build a configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup. Unparseable values
    /// are logged and ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(model) = get("LLM_MODEL_NAME").or_else(|| get("GEN_MODEL")) {
            config.set_model(&model);
        }

        if let Some(raw) = get("LLM_TEMPERATURE") {
            match raw.parse::<f32>() {
                Ok(t) if (0.0..=2.0).contains(&t) => {
                    config.current_status.temperature = t;
                    config.plan.temperature = t;
                }
                _ => tracing::warn!(value = %raw, "Ignoring invalid LLM_TEMPERATURE"),
            }
        }

        if let Some(raw) = get("LLM_NUM_CTX") {
            match raw.parse::<u32>() {
                Ok(n) if n > 0 => config.stages_mut().for_each(|s| s.num_ctx = n),
                _ => tracing::warn!(value = %raw, "Ignoring invalid LLM_NUM_CTX"),
            }
        }

        if let Some(raw) = get("LLM_FALLBACK_MODELS") {
            config.fallback_models = raw
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(String::from)
                .collect();
        }

        if let Some(url) = get("OLLAMA_URL") {
            config.ollama_url = url.trim_end_matches('/').to_string();
        }

        if let Some(model) = get("EMBEDDING_MODEL") {
            config.embedding_model = model;
        }

        if let Some(raw) = get("SUMMARY_STAGE_TIMEOUT_SECS") {
            match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => {
                    let timeout = Duration::from_secs(secs);
                    config.stages_mut().for_each(|s| s.timeout = timeout);
                }
                _ => tracing::warn!(value = %raw, "Ignoring invalid SUMMARY_STAGE_TIMEOUT_SECS"),
            }
        }

        if let Some(raw) = get("SUMMARY_CLASSIFY_CONCURRENTLY") {
            config.classify_concurrently =
                matches!(raw.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }

        config
    }

    /// Use the same model for every stage.
    pub fn set_model(&mut self, model: &str) {
        self.stages_mut().for_each(|s| s.model = model.to_string());
    }

    /// Primary model followed by the configured fallbacks, without duplicates.
    pub fn model_candidates(&self) -> Vec<String> {
        let mut candidates = vec![self.evolution.model.clone()];
        for m in &self.fallback_models {
            if !candidates.contains(m) {
                candidates.push(m.clone());
            }
        }
        candidates
    }

    pub fn stages_mut(&mut self) -> impl Iterator<Item = &mut StageConfig> {
        [
            &mut self.classify,
            &mut self.evolution,
            &mut self.current_status,
            &mut self.plan,
            &mut self.specialty,
        ]
        .into_iter()
    }
}
