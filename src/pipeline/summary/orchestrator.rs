use std::sync::Arc;
use std::time::Instant;

use super::citation::map_citations;
use super::classify::classify_specialty;
use super::context::{seen_by, StageContexts};
use super::retrieval::select_candidates;
use super::specialty::extract_specialty;
use super::types::{ChunkStore, StoreError, SummaryOptions, SummaryStore};
use super::universal::extract_universal;
use super::validation::assemble_summary;
use super::SummaryError;
use crate::config::PipelineConfig;
use crate::models::{Specialty, Summary};
use crate::pipeline::llm::{QueryEmbedder, TextGenerator};

/// Clinical summarization pipeline.
///
/// Coordinates: retrieve → continuity → classify → universal (3-way join)
/// → specialty → validate/assemble → cite → persist.
///
/// Holds no mutable state; pipelines with different configurations can run
/// side by side.
pub struct SummarizationPipeline {
    config: PipelineConfig,
    generator: Arc<dyn TextGenerator>,
    embedder: Arc<dyn QueryEmbedder>,
    chunks: Arc<dyn ChunkStore>,
    summaries: Arc<dyn SummaryStore>,
}

impl SummarizationPipeline {
    pub fn new(
        config: PipelineConfig,
        generator: Arc<dyn TextGenerator>,
        embedder: Arc<dyn QueryEmbedder>,
        chunks: Arc<dyn ChunkStore>,
        summaries: Arc<dyn SummaryStore>,
    ) -> Self {
        Self {
            config,
            generator,
            embedder,
            chunks,
            summaries,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Embed the chief complaint (or the default query). A failure only
    /// costs the similarity signal.
    async fn embed_query(&self, options: &SummaryOptions) -> Option<Vec<f32>> {
        let query = options
            .chief_complaint
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .unwrap_or(self.config.default_query.as_str());

        match tokio::time::timeout(self.config.classify.timeout, self.embedder.embed(query)).await
        {
            Ok(Ok(embedding)) => Some(embedding),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Query embedding failed; ranking without similarity");
                None
            }
            Err(_) => {
                tracing::warn!("Query embedding timed out; ranking without similarity");
                None
            }
        }
    }

    /// The newest persisted summary, or `None` when there is none or it
    /// cannot be read.
    fn load_prior(&self, patient_id: i64) -> Option<Summary> {
        match self.summaries.get_prior_summary(patient_id) {
            Ok(prior) => prior,
            Err(e) => {
                tracing::warn!(
                    patient_id,
                    error = %e,
                    "Prior summary unavailable; continuing without continuity"
                );
                None
            }
        }
    }

    /// Retrieval plus continuity injection: exactly the context each model
    /// stage will see, fit to that stage's budget. Deterministic for a fixed
    /// fragment set and prior.
    pub async fn assemble_context(
        &self,
        patient_id: i64,
        options: &SummaryOptions,
    ) -> Result<StageContexts, SummaryError> {
        let fragments = self.chunks.get_fragments(patient_id).map_err(|e| match e {
            StoreError::NotFound(_) => SummaryError::NoFragments(patient_id),
            other => SummaryError::Store(other),
        })?;

        let query_embedding = self.embed_query(options).await;
        let candidates = select_candidates(&fragments, query_embedding.as_deref(), options);
        if candidates.is_empty() {
            tracing::warn!(patient_id, fragments = fragments.len(), "No usable fragments");
            return Err(SummaryError::NoFragments(patient_id));
        }

        let prior = self.load_prior(patient_id);
        let contexts = StageContexts::assemble(
            &candidates,
            prior.as_ref(),
            &self.config,
            options.max_context_chars,
        );

        let provenance = contexts
            .evolution
            .provenance()
            .iter()
            .map(|p| p.as_str())
            .collect::<Vec<_>>()
            .join(",");
        tracing::info!(
            patient_id,
            fragments = fragments.len(),
            candidates = candidates.len(),
            in_context = seen_by(contexts.all()).fragments.len(),
            classify_fragments = contexts.classify.retrieved.fragments.len(),
            max_chars = contexts.max_char_len(),
            continuity = contexts.has_continuity(),
            provenance = %provenance,
            "Context assembled"
        );
        Ok(contexts)
    }

    /// Produce, persist and return a new summary for the patient.
    ///
    /// Model and parsing failures never surface here; they degrade the
    /// summary instead. Errors are limited to "no fragments" and store
    /// failures.
    pub async fn run_summarization(
        &self,
        patient_id: i64,
        options: &SummaryOptions,
    ) -> Result<Summary, SummaryError> {
        let started = Instant::now();
        let contexts = self.assemble_context(patient_id, options).await?;
        let generator = self.generator.as_ref();
        let classify_context = &contexts.classify;
        let report_types = classify_context.retrieved.report_types();

        let (specialty, universal) = if self.config.classify_concurrently {
            let (classification, universal) = tokio::join!(
                classify_specialty(
                    generator,
                    &self.config.classify,
                    &classify_context.text,
                    &report_types
                ),
                extract_universal(generator, &self.config, contexts.universal(), None),
            );
            (classification.ok().unwrap_or(Specialty::General), universal)
        } else {
            let specialty = classify_specialty(
                generator,
                &self.config.classify,
                &classify_context.text,
                &report_types,
            )
            .await
            .ok()
            .unwrap_or(Specialty::General);
            let universal =
                extract_universal(generator, &self.config, contexts.universal(), Some(specialty))
                    .await;
            (specialty, universal)
        };

        let mut prompted = vec![
            &contexts.classify,
            &contexts.evolution,
            &contexts.current_status,
            &contexts.plan,
        ];
        let payload = if universal.all_failed() {
            tracing::debug!(patient_id, "Skipping specialty extraction after universal failure");
            None
        } else {
            if specialty != Specialty::General {
                prompted.push(&contexts.specialty);
            }
            let context = &contexts.specialty.text;
            extract_specialty(generator, &self.config.specialty, context, specialty)
                .await
                .ok()
                .flatten()
        };

        let mut summary = assemble_summary(specialty, universal, payload);
        summary.citations = map_citations(&seen_by(prompted), &summary);

        self.summaries
            .persist_summary(patient_id, &summary)
            .map_err(|e| {
                tracing::error!(patient_id, error = %e, "Failed to persist summary");
                SummaryError::Persistence(e)
            })?;

        tracing::info!(
            patient_id,
            specialty = summary.specialty.as_str(),
            degraded = summary.is_degraded(),
            fallback = summary.is_fallback(),
            citations = summary.citations.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Summarization complete"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use super::*;
    use crate::models::*;
    use crate::pipeline::llm::{FixedEmbedder, LlmError, ScriptedGenerator};
    use crate::pipeline::summary::store::InMemoryStore;
    use crate::pipeline::summary::validation::validate_summary;

    const PATIENT: i64 = 42;

    const CLASSIFY: &str = "classify the patient specialty";
    const EVOLUTION: &str = "narrative describing";
    const STATUS: &str = "CURRENT clinical status";
    const PLAN: &str = "treatment PLAN";
    const ONCOLOGY: &str = "Extract oncology data";
    const SPEECH: &str = "Extract audiology data";

    fn fragment(id: i64, report_id: i64, index: u32, report_type: ReportType, text: &str) -> Fragment {
        Fragment {
            id,
            report_id,
            report_type,
            fragment_index: index,
            page: Some(1),
            offset: Some(0),
            text: text.into(),
            embedding: vec![1.0, 0.0],
        }
    }

    fn oncology_fragments() -> Vec<Fragment> {
        vec![
            fragment(1, 10, 0, ReportType::Radiology, "CT chest: tumor measures 2.3 cm in the right upper lobe."),
            fragment(2, 10, 1, ReportType::Radiology, "IMPRESSION: tumor measures 2.3 cm, no nodal disease."),
            fragment(3, 11, 0, ReportType::Oncology, "Oncology visit: tumor measures 2.3 cm, plan adjuvant therapy."),
        ]
    }

    fn fast_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        for stage in config.stages_mut() {
            stage.timeout = Duration::from_secs(2);
        }
        config
    }

    fn oncology_generator() -> ScriptedGenerator {
        ScriptedGenerator::new()
            .on(CLASSIFY, "oncology")
            .on(EVOLUTION, "Lung mass found on CT, now 2.3 cm and under oncology care.")
            .on(STATUS, " Tumor 2.3 cm in right upper lobe\n- No nodal disease")
            .on(PLAN, " Adjuvant therapy\n- Repeat CT in 3 months")
            .on(
                ONCOLOGY,
                r#"```json
{"tumor_size_trend": [
   {"date": "2024-01-10", "size_cm": 2.3},
   {"date": "2024-01-10", "size_cm": "2.3 cm"}
 ],
 "tnm_staging": "T1cN0M0",
 "pertinent_negatives": ["No nodal disease"]}
```"#,
            )
    }

    struct Harness {
        pipeline: SummarizationPipeline,
        generator: Arc<ScriptedGenerator>,
        store: Arc<InMemoryStore>,
    }

    fn harness(
        config: PipelineConfig,
        generator: ScriptedGenerator,
        fragments: Vec<Fragment>,
    ) -> Harness {
        let generator = Arc::new(generator);
        let store = Arc::new(InMemoryStore::new());
        store.add_fragments(PATIENT, fragments).unwrap();
        let pipeline = SummarizationPipeline::new(
            config,
            generator.clone(),
            Arc::new(FixedEmbedder::new(vec![1.0, 0.0])),
            store.clone(),
            store.clone(),
        );
        Harness {
            pipeline,
            generator,
            store,
        }
    }

    #[tokio::test]
    async fn oncology_patient_gets_single_measurement() {
        let h = harness(fast_config(), oncology_generator(), oncology_fragments());
        let summary = h
            .pipeline
            .run_summarization(PATIENT, &SummaryOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.specialty, Specialty::Oncology);
        let oncology = summary.oncology.as_ref().unwrap();
        assert_eq!(oncology.tumor_size_trend.len(), 1);
        assert_eq!(oncology.tumor_size_trend[0].size_cm, 2.3);
        assert!(summary.speech.is_none());
        assert!(!summary.is_degraded());
        assert!(validate_summary(&summary).is_empty());
        assert_eq!(summary.universal.plan.len(), 2);

        let history = h.store.history(PATIENT);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].citations.len(), summary.citations.len());
    }

    #[tokio::test]
    async fn zero_fragments_is_retrieval_failure_and_nothing_persisted() {
        let h = harness(fast_config(), oncology_generator(), vec![]);
        let err = h
            .pipeline
            .run_summarization(PATIENT, &SummaryOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SummaryError::NoFragments(PATIENT)));
        assert!(h.store.history(PATIENT).is_empty());
        assert!(h.generator.requests().is_empty());
    }

    #[tokio::test]
    async fn prior_narrative_reaches_the_model() {
        let generator = ScriptedGenerator::new()
            .on(CLASSIFY, "oncology")
            .on(
                EVOLUTION,
                "Stage II, post-op; the follow-up scan shows no recurrence.",
            )
            .on(STATUS, "- No recurrence on follow-up scan")
            .on(PLAN, "- Annual surveillance")
            .on(ONCOLOGY, "{\"tnm_staging\": \"T2N0M0\"}");
        let h = harness(
            fast_config(),
            generator,
            vec![fragment(
                5,
                20,
                0,
                ReportType::Radiology,
                "Follow-up scan: no evidence of recurrence.",
            )],
        );

        let prior = Summary::new(
            UniversalSummary {
                evolution: "Stage II, post-op.".into(),
                current_status: vec!["Healing well".into()],
                plan: vec!["Follow-up scan".into()],
            },
            Specialty::Oncology,
            None,
        );
        h.store.persist_summary(PATIENT, &prior).unwrap();

        let context = h
            .pipeline
            .assemble_context(PATIENT, &SummaryOptions::default())
            .await
            .unwrap();
        for stage in context.all() {
            assert!(stage.text.contains("Stage II, post-op."));
            assert!(stage.text.contains("[NEW REPORTS]"));
        }

        let summary = h
            .pipeline
            .run_summarization(PATIENT, &SummaryOptions::default())
            .await
            .unwrap();
        assert!(h.generator.prompts_containing("Stage II, post-op.") >= 3);
        assert_ne!(summary.universal.evolution, prior.universal.evolution);
        assert!(summary.universal.evolution.contains("follow-up scan"));
        assert_eq!(h.store.history(PATIENT).len(), 2);
    }

    #[tokio::test]
    async fn unreadable_prior_is_not_fatal() {
        let h = harness(fast_config(), oncology_generator(), oncology_fragments());
        h.store.set_fail_prior_reads(true);
        let summary = h
            .pipeline
            .run_summarization(PATIENT, &SummaryOptions::default())
            .await
            .unwrap();
        assert!(!summary.is_degraded());
        assert_eq!(h.generator.prompts_containing("PREVIOUS SUMMARY —"), 0);
    }

    #[tokio::test]
    async fn every_stage_timing_out_still_yields_valid_summary() {
        let slow = Duration::from_millis(500);
        let generator = ScriptedGenerator::new()
            .delay_on(CLASSIFY, slow, "oncology")
            .delay_on(EVOLUTION, slow, "x")
            .delay_on(STATUS, slow, "- x")
            .delay_on(PLAN, slow, "- x")
            .delay_on(ONCOLOGY, slow, "{}");
        let mut config = PipelineConfig::default();
        for stage in config.stages_mut() {
            stage.timeout = Duration::from_millis(50);
        }
        let h = harness(config, generator, oncology_fragments());

        let summary = h
            .pipeline
            .run_summarization(PATIENT, &SummaryOptions::default())
            .await
            .unwrap();
        assert!(validate_summary(&summary).is_empty());
        assert!(summary.is_fallback());
        assert_eq!(summary.universal.evolution, "⚠ Summary generation timed out");
        assert_eq!(summary.universal.plan, vec!["Review medical records manually"]);
        assert_eq!(summary.specialty, Specialty::General);
        assert_eq!(summary.populated_specialty_blocks(), 0);
        assert_eq!(h.generator.prompts_containing(ONCOLOGY), 0);
        assert_eq!(h.store.history(PATIENT).len(), 1);
    }

    #[tokio::test]
    async fn universal_stages_overlap() {
        let delay = Duration::from_millis(400);
        let generator = ScriptedGenerator::new()
            .on(CLASSIFY, "general")
            .delay_on(EVOLUTION, delay, "Stable course.")
            .delay_on(STATUS, delay, "- Stable")
            .delay_on(PLAN, delay, "- Routine follow-up");
        let h = harness(fast_config(), generator, oncology_fragments());

        let started = Instant::now();
        let summary = h
            .pipeline
            .run_summarization(PATIENT, &SummaryOptions::default())
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_millis(1100));
        assert_eq!(summary.specialty, Specialty::General);
        assert!(!summary.is_degraded());
    }

    #[tokio::test]
    async fn every_context_fragment_is_cited() {
        let h = harness(fast_config(), oncology_generator(), oncology_fragments());
        let options = SummaryOptions::default();
        let context = h.pipeline.assemble_context(PATIENT, &options).await.unwrap();
        let summary = h.pipeline.run_summarization(PATIENT, &options).await.unwrap();

        let cited: HashSet<i64> = summary.citations.iter().map(|c| c.fragment_id).collect();
        for id in seen_by(context.all()).fragment_ids() {
            assert!(cited.contains(&id), "fragment {id} not cited");
        }
        assert!(!summary.citations.is_empty());
    }

    #[tokio::test]
    async fn context_is_reproducible_without_new_data() {
        let h = harness(fast_config(), oncology_generator(), oncology_fragments());
        let options = SummaryOptions {
            keywords: vec!["nodal".into()],
            ..Default::default()
        };
        let first = h.pipeline.assemble_context(PATIENT, &options).await.unwrap();
        let second = h.pipeline.assemble_context(PATIENT, &options).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn context_respects_character_budget() {
        let h = harness(fast_config(), oncology_generator(), oncology_fragments());
        let options = SummaryOptions {
            max_context_chars: 120,
            ..Default::default()
        };
        let context = h.pipeline.assemble_context(PATIENT, &options).await.unwrap();
        assert!(context.max_char_len() <= 120);
        assert!(context.all().iter().all(|c| !c.retrieved.is_empty()));
    }

    #[tokio::test]
    async fn speech_patient_gets_only_speech_block() {
        let generator = ScriptedGenerator::new()
            .on(CLASSIFY, "speech")
            .on(EVOLUTION, "Progressive bilateral hearing loss, now aided.")
            .on(STATUS, "- Moderate sensorineural loss")
            .on(PLAN, "- Annual audiogram")
            .on(
                SPEECH,
                r#"{"audiogram": {"left": {"500Hz": 35, "1000Hz": 40}}, "tinnitus": "yes"}"#,
            );
        let h = harness(
            fast_config(),
            generator,
            vec![fragment(
                7,
                30,
                0,
                ReportType::Audiology,
                "Audiogram: left 500Hz 35 dB HL, 1000Hz 40 dB HL. Tinnitus reported.",
            )],
        );

        let summary = h
            .pipeline
            .run_summarization(PATIENT, &SummaryOptions::default())
            .await
            .unwrap();
        assert_eq!(summary.specialty, Specialty::Speech);
        assert!(summary.oncology.is_none());
        assert_eq!(summary.speech.as_ref().unwrap().tinnitus, Some(true));
        assert_eq!(summary.populated_specialty_blocks(), 1);
        assert!(summary.citations[0].supports(SummarySection::Speech));
    }

    #[tokio::test]
    async fn unparseable_specialty_output_leaves_block_empty() {
        let generator = ScriptedGenerator::new()
            .on(ONCOLOGY, "Sorry, no structured data.")
            .on(CLASSIFY, "oncology")
            .on(EVOLUTION, "Course.")
            .on(STATUS, "- Status")
            .on(PLAN, "- Plan");
        let h = harness(fast_config(), generator, oncology_fragments());
        let summary = h
            .pipeline
            .run_summarization(PATIENT, &SummaryOptions::default())
            .await
            .unwrap();
        assert_eq!(summary.specialty, Specialty::Oncology);
        assert!(summary.oncology.is_none());
        assert!(!summary.is_degraded());
    }

    #[tokio::test]
    async fn classifier_failure_defaults_to_general() {
        let generator = ScriptedGenerator::new()
            .fail_on(CLASSIFY, LlmError::Connection("refused".into()))
            .on(EVOLUTION, "Course.")
            .on(STATUS, "- Status")
            .on(PLAN, "- Plan");
        let h = harness(fast_config(), generator, oncology_fragments());
        let summary = h
            .pipeline
            .run_summarization(PATIENT, &SummaryOptions::default())
            .await
            .unwrap();
        assert_eq!(summary.specialty, Specialty::General);
        assert_eq!(summary.populated_specialty_blocks(), 0);
        assert_eq!(h.generator.prompts_containing(ONCOLOGY), 0);
    }

    #[tokio::test]
    async fn concurrent_classification_uses_generic_framing() {
        let mut config = fast_config();
        config.classify_concurrently = true;
        let h = harness(config, oncology_generator(), oncology_fragments());
        let summary = h
            .pipeline
            .run_summarization(PATIENT, &SummaryOptions::default())
            .await
            .unwrap();
        assert_eq!(summary.specialty, Specialty::Oncology);
        assert!(summary.oncology.is_some());
        assert_eq!(h.generator.prompts_containing("oncology case"), 0);
    }

    #[tokio::test]
    async fn sequential_classification_frames_universal_prompts() {
        let h = harness(fast_config(), oncology_generator(), oncology_fragments());
        h.pipeline
            .run_summarization(PATIENT, &SummaryOptions::default())
            .await
            .unwrap();
        assert_eq!(h.generator.prompts_containing("oncology case"), 3);
    }

    #[tokio::test]
    async fn embedding_failure_is_not_fatal() {
        let generator = Arc::new(oncology_generator());
        let store = Arc::new(InMemoryStore::new());
        store.add_fragments(PATIENT, oncology_fragments()).unwrap();
        let pipeline = SummarizationPipeline::new(
            fast_config(),
            generator,
            Arc::new(FixedEmbedder::failing(LlmError::NoModelAvailable)),
            store.clone(),
            store,
        );
        let summary = pipeline
            .run_summarization(PATIENT, &SummaryOptions::default())
            .await
            .unwrap();
        assert_eq!(summary.citations.len(), 3);
    }

    #[tokio::test]
    async fn persistence_failure_is_reported() {
        let h = harness(fast_config(), oncology_generator(), oncology_fragments());
        h.store.set_fail_writes(true);
        let err = h
            .pipeline
            .run_summarization(PATIENT, &SummaryOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SummaryError::Persistence(_)));
    }

    #[tokio::test]
    async fn long_prior_never_crowds_out_new_reports() {
        let fragments: Vec<Fragment> = (0..12)
            .map(|i| {
                let text = format!("FRAG-{i} {}", "observation ".repeat(70));
                fragment(100 + i, 100 + i, 0, ReportType::ClinicalNote, &text)
            })
            .collect();
        let h = harness(fast_config(), oncology_generator(), fragments);
        let prior = Summary::new(
            UniversalSummary {
                evolution: "Stable baseline course. ".repeat(240),
                current_status: vec!["Healing well".into()],
                plan: vec!["Follow-up scan".into()],
            },
            Specialty::Oncology,
            None,
        );
        h.store.persist_summary(PATIENT, &prior).unwrap();

        let summary = h
            .pipeline
            .run_summarization(PATIENT, &SummaryOptions::default())
            .await
            .unwrap();

        // Classifier, three universal stages and the oncology stage.
        assert_eq!(h.generator.prompts_containing("[NEW REPORTS]"), 5);
        assert_eq!(h.generator.prompts_containing("PREVIOUS SUMMARY —"), 5);

        assert!(!summary.citations.is_empty());
        assert!(summary.citations.len() < 12);
        for citation in &summary.citations {
            let marker = format!("FRAG-{} ", citation.fragment_id - 100);
            assert!(
                h.generator.prompts_containing(&marker) >= 1,
                "fragment {} cited but never prompted",
                citation.fragment_id
            );
        }
    }
}
