//! Run orchestrator: drives one run from `QUEUED` to a terminal state.
//!
//! ## Steps
//!
//! ```text
//! claim ─▶ OCR ─▶ prompt ─▶ LLM ─▶ sanitize ─▶ parse ─▶ confidence ─▶ persist
//!   │       │                  └──────── structuring failure ────────┐
//!   │       └─ fatal: run FAILED, no record                          ▼
//!   └─ not QUEUED: nothing runs                      FallbackPolicy decides
//! ```
//!
//! The claim is a compare-and-set in the run store, so a run executes at
//! most once no matter how many callers race on its ID. After the claim,
//! every exit path leaves the run `COMPLETED` or `FAILED`.
//!
//! Structuring failures (model unreachable, blank answer, unparseable answer)
//! are not errors by default: [`FallbackPolicy::CompleteWithWarning`] stores
//! an empty result carrying the reason as a warning. Only OCR and
//! persistence failures fail a run under that policy.

use crate::config::{FallbackPolicy, PipelineConfig};
use crate::error::{PipelineError, StoreError, StructuringFailure};
use crate::model::{ExtractionRecord, ExtractionResult, Run, RunReport, RunStatus};
use crate::pipeline::confidence::aggregate_confidence;
use crate::pipeline::llm::LlmClient;
use crate::pipeline::ocr::OcrExtractor;
use crate::pipeline::parse::{parse_result, ModelOutput};
use crate::pipeline::sanitize::sanitize;
use crate::progress::{NoopProgressCallback, ProgressCallback, Stage};
use crate::prompts::{build_prompt, StructuringPrompt};
use crate::store::{Claim, ExtractionStore, RunStore};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Runs the OCR → LLM pipeline against tracked runs.
///
/// Every collaborator is injected, so tests can script OCR and LLM answers
/// and inspect exactly what was persisted.
pub struct Orchestrator {
    ocr: Arc<dyn OcrExtractor>,
    llm: Arc<dyn LlmClient>,
    runs: Arc<dyn RunStore>,
    extractions: Arc<dyn ExtractionStore>,
    config: PipelineConfig,
    progress: ProgressCallback,
}

impl Orchestrator {
    pub fn new(
        ocr: Arc<dyn OcrExtractor>,
        llm: Arc<dyn LlmClient>,
        runs: Arc<dyn RunStore>,
        extractions: Arc<dyn ExtractionStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            ocr,
            llm,
            runs,
            extractions,
            config,
            progress: Arc::new(NoopProgressCallback),
        }
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn runs(&self) -> &Arc<dyn RunStore> {
        &self.runs
    }

    pub fn extractions(&self) -> &Arc<dyn ExtractionStore> {
        &self.extractions
    }

    /// Process a `QUEUED` run end to end.
    ///
    /// # Errors
    /// * [`PipelineError::RunNotFound`] / [`PipelineError::RunNotQueued`]:
    ///   nothing was executed and the run is untouched.
    /// * Any other variant: the run has been recorded as `FAILED` with the
    ///   error's text.
    pub async fn run(&self, file_id: Uuid, run_id: Uuid, path: &Path) -> Result<ExtractionResult, PipelineError> {
        let span = info_span!("agent.run", %file_id, %run_id);
        self.run_claimed(file_id, run_id, path).instrument(span).await
    }

    async fn run_claimed(&self, file_id: Uuid, run_id: Uuid, path: &Path) -> Result<ExtractionResult, PipelineError> {
        let mut run = match self.runs.claim_run(run_id, Utc::now())? {
            Claim::Claimed(run) => run,
            Claim::NotFound => return Err(PipelineError::RunNotFound { run_id }),
            Claim::Unavailable(status) => {
                warn!("Run {} is {}; skipping", run_id, status);
                return Err(PipelineError::RunNotQueued { run_id, status });
            }
        };

        info!("Processing {}", path.display());
        self.progress.on_run_start(run_id);
        let start = Instant::now();

        match self.execute(&run, file_id, path, start).await {
            Ok(result) => {
                info!(
                    "Run completed: {} page(s), {} warning(s) in {}ms",
                    result.pages.len(),
                    result.warnings.len(),
                    result.processing_time_ms
                );
                self.progress.on_run_complete(run_id, None);
                Ok(result)
            }
            Err(e) => {
                let message = e.to_string();
                error!("Run failed: {}", message);
                self.record_failure(&mut run, &message);
                self.progress.on_run_complete(run_id, Some(&message));
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        run: &Run,
        file_id: Uuid,
        path: &Path,
        start: Instant,
    ) -> Result<ExtractionResult, PipelineError> {
        let run_id = run.run_id;

        // ── Step 1: OCR ──────────────────────────────────────────────────
        self.progress.on_stage_start(run_id, Stage::Ocr);
        let t = Instant::now();
        let pages = self
            .ocr
            .extract(path)
            .instrument(info_span!("ocr.extract", path = %path.display()))
            .await?;
        debug!("OCR returned {} page(s)", pages.len());
        self.progress.on_stage_complete(Stage::Ocr, elapsed_ms(t));

        // ── Step 2: Prompt ───────────────────────────────────────────────
        let prompt = build_prompt(&pages, self.config.system_prompt.as_deref())
            .map_err(|e| PipelineError::Unexpected(format!("Failed to serialise OCR payload: {e}")))?;

        // ── Step 3: Structure (LLM + sanitize + parse) ───────────────────
        let structured = self
            .structure(run_id, &prompt)
            .instrument(info_span!("llm.structuring", model = %self.config.model_or_default()))
            .await;
        let processing_time_ms = elapsed_ms(start);

        let (result, avg_confidence) = match structured {
            Ok(output) => {
                let result = output.into_result(file_id, run_id, processing_time_ms);
                let avg = aggregate_confidence(Some(&result));
                (result, avg)
            }
            Err(failure) => match self.config.fallback_policy {
                FallbackPolicy::CompleteWithWarning => {
                    let warning = failure.warning();
                    warn!("Structuring fell back: {}", warning);
                    self.progress.on_fallback(run_id, &warning);
                    (
                        ExtractionResult::fallback(file_id, run_id, warning, processing_time_ms),
                        0.0,
                    )
                }
                FallbackPolicy::FailRun => return Err(PipelineError::Structuring(failure)),
            },
        };

        // ── Step 4: Persist ──────────────────────────────────────────────
        self.progress.on_stage_start(run_id, Stage::Persisting);
        let t = Instant::now();
        let record = ExtractionRecord::from_result(&result, avg_confidence).map_err(StoreError::from)?;
        self.extractions.save_extraction(&record)?;

        let mut completed = run.clone();
        completed.complete(Utc::now())?;
        self.runs.save_run(&completed)?;
        self.progress.on_stage_complete(Stage::Persisting, elapsed_ms(t));

        Ok(result)
    }

    /// Ask the model, then sanitise and parse its answer.
    async fn structure(&self, run_id: Uuid, prompt: &StructuringPrompt) -> Result<ModelOutput, StructuringFailure> {
        self.progress.on_stage_start(run_id, Stage::Structuring);
        let t = Instant::now();
        let settings = self.config.completion_settings();
        let raw = match self.llm.complete(&prompt.system, &prompt.user, &settings).await {
            Ok(text) => Some(text),
            Err(e) => {
                // Cause is logged only; every LLM error means "no answer".
                warn!("LLM call failed: {}", e);
                None
            }
        };
        self.progress.on_stage_complete(Stage::Structuring, elapsed_ms(t));

        let raw = raw
            .filter(|text| !text.trim().is_empty())
            .ok_or(StructuringFailure::LlmUnavailable)?;
        debug!("LLM answered with {} chars", raw.len());

        self.progress.on_stage_start(run_id, Stage::Parsing);
        let t = Instant::now();
        let parsed = parse_result(&sanitize(Some(&raw)));
        self.progress.on_stage_complete(Stage::Parsing, elapsed_ms(t));

        if let Err(StructuringFailure::MalformedModelOutput { detail }) = &parsed {
            warn!("Model output does not match the result schema: {}", detail);
        }
        parsed
    }

    /// Best effort: the original error is what the caller sees, so a
    /// failure to record it is only logged.
    fn record_failure(&self, run: &mut Run, message: &str) {
        if let Err(e) = run.fail(Utc::now(), message) {
            error!("Cannot mark run {} failed: {}", run.run_id, e);
            return;
        }
        if let Err(e) = self.runs.save_run(run) {
            error!("Cannot persist failure of run {}: {}", run.run_id, e);
        }
    }

    /// The persisted state of a run. Never executes anything.
    pub fn outcome(&self, run_id: Uuid) -> Result<RunReport, PipelineError> {
        let run = self
            .runs
            .get_run(run_id)?
            .ok_or(PipelineError::RunNotFound { run_id })?;

        let report = match run.status {
            RunStatus::Completed => match self.extractions.get_extraction(run_id)? {
                Some(record) => match record.result() {
                    Ok(result) => RunReport::completed(run_id, result, record.avg_confidence),
                    Err(e) => RunReport {
                        error: Some(format!("Failed to deserialize result: {e}")),
                        ..RunReport::pending(run_id, RunStatus::Completed)
                    },
                },
                None => RunReport {
                    error: Some("No extraction stored for this run".to_string()),
                    ..RunReport::pending(run_id, RunStatus::Completed)
                },
            },
            RunStatus::Failed => RunReport::failed(run_id, run.error.unwrap_or_default()),
            status => RunReport::pending(run_id, status),
        };
        Ok(report)
    }

    /// Claim a `QUEUED` run and fail it immediately with `reason`, without
    /// running any stage. Used when a run cannot even start, e.g. its
    /// document has gone missing.
    pub fn reject(&self, run_id: Uuid, reason: &str) -> Result<RunReport, PipelineError> {
        let mut run = match self.runs.claim_run(run_id, Utc::now())? {
            Claim::Claimed(run) => run,
            Claim::NotFound => return Err(PipelineError::RunNotFound { run_id }),
            Claim::Unavailable(status) => return Err(PipelineError::RunNotQueued { run_id, status }),
        };
        run.fail(Utc::now(), reason)?;
        self.runs.save_run(&run)?;
        warn!("Run {} rejected: {}", run_id, reason);
        Ok(RunReport::failed(run_id, reason))
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}
