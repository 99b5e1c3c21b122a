//! Application service: the operations a front end (the CLI) calls.
//!
//! [`ExtractionService`] wraps an [`Orchestrator`] with the surrounding
//! bookkeeping: storing uploads, queueing runs, the process-or-query
//! trigger, extraction CRUD and export. It owns no pipeline logic itself.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, ServiceError, StructuringFailure};
use crate::export::{to_csv, to_json, ExportFormat};
use crate::model::{ExtractionRecord, ExtractionResult, ExtractionSummary, FileRecord, Run, RunReport, RunStatus};
use crate::orchestrator::Orchestrator;
use crate::pipeline::confidence::aggregate_confidence;
use crate::pipeline::llm::LlmClient;
use crate::pipeline::ocr::OcrExtractor;
use crate::pipeline::parse::parse_result;
use crate::progress::ProgressCallback;
use crate::storage::DocumentStorage;
use crate::store::{ExtractionStore, FileStore, RunStore};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Error text recorded on a run whose document record is gone.
pub const FILE_NOT_FOUND: &str = "File not found";

/// Error text recorded on a run whose extraction was deleted by an operator.
pub const EXTRACTION_DELETED: &str = "Extraction manually deleted";

/// IDs handed back by [`ExtractionService::upload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct UploadReceipt {
    pub file_id: Uuid,
    pub run_id: Uuid,
}

pub struct ExtractionService {
    orchestrator: Orchestrator,
    files: Arc<dyn FileStore>,
    storage: DocumentStorage,
}

impl ExtractionService {
    pub fn new(orchestrator: Orchestrator, files: Arc<dyn FileStore>, storage: DocumentStorage) -> Self {
        Self {
            orchestrator,
            files,
            storage,
        }
    }

    /// Wire a service where one backend serves runs, extractions and files.
    pub fn with_store<S>(
        store: Arc<S>,
        ocr: Arc<dyn OcrExtractor>,
        llm: Arc<dyn LlmClient>,
        config: PipelineConfig,
        storage: DocumentStorage,
    ) -> Self
    where
        S: RunStore + ExtractionStore + FileStore + 'static,
    {
        let orchestrator = Orchestrator::new(ocr, llm, store.clone(), store.clone(), config);
        Self::new(orchestrator, store, storage)
    }

    /// Report run progress to `progress`.
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.orchestrator = self.orchestrator.with_progress(progress);
        self
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    fn runs(&self) -> &Arc<dyn RunStore> {
        self.orchestrator.runs()
    }

    fn extractions(&self) -> &Arc<dyn ExtractionStore> {
        self.orchestrator.extractions()
    }

    // ── Upload ───────────────────────────────────────────────────────────

    /// Copy a local document into storage and queue a run for it.
    pub async fn upload(&self, source: impl AsRef<Path>) -> Result<UploadReceipt, ServiceError> {
        let source = source.as_ref();
        if !source.exists() {
            return Err(ServiceError::SourceNotFound {
                path: source.to_path_buf(),
            });
        }
        let bytes = tokio::fs::read(source)
            .await
            .map_err(|e| ServiceError::SourceUnreadable {
                path: source.to_path_buf(),
                source: e,
            })?;
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        self.upload_bytes(&bytes, &name).await
    }

    /// Store `bytes` as a new document named `original_name` and queue a run.
    pub async fn upload_bytes(&self, bytes: &[u8], original_name: &str) -> Result<UploadReceipt, ServiceError> {
        let file_id = Uuid::new_v4();
        let stored = self.storage.store_bytes(bytes, original_name, file_id).await?;

        self.files.save_file(&FileRecord {
            file_id,
            name: stored.name,
            mime_type: stored.mime_type,
            size: stored.size,
            storage_uri: stored.path.to_string_lossy().into_owned(),
            created_at: Utc::now(),
        })?;

        let run = Run::queued(file_id);
        let run_id = run.run_id;
        self.runs().save_run(&run)?;

        info!(%file_id, %run_id, "Queued run for {}", stored.path.display());
        Ok(UploadReceipt { file_id, run_id })
    }

    // ── Processing ───────────────────────────────────────────────────────

    /// Process the run if it is still `QUEUED`; otherwise report its state.
    ///
    /// Pipeline failures come back as a `FAILED` report rather than an
    /// error, because the failure is the run's outcome.
    pub async fn process(&self, run_id: Uuid) -> Result<RunReport, ServiceError> {
        let run = self
            .runs()
            .get_run(run_id)?
            .ok_or(ServiceError::RunNotFound { run_id })?;

        if run.status != RunStatus::Queued {
            return Ok(self.orchestrator.outcome(run_id)?);
        }

        let Some(file) = self.files.get_file(run.file_id)? else {
            warn!(%run_id, file_id = %run.file_id, "Document record missing");
            return self.settle(run_id, self.orchestrator.reject(run_id, FILE_NOT_FOUND));
        };

        let path = PathBuf::from(&file.storage_uri);
        match self.orchestrator.run(file.file_id, run_id, &path).await {
            Ok(result) => {
                let avg = aggregate_confidence(Some(&result));
                Ok(RunReport::completed(run_id, result, avg))
            }
            Err(e) => self.settle(run_id, Err(e)),
        }
    }

    /// Map a pipeline outcome onto a report. Losing a claim race is not an
    /// error: whoever won owns the run, so report its current state.
    fn settle(&self, run_id: Uuid, outcome: Result<RunReport, PipelineError>) -> Result<RunReport, ServiceError> {
        match outcome {
            Ok(report) => Ok(report),
            Err(PipelineError::RunNotQueued { .. }) => Ok(self.orchestrator.outcome(run_id)?),
            Err(PipelineError::RunNotFound { run_id }) => Err(ServiceError::RunNotFound { run_id }),
            Err(e) => Ok(RunReport::failed(run_id, e.to_string())),
        }
    }

    /// The persisted state of a run. Never runs the pipeline.
    pub fn outcome(&self, run_id: Uuid) -> Result<RunReport, ServiceError> {
        self.orchestrator.outcome(run_id).map_err(|e| match e {
            PipelineError::RunNotFound { run_id } => ServiceError::RunNotFound { run_id },
            other => ServiceError::Pipeline(other),
        })
    }

    pub fn get_run(&self, run_id: Uuid) -> Result<Run, ServiceError> {
        self.runs()
            .get_run(run_id)?
            .ok_or(ServiceError::RunNotFound { run_id })
    }

    // ── Extraction CRUD ──────────────────────────────────────────────────

    /// Stored extractions, newest first.
    pub fn list_extractions(&self) -> Result<Vec<ExtractionSummary>, ServiceError> {
        Ok(self
            .extractions()
            .list_extractions()?
            .iter()
            .map(ExtractionRecord::summary)
            .collect())
    }

    pub fn get_extraction(&self, run_id: Uuid) -> Result<ExtractionResult, ServiceError> {
        Ok(self.record(run_id)?.result()?)
    }

    /// Replace the stored result for `run_id`.
    ///
    /// The result's IDs are reset to the run's, and the document type and
    /// average confidence are recomputed from the new content.
    pub fn update_extraction(&self, run_id: Uuid, mut result: ExtractionResult) -> Result<ExtractionResult, ServiceError> {
        let existing = self.record(run_id)?;
        let run = self.get_run(run_id)?;

        result.run_id = run_id;
        result.file_id = run.file_id;

        let mut record = ExtractionRecord::from_result(&result, aggregate_confidence(Some(&result)))?;
        record.created_at = existing.created_at;
        self.extractions().save_extraction(&record)?;

        info!(%run_id, avg_confidence = record.avg_confidence, "Extraction updated");
        Ok(result)
    }

    /// Replace the stored result with a hand-edited JSON document.
    ///
    /// The text is decoded as leniently as a model answer: IDs and timing
    /// may be omitted and keys may be camelCase. The stored processing time
    /// is kept.
    pub fn update_extraction_json(&self, run_id: Uuid, json: &str) -> Result<ExtractionResult, ServiceError> {
        let processing_time_ms = self
            .record(run_id)?
            .result()
            .map(|r| r.processing_time_ms)
            .unwrap_or_default();

        let output = parse_result(json).map_err(|failure| ServiceError::InvalidResult {
            detail: match failure {
                StructuringFailure::MalformedModelOutput { detail } => detail,
                other => other.to_string(),
            },
        })?;

        self.update_extraction(run_id, output.into_result(Uuid::nil(), run_id, processing_time_ms))
    }

    /// Delete the stored result and mark its run `FAILED`.
    pub fn delete_extraction(&self, run_id: Uuid) -> Result<(), ServiceError> {
        self.record(run_id)?;

        if let Some(mut run) = self.runs().get_run(run_id)? {
            run.revoke(EXTRACTION_DELETED);
            self.runs().save_run(&run)?;
        }
        self.extractions().delete_extraction(run_id)?;

        info!(%run_id, "Extraction deleted");
        Ok(())
    }

    // ── Export ───────────────────────────────────────────────────────────

    pub fn export(&self, run_id: Uuid, format: ExportFormat) -> Result<String, ServiceError> {
        let result = self.get_extraction(run_id)?;
        Ok(match format {
            ExportFormat::Csv => to_csv(&result),
            ExportFormat::Json => to_json(&result)?,
        })
    }

    /// Recompute the mean confidence from the stored JSON.
    ///
    /// `None` when nothing is stored; `Some(0.0)` when the stored JSON no
    /// longer decodes.
    pub fn average_confidence(&self, run_id: Uuid) -> Result<Option<f64>, ServiceError> {
        let Some(record) = self.extractions().get_extraction(run_id)? else {
            return Ok(None);
        };
        Ok(Some(match record.result() {
            Ok(result) => aggregate_confidence(Some(&result)),
            Err(e) => {
                warn!(%run_id, "Stored result does not decode: {}", e);
                0.0
            }
        }))
    }

    fn record(&self, run_id: Uuid) -> Result<ExtractionRecord, ServiceError> {
        self.extractions()
            .get_extraction(run_id)?
            .ok_or(ServiceError::ExtractionNotFound { run_id })
    }
}
