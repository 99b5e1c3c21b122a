//! Error types for the edgequake-docstruct library.
//!
//! The split mirrors the two ways a run can go wrong:
//!
//! * [`PipelineError`] is **fatal**: the run cannot produce an artifact (OCR
//!   failed, the database rejected a write, the run was not claimable).
//!   Returned as `Err(PipelineError)` from
//!   [`crate::orchestrator::Orchestrator::run`]; the run is left `FAILED`.
//!
//! * [`StructuringFailure`] is **non-fatal**: the model answered badly or not
//!   at all. Absorbed by the fallback policy into a `COMPLETED` run whose
//!   result carries the failure's text as a warning.
//!
//! Collaborator errors ([`OcrError`], [`LlmError`], [`StoreError`]) and the
//! application-level [`ServiceError`] live here too so every layer shares one
//! vocabulary.

use crate::model::{RunStatus, TransitionError};
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// All fatal errors returned by the run orchestrator.
///
/// The `Display` text of the error is what gets recorded verbatim in the
/// run's `error` column, so variants that wrap a collaborator error are
/// `transparent`.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Run lifecycle ─────────────────────────────────────────────────────
    /// No run with this ID exists in the run store.
    #[error("Run {run_id} not found")]
    RunNotFound { run_id: Uuid },

    /// The run was not `QUEUED` when we tried to claim it, so another
    /// invocation owns (or already finished) it.
    #[error("Run {run_id} is {status}; only QUEUED runs can be processed")]
    RunNotQueued { run_id: Uuid, status: RunStatus },

    /// A state transition the run state machine does not allow.
    #[error(transparent)]
    Transition(#[from] TransitionError),

    // ── Stage failures ────────────────────────────────────────────────────
    /// OCR could not process the document. Never falls back.
    #[error(transparent)]
    Ocr(#[from] OcrError),

    /// Structuring failed and the fallback policy says to fail the run.
    #[error(transparent)]
    Structuring(StructuringFailure),

    /// Reading or writing run/extraction records failed.
    #[error(transparent)]
    Persistence(#[from] StoreError),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Anything else; the message is recorded on the run as-is.
    #[error("{0}")]
    Unexpected(String),
}

/// A non-fatal structuring failure.
///
/// The `Display` text is the exact warning placed in the fallback result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuringFailure {
    /// The LLM call failed, timed out, or returned nothing but whitespace.
    #[error("LLM returned null or empty response")]
    LlmUnavailable,

    /// The response could not be decoded into the result schema.
    ///
    /// `detail` is for logs only; it is not part of the warning text.
    #[error("LLM returned invalid JSON")]
    MalformedModelOutput { detail: String },
}

impl StructuringFailure {
    /// The human-readable warning stored in a fallback result.
    pub fn warning(&self) -> String {
        self.to_string()
    }

    pub(crate) fn malformed(detail: impl Into<String>) -> Self {
        StructuringFailure::MalformedModelOutput {
            detail: detail.into(),
        }
    }
}

/// Errors raised by an OCR extractor.
#[derive(Debug, Error)]
pub enum OcrError {
    /// The language data the engine needs is missing.
    #[error("Tesseract traineddata not found: '{path}'\nSet TESSDATA_PATH or mount tessdata.")]
    TessdataNotFound { path: PathBuf },

    /// The document to OCR does not exist.
    #[error("Document not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// The document exists but is not a decodable image.
    #[error("Document '{path}' is not a readable image: {detail}")]
    UnreadableImage { path: PathBuf, detail: String },

    /// The OCR binary could not be started at all.
    #[error("Could not start OCR engine '{binary}': {source}\nIs tesseract installed and on PATH?")]
    EngineUnavailable {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    /// The OCR engine ran and reported failure.
    #[error("Tesseract OCR failed: {detail}")]
    EngineFailed { detail: String },

    /// Unexpected internal error (e.g. a blocking task panicked).
    #[error("OCR internal error: {0}")]
    Internal(String),
}

/// Errors raised by an LLM client adapter.
///
/// The orchestrator treats every variant identically (output absent); the
/// distinction only matters for logs.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The provider returned an error.
    #[error("LLM API error: {message}")]
    Api { message: String },

    /// The call exceeded the configured timeout.
    #[error("LLM call timed out after {secs}s")]
    Timeout { secs: u64 },
}

/// Errors raised by the run / extraction / file stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row could not be mapped back into a record.
    #[error("Corrupt {table} record: {detail}")]
    CorruptRecord { table: &'static str, detail: String },

    /// A previous writer panicked while holding the store lock.
    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// Errors returned by [`crate::service::ExtractionService`].
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Upload source path does not exist.
    #[error("Document not found: '{path}'\nCheck the path exists and is readable.")]
    SourceNotFound { path: PathBuf },

    /// Upload source exists but could not be read.
    #[error("Failed to read '{path}': {source}")]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not write the uploaded document into the storage directory.
    #[error("Failed to store document at '{path}': {source}")]
    StorageWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Run {run_id} not found")]
    RunNotFound { run_id: Uuid },

    #[error("No extraction stored for run {run_id}")]
    ExtractionNotFound { run_id: Uuid },

    /// An edited result could not be decoded into the result schema.
    #[error("Invalid extraction result: {detail}")]
    InvalidResult { detail: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
