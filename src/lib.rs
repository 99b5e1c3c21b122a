//! # edgequake-docstruct
//!
//! Turn a scanned form, receipt or invoice into structured fields and tables
//! by chaining OCR and an LLM, and track every attempt as a **run**.
//!
//! ## Why this crate?
//!
//! OCR alone gives you words and boxes, not meaning. An LLM alone cannot see
//! a TIFF. Chaining them works, but the model's answer is free text: it may
//! be fenced, chatty, truncated or missing entirely. This crate owns that
//! seam: it sanitises and tolerantly parses the answer into a typed result,
//! degrades to an empty result with a warning when the answer is unusable,
//! and records the outcome against a run that moves through a strict state
//! machine.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload ─▶ run QUEUED
//!             │  claim (at most once)
//!             ▼
//!          PROCESSING
//!             ├─ 1. OCR        tesseract TSV → word tokens
//!             ├─ 2. Prompt     schema instruction + OCR_DATA payload
//!             ├─ 3. LLM        one chat completion, temperature 0
//!             ├─ 4. Sanitize   strip fences, isolate the JSON object
//!             ├─ 5. Parse      snake_case-tolerant decode
//!             └─ 6. Persist    result + mean confidence
//!             ▼
//!          COMPLETED  (or FAILED on OCR / storage errors)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_docstruct::{
//!     DocumentStorage, ExtractionService, PipelineConfig, ProviderClient, SqliteStore, TesseractOcr,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::default();
//!     let service = ExtractionService::with_store(
//!         Arc::new(SqliteStore::open("docstruct.db")?),
//!         Arc::new(TesseractOcr::from_config(&config)),
//!         Arc::new(ProviderClient::from_config(&config)?),
//!         config,
//!         DocumentStorage::new("uploads"),
//!     );
//!
//!     let receipt = service.upload("invoice.png").await?;
//!     let report = service.process(receipt.run_id).await?;
//!     println!("{:?}: {:?}", report.status, report.result);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docstruct` binary (clap + anyhow + indicatif + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod export;
pub mod model;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod service;
pub mod storage;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{FallbackPolicy, PipelineConfig, PipelineConfigBuilder, DEFAULT_FALLBACK_POLICY, DEFAULT_MODEL};
pub use error::{LlmError, OcrError, PipelineError, ServiceError, StoreError, StructuringFailure};
pub use export::{to_csv, to_json, ExportFormat};
pub use model::{
    CellValue, ExtractionRecord, ExtractionResult, ExtractionSummary, Field, FieldValue, FileRecord, Page, Run,
    RunReport, RunStatus, Table, DEFAULT_DOCUMENT_TYPE,
};
pub use orchestrator::Orchestrator;
pub use pipeline::confidence::aggregate_confidence;
pub use pipeline::llm::{CompletionSettings, LlmClient, ProviderClient, UnavailableClient};
pub use pipeline::ocr::{OcrExtractor, OcrPage, OcrToken, TesseractOcr};
pub use pipeline::parse::parse_result;
pub use pipeline::sanitize::sanitize;
pub use progress::{NoopProgressCallback, ProgressCallback, RunProgressCallback, Stage};
pub use service::{ExtractionService, UploadReceipt};
pub use storage::DocumentStorage;
pub use store::{Claim, ExtractionStore, FileStore, MemoryStore, RunStore, SqliteStore};
