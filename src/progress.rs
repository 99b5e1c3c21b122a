//! Progress-callback trait for run events.
//!
//! Attach an [`Arc<dyn RunProgressCallback>`] with
//! [`crate::orchestrator::Orchestrator::with_progress`] to observe a run as
//! it moves through OCR, structuring, parsing and persistence. The CLI uses
//! this to drive a spinner; a server could forward the events to a socket.
//!
//! # Example
//!
//! ```rust
//! use edgequake_docstruct::{RunProgressCallback, Stage};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! #[derive(Default)]
//! struct StageCounter(AtomicUsize);
//!
//! impl RunProgressCallback for StageCounter {
//!     fn on_stage_complete(&self, _stage: Stage, _elapsed_ms: u64) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//! ```

use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// A step of the run pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Ocr,
    Structuring,
    Parsing,
    Persisting,
}

impl Stage {
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Ocr => "OCR",
            Stage::Structuring => "LLM structuring",
            Stage::Parsing => "parsing",
            Stage::Persisting => "saving",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Called by the orchestrator as a run progresses.
///
/// All methods default to no-ops. Runs may execute on any tokio worker, so
/// implementations must be `Send + Sync`.
pub trait RunProgressCallback: Send + Sync {
    /// The run was claimed and is now `PROCESSING`.
    fn on_run_start(&self, run_id: Uuid) {
        let _ = run_id;
    }

    fn on_stage_start(&self, run_id: Uuid, stage: Stage) {
        let _ = (run_id, stage);
    }

    fn on_stage_complete(&self, stage: Stage, elapsed_ms: u64) {
        let _ = (stage, elapsed_ms);
    }

    /// Structuring failed and an empty result is being stored instead.
    ///
    /// `warning` is the text placed in the result's `warnings`.
    fn on_fallback(&self, run_id: Uuid, warning: &str) {
        let _ = (run_id, warning);
    }

    /// The run reached a terminal state. `error` is set when it `FAILED`.
    fn on_run_complete(&self, run_id: Uuid, error: Option<&str>) {
        let _ = (run_id, error);
    }
}

/// Does nothing. The default when no callback is attached.
pub struct NoopProgressCallback;

impl RunProgressCallback for NoopProgressCallback {}

pub type ProgressCallback = Arc<dyn RunProgressCallback>;
