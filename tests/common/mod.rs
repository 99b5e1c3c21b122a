//! Scripted collaborators shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use edgequake_docstruct::{CompletionSettings, LlmClient, LlmError, OcrError, OcrExtractor, OcrPage, OcrToken};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// Route library logs through the test harness. `RUST_LOG=debug` shows them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// OCR double: returns fixed pages (or a fixed failure) and counts calls.
pub struct ScriptedOcr {
    outcome: Result<Vec<OcrPage>, String>,
    calls: AtomicUsize,
    seen: Mutex<Vec<PathBuf>>,
}

impl ScriptedOcr {
    pub fn pages(pages: Vec<OcrPage>) -> Self {
        Self {
            outcome: Ok(pages),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// One page with a couple of invoice words on it.
    pub fn invoice() -> Self {
        Self::pages(vec![OcrPage {
            page: 1,
            tokens: vec![
                OcrToken::text_only("INVOICE", Some(0.97)),
                OcrToken::text_only("INV-1001", Some(0.91)),
                OcrToken::text_only("Total: 120.50", None),
            ],
            metadata: BTreeMap::new(),
        }])
    }

    /// Fails every call with `Tesseract OCR failed: <detail>`.
    pub fn failing(detail: &str) -> Self {
        Self {
            outcome: Err(detail.to_string()),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen_paths(&self) -> Vec<PathBuf> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl OcrExtractor for ScriptedOcr {
    async fn extract(&self, path: &Path) -> Result<Vec<OcrPage>, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(path.to_path_buf());
        match &self.outcome {
            Ok(pages) => Ok(pages.clone()),
            Err(detail) => Err(OcrError::EngineFailed { detail: detail.clone() }),
        }
    }
}

/// LLM double: returns a fixed answer (or error), records prompts, counts calls.
pub struct ScriptedLlm {
    answer: Result<String, LlmError>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<(String, String, CompletionSettings)>>,
}

impl ScriptedLlm {
    pub fn answering(text: &str) -> Self {
        Self::with(Ok(text.to_string()))
    }

    pub fn failing() -> Self {
        Self::with(Err(LlmError::Api {
            message: "503 Service Unavailable".to_string(),
        }))
    }

    fn with(answer: Result<String, LlmError>) -> Self {
        Self {
            answer,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// `(system, user, settings)` of every call so far.
    pub fn prompts(&self) -> Vec<(String, String, CompletionSettings)> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, system: &str, user: &str, settings: &CompletionSettings) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .unwrap()
            .push((system.to_string(), user.to_string(), *settings));
        self.answer.clone()
    }
}

/// A well-formed model answer that echoes the wrong IDs.
pub const INVOICE_ANSWER: &str = r#"{
  "file_id": "00000000-0000-0000-0000-000000000000",
  "run_id": "not-even-a-uuid",
  "document_type": "invoice",
  "pages": [
    {
      "page": 1,
      "fields": [
        {"name": "invoice_number", "value": "INV-1001", "confidence": 0.9},
        {"name": "total", "value": 120.5, "confidence": 0.8},
        {"name": "notes", "value": null}
      ],
      "tables": []
    }
  ],
  "warnings": [],
  "processing_time_ms": 1
}"#;
