//! Run and extraction data model.
//!
//! Two families of types live here:
//!
//! * **Run bookkeeping**: [`Run`], [`RunStatus`], [`FileRecord`],
//!   [`ExtractionRecord`]. These are what the stores persist.
//! * **The result schema**: [`ExtractionResult`] and its [`Page`], [`Field`]
//!   and [`Table`] parts. This is the wire contract consumed from the model
//!   and returned to callers, serialised with snake_case keys.
//!
//! Untyped model values are tagged unions ([`FieldValue`], [`CellValue`])
//! rather than `serde_json::Value`, so a field whose value is an object is a
//! decode error instead of something downstream code must guess about.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Document type used whenever the model does not name one.
pub const DEFAULT_DOCUMENT_TYPE: &str = "generic_form";

// ── Run state machine ────────────────────────────────────────────────────

/// Lifecycle of a run: `QUEUED → PROCESSING → COMPLETED | FAILED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "QUEUED",
            RunStatus::Processing => "PROCESSING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    /// Whether the pipeline may move a run from `self` to `next`.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Queued, RunStatus::Processing)
                | (RunStatus::Processing, RunStatus::Completed)
                | (RunStatus::Processing, RunStatus::Failed)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "QUEUED" => Ok(RunStatus::Queued),
            "PROCESSING" => Ok(RunStatus::Processing),
            "COMPLETED" => Ok(RunStatus::Completed),
            "FAILED" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status '{other}'")),
        }
    }
}

/// An illegal run status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Illegal run transition {from} -> {to}")]
pub struct TransitionError {
    pub from: RunStatus,
    pub to: RunStatus,
}

/// One end-to-end attempt to extract structured data from one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: Uuid,
    pub file_id: Uuid,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Run {
    /// A fresh `QUEUED` run for `file_id`.
    pub fn queued(file_id: Uuid) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            file_id,
            status: RunStatus::Queued,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    /// `QUEUED → PROCESSING`, stamping the start time.
    pub fn begin(&mut self, at: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(RunStatus::Processing)?;
        self.started_at = Some(at);
        Ok(())
    }

    /// `PROCESSING → COMPLETED`, stamping the completion time.
    pub fn complete(&mut self, at: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(RunStatus::Completed)?;
        self.completed_at = Some(at);
        Ok(())
    }

    /// `PROCESSING → FAILED`, recording the error message verbatim.
    pub fn fail(&mut self, at: DateTime<Utc>, error: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(RunStatus::Failed)?;
        self.completed_at = Some(at);
        self.error = Some(error.into());
        Ok(())
    }

    /// Administrative override: force a terminal run to `FAILED`.
    ///
    /// Used when an operator deletes a run's extraction. Bypasses the state
    /// machine but can never move a run back to `QUEUED` or `PROCESSING`.
    pub fn revoke(&mut self, reason: impl Into<String>) {
        self.status = RunStatus::Failed;
        self.error = Some(reason.into());
    }

    fn transition(&mut self, next: RunStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

// ── Persisted records ────────────────────────────────────────────────────

/// Metadata about an uploaded document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_id: Uuid,
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    /// Path of the stored copy, as handed to the OCR extractor.
    pub storage_uri: String,
    pub created_at: DateTime<Utc>,
}

/// The persisted outcome of a completed run. One per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRecord {
    pub run_id: Uuid,
    pub document_type: String,
    /// The [`ExtractionResult`] serialised as JSON.
    pub result_json: String,
    pub avg_confidence: f64,
    pub created_at: DateTime<Utc>,
}

impl ExtractionRecord {
    pub fn from_result(result: &ExtractionResult, avg_confidence: f64) -> Result<Self, serde_json::Error> {
        Ok(Self {
            run_id: result.run_id,
            document_type: result.document_type.clone(),
            result_json: serde_json::to_string(result)?,
            avg_confidence,
            created_at: Utc::now(),
        })
    }

    /// Decode the stored result.
    pub fn result(&self) -> Result<ExtractionResult, serde_json::Error> {
        serde_json::from_str(&self.result_json)
    }

    pub fn summary(&self) -> ExtractionSummary {
        ExtractionSummary {
            run_id: self.run_id,
            document_type: self.document_type.clone(),
            avg_confidence: self.avg_confidence,
            created_at: self.created_at,
        }
    }
}

/// One line of the extraction listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionSummary {
    pub run_id: Uuid,
    pub document_type: String,
    pub avg_confidence: f64,
    pub created_at: DateTime<Utc>,
}

/// The observable state of a run: what a caller polling it gets back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub result: Option<ExtractionResult>,
    pub error: Option<String>,
    pub avg_confidence: Option<f64>,
}

impl RunReport {
    pub fn completed(run_id: Uuid, result: ExtractionResult, avg_confidence: f64) -> Self {
        Self {
            run_id,
            status: RunStatus::Completed,
            result: Some(result),
            error: None,
            avg_confidence: Some(avg_confidence),
        }
    }

    pub fn failed(run_id: Uuid, error: impl Into<String>) -> Self {
        Self {
            run_id,
            status: RunStatus::Failed,
            result: None,
            error: Some(error.into()),
            avg_confidence: None,
        }
    }

    /// A run that has no outcome yet (`QUEUED` or `PROCESSING`).
    pub fn pending(run_id: Uuid, status: RunStatus) -> Self {
        Self {
            run_id,
            status,
            result: None,
            error: None,
            avg_confidence: None,
        }
    }
}

// ── Result schema ────────────────────────────────────────────────────────

/// Structured fields and tables extracted from one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub file_id: Uuid,
    pub run_id: Uuid,
    pub document_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub pages: Vec<Page>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub processing_time_ms: u64,
}

impl ExtractionResult {
    /// The empty-but-valid result produced when structuring could not finish.
    pub fn fallback(file_id: Uuid, run_id: Uuid, warning: impl Into<String>, processing_time_ms: u64) -> Self {
        Self {
            file_id,
            run_id,
            document_type: DEFAULT_DOCUMENT_TYPE.to_string(),
            pages: Vec::new(),
            warnings: vec![warning.into()],
            processing_time_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// 1-based page ordinal.
    pub page: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub fields: Vec<Field>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tables: Vec<Table>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default)]
    pub value: FieldValue,
    #[serde(default)]
    pub confidence: Option<f64>,
    /// Bounding box `[x, y, w, h]`. Carried through, never interpreted.
    #[serde(default)]
    pub bbox: Option<[f64; 4]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub rows: Vec<BTreeMap<String, CellValue>>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// A scalar field value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    #[default]
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

impl FieldValue {
    /// Plain-text rendering used by exports. `Null` renders as empty.
    pub fn as_text(&self) -> String {
        match self {
            FieldValue::Null => String::new(),
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Number(n) => n.to_string(),
            FieldValue::Text(s) => s.clone(),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

/// A table cell: a scalar, or a nested list/map when the model groups data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
    List(Vec<CellValue>),
    Map(BTreeMap<String, CellValue>),
}

/// Decode `null` the same as a missing key.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_are_monotonic() {
        use RunStatus::*;
        assert!(Queued.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));

        assert!(!Queued.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Failed.can_transition_to(Queued));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Processing.can_transition_to(Queued));
    }

    #[test]
    fn run_lifecycle_stamps_times() {
        let mut run = Run::queued(Uuid::new_v4());
        let t0 = Utc::now();
        run.begin(t0).unwrap();
        assert_eq!(run.status, RunStatus::Processing);
        assert_eq!(run.started_at, Some(t0));

        run.fail(t0, "Tesseract OCR failed: boom").unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.as_deref(), Some("Tesseract OCR failed: boom"));
        assert!(run.completed_at.is_some());

        let err = run.begin(t0).unwrap_err();
        assert_eq!(err.from, RunStatus::Failed);
        assert_eq!(err.to, RunStatus::Processing);
    }

    #[test]
    fn revoke_only_moves_to_failed() {
        let mut run = Run::queued(Uuid::new_v4());
        run.begin(Utc::now()).unwrap();
        run.complete(Utc::now()).unwrap();
        run.revoke("Extraction manually deleted");
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.status.is_terminal());
    }

    #[test]
    fn status_serialises_uppercase() {
        let json = serde_json::to_string(&RunStatus::Processing).unwrap();
        assert_eq!(json, "\"PROCESSING\"");
        assert_eq!("completed".parse::<RunStatus>().unwrap(), RunStatus::Completed);
        assert!("DONE".parse::<RunStatus>().is_err());
    }

    #[test]
    fn field_value_decodes_scalars() {
        let fields: Vec<Field> = serde_json::from_str(
            r#"[
                {"name": "total", "value": 12.5, "confidence": 0.9},
                {"name": "paid", "value": true},
                {"name": "vendor", "value": "ACME"},
                {"name": "notes", "value": null},
                {"name": "missing"}
            ]"#,
        )
        .unwrap();
        assert!(matches!(fields[0].value, FieldValue::Number(_)));
        assert_eq!(fields[1].value, FieldValue::Bool(true));
        assert_eq!(fields[2].value, FieldValue::Text("ACME".into()));
        assert_eq!(fields[3].value, FieldValue::Null);
        assert_eq!(fields[4].value, FieldValue::Null);
        assert_eq!(fields[4].confidence, None);
        assert_eq!(fields[4].bbox, None);
    }

    #[test]
    fn field_value_rejects_objects() {
        let r: Result<Field, _> = serde_json::from_str(r#"{"name": "x", "value": {"a": 1}}"#);
        assert!(r.is_err());
    }

    #[test]
    fn table_rows_accept_nested_cells() {
        let table: Table = serde_json::from_str(
            r#"{"name": "items", "rows": [{"sku": "A1", "qty": 2, "tags": ["x", "y"], "dims": {"w": 1}}]}"#,
        )
        .unwrap();
        let row = &table.rows[0];
        assert_eq!(row["sku"], CellValue::Text("A1".into()));
        assert!(matches!(row["tags"], CellValue::List(_)));
        assert!(matches!(row["dims"], CellValue::Map(_)));
        assert_eq!(table.confidence, None);
    }

    #[test]
    fn null_collections_decode_as_empty() {
        let page: Page = serde_json::from_str(r#"{"page": 2, "fields": null, "tables": null}"#).unwrap();
        assert_eq!(page.page, 2);
        assert!(page.fields.is_empty());
        assert!(page.tables.is_empty());
    }

    #[test]
    fn fallback_result_shape() {
        let (f, r) = (Uuid::new_v4(), Uuid::new_v4());
        let result = ExtractionResult::fallback(f, r, "LLM returned invalid JSON", 42);
        assert_eq!(result.document_type, DEFAULT_DOCUMENT_TYPE);
        assert!(result.pages.is_empty());
        assert_eq!(result.warnings, vec!["LLM returned invalid JSON".to_string()]);
        assert_eq!(result.processing_time_ms, 42);
        assert_eq!((result.file_id, result.run_id), (f, r));
    }

    #[test]
    fn extraction_record_decodes_its_result() {
        let result = ExtractionResult::fallback(Uuid::new_v4(), Uuid::new_v4(), "w", 1);
        let record = ExtractionRecord::from_result(&result, 0.0).unwrap();
        assert_eq!(record.run_id, result.run_id);
        assert_eq!(record.result().unwrap(), result);
        assert_eq!(record.summary().document_type, DEFAULT_DOCUMENT_TYPE);
    }
}
