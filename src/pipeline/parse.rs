//! Result parsing: decode sanitised model JSON into the result schema.
//!
//! Models drift. The same prompt yields `document_type`, `documentType` or
//! `DocumentType` depending on the day, and often adds keys nobody asked for.
//! Before decoding, every schema-level object (the top level, each page, each
//! field, each table) has its keys canonicalised to snake_case. Table row
//! keys are the document's own column names and are left alone. Unknown keys
//! are ignored.
//!
//! The parser never echoes IDs or timings back: the orchestrator owns those,
//! so [`ModelOutput`] only carries what the model is trusted to provide.

use crate::error::StructuringFailure;
use crate::model::{null_as_default, ExtractionResult, Field, Page, Table, DEFAULT_DOCUMENT_TYPE};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

/// The parts of a structured answer the model is trusted to provide.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelOutput {
    pub document_type: Option<String>,
    pub pages: Vec<Page>,
    pub warnings: Vec<String>,
}

impl ModelOutput {
    /// Stamp the caller's identity and timing onto the model's answer.
    ///
    /// Whatever IDs the model echoed are discarded; a null or blank document
    /// type becomes [`DEFAULT_DOCUMENT_TYPE`].
    pub fn into_result(self, file_id: Uuid, run_id: Uuid, processing_time_ms: u64) -> ExtractionResult {
        let document_type = self
            .document_type
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_DOCUMENT_TYPE.to_string());

        ExtractionResult {
            file_id,
            run_id,
            document_type,
            pages: self.pages,
            warnings: self.warnings,
            processing_time_ms,
        }
    }
}

#[derive(Deserialize)]
struct RawOutput {
    #[serde(default)]
    document_type: Option<String>,
    pages: Vec<RawPage>,
    #[serde(default, deserialize_with = "null_as_default")]
    warnings: Vec<String>,
}

#[derive(Deserialize)]
struct RawPage {
    /// Models emit `1`, `1.0` or `0`; anything but a whole number ≥ 1 is
    /// treated as absent.
    #[serde(default)]
    page: Option<f64>,
    #[serde(default, deserialize_with = "null_as_default")]
    fields: Vec<Field>,
    #[serde(default, deserialize_with = "null_as_default")]
    tables: Vec<Table>,
}

/// Decode sanitised JSON into a [`ModelOutput`].
///
/// # Errors
/// [`StructuringFailure::MalformedModelOutput`] when the text is not JSON,
/// the top level is not an object, `pages` is missing, or any value has the
/// wrong type.
pub fn parse_result(json: &str) -> Result<ModelOutput, StructuringFailure> {
    let value: Value = serde_json::from_str(json).map_err(|e| StructuringFailure::malformed(e.to_string()))?;

    let Value::Object(top) = value else {
        return Err(StructuringFailure::malformed("top-level value is not an object"));
    };
    let mut top = canonicalise_object(top);

    match top.get_mut("pages") {
        None => return Err(StructuringFailure::malformed("missing `pages`")),
        Some(Value::Array(pages)) => pages.iter_mut().for_each(canonicalise_page),
        // Wrong type: let serde produce the error message.
        Some(_) => {}
    }

    let raw: RawOutput =
        serde_json::from_value(Value::Object(top)).map_err(|e| StructuringFailure::malformed(e.to_string()))?;

    let pages = raw
        .pages
        .into_iter()
        .enumerate()
        .map(|(idx, p)| Page {
            page: p.page.and_then(ordinal).unwrap_or(idx as u32 + 1),
            fields: p.fields,
            tables: p.tables,
        })
        .collect();

    Ok(ModelOutput {
        document_type: raw.document_type,
        pages,
        warnings: raw.warnings,
    })
}

fn ordinal(n: f64) -> Option<u32> {
    (n.fract() == 0.0 && n >= 1.0 && n <= u32::MAX as f64).then_some(n as u32)
}

// ── Key canonicalisation ─────────────────────────────────────────────────

static RE_CAMEL_BOUNDARY: Lazy<Regex> = Lazy::new(|| Regex::new(r"([a-z0-9])([A-Z])").unwrap());

/// `fileId`, `FileID`, `FILE_ID`, `file-id` → `file_id`.
pub fn canonical_key(key: &str) -> String {
    RE_CAMEL_BOUNDARY
        .replace_all(key.trim(), "${1}_${2}")
        .to_ascii_lowercase()
        .replace(['-', ' '], "_")
}

fn canonicalise_object(map: Map<String, Value>) -> Map<String, Value> {
    map.into_iter().map(|(k, v)| (canonical_key(&k), v)).collect()
}

fn canonicalise_in_place(value: &mut Value) {
    if let Value::Object(map) = value {
        *map = canonicalise_object(std::mem::take(map));
    }
}

fn canonicalise_page(page: &mut Value) {
    canonicalise_in_place(page);
    let Value::Object(map) = page else { return };

    for key in ["fields", "tables"] {
        if let Some(Value::Array(items)) = map.get_mut(key) {
            items.iter_mut().for_each(canonicalise_in_place);
        }
    }
}
