//! Prompts for the structuring call.
//!
//! Everything the model is told lives here so prompt changes never touch
//! the retry or parsing code, and tests can assert on the exact text sent.
//! Callers can replace the system instruction through
//! [`crate::config::PipelineConfig::system_prompt`]; the OCR payload framing
//! is fixed.

use crate::pipeline::ocr::OcrPage;
use serde::Serialize;

/// Default system instruction: the result schema and the output rules.
pub const STRUCTURING_SYSTEM_PROMPT: &str = r#"You extract structured data from OCR output of a scanned document.

Reply with a single JSON object and nothing else. No prose, no markdown fences, no comments.

The object must have exactly this shape:

{
  "file_id": string,
  "run_id": string,
  "document_type": string,
  "pages": [
    {
      "page": number,
      "fields": [
        {"name": string, "value": string | number | boolean | null, "confidence": number}
      ],
      "tables": [
        {"name": string, "rows": [ {"<column>": value} ], "confidence": number}
      ]
    }
  ],
  "warnings": [string],
  "processing_time_ms": number
}

Rules:
- One entry in "pages" per OCR page, in the same order.
- Copy values as printed. Do not invent, infer or normalise them.
- "confidence" is your certainty between 0 and 1 for that field or table.
- Leave "tables" empty when the page has no tabular data.
- Report anything illegible or ambiguous in "warnings"."#;

/// Prefix of the user message; the serialised OCR pages follow it.
pub const OCR_PAYLOAD_PREFIX: &str = "OCR_DATA:\n";

/// The two messages sent for one structuring call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuringPrompt {
    pub system: String,
    pub user: String,
}

#[derive(Serialize)]
struct OcrPayload<'a> {
    pages: &'a [OcrPage],
}

/// `OCR_DATA:` followed by `{"pages": [...]}`.
pub fn build_user_message(pages: &[OcrPage]) -> Result<String, serde_json::Error> {
    let payload = serde_json::to_string(&OcrPayload { pages })?;
    Ok(format!("{OCR_PAYLOAD_PREFIX}{payload}"))
}

/// Assemble the prompt, using `system_override` in place of
/// [`STRUCTURING_SYSTEM_PROMPT`] when given.
pub fn build_prompt(pages: &[OcrPage], system_override: Option<&str>) -> Result<StructuringPrompt, serde_json::Error> {
    Ok(StructuringPrompt {
        system: system_override.unwrap_or(STRUCTURING_SYSTEM_PROMPT).to_string(),
        user: build_user_message(pages)?,
    })
}
