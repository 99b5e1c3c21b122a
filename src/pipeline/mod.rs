//! Pipeline stages for turning a document image into structured data.
//!
//! Each submodule implements exactly one step. Keeping stages separate makes
//! each independently testable and lets callers swap a collaborator (a
//! different OCR engine, a scripted LLM in tests) without touching the rest.
//!
//! ## Data Flow
//!
//! ```text
//! ocr ──▶ prompts ──▶ llm ──▶ sanitize ──▶ parse ──▶ confidence
//! (text)   (schema)   (raw)    (JSON obj)   (typed)    (mean)
//! ```
//!
//! 1. [`ocr`]: page-level word tokens with boxes and confidence
//! 2. [`crate::prompts`]: system instruction + OCR payload
//! 3. [`llm`]: one chat completion; the only stage with network I/O
//! 4. [`sanitize`]: strip fences, isolate the outermost `{…}`
//! 5. [`parse`]: tolerant decode into the result schema
//! 6. [`confidence`]: mean field confidence for the stored record

pub mod confidence;
pub mod llm;
pub mod ocr;
pub mod parse;
pub mod sanitize;
