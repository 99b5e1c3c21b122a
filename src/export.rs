//! Render a stored result as CSV or JSON.

use crate::model::ExtractionResult;
use std::fmt;
use std::str::FromStr;

/// Supported export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv",
            ExportFormat::Json => "application/json",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => Err(format!("unsupported export format '{other}' (expected csv or json)")),
        }
    }
}

/// Header row of [`to_csv`].
pub const CSV_HEADER: &str = "page,field,value,confidence";

/// One line per field per page: `page,"name","value",confidence`.
///
/// Name and value are always quoted with embedded quotes doubled. A missing
/// confidence is an empty column. Tables are not part of the CSV view.
pub fn to_csv(result: &ExtractionResult) -> String {
    let mut out = String::from(CSV_HEADER);
    out.push('\n');

    for page in &result.pages {
        for field in &page.fields {
            let confidence = field.confidence.map(|c| c.to_string()).unwrap_or_default();
            out.push_str(&format!(
                "{},{},{},{}\n",
                page.page,
                quote(&field.name),
                quote(&field.value.as_text()),
                confidence
            ));
        }
    }
    out
}

/// Pretty-printed JSON in the result wire schema.
pub fn to_json(result: &ExtractionResult) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(result)
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}
