//! Response sanitisation: recover a JSON object from chatty model output.
//!
//! Even with a "JSON only" instruction, models wrap their answer in
//! ```` ```json ```` fences or add a sentence before or after it. The rules
//! here are cheap and deterministic:
//!
//! 1. absent input becomes `{}`
//! 2. trim surrounding whitespace
//! 3. if the text opens with a fence, drop every ```` ```json ```` / ```` ``` ```` marker
//! 4. keep the span from the first `{` to the last `}` (inclusive), else `{}`
//!
//! Bracket balance is not checked. Braces inside string values balance
//! naturally in well-formed output, and anything else fails in the parser.

use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;

/// What the sanitiser returns when there is no object to recover.
pub const EMPTY_OBJECT: &str = "{}";

static RE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```(?:json)?").unwrap());

/// Isolate the JSON object substring of a raw model response.
pub fn sanitize(raw: Option<&str>) -> String {
    let Some(raw) = raw else {
        return EMPTY_OBJECT.to_string();
    };

    let text = strip_fences(raw.trim());

    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => text[start..=end].to_string(),
        _ => EMPTY_OBJECT.to_string(),
    }
}

fn strip_fences(text: &str) -> Cow<'_, str> {
    if text.starts_with("```") {
        Cow::Owned(RE_FENCE.replace_all(text, "").trim().to_string())
    } else {
        Cow::Borrowed(text)
    }
}
