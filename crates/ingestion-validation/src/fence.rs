use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::ValidationError;

const FENCE: &str = "```";

fn fence_opening() -> &'static Regex {
    static OPENING: OnceLock<Regex> = OnceLock::new();
    OPENING.get_or_init(|| Regex::new(r"\A```[A-Za-z0-9_+.\-]*").expect("static fence pattern"))
}

fn embedded_object() -> &'static Regex {
    static OBJECT: OnceLock<Regex> = OnceLock::new();
    OBJECT.get_or_init(|| Regex::new(r"(?s)\{.*\}").expect("static object pattern"))
}

/// Trim `raw` and remove a surrounding code fence, with or without a language
/// tag. Text without a complete fence is returned trimmed.
#[must_use]
pub fn strip_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(opening) = fence_opening().find(trimmed) else {
        return trimmed;
    };
    let body = &trimmed[opening.end()..];
    match body.rfind(FENCE) {
        Some(closing) => body[..closing].trim(),
        None => trimmed,
    }
}

/// Decode the structured document carried by `raw`.
///
/// Falls back to the outermost `{ ... }` span when the model wrapped the
/// document in prose.
pub fn decode_payload(raw: &str) -> Result<Value, ValidationError> {
    let body = strip_fence(raw);
    if body.is_empty() {
        return Err(ValidationError::MalformedResponse("empty response".into()));
    }
    match serde_json::from_str::<Value>(body) {
        Ok(value) => Ok(value),
        Err(err) => embedded_object()
            .find(body)
            .and_then(|object| serde_json::from_str::<Value>(object.as_str()).ok())
            .ok_or_else(|| {
                ValidationError::MalformedResponse(format!("response is not a json document: {err}"))
            }),
    }
}
