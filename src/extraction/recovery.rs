//! Recovery of a structured result from raw model output.
//!
//! Models wrap JSON in chatter, code fences, or stop mid-object. Recovery
//! decodes the first JSON object in the text and, if that fails, makes one
//! repair attempt that closes a truncated object. It never fails: the outcome
//! is always one of [`Recovery`]'s variants.

use serde_json::{Map, Value};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum Recovery {
    /// A JSON object was decoded.
    Object(Map<String, Value>),
    /// The model answered with the literal `null`: nothing to extract.
    Null,
    /// Nothing usable could be decoded (MalformedResponse).
    Unparseable(String),
}

impl Recovery {
    pub fn into_object(self) -> Option<Map<String, Value>> {
        match self {
            Recovery::Object(map) => Some(map),
            _ => None,
        }
    }
}

pub fn recover(raw: &str) -> Recovery {
    let text = strip_markdown_fences(raw);

    let Some(start) = text.find('{') else {
        return if is_null_answer(text) {
            debug!("Model answered null");
            Recovery::Null
        } else {
            warn!("No JSON object found in model response");
            Recovery::Unparseable("no JSON object in response".to_string())
        };
    };

    let candidate = &text[start..];

    let first_error = match decode_leading_object(candidate) {
        Ok(value) => return into_recovery(value),
        Err(e) => e,
    };

    debug!("Leading object did not decode ({}), closing truncated object", first_error);
    let mut repaired = candidate.trim_end().to_string();
    repaired.push('}');

    match serde_json::from_str::<Value>(&repaired) {
        Ok(value) => {
            debug!("Truncation repair succeeded");
            into_recovery(value)
        }
        Err(e) => {
            warn!("Model response could not be decoded even after repair: {}", e);
            Recovery::Unparseable(format!("{first_error}; after repair: {e}"))
        }
    }
}

/// Decode the first complete JSON value at the start of `text`, ignoring
/// anything that follows it.
fn decode_leading_object(text: &str) -> Result<Value, serde_json::Error> {
    let mut stream = serde_json::Deserializer::from_str(text).into_iter::<Value>();
    match stream.next() {
        Some(result) => result,
        // The text starts with `{` so the stream always yields at least one item.
        None => serde_json::from_str(text),
    }
}

fn into_recovery(value: Value) -> Recovery {
    match value {
        Value::Object(map) => Recovery::Object(map),
        Value::Null => Recovery::Null,
        other => Recovery::Unparseable(format!("expected a JSON object, found {other}")),
    }
}

fn is_null_answer(text: &str) -> bool {
    let lowered = text.trim().to_ascii_lowercase();
    lowered == "null"
        || lowered
            .split(|c: char| c.is_whitespace() || c == '.' || c == '`')
            .find(|token| !token.is_empty())
            == Some("null")
}

fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    body.strip_suffix("```").unwrap_or(body).trim()
}
