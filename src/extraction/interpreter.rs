//! Turns a recovered JSON object into per-title candidates.

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use super::models::{Candidate, ExtractedFinding, ServiceCategory};

const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Longest title kept per candidate, counted in characters.
pub const MAX_TITLE_CHARS: usize = 255;

#[derive(Debug, Error, PartialEq)]
pub enum MalformedResult {
    #[error("result has no usable title")]
    MissingTitle,
    #[error("field '{field}' has an unexpected type")]
    WrongType { field: &'static str },
}

/// Normalise a model result and split it into candidates.
///
/// Titles are read from the `titles` array when it is present and non-empty,
/// otherwise from the legacy comma-joined `title` string. Segments are
/// trimmed, empty ones dropped, order kept, and repeated titles within one
/// result are not collapsed.
pub fn interpret(
    object: &Map<String, Value>,
    default_category: ServiceCategory,
) -> Result<(ExtractedFinding, Vec<Candidate>), MalformedResult> {
    let titles = read_titles(object)?;
    if titles.is_empty() {
        return Err(MalformedResult::MissingTitle);
    }

    let description = optional_string(object, "description")?.unwrap_or_default();
    let resolution = optional_string(object, "resolution")?.filter(|r| !r.trim().is_empty());

    let category = match optional_string(object, "category")? {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(
                "Unknown category '{}' in result, using feedback category {}",
                raw, default_category
            );
            default_category
        }),
        None => default_category,
    };

    let confidence_score = read_confidence(object.get("confidence_score"));

    let finding = ExtractedFinding {
        title: titles.join(", "),
        titles: titles.clone(),
        description: description.clone(),
        category,
        confidence_score,
        resolution: resolution.clone(),
    };

    let candidates = titles
        .into_iter()
        .map(|title| Candidate {
            title,
            description: description.clone(),
            category,
            confidence_score,
            resolution: resolution.clone(),
        })
        .collect();

    Ok((finding, candidates))
}

/// Split an already normalised finding (e.g. one synthesised by the keyword
/// fallback) into candidates.
pub fn candidates_of(finding: &ExtractedFinding) -> Vec<Candidate> {
    let titles = if finding.titles.is_empty() {
        split_titles(&finding.title)
    } else {
        finding.titles.clone()
    };

    titles
        .into_iter()
        .map(|title| Candidate {
            title,
            description: finding.description.clone(),
            category: finding.category,
            confidence_score: finding.confidence_score,
            resolution: finding.resolution.clone(),
        })
        .collect()
}

fn read_titles(object: &Map<String, Value>) -> Result<Vec<String>, MalformedResult> {
    if let Some(value) = object.get("titles") {
        match value {
            Value::Array(items) => {
                let titles: Vec<String> = items
                    .iter()
                    .filter_map(Value::as_str)
                    .filter_map(clip_title)
                    .collect();
                if !titles.is_empty() {
                    return Ok(titles);
                }
            }
            Value::String(joined) => {
                let titles = split_titles(joined);
                if !titles.is_empty() {
                    return Ok(titles);
                }
            }
            Value::Null => {}
            _ => return Err(MalformedResult::WrongType { field: "titles" }),
        }
    }

    match object.get("title") {
        Some(Value::String(joined)) => Ok(split_titles(joined)),
        Some(Value::Null) | None => Ok(Vec::new()),
        Some(_) => Err(MalformedResult::WrongType { field: "title" }),
    }
}

fn split_titles(joined: &str) -> Vec<String> {
    joined.split(',').filter_map(clip_title).collect()
}

/// Trimmed title cut to `MAX_TITLE_CHARS`, or `None` when blank.
fn clip_title(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.chars().count() <= MAX_TITLE_CHARS {
        return Some(trimmed.to_string());
    }
    let clipped: String = trimmed.chars().take(MAX_TITLE_CHARS).collect();
    Some(clipped.trim_end().to_string())
}

fn optional_string(
    object: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<String>, MalformedResult> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(Value::Array(items)) => Ok(Some(
            items
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(" "),
        )),
        Some(_) => Err(MalformedResult::WrongType { field }),
    }
}

fn read_confidence(value: Option<&Value>) -> f64 {
    let raw = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match raw {
        Some(score) if score.is_finite() => score.clamp(0.0, 1.0),
        _ => DEFAULT_CONFIDENCE,
    }
}
