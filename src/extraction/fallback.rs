//! Rule-based backstop used when the inference path fails.

use tracing::{debug, info};

use super::models::{ExtractedFinding, ServiceCategory, TaskKind};

/// Scanned in order; the first keyword found wins.
pub const ATM_KEYWORDS: [&str; 7] = [
    "receipt",
    "transaction",
    "not working",
    "card",
    "cash",
    "money",
    "stuck",
];

pub const FALLBACK_CONFIDENCE: f64 = 0.75;

/// Synthesise a finding from keywords in the review text.
///
/// Only runs for the issue task of the ATM category. Returns `None` when the
/// scope does not apply or no keyword matches.
pub fn detect(kind: TaskKind, category: ServiceCategory, review_text: &str) -> Option<ExtractedFinding> {
    if kind.fallback_category() != Some(category) {
        debug!("Keyword fallback not applicable to {} / {}", kind.label(), category);
        return None;
    }

    let lowered = review_text.to_lowercase();
    let keyword = ATM_KEYWORDS.iter().find(|k| lowered.contains(*k))?;

    info!(keyword = %keyword, "Keyword fallback matched");

    Some(ExtractedFinding {
        title: format!("ATM {} Issue", capitalize_first(keyword)),
        titles: Vec::new(),
        description: format!("Customer reported an issue related to {keyword} at the ATM."),
        category: ServiceCategory::Atm,
        confidence_score: FALLBACK_CONFIDENCE,
        resolution: Some(format!(
            "Check ATM for issues related to {keyword}. Verify transaction status. Contact customer. Schedule maintenance if required."
        )),
    })
}

fn capitalize_first(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
