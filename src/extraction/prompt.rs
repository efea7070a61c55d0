//! Prompt templates for the extraction and analysis tasks.
//!
//! Every builder is a pure function of its inputs so the same feedback always
//! produces the same prompt.

use super::models::{ServiceCategory, TaskKind};

/// Inputs common to all per-feedback prompts.
#[derive(Debug, Clone, Copy)]
pub struct PromptInput<'a> {
    pub review_text: &'a str,
    pub category: ServiceCategory,
    pub rating: i32,
}

pub fn build_extraction_prompt(input: PromptInput<'_>, kind: TaskKind) -> String {
    match kind {
        TaskKind::Issues => issue_prompt(input),
        TaskKind::PositiveAspects => positive_aspect_prompt(input),
    }
}

fn issue_prompt(input: PromptInput<'_>) -> String {
    format!(
        r#"<s>[INST] You are a banking issue detection expert. Analyze this customer feedback and determine if there is a legitimate operational issue.

Service: {category}
Rating: {rating}/5
Feedback: "{text}"

IMPORTANT:
- Only identify legitimate operational issues. Ignore general complaints or sentiments.
- Respond with a single JSON object even when there are several issues.
- List one short title per issue in the "titles" array. A title must not contain commas.
- Keep each title under 50 characters. The description should remain under 200 characters.

Examples of legitimate issues:
- ATM: "Machine ate my card" or "No cash dispensed" or "Receipt printer broken"
- OnlineBanking: "Cannot login" or "App crashes" or "Transaction failed"
- CoreBanking: "System down" or "Long waiting times due to technical issues"

If you find a legitimate issue (or more than one), respond with ONLY this JSON format:
{{
  "titles": ["Brief issue title", "Another issue title"],
  "description": "Detailed description covering all issues",
  "category": "{category}",
  "confidence_score": 0.85,
  "resolution": "Step-by-step resolution for bank staff"
}}

If no legitimate issue exists, respond with: null [/INST]"#,
        category = input.category,
        rating = input.rating,
        text = escape_control_chars(input.review_text),
    )
}

fn positive_aspect_prompt(input: PromptInput<'_>) -> String {
    format!(
        r#"<s>[INST] You are a banking feedback analysis expert. Analyze this customer feedback and detect if there are any positive operational aspects worth highlighting.

Service: {category}
Rating: {rating}/5
Feedback: "{text}"

IMPORTANT:
- Only identify positive operational aspects (e.g. fast service, smooth transaction, helpful UI). Ignore general appreciation.
- Respond with a single JSON object even when there are several aspects.
- List one short title per aspect in the "titles" array. A title must not contain commas.
- Keep each title under 50 characters. The description should stay under 200 characters.

Examples of positive aspects:
- ATM: "Quick cash withdrawal" or "Easy to use interface"
- OnlineBanking: "Login was fast" or "Smooth UPI transfer"
- CoreBanking: "Efficient staff support" or "Instant account update"

If you find a legitimate positive aspect (or more than one), respond with ONLY this JSON format:
{{
  "titles": ["Brief aspect title", "Another aspect title"],
  "description": "Detailed description covering all aspects",
  "category": "{category}",
  "confidence_score": 0.85
}}

If no positive aspect exists, respond with: null [/INST]"#,
        category = input.category,
        rating = input.rating,
        text = escape_control_chars(input.review_text),
    )
}

pub fn build_feedback_analysis_prompt(input: PromptInput<'_>) -> String {
    format!(
        r#"<s>[INST] You are a banking feedback analysis expert. Analyze this customer feedback:

Service: {category}
Rating: {rating}/5
Feedback: "{text}"

If the rating is 4 or 5, extract the positive comments and what the customer liked.
If the rating is 1-3, extract the core issue the customer is complaining about and suggest a resolution.

Respond in this JSON format:
{{
  "positive_comments": "Extracted positive comments (if rating >= 4)",
  "issue_description": "Core issue description (if rating <= 3)",
  "resolution": "Step-by-step resolution (if rating <= 3)"
}}

If no relevant information can be extracted, set the corresponding fields to null. [/INST]"#,
        category = input.category,
        rating = input.rating,
        text = escape_control_chars(input.review_text),
    )
}

pub fn build_enhanced_analysis_prompt(input: PromptInput<'_>, location: Option<&str>) -> String {
    format!(
        r#"<s>[INST] You are a banking feedback analysis expert. Analyze this customer feedback:

Service: {category}
Location: {location}
Rating: {rating}/5
Feedback: "{text}"

Provide a comprehensive analysis in this JSON format:
{{
  "sentiment_analysis": {{
    "sentiment": "positive/negative",
    "confidence_score": 0.0-1.0,
    "key_points": ["point1", "point2"]
  }},
  "issue_analysis": {{
    "core_issue": "description of the main issue",
    "category": "ATM/OnlineBanking/CoreBanking",
    "severity": "high/medium/low"
  }},
  "suggested_resolution": {{
    "immediate_actions": ["action1", "action2"],
    "long_term_solutions": ["solution1", "solution2"]
  }}
}} [/INST]"#,
        category = input.category,
        location = location.unwrap_or("unknown"),
        rating = input.rating,
        text = escape_control_chars(input.review_text),
    )
}

pub fn build_location_description_prompt(location: &str, feedbacks: &str) -> String {
    format!(
        "<s>[INST] You are a banking feedback analytics expert. Analyze the following customer feedbacks for the location: {location}.\n\n{feedbacks}\n\nIdentify which service_type(s) are causing negative feedback and why. If there is a lot of noise or repeated issues, explain the cause and how it can be improved. If the feedback is mostly positive, describe the positive aspects. Provide a concise summary for management. [/INST]",
        location = escape_control_chars(location),
        feedbacks = escape_control_chars(feedbacks),
    )
}

/// Replace control characters with their JSON escape so customer text cannot
/// break the prompt layout.
fn escape_control_chars(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_control() {
            match c {
                '\n' => escaped.push_str("\\n"),
                '\r' => escaped.push_str("\\r"),
                '\t' => escaped.push_str("\\t"),
                other => escaped.push_str(&format!("\\u{:04x}", other as u32)),
            }
        } else {
            escaped.push(c);
        }
    }
    escaped
}
