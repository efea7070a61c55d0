//! Data model for feedback, extracted findings and the pending record pools.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

/// Banking service a piece of feedback is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "service_category")]
pub enum ServiceCategory {
    #[serde(rename = "ATM")]
    #[sqlx(rename = "ATM")]
    Atm,
    OnlineBanking,
    CoreBanking,
}

impl ServiceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceCategory::Atm => "ATM",
            ServiceCategory::OnlineBanking => "OnlineBanking",
            ServiceCategory::CoreBanking => "CoreBanking",
        }
    }

    /// Map a loosely written service label (as found in imported rows) onto a category.
    /// Anything unrecognised is treated as ATM.
    pub fn normalize(label: &str) -> Self {
        let label = label.to_lowercase();
        if ["online", "internet", "mobile", "digital"]
            .iter()
            .any(|hint| label.contains(hint))
        {
            ServiceCategory::OnlineBanking
        } else if label.contains("core") || label.contains("branch") {
            ServiceCategory::CoreBanking
        } else {
            ServiceCategory::Atm
        }
    }
}

impl fmt::Display for ServiceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "atm" => Ok(ServiceCategory::Atm),
            "onlinebanking" => Ok(ServiceCategory::OnlineBanking),
            "corebanking" => Ok(ServiceCategory::CoreBanking),
            _ => Err(format!("Invalid service category: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "feedback_sentiment", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
}

impl Sentiment {
    pub fn from_rating(rating: i32) -> Self {
        if rating >= 4 {
            Sentiment::Positive
        } else {
            Sentiment::Negative
        }
    }
}

/// Which extraction pipeline is running. Both share the same stages and differ
/// only in target pool, resolution handling and fallback scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Issues,
    PositiveAspects,
}

impl TaskKind {
    pub fn requires_resolution(&self) -> bool {
        matches!(self, TaskKind::Issues)
    }

    /// Category the keyword fallback is allowed to run for, if any.
    pub fn fallback_category(&self) -> Option<ServiceCategory> {
        match self {
            TaskKind::Issues => Some(ServiceCategory::Atm),
            TaskKind::PositiveAspects => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TaskKind::Issues => "issue",
            TaskKind::PositiveAspects => "positive aspect",
        }
    }
}

/// Payload of a customer submission, validated before the pipeline starts.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewFeedback {
    #[validate(length(min = 1, max = 255, message = "customer_name is required"))]
    pub customer_name: String,
    #[serde(default)]
    #[validate(length(max = 50, message = "customer_phone is limited to 50 characters"))]
    pub customer_phone: Option<String>,
    #[serde(default)]
    #[validate(
        email(message = "customer_email must be a valid address"),
        length(max = 255, message = "customer_email is limited to 255 characters")
    )]
    pub customer_email: Option<String>,
    #[serde(default)]
    #[validate(length(max = 100, message = "customer_id is limited to 100 characters"))]
    pub customer_id: Option<String>,
    pub service_type: ServiceCategory,
    #[validate(length(min = 1, message = "review_text is required"))]
    pub review_text: String,
    #[validate(range(min = 1, max = 5, message = "review_rating must be between 1 and 5"))]
    pub review_rating: i32,
    #[serde(default)]
    #[validate(length(max = 255, message = "issue_location is limited to 255 characters"))]
    pub issue_location: Option<String>,
    #[serde(default)]
    #[validate(length(max = 255, message = "contacted_bank_person is limited to 255 characters"))]
    pub contacted_bank_person: Option<String>,
    #[serde(default)]
    #[validate(length(min = 1, max = 50, message = "status must be 1 to 50 characters"))]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FeedbackRecord {
    pub id: Uuid,
    pub customer_name: String,
    pub customer_phone: Option<String>,
    pub customer_email: Option<String>,
    pub customer_id: Option<String>,
    pub service_type: ServiceCategory,
    pub review_text: String,
    pub review_rating: i32,
    pub issue_location: Option<String>,
    pub contacted_bank_person: Option<String>,
    pub status: String,
    pub sentiment: Sentiment,
    pub positive_flag: bool,
    pub negative_flag: bool,
    pub detected_issues: Option<serde_json::Value>,
    pub detected_positive_aspects: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl FeedbackRecord {
    pub fn from_submission(submission: NewFeedback) -> Self {
        let sentiment = Sentiment::from_rating(submission.review_rating);
        Self {
            id: Uuid::new_v4(),
            customer_name: submission.customer_name,
            customer_phone: submission.customer_phone,
            customer_email: submission.customer_email,
            customer_id: submission.customer_id,
            service_type: submission.service_type,
            review_text: submission.review_text,
            review_rating: submission.review_rating,
            issue_location: submission.issue_location,
            contacted_bank_person: submission.contacted_bank_person,
            status: submission.status.unwrap_or_else(|| "new".to_string()),
            sentiment,
            positive_flag: sentiment == Sentiment::Positive,
            negative_flag: sentiment == Sentiment::Negative,
            detected_issues: None,
            detected_positive_aspects: None,
            created_at: Utc::now(),
        }
    }
}

/// Normalised form of one model (or fallback) result before it is split into candidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFinding {
    pub title: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub titles: Vec<String>,
    pub description: String,
    pub category: ServiceCategory,
    pub confidence_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

impl ExtractedFinding {
    /// JSON written to the feedback row as the audit trail of this finding.
    pub fn to_audit(&self) -> serde_json::Value {
        let mut audit = serde_json::json!({
            "title": self.title,
            "description": self.description,
            "category": self.category.as_str(),
            "confidence_score": self.confidence_score,
        });
        if !self.titles.is_empty() {
            audit["titles"] = serde_json::json!(self.titles);
        }
        if let Some(resolution) = &self.resolution {
            audit["resolution"] = serde_json::Value::String(resolution.clone());
        }
        audit
    }
}

/// One title-level unit derived from a finding, matched against storage on its own.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub title: String,
    pub description: String,
    pub category: ServiceCategory,
    pub confidence_score: f64,
    pub resolution: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PendingIssue {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub category: ServiceCategory,
    pub confidence_score: f64,
    pub feedback_count: i32,
    pub detected_from_feedback_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PendingResolution {
    pub id: Uuid,
    pub pending_issue_id: Uuid,
    pub resolution_text: String,
    pub confidence_score: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PositiveAspect {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub category: ServiceCategory,
    pub confidence_score: f64,
    pub feedback_count: i32,
    pub detected_from_feedback_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Pending issue together with its proposed resolutions, as served to reviewers.
#[derive(Debug, Clone, Serialize)]
pub struct PendingIssueView {
    #[serde(flatten)]
    pub issue: PendingIssue,
    pub resolutions: Vec<PendingResolution>,
}

/// A new row for one of the two pending pools.
#[derive(Debug, Clone)]
pub struct NewPendingRecord {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub category: ServiceCategory,
    pub confidence_score: f64,
    pub detected_from_feedback_id: Uuid,
}

impl NewPendingRecord {
    pub fn from_candidate(candidate: &Candidate, feedback_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: candidate.title.clone(),
            description: candidate.description.clone(),
            category: candidate.category,
            confidence_score: candidate.confidence_score,
            detected_from_feedback_id: feedback_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewPendingResolution {
    pub id: Uuid,
    pub pending_issue_id: Uuid,
    pub resolution_text: String,
    pub confidence_score: f64,
}
