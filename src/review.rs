//! Reviewer workflow over the pending pools.
//!
//! Reviewers browse feedback, edit pending issues and their proposed
//! resolutions, and finally either approve a pending issue into the
//! `issues` table or reject it into `rejected_issues`. Approving or
//! rejecting with a pending issue id consumes that pending issue (and its
//! resolutions) in the same transaction as the insert.

use chrono::{DateTime, Duration, Months, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::error::{Result, TriageError};
use crate::extraction::models::{
    FeedbackRecord, NewPendingResolution, PendingIssue, PendingResolution, ServiceCategory,
};
use crate::storage::FeedbackStore;

/// Store-level feedback filter. Bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedbackFilter {
    pub service: Option<ServiceCategory>,
    pub location: Option<String>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
}

impl FeedbackFilter {
    pub fn matches(&self, record: &FeedbackRecord) -> bool {
        self.service.map_or(true, |s| record.service_type == s)
            && self
                .location
                .as_deref()
                .map_or(true, |l| record.issue_location.as_deref() == Some(l))
            && self.created_from.map_or(true, |from| record.created_at >= from)
            && self.created_to.map_or(true, |to| record.created_at <= to)
    }
}

/// Query string of `GET /api/feedback`. `all` disables a filter.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedbackQuery {
    pub service: Option<String>,
    pub location: Option<String>,
    #[serde(rename = "dateRange")]
    pub date_range: Option<String>,
    #[serde(rename = "customDateFrom")]
    pub custom_date_from: Option<String>,
    #[serde(rename = "customDateTo")]
    pub custom_date_to: Option<String>,
}

impl FeedbackQuery {
    pub fn into_filter(self, now: DateTime<Utc>) -> Result<FeedbackFilter> {
        let service = active(self.service)
            .map(|s| s.parse::<ServiceCategory>().map_err(TriageError::Validation))
            .transpose()?;

        let range_start = active(self.date_range)
            .map(|range| range_start(&range, now))
            .transpose()?;
        let custom_from = self.custom_date_from.as_deref().map(parse_date).transpose()?;
        let created_to = self.custom_date_to.as_deref().map(parse_date).transpose()?;

        Ok(FeedbackFilter {
            service,
            location: active(self.location),
            created_from: range_start.max(custom_from),
            created_to,
        })
    }
}

fn active(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("all"))
}

fn range_start(range: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let start = match range {
        "last_week" => now.checked_sub_signed(Duration::days(7)),
        "last_month" => now.checked_sub_months(Months::new(1)),
        "last_quarter" => now.checked_sub_months(Months::new(3)),
        "last_year" => now.checked_sub_months(Months::new(12)),
        other => {
            return Err(TriageError::Validation(format!(
                "Unknown dateRange: {other}"
            )))
        }
    };
    start.ok_or_else(|| TriageError::Validation(format!("dateRange {range} is out of range")))
}

/// RFC 3339 timestamp or a plain `YYYY-MM-DD` date (midnight UTC).
fn parse_date(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| Utc.from_utc_datetime(&midnight))
        .ok_or_else(|| TriageError::Validation(format!("Invalid date: {raw}")))
}

/// Partial edit of a pending issue; absent fields keep their value.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct PendingIssueUpdate {
    #[validate(length(min = 1, message = "title cannot be empty"))]
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<ServiceCategory>,
    #[validate(range(min = 0.0, max = 1.0, message = "confidence_score must be within 0..1"))]
    pub confidence_score: Option<f64>,
}

impl PendingIssueUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.category.is_none()
            && self.confidence_score.is_none()
    }
}

fn default_confidence() -> f64 {
    0.5
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewResolution {
    pub pending_issue_id: Uuid,
    #[validate(length(min = 1, message = "resolution_text is required"))]
    pub resolution_text: String,
    #[serde(default = "default_confidence")]
    #[validate(range(min = 0.0, max = 1.0, message = "confidence_score must be within 0..1"))]
    pub confidence_score: f64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ResolutionUpdate {
    #[validate(length(min = 1, message = "resolution_text is required"))]
    pub resolution_text: String,
}

/// An approved issue.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Issue {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub category: ServiceCategory,
    pub resolution: String,
    pub status: String,
    pub confidence_score: f64,
    pub feedback_count: i32,
    pub approved_by: Option<String>,
    pub approved_date: Option<DateTime<Utc>>,
    pub source_pending_issue_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_status() -> String {
    "approved".to_string()
}

fn default_feedback_count() -> i32 {
    1
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewIssue {
    #[validate(length(min = 1, message = "title is required"))]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub category: ServiceCategory,
    #[serde(default)]
    pub resolution: String,
    #[serde(default = "default_status")]
    #[validate(length(min = 1, max = 50, message = "status must be 1 to 50 characters"))]
    pub status: String,
    #[serde(default = "default_confidence")]
    #[validate(range(min = 0.0, max = 1.0, message = "confidence_score must be within 0..1"))]
    pub confidence_score: f64,
    #[serde(default = "default_feedback_count")]
    #[validate(range(min = 1, message = "feedback_count must be at least 1"))]
    pub feedback_count: i32,
    #[serde(default)]
    #[validate(length(max = 255, message = "approved_by is limited to 255 characters"))]
    pub approved_by: Option<String>,
    #[serde(default)]
    pub approved_date: Option<DateTime<Utc>>,
    /// Pending issue consumed by this approval.
    #[serde(default)]
    pub pending_issue_id: Option<Uuid>,
}

impl NewIssue {
    fn into_issue(self) -> Issue {
        let now = Utc::now();
        Issue {
            id: Uuid::new_v4(),
            title: self.title.trim().to_string(),
            description: self.description,
            category: self.category,
            resolution: self.resolution,
            status: self.status,
            confidence_score: self.confidence_score,
            feedback_count: self.feedback_count,
            approved_by: self.approved_by,
            approved_date: self.approved_date.or(Some(now)),
            source_pending_issue_id: self.pending_issue_id,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct IssueUpdate {
    #[validate(length(min = 1, message = "title cannot be empty"))]
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<ServiceCategory>,
    pub resolution: Option<String>,
    #[validate(length(min = 1, max = 50, message = "status must be 1 to 50 characters"))]
    pub status: Option<String>,
    #[validate(range(min = 0.0, max = 1.0, message = "confidence_score must be within 0..1"))]
    pub confidence_score: Option<f64>,
    #[validate(range(min = 1, message = "feedback_count must be at least 1"))]
    pub feedback_count: Option<i32>,
    #[validate(length(max = 255, message = "approved_by is limited to 255 characters"))]
    pub approved_by: Option<String>,
    pub approved_date: Option<DateTime<Utc>>,
}

impl IssueUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.category.is_none()
            && self.resolution.is_none()
            && self.status.is_none()
            && self.confidence_score.is_none()
            && self.feedback_count.is_none()
            && self.approved_by.is_none()
            && self.approved_date.is_none()
    }

    pub fn apply(&self, issue: &mut Issue) {
        if let Some(title) = &self.title {
            issue.title = title.clone();
        }
        if let Some(description) = &self.description {
            issue.description = description.clone();
        }
        if let Some(category) = self.category {
            issue.category = category;
        }
        if let Some(resolution) = &self.resolution {
            issue.resolution = resolution.clone();
        }
        if let Some(status) = &self.status {
            issue.status = status.clone();
        }
        if let Some(score) = self.confidence_score {
            issue.confidence_score = score;
        }
        if let Some(count) = self.feedback_count {
            issue.feedback_count = count;
        }
        if let Some(approved_by) = &self.approved_by {
            issue.approved_by = Some(approved_by.clone());
        }
        if let Some(date) = self.approved_date {
            issue.approved_date = Some(date);
        }
        issue.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RejectedIssue {
    pub id: Uuid,
    pub original_title: String,
    pub original_description: String,
    pub category: ServiceCategory,
    pub rejection_reason: Option<String>,
    pub rejected_by: Option<String>,
    pub original_pending_issue_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewRejectedIssue {
    #[validate(length(min = 1, message = "original_title is required"))]
    pub original_title: String,
    #[serde(default)]
    pub original_description: String,
    pub category: ServiceCategory,
    #[serde(default)]
    pub rejection_reason: Option<String>,
    #[serde(default)]
    #[validate(length(max = 255, message = "rejected_by is limited to 255 characters"))]
    pub rejected_by: Option<String>,
    /// Pending issue consumed by this rejection.
    #[serde(default)]
    pub original_pending_issue_id: Option<Uuid>,
}

impl NewRejectedIssue {
    fn into_rejected(self) -> RejectedIssue {
        RejectedIssue {
            id: Uuid::new_v4(),
            original_title: self.original_title,
            original_description: self.original_description,
            category: self.category,
            rejection_reason: self.rejection_reason,
            rejected_by: self.rejected_by,
            original_pending_issue_id: self.original_pending_issue_id,
            created_at: Utc::now(),
        }
    }
}

fn no_fields() -> TriageError {
    TriageError::Validation("No fields to update".to_string())
}

fn not_found(entity: &'static str, id: Uuid) -> TriageError {
    TriageError::NotFound {
        entity,
        id: id.to_string(),
    }
}

/// Validating front of the review operations on a [`FeedbackStore`].
#[derive(Clone)]
pub struct ReviewService {
    store: Arc<dyn FeedbackStore>,
}

impl ReviewService {
    pub fn new(store: Arc<dyn FeedbackStore>) -> Self {
        Self { store }
    }

    /// Feedback matching the query, newest first.
    pub async fn list_feedback(&self, query: FeedbackQuery) -> Result<Vec<FeedbackRecord>> {
        let filter = query.into_filter(Utc::now())?;
        self.store.list_feedback(&filter).await
    }

    #[instrument(skip(self, update))]
    pub async fn update_pending_issue(
        &self,
        id: Uuid,
        update: PendingIssueUpdate,
    ) -> Result<PendingIssue> {
        if update.is_empty() {
            return Err(no_fields());
        }
        update.validate()?;
        let updated = self
            .store
            .update_pending_issue(id, &update)
            .await?
            .ok_or_else(|| not_found("Pending issue", id))?;
        info!("Pending issue updated");
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn delete_pending_issue(&self, id: Uuid) -> Result<()> {
        if !self.store.delete_pending_issue(id).await? {
            return Err(not_found("Pending issue", id));
        }
        info!("Pending issue deleted");
        Ok(())
    }

    #[instrument(skip(self, request), fields(pending_issue_id = %request.pending_issue_id))]
    pub async fn add_resolution(&self, request: NewResolution) -> Result<PendingResolution> {
        request.validate()?;
        let resolution = NewPendingResolution {
            id: Uuid::new_v4(),
            pending_issue_id: request.pending_issue_id,
            resolution_text: request.resolution_text.trim().to_string(),
            confidence_score: request.confidence_score,
        };
        self.store
            .add_pending_resolution(&resolution)
            .await?
            .ok_or_else(|| not_found("Pending issue", request.pending_issue_id))
    }

    #[instrument(skip(self, update))]
    pub async fn update_resolution(
        &self,
        id: Uuid,
        update: ResolutionUpdate,
    ) -> Result<PendingResolution> {
        update.validate()?;
        self.store
            .update_pending_resolution(id, &update.resolution_text)
            .await?
            .ok_or_else(|| not_found("Resolution", id))
    }

    /// Record an approved issue, consuming its pending issue when one is named.
    #[instrument(skip(self, request), fields(pending_issue_id = ?request.pending_issue_id))]
    pub async fn approve_issue(&self, request: NewIssue) -> Result<Issue> {
        request.validate()?;
        let issue = request.into_issue();
        self.store.insert_issue(&issue).await?;
        info!(issue_id = %issue.id, "Issue approved");
        Ok(issue)
    }

    pub async fn list_issues(&self, status: Option<String>) -> Result<Vec<Issue>> {
        let status = status.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        self.store.list_issues(status.as_deref()).await
    }

    /// Approved issues, most reported first.
    pub async fn approved_issues(&self) -> Result<Vec<Issue>> {
        let mut issues = self.store.list_issues(Some("approved")).await?;
        issues.sort_by(|a, b| b.feedback_count.cmp(&a.feedback_count));
        Ok(issues)
    }

    #[instrument(skip(self, update))]
    pub async fn update_issue(&self, id: Uuid, update: IssueUpdate) -> Result<Issue> {
        if update.is_empty() {
            return Err(no_fields());
        }
        update.validate()?;
        self.store
            .update_issue(id, &update)
            .await?
            .ok_or_else(|| not_found("Issue", id))
    }

    /// Record a rejection, consuming its pending issue when one is named.
    #[instrument(skip(self, request), fields(pending_issue_id = ?request.original_pending_issue_id))]
    pub async fn reject_issue(&self, request: NewRejectedIssue) -> Result<RejectedIssue> {
        request.validate()?;
        let rejected = request.into_rejected();
        self.store.insert_rejected_issue(&rejected).await?;
        info!(rejected_id = %rejected.id, "Issue rejected");
        Ok(rejected)
    }

    pub async fn list_rejected_issues(&self) -> Result<Vec<RejectedIssue>> {
        self.store.list_rejected_issues().await
    }
}
