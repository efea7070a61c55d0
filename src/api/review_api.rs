use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Path, Query, State},
    response::Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::{parse_body, ApiError, AppState};
use crate::error::TriageError;
use crate::extraction::models::FeedbackRecord;
use crate::review::{
    FeedbackQuery, Issue, IssueUpdate, NewIssue, NewRejectedIssue, NewResolution,
    PendingIssueUpdate, RejectedIssue, ResolutionUpdate,
};

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub status: Option<String>,
}

/// Path ids that are not UUIDs cannot name a row.
fn path_id(raw: &str, entity: &'static str, label: &'static str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| {
        ApiError::new(
            label,
            TriageError::NotFound {
                entity,
                id: raw.to_string(),
            },
        )
    })
}

fn query_error(label: &'static str, rejection: QueryRejection) -> ApiError {
    ApiError::new(label, TriageError::Validation(rejection.body_text()))
}

/// Feedback filtered by service, location and creation date
pub async fn list_feedback(
    State(state): State<AppState>,
    query: Result<Query<FeedbackQuery>, QueryRejection>,
) -> Result<Json<Vec<FeedbackRecord>>, ApiError> {
    const FAILURE: &str = "Failed to fetch feedback data";

    let Query(query) = query.map_err(|e| query_error(FAILURE, e))?;
    let records = state
        .review
        .list_feedback(query)
        .await
        .map_err(|e| ApiError::new(FAILURE, e))?;
    Ok(Json(records))
}

pub async fn update_pending_issue(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    const NOT_FOUND: &str = "Pending issue not found";
    const FAILURE: &str = "Failed to update pending issue";

    let id = path_id(&id, "Pending issue", NOT_FOUND)?;
    let update: PendingIssueUpdate = parse_body(&body).map_err(|e| ApiError::new(FAILURE, e))?;
    state
        .review
        .update_pending_issue(id, update)
        .await
        .map_err(|e| ApiError::new(not_found_or(NOT_FOUND, FAILURE, &e), e))?;

    Ok(Json(json!({ "success": true })))
}

pub async fn delete_pending_issue(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    const NOT_FOUND: &str = "Pending issue not found";
    const FAILURE: &str = "Failed to delete pending issue";

    let id = path_id(&id, "Pending issue", NOT_FOUND)?;
    state
        .review
        .delete_pending_issue(id)
        .await
        .map_err(|e| ApiError::new(not_found_or(NOT_FOUND, FAILURE, &e), e))?;

    Ok(Json(json!({ "success": true })))
}

pub async fn add_pending_resolution(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    const FAILURE: &str = "Failed to create resolution";

    let request: NewResolution = parse_body(&body).map_err(|e| ApiError::new(FAILURE, e))?;
    let resolution = state
        .review
        .add_resolution(request)
        .await
        .map_err(|e| ApiError::new(not_found_or("Pending issue not found", FAILURE, &e), e))?;

    Ok(Json(json!({ "success": true, "id": resolution.id })))
}

pub async fn update_pending_resolution(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    const NOT_FOUND: &str = "Resolution not found";
    const FAILURE: &str = "Failed to update resolution";

    let id = path_id(&id, "Resolution", NOT_FOUND)?;
    let update: ResolutionUpdate = parse_body(&body).map_err(|e| ApiError::new(FAILURE, e))?;
    state
        .review
        .update_resolution(id, update)
        .await
        .map_err(|e| ApiError::new(not_found_or(NOT_FOUND, FAILURE, &e), e))?;

    Ok(Json(json!({ "success": true })))
}

/// Approve an issue, consuming `pending_issue_id` when given
pub async fn approve_issue(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    const FAILURE: &str = "Failed to create issue";

    let request: NewIssue = parse_body(&body).map_err(|e| ApiError::new(FAILURE, e))?;
    let issue = state
        .review
        .approve_issue(request)
        .await
        .map_err(|e| ApiError::new(not_found_or("Pending issue not found", FAILURE, &e), e))?;

    Ok(Json(json!({ "success": true, "id": issue.id })))
}

pub async fn list_issues(
    State(state): State<AppState>,
    query: Result<Query<StatusQuery>, QueryRejection>,
) -> Result<Json<Vec<Issue>>, ApiError> {
    const FAILURE: &str = "Failed to fetch issues";

    let Query(query) = query.map_err(|e| query_error(FAILURE, e))?;
    let issues = state
        .review
        .list_issues(query.status)
        .await
        .map_err(|e| ApiError::new(FAILURE, e))?;
    Ok(Json(issues))
}

pub async fn list_approved_issues(
    State(state): State<AppState>,
) -> Result<Json<Vec<Issue>>, ApiError> {
    let issues = state
        .review
        .approved_issues()
        .await
        .map_err(|e| ApiError::new("Failed to fetch approved issues", e))?;
    Ok(Json(issues))
}

pub async fn update_issue(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    const NOT_FOUND: &str = "Issue not found";
    const FAILURE: &str = "Failed to update issue";

    let id = path_id(&id, "Issue", NOT_FOUND)?;
    let update: IssueUpdate = parse_body(&body).map_err(|e| ApiError::new(FAILURE, e))?;
    state
        .review
        .update_issue(id, update)
        .await
        .map_err(|e| ApiError::new(not_found_or(NOT_FOUND, FAILURE, &e), e))?;

    Ok(Json(json!({ "success": true })))
}

/// Reject an issue, consuming `original_pending_issue_id` when given
pub async fn reject_issue(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    const FAILURE: &str = "Failed to create rejected issue";

    let request: NewRejectedIssue = parse_body(&body).map_err(|e| ApiError::new(FAILURE, e))?;
    let rejected = state
        .review
        .reject_issue(request)
        .await
        .map_err(|e| ApiError::new(not_found_or("Pending issue not found", FAILURE, &e), e))?;

    Ok(Json(json!({ "success": true, "id": rejected.id })))
}

pub async fn list_rejected_issues(
    State(state): State<AppState>,
) -> Result<Json<Vec<RejectedIssue>>, ApiError> {
    let rejected = state
        .review
        .list_rejected_issues()
        .await
        .map_err(|e| ApiError::new("Failed to fetch rejected issues", e))?;
    Ok(Json(rejected))
}

fn not_found_or(
    not_found: &'static str,
    failure: &'static str,
    error: &TriageError,
) -> &'static str {
    match error {
        TriageError::NotFound { .. } => not_found,
        _ => failure,
    }
}
