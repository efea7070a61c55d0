use axum::{
    body::Bytes,
    extract::{Path, State},
    response::Json,
};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use super::{parse_body, ApiError, AppState};
use crate::error::TriageError;
use crate::extraction::models::{FeedbackRecord, NewFeedback, PendingIssueView, PositiveAspect};
use crate::pipeline::ImportRow;

/// Submit one piece of feedback
pub async fn submit_feedback(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    const FAILURE: &str = "Failed to create feedback record";

    let submission: NewFeedback = parse_body(&body).map_err(|e| ApiError::new(FAILURE, e))?;
    let outcome = state
        .pipeline
        .submit_feedback(submission)
        .await
        .map_err(|e| ApiError::new(FAILURE, e))?;

    Ok(Json(json!({
        "success": true,
        "id": outcome.id,
        "issue_detected": outcome.issue_detected(),
        "issue_ids": outcome.issue_ids,
        "message": "Feedback created successfully"
    })))
}

/// Import an array of loosely shaped rows
pub async fn import_feedback(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    const FAILURE: &str = "Failed to import feedback data";

    let rows: Vec<ImportRow> = parse_body(&body).map_err(|e| ApiError::new(FAILURE, e))?;
    info!("Importing {} feedback rows", rows.len());

    let summary = state
        .pipeline
        .import_batch(rows)
        .await
        .map_err(|e| ApiError::new(FAILURE, e))?;

    Ok(Json(json!({
        "success": true,
        "message": format!(
            "Import completed. Imported {} records, detected {} issues. Failed: {}",
            summary.imported, summary.issues_detected, summary.failed
        ),
        "imported": summary.imported,
        "issues_detected": summary.issues_detected,
        "failed": summary.failed
    })))
}

pub async fn get_feedback(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<FeedbackRecord>, ApiError> {
    const FAILURE: &str = "Failed to fetch feedback record";

    let not_found = || {
        ApiError::new(
            "Feedback record not found",
            TriageError::NotFound {
                entity: "Feedback",
                id: id.clone(),
            },
        )
    };
    let uuid = Uuid::parse_str(&id).map_err(|_| not_found())?;

    state
        .pipeline
        .store()
        .get_feedback(uuid)
        .await
        .map_err(|e| ApiError::new(FAILURE, e))?
        .map(Json)
        .ok_or_else(not_found)
}

pub async fn list_pending_issues(
    State(state): State<AppState>,
) -> Result<Json<Vec<PendingIssueView>>, ApiError> {
    let issues = state
        .pipeline
        .store()
        .list_pending_issues()
        .await
        .map_err(|e| ApiError::new("Failed to fetch pending issues", e))?;
    Ok(Json(issues))
}

pub async fn list_positive_aspects(
    State(state): State<AppState>,
) -> Result<Json<Vec<PositiveAspect>>, ApiError> {
    let aspects = state
        .pipeline
        .store()
        .list_positive_aspects()
        .await
        .map_err(|e| ApiError::new("Failed to fetch positive aspects", e))?;
    Ok(Json(aspects))
}
