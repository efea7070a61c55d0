use axum::{body::Bytes, extract::State, response::Json};
use serde_json::{json, Value};

use super::{parse_body, ApiError, AppState};
use crate::extraction::models::TaskKind;
use crate::extraction::{AnalyzeRequest, DetectRequest, LocationRequest};

async fn detect(state: AppState, kind: TaskKind, body: Bytes) -> Result<Json<Value>, ApiError> {
    let failure = match kind {
        TaskKind::Issues => "Failed to detect issues",
        TaskKind::PositiveAspects => "Failed to detect positive aspects",
    };

    let request: DetectRequest = parse_body(&body).map_err(|e| ApiError::new(failure, e))?;
    let report = state
        .analysis
        .detect(kind, request)
        .await
        .map_err(|e| ApiError::new(failure, e))?;

    Ok(Json(json!({
        "success": true,
        "result": report.result,
        "message": report.message
    })))
}

pub async fn detect_issues(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    detect(state, TaskKind::Issues, body).await
}

pub async fn detect_positive_aspects(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    detect(state, TaskKind::PositiveAspects, body).await
}

pub async fn analyze_feedback(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    const FAILURE: &str = "Failed to analyze feedback";

    let request: AnalyzeRequest = parse_body(&body).map_err(|e| ApiError::new(FAILURE, e))?;
    let analysis = state
        .analysis
        .analyze_feedback(request)
        .await
        .map_err(|e| ApiError::new(FAILURE, e))?;

    Ok(Json(json!({ "success": true, "result": analysis })))
}

pub async fn enhanced_feedback_analysis(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    const FAILURE: &str = "Failed to analyze feedback";

    let request: AnalyzeRequest = parse_body(&body).map_err(|e| ApiError::new(FAILURE, e))?;
    let analysis = state
        .analysis
        .enhanced_analysis(request)
        .await
        .map_err(|e| ApiError::new(FAILURE, e))?;

    Ok(Json(json!({ "success": true, "result": analysis })))
}

pub async fn location_analytics_description(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    const FAILURE: &str = "Failed to generate analytics description";

    let request: LocationRequest = parse_body(&body).map_err(|e| ApiError::new(FAILURE, e))?;
    let description = state
        .analysis
        .describe_location(request)
        .await
        .map_err(|e| ApiError::new(FAILURE, e))?;

    Ok(Json(json!({ "success": true, "result": description })))
}
