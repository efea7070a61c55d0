pub mod analysis_api;
pub mod feedback_api;
pub mod review_api;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::TriageError;
use crate::extraction::AnalysisService;
use crate::pipeline::FeedbackPipeline;
use crate::review::ReviewService;

/// Application state for the web API
#[derive(Clone)]
pub struct AppState {
    pub pipeline: FeedbackPipeline,
    pub analysis: AnalysisService,
    pub review: ReviewService,
}

impl AppState {
    pub fn new(pipeline: FeedbackPipeline) -> Self {
        let analysis = AnalysisService::new(pipeline.detector().clone());
        let review = ReviewService::new(pipeline.store().clone());
        Self {
            pipeline,
            analysis,
            review,
        }
    }
}

/// Create the main API router
pub fn create_api_router(state: AppState) -> Router {
    Router::new()
        // Health check endpoint
        .route("/api/health", get(health_check))
        // Feedback intake and reviewer views
        .route(
            "/api/feedback",
            get(review_api::list_feedback).post(feedback_api::submit_feedback),
        )
        .route("/api/feedback/:id", get(feedback_api::get_feedback))
        .route("/api/import", post(feedback_api::import_feedback))
        .route("/api/pending-issues", get(feedback_api::list_pending_issues))
        .route(
            "/api/positive-aspects",
            get(feedback_api::list_positive_aspects),
        )
        // Review workflow
        .route(
            "/api/pending-issues/:id",
            put(review_api::update_pending_issue).delete(review_api::delete_pending_issue),
        )
        .route(
            "/api/pending-resolutions",
            post(review_api::add_pending_resolution),
        )
        .route(
            "/api/pending-resolutions/:id",
            put(review_api::update_pending_resolution),
        )
        .route(
            "/api/issues",
            get(review_api::list_issues).post(review_api::approve_issue),
        )
        .route("/api/issues/:id", put(review_api::update_issue))
        .route("/api/approved-issues", get(review_api::list_approved_issues))
        .route(
            "/api/rejected-issues",
            get(review_api::list_rejected_issues).post(review_api::reject_issue),
        )
        // Stateless analysis
        .route("/api/detect-issues", post(analysis_api::detect_issues))
        .route(
            "/api/detect-positive-aspects",
            post(analysis_api::detect_positive_aspects),
        )
        .route("/api/analyze-feedback", post(analysis_api::analyze_feedback))
        .route(
            "/api/enhanced-feedback-analysis",
            post(analysis_api::enhanced_feedback_analysis),
        )
        .route(
            "/api/location-analytics-description",
            post(analysis_api::location_analytics_description),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Health check endpoint
async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "feedback-triage-api",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Error response carrying `{error, details}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: &'static str,
    details: String,
}

impl ApiError {
    /// Wrap a domain error with the summary shown to the caller.
    pub fn new(error: &'static str, source: TriageError) -> Self {
        let status = match &source {
            TriageError::Validation(_) => StatusCode::BAD_REQUEST,
            TriageError::NotFound { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let error = match status {
            StatusCode::BAD_REQUEST => "Validation failed",
            _ => error,
        };
        Self {
            status,
            error,
            details: source.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.error,
            "details": self.details,
        }));
        (self.status, body).into_response()
    }
}

/// Decode a raw JSON body. Syntax and shape errors surface as validation
/// failures whatever the request's content type.
pub(crate) fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, TriageError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(TriageError::Validation("Request body is empty".to_string()));
    }
    serde_json::from_slice(body).map_err(|e| TriageError::Validation(e.to_string()))
}
