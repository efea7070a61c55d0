//! HTTP surface tests, driven through the router without binding a socket.

mod helpers;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use feedback_triage::api::{create_api_router, AppState};
use feedback_triage::extraction::models::ServiceCategory;
use feedback_triage::extraction::MockReply;
use feedback_triage::FeedbackStore;
use feedback_triage::MockInferenceClient;
use helpers::fixtures::{issue_answer, Harness};
use serde_json::{json, Value};
use tower::ServiceExt;

fn app(harness: &Harness) -> Router {
    create_api_router(AppState::new(harness.pipeline.clone()))
}

async fn send(app: Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

/// Post a raw body, optionally without a content type.
async fn send_raw(app: Router, uri: &str, content_type: Option<&str>, body: &str) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(Method::POST).uri(uri);
    if let Some(content_type) = content_type {
        builder = builder.header("content-type", content_type);
    }
    let request = builder.body(Body::from(body.to_string())).unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn feedback_body(text: &str, rating: i32) -> Value {
    json!({
        "customer_name": "Arjun Mehta",
        "customer_email": "arjun@example.com",
        "service_type": "ATM",
        "review_text": text,
        "review_rating": rating,
        "issue_location": "Andheri East"
    })
}

#[tokio::test]
async fn test_health_endpoint() {
    let harness = Harness::new(MockInferenceClient::always("null"));

    let (status, body) = send(app(&harness), Method::GET, "/api/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "feedback-triage-api");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_submit_feedback_reports_detected_issues() {
    let client = MockInferenceClient::new();
    client
        .push_text(issue_answer("Cash not dispensed", "Account debited", "ATM"))
        .push_text("null");
    let harness = Harness::new(client);

    let (status, body) = send(
        app(&harness),
        Method::POST,
        "/api/feedback",
        Some(feedback_body("Cash was not dispensed but I was debited", 1)),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["issue_detected"], true);
    assert_eq!(body["issue_ids"].as_array().unwrap().len(), 1);
    assert_eq!(body["message"], "Feedback created successfully");

    let id = body["id"].as_str().unwrap();
    let (status, stored) = send(
        app(&harness),
        Method::GET,
        &format!("/api/feedback/{id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stored["customer_name"], "Arjun Mehta");
    assert_eq!(stored["service_type"], "ATM");
    assert_eq!(stored["detected_issues"]["title"], "Cash not dispensed");
}

#[tokio::test]
async fn test_submit_feedback_rejects_bad_payloads() {
    let harness = Harness::new(MockInferenceClient::always("null"));

    // Missing required fields.
    let (status, body) = send(
        app(&harness),
        Method::POST,
        "/api/feedback",
        Some(json!({ "review_text": "no name or rating" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Validation failed");
    assert!(body["details"].is_string());

    // Rating out of range.
    let (status, _) = send(
        app(&harness),
        Method::POST,
        "/api/feedback",
        Some(feedback_body("Machine was out of service", 9)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Unknown service category.
    let mut body = feedback_body("Machine was out of service", 2);
    body["service_type"] = json!("Insurance");
    let (status, _) = send(app(&harness), Method::POST, "/api/feedback", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(harness.client.call_count(), 0);
    assert!(harness.store.feedback_records().await.is_empty());
}

#[tokio::test]
async fn test_get_feedback_not_found() {
    let harness = Harness::new(MockInferenceClient::always("null"));

    let (status, body) = send(
        app(&harness),
        Method::GET,
        &format!("/api/feedback/{}", uuid::Uuid::new_v4()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Feedback record not found");

    let (status, _) = send(app(&harness), Method::GET, "/api/feedback/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_import_returns_summary() {
    let harness = Harness::new(MockInferenceClient::always("null"));

    let (status, body) = send(
        app(&harness),
        Method::POST,
        "/api/import",
        Some(json!([
            {"name": "Meera", "service": "Internet banking", "review": "Transfers were instant", "rating": 5},
            {"name": "Kabir", "service": "ATM", "review": "Machine was fine", "rating": "4"},
            {"name": "Bad", "review": "Rating cannot be read", "rating": "five"}
        ])),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["imported"], 2);
    assert_eq!(body["issues_detected"], 0);
    assert_eq!(body["failed"], 1);
    assert_eq!(
        body["message"],
        "Import completed. Imported 2 records, detected 0 issues. Failed: 1"
    );
}

#[tokio::test]
async fn test_import_requires_an_array() {
    let harness = Harness::new(MockInferenceClient::always("null"));

    let (status, _) = send(
        app(&harness),
        Method::POST,
        "/api/import",
        Some(json!({"name": "not an array"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_pending_issues_include_resolutions() {
    let harness = Harness::new(MockInferenceClient::always(issue_answer(
        "Card reader fault",
        "Card rejected repeatedly",
        "ATM",
    )));

    for text in [
        "The card reader rejected my card three times",
        "Card reader keeps rejecting valid cards",
    ] {
        let (status, _) = send(
            app(&harness),
            Method::POST,
            "/api/feedback",
            Some(feedback_body(text, 1)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = send(app(&harness), Method::GET, "/api/pending-issues", None).await;
    assert_eq!(status, StatusCode::OK);

    let issues = body.as_array().unwrap();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0]["title"], "Card reader fault");
    assert_eq!(issues[0]["feedback_count"], 2);
    assert_eq!(issues[0]["category"], "ATM");
    assert_eq!(issues[0]["resolutions"].as_array().unwrap().len(), 1);

    let (status, body) = send(app(&harness), Method::GET, "/api/positive-aspects", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_array());
}

#[tokio::test]
async fn test_detect_issues_skips_positive_rating() {
    let harness = Harness::new(MockInferenceClient::always("null"));

    let (status, body) = send(
        app(&harness),
        Method::POST,
        "/api/detect-issues",
        Some(json!({
            "review_text": "Everything worked perfectly today",
            "service_type": "ATM",
            "review_rating": 5
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(body["result"].is_null());
    assert_eq!(body["message"], "Skipping positive feedback (rating >= 4)");
    assert_eq!(harness.client.call_count(), 0);
}

#[tokio::test]
async fn test_detect_issues_returns_raw_result() {
    let harness = Harness::new(MockInferenceClient::always(issue_answer(
        "App crashes on login",
        "Crash after OTP",
        "OnlineBanking",
    )));

    let (status, body) = send(
        app(&harness),
        Method::POST,
        "/api/detect-issues",
        Some(json!({
            "review_text": "The app crashes right after I enter the OTP",
            "service_type": ServiceCategory::OnlineBanking,
            "review_rating": 1
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Issue detected successfully");
    assert_eq!(body["result"]["title"], "App crashes on login");
    // Stateless: nothing is written.
    assert!(harness.store.feedback_records().await.is_empty());
}

#[tokio::test]
async fn test_detect_positive_aspects_skips_short_text() {
    let harness = Harness::new(MockInferenceClient::always("null"));

    let (status, body) = send(
        app(&harness),
        Method::POST,
        "/api/detect-positive-aspects",
        Some(json!({
            "review_text": "good",
            "service_type": "CoreBanking",
            "review_rating": 5
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Skipping feedback with insufficient text");
}

#[tokio::test]
async fn test_enhanced_analysis_returns_baseline_for_unusable_answer() {
    let harness = Harness::new(MockInferenceClient::always("I cannot help with that."));

    let (status, body) = send(
        app(&harness),
        Method::POST,
        "/api/enhanced-feedback-analysis",
        Some(json!({
            "feedback_text": "Branch staff resolved my complaint quickly",
            "rating": 5,
            "service_type": "CoreBanking"
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let result = &body["result"];
    assert_eq!(result["sentiment_analysis"]["sentiment"], "positive");
    assert_eq!(result["sentiment_analysis"]["confidence_score"], 0.8);
    assert_eq!(result["issue_analysis"]["category"], "CoreBanking");
    assert_eq!(result["issue_analysis"]["severity"], "low");
}

#[tokio::test]
async fn test_analyze_feedback_maps_fields() {
    let harness = Harness::new(MockInferenceClient::always(
        json!({
            "positive_comments": "Friendly staff",
            "issue_description": "Long queue",
            "resolution": "Open another counter"
        })
        .to_string(),
    ));

    let (status, body) = send(
        app(&harness),
        Method::POST,
        "/api/analyze-feedback",
        Some(json!({ "feedback_text": "Friendly staff but the queue was very long" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["positive_comments"], "Friendly staff");
    assert_eq!(body["result"]["issue_description"], "Long queue");
    assert_eq!(body["result"]["resolution"], "Open another counter");
}

#[tokio::test]
async fn test_location_description_requires_feedbacks() {
    let harness = Harness::new(MockInferenceClient::always(
        "Customers at this branch mostly report ATM downtime.",
    ));

    let (status, body) = send(
        app(&harness),
        Method::POST,
        "/api/location-analytics-description",
        Some(json!({ "location": "Pune Camp", "feedbacks": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Validation failed");

    let (status, body) = send(
        app(&harness),
        Method::POST,
        "/api/location-analytics-description",
        Some(json!({
            "location": "Pune Camp",
            "feedbacks": ["ATM: out of cash", "ATM: screen frozen"]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["result"]["description"],
        "Customers at this branch mostly report ATM downtime."
    );
}

#[tokio::test]
async fn test_analysis_endpoint_reports_inference_failure() {
    let client = MockInferenceClient::new();
    client.set_default(MockReply::Timeout);
    let harness = Harness::new(client);

    let (status, body) = send(
        app(&harness),
        Method::POST,
        "/api/location-analytics-description",
        Some(json!({ "location": "Pune Camp", "feedbacks": "ATM: out of cash" })),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Failed to generate analytics description");
}

#[tokio::test]
async fn test_import_accepts_rows_with_both_key_and_alias() {
    let harness = Harness::new(MockInferenceClient::always("null"));

    let (status, body) = send(
        app(&harness),
        Method::POST,
        "/api/import",
        Some(json!([
            {"id": "1", "customer_id": "C-1", "customer_name": "A", "review_text": "Card stuck in the slot", "review_rating": 1},
            {"customer_name": "B", "review_text": "Great service today", "review_rating": 5},
            "stray value"
        ])),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["imported"], 2);
    assert_eq!(body["failed"], 1);
    let records = harness.store.feedback_records().await;
    assert_eq!(records[0].customer_id.as_deref(), Some("C-1"));
}

#[tokio::test]
async fn test_submit_feedback_rejects_fields_longer_than_their_columns() {
    let harness = Harness::new(MockInferenceClient::always("null"));

    let mut body = feedback_body("Machine was out of service", 2);
    body["customer_phone"] = json!("9".repeat(60));
    let (status, body) = send(app(&harness), Method::POST, "/api/feedback", Some(body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Validation failed");
    assert!(body["details"].as_str().unwrap().contains("customer_phone"));
    assert_eq!(harness.client.call_count(), 0);
    assert!(harness.store.feedback_records().await.is_empty());
}

#[tokio::test]
async fn test_malformed_json_and_content_type_are_handled_uniformly() {
    let harness = Harness::new(MockInferenceClient::always("null"));

    let (status, body) = send_raw(
        app(&harness),
        "/api/feedback",
        Some("application/json"),
        r#"{"customer_name": "Arjun", "review_text": "#,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Validation failed");
    assert!(body["details"].is_string());

    let (status, body) = send_raw(app(&harness), "/api/detect-issues", None, "").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Validation failed");

    // Well-formed JSON is accepted without a content type.
    let payload = feedback_body("Quick and friendly service at the ATM", 5).to_string();
    let (status, body) = send_raw(app(&harness), "/api/feedback", None, &payload).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, _) = send_raw(app(&harness), "/api/import", Some("text/plain"), "[]").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_feedback_listing_filters() {
    let harness = Harness::new(MockInferenceClient::always("null"));

    let mut online = feedback_body("Net banking transfers were instant", 5);
    online["service_type"] = json!("OnlineBanking");
    let mut elsewhere = feedback_body("Clean machine and quick cash", 5);
    elsewhere["issue_location"] = json!("Bandra West");
    for body in [
        feedback_body("Helpful guard at the ATM lobby", 5),
        online,
        elsewhere,
    ] {
        let (status, _) = send(app(&harness), Method::POST, "/api/feedback", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
    }

    let count = |body: &Value| body.as_array().unwrap().len();

    let (status, body) = send(app(&harness), Method::GET, "/api/feedback", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(count(&body), 3);
    assert_eq!(body[0]["customer_name"], "Arjun Mehta");

    let (_, body) = send(
        app(&harness),
        Method::GET,
        "/api/feedback?service=ATM&location=Andheri%20East",
        None,
    )
    .await;
    assert_eq!(count(&body), 1);
    assert_eq!(body[0]["review_text"], "Helpful guard at the ATM lobby");

    let (_, body) = send(
        app(&harness),
        Method::GET,
        "/api/feedback?service=all&dateRange=last_week",
        None,
    )
    .await;
    assert_eq!(count(&body), 3);

    let (_, body) = send(
        app(&harness),
        Method::GET,
        "/api/feedback?customDateTo=2000-01-01",
        None,
    )
    .await;
    assert_eq!(count(&body), 0);

    for uri in ["/api/feedback?service=Insurance", "/api/feedback?dateRange=forever"] {
        let (status, body) = send(app(&harness), Method::GET, uri, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Validation failed");
    }
}

/// Two pending issues with one resolution each, oldest first.
async fn seed_pending_issues(harness: &Harness) -> Vec<Value> {
    for text in [
        "The machine had no cash all weekend",
        "Receipt printer never works here",
    ] {
        let (status, _) = send(
            app(harness),
            Method::POST,
            "/api/feedback",
            Some(feedback_body(text, 1)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
    let (_, body) = send(app(harness), Method::GET, "/api/pending-issues", None).await;
    let mut issues = body.as_array().unwrap().clone();
    issues.reverse();
    assert_eq!(issues.len(), 2);
    issues
}

fn seeded_client() -> MockInferenceClient {
    let client = MockInferenceClient::always("null");
    client
        .push_text(issue_answer("Cash unavailable", "Machine empty", "ATM"))
        .push_text("null")
        .push_text(issue_answer("Receipt missing", "Printer broken", "ATM"));
    client
}

#[tokio::test]
async fn test_pending_issue_edits() {
    let harness = Harness::new(seeded_client());
    let issues = seed_pending_issues(&harness).await;
    let id = issues[0]["id"].as_str().unwrap().to_string();
    let resolution_id = issues[0]["resolutions"][0]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        app(&harness),
        Method::PUT,
        &format!("/api/pending-issues/{id}"),
        Some(json!({"title": "Cash shortage", "confidence_score": 0.95})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, body) = send(
        app(&harness),
        Method::PUT,
        &format!("/api/pending-issues/{id}"),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["details"].as_str().unwrap().contains("No fields to update"));

    let (status, body) = send(
        app(&harness),
        Method::PUT,
        &format!("/api/pending-issues/{}", uuid::Uuid::new_v4()),
        Some(json!({"title": "Nobody"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Pending issue not found");

    let (status, _) = send(
        app(&harness),
        Method::PUT,
        &format!("/api/pending-resolutions/{resolution_id}"),
        Some(json!({"resolution_text": "Refill the cassettes before weekends"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        app(&harness),
        Method::PUT,
        &format!("/api/pending-resolutions/{}", uuid::Uuid::new_v4()),
        Some(json!({"resolution_text": "Anything"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Resolution not found");

    let (status, body) = send(
        app(&harness),
        Method::POST,
        "/api/pending-resolutions",
        Some(json!({"pending_issue_id": id, "resolution_text": "Call the customer back"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["id"].is_string());

    let pending = harness.store.list_pending_issues().await.unwrap();
    let edited = pending
        .iter()
        .find(|view| view.issue.id.to_string() == id)
        .unwrap();
    assert_eq!(edited.issue.title, "Cash shortage");
    assert_eq!(edited.issue.confidence_score, 0.95);
    let texts: Vec<_> = edited
        .resolutions
        .iter()
        .map(|r| r.resolution_text.as_str())
        .collect();
    assert_eq!(
        texts,
        vec!["Refill the cassettes before weekends", "Call the customer back"]
    );
}

#[tokio::test]
async fn test_approve_and_reject_consume_pending_issues() {
    let harness = Harness::new(seeded_client());
    let issues = seed_pending_issues(&harness).await;
    let approved_source = issues[0]["id"].clone();
    let rejected_source = issues[1]["id"].clone();

    let approval = json!({
        "title": "Cash unavailable",
        "description": "Machine empty",
        "category": "ATM",
        "resolution": "Refill the cassettes",
        "feedback_count": 1,
        "approved_by": "ops-lead",
        "pending_issue_id": approved_source
    });
    let (status, body) = send(app(&harness), Method::POST, "/api/issues", Some(approval.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let issue_id = body["id"].as_str().unwrap().to_string();

    // The pending issue is gone, so approving it again fails.
    let (status, body) = send(app(&harness), Method::POST, "/api/issues", Some(approval)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Pending issue not found");

    let (_, body) = send(app(&harness), Method::GET, "/api/issues?status=approved", None).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["approved_by"], "ops-lead");
    let (_, body) = send(app(&harness), Method::GET, "/api/approved-issues", None).await;
    assert_eq!(body[0]["id"], issue_id.as_str());

    let (status, _) = send(
        app(&harness),
        Method::PUT,
        &format!("/api/issues/{issue_id}"),
        Some(json!({"status": "resolved"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = send(app(&harness), Method::GET, "/api/issues?status=approved", None).await;
    assert!(body.as_array().unwrap().is_empty());
    let (_, body) = send(app(&harness), Method::GET, "/api/issues", None).await;
    assert_eq!(body[0]["status"], "resolved");

    let (status, body) = send(
        app(&harness),
        Method::POST,
        "/api/rejected-issues",
        Some(json!({
            "original_title": "Receipt missing",
            "original_description": "Printer broken",
            "category": "ATM",
            "rejection_reason": "Duplicate of a known outage",
            "rejected_by": "ops-lead",
            "original_pending_issue_id": rejected_source
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["id"].is_string());

    let (_, body) = send(app(&harness), Method::GET, "/api/rejected-issues", None).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["rejection_reason"], "Duplicate of a known outage");

    assert!(harness.store.list_pending_issues().await.unwrap().is_empty());
    assert!(harness.store.resolutions().await.is_empty());
}

#[tokio::test]
async fn test_delete_pending_issue() {
    let harness = Harness::new(seeded_client());
    let issues = seed_pending_issues(&harness).await;
    let id = issues[0]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        app(&harness),
        Method::DELETE,
        &format!("/api/pending-issues/{id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(harness.store.list_pending_issues().await.unwrap().len(), 1);
    assert_eq!(harness.store.resolutions().await.len(), 1);

    let (status, body) = send(
        app(&harness),
        Method::DELETE,
        &format!("/api/pending-issues/{id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Pending issue not found");
}
