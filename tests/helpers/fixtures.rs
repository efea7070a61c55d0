//! Shared builders for pipeline and API tests.

use feedback_triage::config::ExtractionConfig;
use feedback_triage::extraction::models::{NewFeedback, ServiceCategory};
use feedback_triage::{Detector, FeedbackPipeline, InMemoryFeedbackStore, MockInferenceClient};
use std::sync::Arc;

pub struct Harness {
    pub store: InMemoryFeedbackStore,
    pub client: MockInferenceClient,
    pub pipeline: FeedbackPipeline,
}

impl Harness {
    pub fn new(client: MockInferenceClient) -> Self {
        Self::with_config(client, ExtractionConfig::default())
    }

    pub fn with_config(client: MockInferenceClient, config: ExtractionConfig) -> Self {
        let store = InMemoryFeedbackStore::new();
        let detector = Detector::new(Arc::new(client.clone()), config);
        let pipeline = FeedbackPipeline::new(Arc::new(store.clone()), detector);
        Self {
            store,
            client,
            pipeline,
        }
    }
}

pub fn submission(category: ServiceCategory, text: &str, rating: i32) -> NewFeedback {
    NewFeedback {
        customer_name: "Priya Sharma".to_string(),
        customer_phone: Some("+91 98765 43210".to_string()),
        customer_email: Some("priya@example.com".to_string()),
        customer_id: Some("CUST-001".to_string()),
        service_type: category,
        review_text: text.to_string(),
        review_rating: rating,
        issue_location: Some("Mumbai Central".to_string()),
        contacted_bank_person: None,
        status: None,
    }
}

/// Model answer for one issue finding with a resolution.
pub fn issue_answer(title: &str, description: &str, category: &str) -> String {
    serde_json::json!({
        "title": title,
        "description": description,
        "category": category,
        "confidence_score": 0.85,
        "resolution": "Dispatch a technician to inspect the machine"
    })
    .to_string()
}
