//! Stateless analysis operations. Each call prompts the model and returns
//! its (recovered) answer without persisting anything.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument};
use validator::Validate;

use super::detector::{Detector, SkipReason};
use super::models::{ServiceCategory, Sentiment, TaskKind};
use super::prompt::{
    build_enhanced_analysis_prompt, build_feedback_analysis_prompt,
    build_location_description_prompt, PromptInput,
};
use super::recovery::{recover, Recovery};
use crate::error::Result;

fn default_rating() -> i32 {
    3
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct DetectRequest {
    #[validate(length(min = 1, message = "review_text is required"))]
    pub review_text: String,
    pub service_type: ServiceCategory,
    #[validate(range(min = 1, max = 5, message = "review_rating must be between 1 and 5"))]
    pub review_rating: i32,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AnalyzeRequest {
    #[validate(length(min = 1, message = "feedback_text is required"))]
    pub feedback_text: String,
    #[serde(default = "default_rating")]
    pub rating: i32,
    #[serde(default)]
    pub service_type: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

impl AnalyzeRequest {
    fn category(&self) -> ServiceCategory {
        match self.service_type.as_deref() {
            Some(label) => label
                .parse()
                .unwrap_or_else(|_| ServiceCategory::normalize(label)),
            None => ServiceCategory::Atm,
        }
    }

    fn prompt_input(&self) -> PromptInput<'_> {
        PromptInput {
            review_text: &self.feedback_text,
            category: self.category(),
            rating: self.rating,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LocationRequest {
    #[validate(length(min = 1, message = "location is required"))]
    pub location: String,
    /// Either preformatted text or a list of feedback entries.
    pub feedbacks: Value,
}

/// Result of a single-task detection call.
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub result: Option<Value>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackAnalysis {
    pub positive_comments: Option<String>,
    pub issue_description: Option<String>,
    pub resolution: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnhancedAnalysis {
    pub sentiment_analysis: SentimentAnalysis,
    pub issue_analysis: IssueAnalysis,
    #[serde(default)]
    pub suggested_resolution: SuggestedResolution,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentAnalysis {
    pub sentiment: Sentiment,
    #[serde(default)]
    pub confidence_score: f64,
    #[serde(default)]
    pub key_points: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueAnalysis {
    #[serde(default)]
    pub core_issue: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuggestedResolution {
    #[serde(default)]
    pub immediate_actions: Vec<String>,
    #[serde(default)]
    pub long_term_solutions: Vec<String>,
}

impl EnhancedAnalysis {
    /// Answer used when the text is too short or the model gives nothing usable.
    pub fn baseline(rating: i32, category: ServiceCategory) -> Self {
        Self {
            sentiment_analysis: SentimentAnalysis {
                sentiment: Sentiment::from_rating(rating),
                confidence_score: 0.8,
                key_points: Vec::new(),
            },
            issue_analysis: IssueAnalysis {
                core_issue: None,
                category: Some(category.as_str().to_string()),
                severity: Some("low".to_string()),
            },
            suggested_resolution: SuggestedResolution::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LocationDescription {
    pub description: String,
}

#[derive(Clone)]
pub struct AnalysisService {
    detector: Detector,
}

impl AnalysisService {
    pub fn new(detector: Detector) -> Self {
        Self { detector }
    }

    fn too_short(&self, text: &str) -> bool {
        text.trim().chars().count() < self.detector.config().min_review_chars
    }

    /// Run one extraction task and return the recovered object as-is.
    #[instrument(skip(self, request), fields(task = kind.label()))]
    pub async fn detect(&self, kind: TaskKind, request: DetectRequest) -> Result<TaskReport> {
        request.validate()?;

        let input = PromptInput {
            review_text: &request.review_text,
            category: request.service_type,
            rating: request.review_rating,
        };

        if let Some(reason) = self
            .detector
            .skip_reason(kind, input.review_text, input.rating)
        {
            let message = match reason {
                SkipReason::PositiveRating => "Skipping positive feedback (rating >= 4)",
                SkipReason::InsufficientText => "Skipping feedback with insufficient text",
            };
            return Ok(TaskReport {
                result: None,
                message: message.to_string(),
            });
        }

        let result = match self.detector.recover_result(kind, input).await? {
            Recovery::Object(object) => Some(Value::Object(object)),
            Recovery::Null => None,
            Recovery::Unparseable(reason) => {
                debug!(%reason, "Discarding unusable model output");
                None
            }
        };

        let message = match (kind, result.is_some()) {
            (TaskKind::Issues, true) => "Issue detected successfully",
            (TaskKind::Issues, false) => "No issue detected",
            (TaskKind::PositiveAspects, true) => "Positive aspects detected successfully",
            (TaskKind::PositiveAspects, false) => "No positive aspects detected",
        };

        Ok(TaskReport {
            result,
            message: message.to_string(),
        })
    }

    #[instrument(skip(self, request))]
    pub async fn analyze_feedback(&self, request: AnalyzeRequest) -> Result<FeedbackAnalysis> {
        request.validate()?;

        if self.too_short(&request.feedback_text) {
            return Ok(FeedbackAnalysis::default());
        }

        let prompt = build_feedback_analysis_prompt(request.prompt_input());
        let raw = self.detector.generate_with_retry(&prompt).await?;

        Ok(match recover(&raw) {
            Recovery::Object(object) => FeedbackAnalysis {
                positive_comments: text_field(&object, "positive_comments"),
                issue_description: text_field(&object, "issue_description"),
                resolution: text_field(&object, "resolution"),
            },
            _ => FeedbackAnalysis::default(),
        })
    }

    #[instrument(skip(self, request))]
    pub async fn enhanced_analysis(&self, request: AnalyzeRequest) -> Result<EnhancedAnalysis> {
        request.validate()?;

        let baseline = EnhancedAnalysis::baseline(request.rating, request.category());
        if self.too_short(&request.feedback_text) {
            return Ok(baseline);
        }

        let prompt =
            build_enhanced_analysis_prompt(request.prompt_input(), request.location.as_deref());
        let raw = self.detector.generate_with_retry(&prompt).await?;

        let analysis = recover(&raw)
            .into_object()
            .and_then(|object| serde_json::from_value(Value::Object(object)).ok());

        Ok(analysis.unwrap_or_else(|| {
            info!("Model analysis unusable, returning baseline");
            baseline
        }))
    }

    #[instrument(skip(self, request), fields(location = %request.location))]
    pub async fn describe_location(&self, request: LocationRequest) -> Result<LocationDescription> {
        request.validate()?;

        let feedbacks = render_feedbacks(&request.feedbacks);
        if feedbacks.trim().is_empty() {
            return Err(crate::error::TriageError::Validation(
                "feedbacks are required".to_string(),
            ));
        }

        let prompt = build_location_description_prompt(&request.location, &feedbacks);
        let description = self.detector.generate_with_retry(&prompt).await?;

        Ok(LocationDescription { description })
    }
}

fn text_field(object: &Map<String, Value>, field: &str) -> Option<String> {
    object
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn render_feedbacks(feedbacks: &Value) -> String {
    match feedbacks {
        Value::String(text) => text.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
