//! One extraction task for one piece of feedback: prompt, inference,
//! recovery, interpretation and, on hard failure, the keyword fallback.
//!
//! Nothing here touches storage, so detection can run before the
//! persistence transaction is opened.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::fallback;
use super::interpreter::{self, MalformedResult};
use super::models::{Candidate, FeedbackRecord, TaskKind};
use super::ollama_client::{InferenceClient, InferenceError};
use super::prompt::{build_extraction_prompt, PromptInput};
use super::recovery::{recover, Recovery};
use crate::config::ExtractionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Rating of 4 or more never yields issues.
    PositiveRating,
    /// Review text too short to analyse.
    InsufficientText,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindingOrigin {
    Model,
    KeywordFallback,
}

/// Outcome of one extraction task.
#[derive(Debug, Clone, PartialEq)]
pub enum Detection {
    Skipped(SkipReason),
    /// Nothing to persist. `after_failure` is set when the inference path
    /// failed and the fallback found nothing either.
    NoFinding { after_failure: bool },
    Found {
        origin: FindingOrigin,
        /// Full pre-split result, written to the feedback row once.
        audit: Value,
        candidates: Vec<Candidate>,
    },
}

impl Detection {
    pub fn candidates(&self) -> &[Candidate] {
        match self {
            Detection::Found { candidates, .. } => candidates,
            _ => &[],
        }
    }

    pub fn used_fallback(&self) -> bool {
        matches!(
            self,
            Detection::Found {
                origin: FindingOrigin::KeywordFallback,
                ..
            }
        )
    }
}

/// Hard failures of the inference path, the ones that route to the fallback.
#[derive(Debug, thiserror::Error)]
enum InferencePathFailure {
    #[error(transparent)]
    Transport(#[from] InferenceError),
    #[error(transparent)]
    MalformedResult(#[from] MalformedResult),
}

#[derive(Clone)]
pub struct Detector {
    client: Arc<dyn InferenceClient>,
    config: ExtractionConfig,
}

impl Detector {
    pub fn new(client: Arc<dyn InferenceClient>, config: ExtractionConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Whether a task should run at all for this input.
    pub fn skip_reason(&self, kind: TaskKind, review_text: &str, rating: i32) -> Option<SkipReason> {
        if kind == TaskKind::Issues && rating >= 4 {
            return Some(SkipReason::PositiveRating);
        }
        if review_text.trim().chars().count() < self.config.min_review_chars {
            return Some(SkipReason::InsufficientText);
        }
        None
    }

    #[instrument(skip(self, feedback), fields(feedback_id = %feedback.id, task = kind.label()))]
    pub async fn detect(&self, kind: TaskKind, feedback: &FeedbackRecord) -> Detection {
        let input = PromptInput {
            review_text: &feedback.review_text,
            category: feedback.service_type,
            rating: feedback.review_rating,
        };

        if let Some(reason) = self.skip_reason(kind, input.review_text, input.rating) {
            debug!(?reason, "Skipping {} extraction", kind.label());
            return Detection::Skipped(reason);
        }

        match self.run_model_path(kind, input).await {
            Ok(Some((audit, candidates))) => {
                info!(candidates = candidates.len(), "Model produced a {} finding", kind.label());
                Detection::Found {
                    origin: FindingOrigin::Model,
                    audit,
                    candidates,
                }
            }
            Ok(None) => {
                info!("No {} detected", kind.label());
                Detection::NoFinding {
                    after_failure: false,
                }
            }
            Err(failure) => {
                warn!(error = %failure, "Inference path failed, trying keyword fallback");
                match fallback::detect(kind, input.category, input.review_text) {
                    Some(finding) => Detection::Found {
                        origin: FindingOrigin::KeywordFallback,
                        audit: finding.to_audit(),
                        candidates: interpreter::candidates_of(&finding),
                    },
                    None => {
                        info!("Keyword fallback found nothing, no {} created", kind.label());
                        Detection::NoFinding {
                            after_failure: true,
                        }
                    }
                }
            }
        }
    }

    /// Prompt, generate and recover, without interpretation or fallback.
    /// Used by the analysis endpoints that return raw results.
    pub async fn recover_result(
        &self,
        kind: TaskKind,
        input: PromptInput<'_>,
    ) -> Result<Recovery, InferenceError> {
        let prompt = build_extraction_prompt(input, kind);
        let raw = self.generate_with_retry(&prompt).await?;
        Ok(recover(&raw))
    }

    pub async fn generate_with_retry(&self, prompt: &str) -> Result<String, InferenceError> {
        match self.client.generate(prompt).await {
            Ok(text) => Ok(text),
            Err(e) if self.config.retry_transport_once => {
                warn!(error = %e, "Inference call failed, retrying once");
                self.client.generate(prompt).await
            }
            Err(e) => Err(e),
        }
    }

    pub fn client(&self) -> &Arc<dyn InferenceClient> {
        &self.client
    }

    async fn run_model_path(
        &self,
        kind: TaskKind,
        input: PromptInput<'_>,
    ) -> Result<Option<(Value, Vec<Candidate>)>, InferencePathFailure> {
        let object = match self.recover_result(kind, input).await? {
            Recovery::Object(object) => object,
            Recovery::Null => return Ok(None),
            Recovery::Unparseable(reason) => {
                warn!(%reason, "Model response unusable, treating as no result");
                return Ok(None);
            }
        };

        let (_, candidates) = interpreter::interpret(&object, input.category)?;
        Ok(Some((Value::Object(object), candidates)))
    }
}
