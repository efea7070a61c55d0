//! Feedback extraction: prompt construction, inference, response recovery,
//! result interpretation and the keyword fallback.
//!
//! Nothing in this module touches storage.

pub mod analysis;
pub mod detector;
pub mod fallback;
pub mod interpreter;
pub mod models;
pub mod ollama_client;
pub mod prompt;
pub mod recovery;

pub use analysis::{AnalysisService, AnalyzeRequest, DetectRequest, LocationRequest};
pub use detector::{Detection, Detector, FindingOrigin, SkipReason};
pub use interpreter::MalformedResult;
pub use models::*;
pub use ollama_client::{
    InferenceClient, InferenceError, MockInferenceClient, MockReply, OllamaClient, OllamaConfig,
};
pub use recovery::{recover, Recovery};
