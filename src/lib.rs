pub mod api;
pub mod config;
pub mod error;
pub mod extraction;
pub mod pipeline;
pub mod review;
pub mod storage;

pub use config::Config;
pub use error::{Result, TriageError};

// Re-export the pipeline entry points for convenience
pub use pipeline::{FeedbackPipeline, ImportRow, ImportSummary, SubmissionOutcome};

// Re-export the review workflow
pub use review::{FeedbackFilter, FeedbackQuery, Issue, RejectedIssue, ReviewService};

// Re-export storage types
pub use storage::{
    create_pool, run_migrations, FeedbackStore, InMemoryFeedbackStore, MatchPolicy,
    PgFeedbackStore, StoreTransaction,
};

// Re-export extraction types
pub use extraction::{
    AnalysisService, Detection, Detector, InferenceClient, InferenceError, MockInferenceClient,
    OllamaClient, OllamaConfig, Recovery, ServiceCategory, TaskKind,
};
