use thiserror::Error;

#[derive(Error, Debug)]
pub enum TriageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Persistence failed: {message}")]
    Persistence { message: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Inference error: {0}")]
    Inference(#[from] crate::extraction::InferenceError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Operation timeout: {message}")]
    OperationTimeout { message: String },
}

impl TriageError {
    /// Errors that abort the unit of work and roll back the transaction.
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            TriageError::Database(_)
                | TriageError::Persistence { .. }
                | TriageError::OperationTimeout { .. }
        )
    }
}

impl From<validator::ValidationErrors> for TriageError {
    fn from(errors: validator::ValidationErrors) -> Self {
        TriageError::Validation(errors.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TriageError>;
