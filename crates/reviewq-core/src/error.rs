//! Error types for reviewq.

use thiserror::Error;
use uuid::Uuid;

use crate::models::TaskStatus;

/// Result type alias using reviewq's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for reviewq operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Task not found
    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Request conflicts with current state (duplicate task, finished task)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Cancel requested for a task a worker already picked up
    #[error("Task {0} is already processing and cannot be cancelled")]
    CannotCancelProcessing(Uuid),

    /// Illegal state machine transition
    #[error("Invalid task transition: {from} -> {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    /// Per-credential admission limit reached
    #[error("Queue full: {0}")]
    QueueFull(String),

    /// Document text extraction failed
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// AI model call failed
    #[error("Inference error: {0}")]
    Inference(String),

    /// Input exceeded the model's context window; caller should split finer
    #[error("Context overflow: {0}")]
    ContextOverflow(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Database(_) => "DATABASE_ERROR",
            Error::NotFound(_) | Error::TaskNotFound(_) => "NOT_FOUND",
            Error::InvalidInput(_) => "INVALID_INPUT",
            Error::Conflict(_) => "CONFLICT",
            Error::CannotCancelProcessing(_) => "CANNOT_CANCEL_PROCESSING",
            Error::InvalidTransition { .. } => "INVALID_TRANSITION",
            Error::QueueFull(_) => "QUEUE_FULL",
            Error::Extraction(_) => "EXTRACTION_FAILED",
            Error::Inference(_) => "INFERENCE_FAILED",
            Error::ContextOverflow(_) => "CONTEXT_OVERFLOW",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
            Error::Io(_) => "IO_ERROR",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
