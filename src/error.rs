//! Error types for the FinVoice orchestrator

use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Turn Errors
    // =============================

    #[error("Model error: {0}")]
    ModelError(String),

    #[error("Model did not respond within {0} seconds")]
    ModelTimeout(u64),

    #[error("Exceeded {0} model round trips in a single turn")]
    MaxRoundTripsExceeded(u32),

    // =============================
    // Tool Errors
    // =============================

    #[error("Tool error: {0}")]
    ToolError(String),

    #[error("Invalid tool input: {0}")]
    InvalidToolInput(String),

    // =============================
    // Persistence Errors
    // =============================

    #[error("Checkpoint version conflict for session {session_id}: expected {expected}, found {actual}")]
    VersionConflict {
        session_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("Checkpoint conflict could not be resolved: {0}")]
    CheckpointConflict(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl OrchestrationError {
    /// True for the optimistic-concurrency failure a caller may resolve by reloading.
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, OrchestrationError::VersionConflict { .. })
    }
}
