//! Error types for Mnemos

use thiserror::Error;

/// Result type alias for Mnemos operations
pub type Result<T> = std::result::Result<T, MemoryError>;

/// Main error type for Mnemos
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Validation failed: missing or invalid fields: {}", .0.join(", "))]
    Validation(Vec<String>),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Memory not found: {0}")]
    NotFound(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Vector dimension mismatch: collection is {expected}, got {actual} (run migrate)")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Graph store unavailable: {0}")]
    GraphUnavailable(String),

    #[error("Reranker unavailable: {0}")]
    Reranker(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Scheduled job error: {0}")]
    Job(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MemoryError {
    /// Check if the error is retryable with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, MemoryError::StoreUnavailable(_))
    }

    /// Errors that degrade a feature instead of failing the request
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            MemoryError::GraphUnavailable(_)
                | MemoryError::Reranker(_)
                | MemoryError::Inference(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(MemoryError::StoreUnavailable("conn reset".into()).is_retryable());
        assert!(!MemoryError::Validation(vec!["content".into()]).is_retryable());
        assert!(!MemoryError::DimensionMismatch {
            expected: 384,
            actual: 768
        }
        .is_retryable());
    }

    #[test]
    fn degradable_classification() {
        assert!(MemoryError::GraphUnavailable("down".into()).is_degradable());
        assert!(MemoryError::Reranker("model load".into()).is_degradable());
        assert!(!MemoryError::Embedding("empty input".into()).is_degradable());
    }
}
