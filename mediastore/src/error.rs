//! Store error types

use thiserror::Error;

/// Errors that can occur in the mediastore
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid stored value: {0}")]
    InvalidValue(String),
}

impl StoreError {
    /// Check if this is a transition conflict (caller raced another writer)
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_conflict() {
        assert!(StoreError::Conflict("task moved".to_string()).is_conflict());
        assert!(!StoreError::NotFound("task".to_string()).is_conflict());
    }
}
