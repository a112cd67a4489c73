//! Ranking store error types.

use thiserror::Error;

/// Ranking store operation errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Core(#[from] pathrank_core::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Whether the failure is a broken caller contract rather than a transient storage fault.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            StoreError::Core(pathrank_core::Error::InvalidDerivativeGraphKey(_))
        )
    }
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
