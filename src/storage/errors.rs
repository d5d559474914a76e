//! # Storage Errors
//!
//! Failure vocabulary of the document-store collaborator. The transaction
//! variants mirror the conflict signals a replicated document store reports.

use thiserror::Error;

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Document store errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    // ==================
    // Transaction Errors
    // ==================
    /// Another transaction committed a conflicting write
    #[error("Write conflict: {0}")]
    WriteConflict(String),

    /// The snapshot the transaction reads from is no longer available
    #[error("Snapshot unavailable: {0}")]
    SnapshotUnavailable(String),

    /// The session references a transaction the store does not know
    #[error("No such transaction: {0}")]
    NoSuchTransaction(String),

    /// The transaction was already committed, aborted, or expired
    #[error("Transaction closed: {0}")]
    TransactionClosed(String),

    /// The call exceeded its maximum execution time
    #[error("Storage call exceeded {0}ms")]
    Timeout(u64),

    // ==================
    // Request Errors
    // ==================
    /// A document with the same identifier already exists
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Filter document uses an unknown operator or malformed operand
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// Update document uses an unknown operator or malformed operand
    #[error("Invalid update: {0}")]
    InvalidUpdate(String),

    // ==================
    // Internal Errors
    // ==================
    /// Store-side failure
    #[error("Storage error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Whether the failure is transient and the whole attempt may be replayed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::WriteConflict(_)
                | StoreError::SnapshotUnavailable(_)
                | StoreError::NoSuchTransaction(_)
                | StoreError::TransactionClosed(_)
                | StoreError::Timeout(_)
        )
    }

    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::WriteConflict(_) => "WRITE_CONFLICT",
            StoreError::SnapshotUnavailable(_) => "SNAPSHOT_UNAVAILABLE",
            StoreError::NoSuchTransaction(_) => "NO_SUCH_TRANSACTION",
            StoreError::TransactionClosed(_) => "TRANSACTION_CLOSED",
            StoreError::Timeout(_) => "STORAGE_TIMEOUT",
            StoreError::DuplicateKey(_) => "DUPLICATE_KEY",
            StoreError::InvalidFilter(_) => "INVALID_FILTER",
            StoreError::InvalidUpdate(_) => "INVALID_UPDATE",
            StoreError::Internal(_) => "STORAGE_ERROR",
        }
    }
}
