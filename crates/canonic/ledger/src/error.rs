use canonic_types::Fingerprint;
use thiserror::Error;

/// Result type for storage backends.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Backend errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend temporarily unable to accept writes.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupt ledger data: {0}")]
    Corrupt(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Io(_) | StorageError::Unavailable(_))
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("append failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("cannot supersede entry {sequence} for {fingerprint}: {reason}")]
    InvalidSupersede {
        fingerprint: Fingerprint,
        sequence: u64,
        reason: String,
    },

    #[error("{fingerprint} already has effective entry {existing}; a new attempt must supersede it")]
    Conflict {
        fingerprint: Fingerprint,
        existing: u64,
    },

    #[error("invalid range: from {from} > to {to}")]
    InvalidRange { from: u64, to: u64 },
}

impl LedgerError {
    /// Whether the failure came from storage availability rather than the
    /// content of the request.
    pub fn is_storage_failure(&self) -> bool {
        matches!(
            self,
            LedgerError::Storage(_) | LedgerError::RetriesExhausted { .. }
        )
    }
}
