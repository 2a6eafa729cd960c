//! Error types for the ledger engine
//!
//! Transfer rejections (bad amount, unknown account, lack of funds, lock
//! timeout) are not errors: they are [`TransferStatus`](crate::types::TransferStatus)
//! values. This enum only carries faults the caller cannot branch around.

use crate::types::AccountId;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Journal or snapshot content that cannot be replayed
    #[error("Corrupt journal: {0}")]
    Corruption(String),

    /// Account not found
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Account identifier space exhausted
    #[error("Account identifiers exhausted")]
    AccountIdsExhausted,

    /// Balance arithmetic left the decimal range
    #[error("Balance overflow on account {0}")]
    BalanceOverflow(AccountId),

    /// Concurrency error (writer mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metrics registration error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl Error {
    /// Whether this error must abort startup rather than be reported per call
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Corruption(_) | Error::AccountIdsExhausted | Error::Config(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::AccountNotFound(AccountId::new(42));
        assert_eq!(err.to_string(), "Account not found: 42");

        let err = Error::Corruption("gap at 7".to_string());
        assert!(err.to_string().contains("gap at 7"));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Error::Corruption("x".into()).is_fatal());
        assert!(Error::AccountIdsExhausted.is_fatal());
        assert!(!Error::Storage("disk full".into()).is_fatal());
        assert!(!Error::AccountNotFound(AccountId::new(1)).is_fatal());
    }
}
