//! Error types for the ledger

use crate::types::{AccountId, TxId};
use rust_decimal::Decimal;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Fatal ledger errors
///
/// Anything in here aborts the current run. Per-transaction validation
/// outcomes live in [`RejectReason`] instead.
#[derive(Error, Debug)]
pub enum Error {
    /// Backend could not be opened or reached
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Storage error (RocksDB, file layout)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operation not allowed in the current lifecycle phase
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Applying a transaction would overflow a balance or the supply
    #[error("Arithmetic overflow applying transaction #{0}")]
    Overflow(TxId),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(format!("Failed to parse config: {}", err))
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}

/// Why a single append was refused
///
/// A rejection never mutates balances or the ledger index.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Sender cannot cover `amount + fee`
    #[error("Insufficient balance on account {sender}: has {balance}, needs {required}")]
    InsufficientBalance {
        /// Sending account
        sender: AccountId,
        /// Balance at validation time
        balance: Decimal,
        /// Amount plus fee
        required: Decimal,
    },

    /// Sender and receiver are the same non-system account
    #[error("Self transfer rejected for account {0}")]
    SelfTransfer(AccountId),

    /// Amount below zero
    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),

    /// Transaction record could not be written
    #[error("Failed to persist transaction #{tx_id}: {reason}")]
    PersistFailure {
        /// Id the transaction would have received
        tx_id: TxId,
        /// Backend error message
        reason: String,
    },
}

impl RejectReason {
    /// Short label, used for metrics
    pub fn label(&self) -> &'static str {
        match self {
            RejectReason::InsufficientBalance { .. } => "insufficient_balance",
            RejectReason::SelfTransfer(_) => "self_transfer",
            RejectReason::InvalidAmount(_) => "invalid_amount",
            RejectReason::PersistFailure { .. } => "persist_failure",
        }
    }
}
