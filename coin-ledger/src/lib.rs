//! Coin Ledger
//!
//! Append-only coin transaction log with cached account balances.
//!
//! # Architecture
//!
//! - **Transaction log**: immutable records, ids contiguous from 1
//! - **Balance cache**: one record per account plus a metadata singleton
//! - **Consistency check**: on open the cache is trusted only if the metadata
//!   matches the log (last id, count) and the account fingerprint
//! - **Full scan**: otherwise balances are rebuilt by replaying the log
//! - **Pluggable storage**: JSON files or RocksDB documents
//!
//! # Invariants
//!
//! - `balance(a)` equals credits minus debits over the committed log
//! - `coins` equals minted minus burned (fees and coins sent to account 0)
//! - Replay of the log reproduces the live state exactly

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod ledger;
pub mod metrics;
pub mod processor;
pub mod state;
pub mod storage;
pub mod types;
pub mod validator;

// Re-exports
pub use config::{Config, RunOptions, TransferRequest};
pub use error::{Error, RejectReason, Result};
pub use ledger::{Ledger, LedgerSummary, Phase};
pub use storage::LedgerStore;
pub use types::{AccountId, Transaction, TransactionType, TxId};
pub use validator::{Decision, DriftReason};
