//! Core types for the ledger
//!
//! All types are designed for:
//! - Stable JSON documents (the same shape in both backends)
//! - Exact arithmetic (Decimal for coins)
//! - Tolerant reads: `Stored*` mirrors carry every field as optional so a
//!   partially written record can be detected instead of failing the load

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Transaction id (1-based, strictly increasing)
pub type TxId = u64;

/// Account identifier
///
/// Id `0` is the system account: it mints rewards and absorbs burns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(u64);

impl AccountId {
    /// The mint/burn account
    pub const SYSTEM: AccountId = AccountId(0);

    /// Create new account ID
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw numeric id
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Whether this is the system account
    pub fn is_system(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for AccountId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Transaction tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum TransactionType {
    /// Issued by the system account
    Reward,
    /// Account to account transfer
    Transfer,
}

impl TransactionType {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Reward => "reward",
            TransactionType::Transfer => "transfer",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reward" => Ok(TransactionType::Reward),
            "transfer" => Ok(TransactionType::Transfer),
            other => Err(crate::Error::Other(format!("Unknown transaction type: {}", other))),
        }
    }
}

/// Committed transaction (immutable once written)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Sequential id, doubles as the ledger order
    pub id: TxId,

    /// Sending account (`0` for issuance)
    pub sender: AccountId,

    /// Receiving account
    pub receiver: AccountId,

    /// Transferred amount
    pub amount: Decimal,

    /// Burned fee, zero for system-issued transactions
    pub fee: Decimal,

    /// Transaction tag
    #[serde(rename = "type")]
    pub tx_type: TransactionType,

    /// Creation time (informational)
    pub timestamp: DateTime<Utc>,
}

impl Transaction {
    /// Amount plus fee, the sender's debit; `None` on overflow
    pub fn total(&self) -> Option<Decimal> {
        self.amount.checked_add(self.fee)
    }

    /// Effect of this transaction on the circulating supply, `None` on overflow
    ///
    /// Mints add `amount`, fees are burned, and coins sent back to the
    /// system account leave circulation together with their fee.
    pub fn supply_delta(&self) -> Option<Decimal> {
        let mut delta = -self.fee;
        if self.sender.is_system() {
            delta = delta.checked_add(self.amount)?;
        }
        if self.receiver.is_system() {
            delta = delta.checked_sub(self.total()?)?;
        }
        Some(delta)
    }
}

/// Transaction as read back from a backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoredTransaction {
    /// Transaction id
    pub id: Option<TxId>,
    /// Sending account
    pub sender: Option<AccountId>,
    /// Receiving account
    pub receiver: Option<AccountId>,
    /// Transferred amount
    pub amount: Option<Decimal>,
    /// Burned fee
    pub fee: Option<Decimal>,
    /// Transaction tag, `transfer` when absent
    #[serde(rename = "type")]
    pub tx_type: Option<TransactionType>,
    /// Creation time
    pub timestamp: Option<DateTime<Utc>>,
}

impl StoredTransaction {
    /// Record whose body could not be decoded at all
    pub fn unreadable(id: TxId) -> Self {
        Self {
            id: Some(id),
            ..Default::default()
        }
    }

    /// Convert into a transaction, `None` if a required field is missing
    pub fn into_transaction(self) -> Option<Transaction> {
        Some(Transaction {
            id: self.id?,
            sender: self.sender?,
            receiver: self.receiver?,
            amount: self.amount?,
            fee: self.fee?,
            tx_type: self.tx_type.unwrap_or(TransactionType::Transfer),
            timestamp: self.timestamp.unwrap_or_default(),
        })
    }
}

/// Cached balance of one account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    /// Account id
    pub id: AccountId,

    /// Balance at `index`
    #[serde(default)]
    pub balance: Decimal,

    /// Ledger index this snapshot was written at
    #[serde(default)]
    pub index: TxId,
}

/// Ledger metadata singleton
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerMetadata {
    /// Circulating supply
    pub coins: Decimal,

    /// Id of the last committed transaction
    pub index: TxId,

    /// Fingerprint of the full balance mapping
    pub accounts_fingerprint: String,
}

/// Metadata as read back from a backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoredMetadata {
    /// Circulating supply
    pub coins: Option<Decimal>,
    /// Last committed transaction id
    pub index: Option<TxId>,
    /// Balance mapping fingerprint
    pub accounts_fingerprint: Option<String>,
}

impl StoredMetadata {
    /// Convert into metadata, `None` if a required field is missing
    pub fn into_metadata(self) -> Option<LedgerMetadata> {
        Some(LedgerMetadata {
            coins: self.coins?,
            index: self.index?,
            accounts_fingerprint: self.accounts_fingerprint?,
        })
    }
}

/// The three persisted record kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// Transaction log
    Transactions,
    /// Per-account balance cache
    Accounts,
    /// Metadata singleton
    Metadata,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Transactions => write!(f, "transactions"),
            RecordKind::Accounts => write!(f, "accounts"),
            RecordKind::Metadata => write!(f, "metadata"),
        }
    }
}
