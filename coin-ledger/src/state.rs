//! In-memory ledger state
//!
//! One `LedgerState` is owned by the facade for the lifetime of a run. Every
//! committed transaction, whether replayed by a full scan or appended live,
//! goes through [`LedgerState::apply`], so both paths produce identical
//! balances by construction.

use crate::error::{Error, Result};
use crate::fingerprint::accounts_fingerprint;
use crate::types::{AccountId, AccountRecord, LedgerMetadata, Transaction, TxId};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};

/// Checked result of applying one transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreparedApply {
    sender: Option<(AccountId, Decimal)>,
    receiver: (AccountId, Decimal),
    coins: Decimal,
}

/// Balances, supply and bookkeeping for one run
#[derive(Debug, Clone, Default)]
pub struct LedgerState {
    /// Current balance per account
    pub balances: BTreeMap<AccountId, Decimal>,

    /// Circulating supply
    pub coins: Decimal,

    /// Id of the last committed transaction
    pub index: TxId,

    /// Senders rejected for insufficient balance
    pub failed_senders: BTreeSet<AccountId>,

    /// Transactions accepted but not yet written (buffered policy)
    pub pending: Vec<Transaction>,

    dirty_accounts: BTreeSet<AccountId>,
    metadata_dirty: bool,
    rewrite_accounts: bool,
}

impl LedgerState {
    /// Empty state (genesis)
    pub fn new() -> Self {
        Self::default()
    }

    /// State trusted from the cache
    pub fn from_cache(balances: BTreeMap<AccountId, Decimal>, metadata: &LedgerMetadata) -> Self {
        Self {
            balances,
            coins: metadata.coins,
            index: metadata.index,
            ..Default::default()
        }
    }

    /// Balance of an account, zero if never touched
    pub fn balance(&self, account: AccountId) -> Decimal {
        self.balances.get(&account).copied().unwrap_or(Decimal::ZERO)
    }

    /// Apply a committed transaction
    ///
    /// Debits `amount + fee` from a non-system sender, credits `amount` to the
    /// receiver, adjusts supply and advances the index. On overflow nothing
    /// changes.
    pub fn apply(&mut self, tx: &Transaction) -> Result<()> {
        let prepared = self.prepare(tx).ok_or(Error::Overflow(tx.id))?;
        self.commit(tx, prepared);
        Ok(())
    }

    /// Balances and supply after `tx`, `None` if any of them overflows
    pub fn prepare(&self, tx: &Transaction) -> Option<PreparedApply> {
        let sender = if tx.sender.is_system() {
            None
        } else {
            let debited = self.balance(tx.sender).checked_sub(tx.total()?)?;
            Some((tx.sender, debited))
        };

        let receiver_base = match sender {
            Some((id, debited)) if id == tx.receiver => debited,
            _ => self.balance(tx.receiver),
        };
        let receiver = (tx.receiver, receiver_base.checked_add(tx.amount)?);
        let coins = self.coins.checked_add(tx.supply_delta()?)?;

        Some(PreparedApply {
            sender,
            receiver,
            coins,
        })
    }

    /// Apply the outcome of [`LedgerState::prepare`] for the same `tx`
    pub fn commit(&mut self, tx: &Transaction, prepared: PreparedApply) {
        if let Some((id, balance)) = prepared.sender {
            self.balances.insert(id, balance);
            self.dirty_accounts.insert(id);
        }

        let (id, balance) = prepared.receiver;
        self.balances.insert(id, balance);
        self.dirty_accounts.insert(id);

        self.coins = prepared.coins;
        self.index = self.index.max(tx.id);
        self.metadata_dirty = true;
    }

    /// Non-system accounts, ascending
    pub fn user_accounts(&self) -> Vec<AccountId> {
        self.balances
            .keys()
            .copied()
            .filter(|id| !id.is_system())
            .collect()
    }

    /// Fingerprint of the current balance mapping
    pub fn fingerprint(&self) -> String {
        accounts_fingerprint(&self.balances)
    }

    /// Metadata snapshot for the current state
    pub fn metadata(&self) -> LedgerMetadata {
        LedgerMetadata {
            coins: self.coins,
            index: self.index,
            accounts_fingerprint: self.fingerprint(),
        }
    }

    /// Account records that must be written on the next flush
    pub fn dirty_records(&self) -> Vec<AccountRecord> {
        let ids: Box<dyn Iterator<Item = &AccountId>> = if self.rewrite_accounts {
            Box::new(self.balances.keys())
        } else {
            Box::new(self.dirty_accounts.iter())
        };

        ids.map(|id| AccountRecord {
            id: *id,
            balance: self.balance(*id),
            index: self.index,
        })
        .collect()
    }

    /// Whether the account set must be replaced wholesale on flush
    pub fn rewrite_accounts(&self) -> bool {
        self.rewrite_accounts
    }

    /// Whether anything awaits a flush
    pub fn is_dirty(&self) -> bool {
        self.metadata_dirty
            || self.rewrite_accounts
            || !self.dirty_accounts.is_empty()
            || !self.pending.is_empty()
    }

    /// Force the next flush to replace every account record and the metadata
    pub fn mark_rebuilt(&mut self) {
        self.rewrite_accounts = true;
        self.metadata_dirty = true;
    }

    /// Clear dirty tracking after a successful flush
    pub fn mark_clean(&mut self) {
        self.dirty_accounts.clear();
        self.metadata_dirty = false;
        self.rewrite_accounts = false;
    }
}
