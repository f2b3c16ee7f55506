//! Transaction processor
//!
//! Validates and commits single transactions, and drives the bulk
//! operations built on top of [`TransactionProcessor::append`]. All bulk
//! operations are plain sequential loops; ids are only correct when appends
//! never overlap.

use crate::{
    config::{Config, SelfTransferPolicy, WritePolicy},
    error::RejectReason,
    metrics::Metrics,
    state::LedgerState,
    storage::LedgerStore,
    types::{AccountId, Transaction, TransactionType, TxId},
};
use chrono::Utc;
use rand::Rng;
use rust_decimal::{Decimal, RoundingStrategy};

/// Random transfer amounts are drawn from this inclusive range
const RANDOM_AMOUNT_MIN: u32 = 1;
const RANDOM_AMOUNT_MAX: u32 = 100;

/// Summary of a bulk operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkOutcome {
    /// Ids committed, in order
    pub committed: Vec<TxId>,

    /// Rejected attempts
    pub rejected: Vec<RejectReason>,

    /// Stopped early because no account could pay any more
    pub exhausted: bool,
}

/// Validates, persists and applies transactions
#[derive(Debug, Clone)]
pub struct TransactionProcessor {
    fee_rate_percent: Decimal,
    fee_scale: u32,
    reward_amount: Decimal,
    self_transfer: SelfTransferPolicy,
    write_policy: WritePolicy,
    metrics: Metrics,
}

impl TransactionProcessor {
    /// Processor using the ledger economics from `config`
    pub fn new(config: &Config, metrics: Metrics) -> Self {
        Self {
            fee_rate_percent: config.fee_rate_percent,
            fee_scale: config.fee_scale,
            reward_amount: config.reward_amount,
            self_transfer: config.self_transfer,
            write_policy: config.write_policy,
            metrics,
        }
    }

    /// Fee for `amount`, zero for system-issued transactions; `None` on overflow
    pub fn fee_for(&self, sender: AccountId, amount: Decimal) -> Option<Decimal> {
        if sender.is_system() {
            return Some(Decimal::ZERO);
        }

        let fee = amount
            .checked_mul(self.fee_rate_percent)?
            .checked_div(Decimal::ONE_HUNDRED)?;
        Some(fee.round_dp_with_strategy(self.fee_scale, RoundingStrategy::MidpointAwayFromZero))
    }

    /// Validate and commit one transaction
    ///
    /// On rejection nothing changes except the failed-senders set. Under the
    /// write-through policy the record is durable before balances move; under
    /// the buffered policy it is queued in `state.pending` until the next flush.
    pub async fn append(
        &self,
        state: &mut LedgerState,
        store: &dyn LedgerStore,
        sender: AccountId,
        receiver: AccountId,
        amount: Decimal,
        tx_type: TransactionType,
    ) -> Result<TxId, RejectReason> {
        let result = self
            .try_append(state, store, sender, receiver, amount, tx_type)
            .await;

        match &result {
            Ok(tx_id) => self.metrics.record_commit(*tx_id),
            Err(reason) => {
                self.metrics.record_rejection(reason.label());
                tracing::warn!(%sender, %receiver, %amount, "Transaction rejected: {}", reason);
            }
        }

        result
    }

    async fn try_append(
        &self,
        state: &mut LedgerState,
        store: &dyn LedgerStore,
        sender: AccountId,
        receiver: AccountId,
        amount: Decimal,
        tx_type: TransactionType,
    ) -> Result<TxId, RejectReason> {
        if amount.is_sign_negative() {
            return Err(RejectReason::InvalidAmount(amount));
        }

        let tx_id = state.index + 1;
        let fee = self
            .fee_for(sender, amount)
            .ok_or(RejectReason::InvalidAmount(amount))?;
        let total = amount
            .checked_add(fee)
            .ok_or(RejectReason::InvalidAmount(amount))?;

        if !sender.is_system() {
            let balance = state.balance(sender);
            if balance < total {
                state.failed_senders.insert(sender);
                return Err(RejectReason::InsufficientBalance {
                    sender,
                    balance,
                    required: total,
                });
            }
        }

        if sender == receiver
            && !sender.is_system()
            && self.self_transfer == SelfTransferPolicy::Reject
        {
            return Err(RejectReason::SelfTransfer(sender));
        }

        let tx = Transaction {
            id: tx_id,
            sender,
            receiver,
            amount,
            fee,
            tx_type,
            timestamp: Utc::now(),
        };

        // nothing is persisted for a transaction whose balances would overflow
        let prepared = state
            .prepare(&tx)
            .ok_or(RejectReason::InvalidAmount(amount))?;

        match self.write_policy {
            WritePolicy::WriteThrough => {
                store
                    .write_transaction(&tx)
                    .await
                    .map_err(|e| RejectReason::PersistFailure {
                        tx_id,
                        reason: e.to_string(),
                    })?;
                tracing::debug!(tx_id, %sender, %receiver, %amount, %fee, "Transaction saved");
            }
            WritePolicy::Buffered => {
                state.pending.push(tx.clone());
                tracing::debug!(tx_id, %sender, %receiver, %amount, %fee, "Transaction queued");
            }
        }

        state.commit(&tx, prepared);
        Ok(tx_id)
    }

    /// Reward every known non-system account
    ///
    /// The account set is snapshotted before the loop.
    pub async fn send_rewards(
        &self,
        state: &mut LedgerState,
        store: &dyn LedgerStore,
        amount: Option<Decimal>,
    ) -> BulkOutcome {
        let reward = amount.unwrap_or(self.reward_amount);
        let accounts = state.user_accounts();
        let mut outcome = BulkOutcome::default();

        if accounts.is_empty() {
            tracing::info!("No accounts to reward");
            return outcome;
        }

        tracing::info!(accounts = accounts.len(), %reward, "Sending rewards to every account");

        for account in accounts {
            match self
                .append(state, store, AccountId::SYSTEM, account, reward, TransactionType::Reward)
                .await
            {
                Ok(tx_id) => outcome.committed.push(tx_id),
                Err(reason) => outcome.rejected.push(reason),
            }
        }

        outcome
    }

    /// Append `count` random transfers between existing accounts
    ///
    /// Stops early, without error, once every account has failed a transfer
    /// for lack of funds, or on the first persistence failure.
    pub async fn fill_history<R: Rng + Send>(
        &self,
        state: &mut LedgerState,
        store: &dyn LedgerStore,
        rng: &mut R,
        count: u64,
    ) -> BulkOutcome {
        let accounts = state.user_accounts();
        let mut outcome = BulkOutcome::default();

        if accounts.len() < 2 {
            tracing::warn!(accounts = accounts.len(), "Not enough accounts for transfers");
            return outcome;
        }

        tracing::info!(count, "Adding random transfers");
        state.failed_senders.clear();

        while (outcome.committed.len() as u64) < count {
            if accounts.iter().all(|a| state.failed_senders.contains(a)) {
                tracing::info!(
                    committed = outcome.committed.len(),
                    "Every account is out of funds, stopping"
                );
                outcome.exhausted = true;
                break;
            }

            // two distinct indices, uniformly
            let from = rng.gen_range(0..accounts.len());
            let mut to = rng.gen_range(0..accounts.len() - 1);
            if to >= from {
                to += 1;
            }
            let amount = Decimal::from(rng.gen_range(RANDOM_AMOUNT_MIN..=RANDOM_AMOUNT_MAX));

            match self
                .append(
                    state,
                    store,
                    accounts[from],
                    accounts[to],
                    amount,
                    TransactionType::Transfer,
                )
                .await
            {
                Ok(tx_id) => outcome.committed.push(tx_id),
                Err(reason @ RejectReason::InsufficientBalance { .. }) => {
                    outcome.rejected.push(reason)
                }
                Err(reason) => {
                    outcome.rejected.push(reason);
                    break;
                }
            }
        }

        outcome
    }

    /// Bootstrap accounts `1..=count` with one reward each
    ///
    /// The caller guarantees the ledger is empty.
    pub async fn start_history(
        &self,
        state: &mut LedgerState,
        store: &dyn LedgerStore,
        count: u64,
    ) -> BulkOutcome {
        tracing::info!(accounts = count, reward = %self.reward_amount, "New ledger is started");
        let mut outcome = BulkOutcome::default();

        for id in 1..=count {
            match self
                .append(
                    state,
                    store,
                    AccountId::SYSTEM,
                    AccountId::new(id),
                    self.reward_amount,
                    TransactionType::Reward,
                )
                .await
            {
                Ok(tx_id) => outcome.committed.push(tx_id),
                Err(reason) => outcome.rejected.push(reason),
            }
        }

        outcome
    }
}
