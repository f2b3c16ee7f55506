//! Main ledger orchestration layer
//!
//! This module ties together storage, the consistency validator, the balance
//! engine and the transaction processor into one lifecycle:
//!
//! ```text
//! Closed -> Opening -> Reconciled -> Mutating* -> Flushing -> Closed
//!                   \-> Erased -> Closed
//! ```
//!
//! # Example
//!
//! ```no_run
//! use coin_ledger::{Config, Ledger, RunOptions};
//!
//! #[tokio::main]
//! async fn main() -> coin_ledger::Result<()> {
//!     let options = RunOptions {
//!         count: Some(10),
//!         ..Default::default()
//!     };
//!     let summary = Ledger::run(Config::default(), &options).await?;
//!     println!("coins={} index={}", summary.coins, summary.index);
//!     Ok(())
//! }
//! ```

use crate::{
    config::{RunOptions, TransferRequest},
    error::RejectReason,
    metrics::Metrics,
    processor::{BulkOutcome, TransactionProcessor},
    state::LedgerState,
    storage::{open_store, LedgerStore},
    types::{AccountId, AccountRecord, RecordKind, Transaction, TransactionType, TxId},
    validator::{self, Decision},
    Config, Error, Result,
};
use rand::{rngs::StdRng, SeedableRng};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

/// Lifecycle phase of a [`Ledger`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No backend resources held
    Closed,
    /// Backend open, state not yet loaded
    Opening,
    /// State loaded and consistent with the backend
    Reconciled,
    /// Mutations applied since the last flush
    Mutating,
    /// Writing dirty state to the backend
    Flushing,
    /// Every record wiped; only `close` is accepted
    Erased,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Closed => "closed",
            Phase::Opening => "opening",
            Phase::Reconciled => "reconciled",
            Phase::Mutating => "mutating",
            Phase::Flushing => "flushing",
            Phase::Erased => "erased",
        };
        f.write_str(name)
    }
}

/// What one [`Ledger::run`] did
#[derive(Debug, Clone)]
pub struct LedgerSummary {
    /// Circulating supply after the run
    pub coins: Decimal,

    /// Last committed transaction id after the run
    pub index: TxId,

    /// Final balances
    pub balances: BTreeMap<AccountId, Decimal>,

    /// Reconciliation outcome, `None` when the ledger was erased
    pub decision: Option<Decision>,

    /// Transactions committed during the run
    pub committed: usize,

    /// Appends rejected during the run
    pub rejected: usize,

    /// Whether the ledger was erased
    pub erased: bool,
}

/// Main ledger interface
pub struct Ledger {
    config: Config,
    store: Box<dyn LedgerStore>,
    state: LedgerState,
    phase: Phase,
    processor: TransactionProcessor,
    metrics: Metrics,
    rng: StdRng,
}

impl fmt::Debug for Ledger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ledger")
            .field("backend", &self.store.name())
            .field("phase", &self.phase)
            .field("index", &self.state.index)
            .field("coins", &self.state.coins)
            .finish()
    }
}

impl Ledger {
    /// Create a ledger on the backend selected by `config` (not yet opened)
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let store = open_store(&config);
        Self::with_store(config, store)
    }

    /// Create a ledger on an explicit backend
    pub fn with_store(config: Config, store: Box<dyn LedgerStore>) -> Result<Self> {
        let metrics = Metrics::new().map_err(|e| Error::Other(format!("Metrics: {}", e)))?;
        let processor = TransactionProcessor::new(&config, metrics.clone());
        let rng = match config.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            config,
            store,
            state: LedgerState::new(),
            phase: Phase::Closed,
            processor,
            metrics,
            rng,
        })
    }

    /// Open, reconcile, apply `options`, flush and close
    pub async fn run(config: Config, options: &RunOptions) -> Result<LedgerSummary> {
        let mut ledger = Self::new(config)?;
        ledger.execute(options).await
    }

    /// One full lifecycle on this ledger
    ///
    /// On failure the backend is released before the error is returned.
    pub async fn execute(&mut self, options: &RunOptions) -> Result<LedgerSummary> {
        self.open().await?;

        match self.execute_opened(options).await {
            Ok(summary) => {
                self.close().await?;
                Ok(summary)
            }
            Err(e) => {
                tracing::error!(error = %e, "Run failed, releasing backend");
                if let Err(close_err) = self.release().await {
                    tracing::warn!(error = %close_err, "Release after failed run also failed");
                }
                Err(e)
            }
        }
    }

    async fn execute_opened(&mut self, options: &RunOptions) -> Result<LedgerSummary> {
        if options.erase {
            self.erase().await?;
            return Ok(self.summary(None, &BulkOutcome::default(), true));
        }

        let decision = self.reconcile(options.scan).await?;
        let outcome = self.apply_options(options).await?;
        self.flush().await?;

        Ok(self.summary(Some(decision), &outcome, false))
    }

    /// Acquire backend resources
    pub async fn open(&mut self) -> Result<()> {
        self.expect_phase(&[Phase::Closed], "open")?;
        self.phase = Phase::Opening;

        tracing::info!(
            backend = self.store.name(),
            data_dir = %self.config.data_dir.display(),
            "Opening ledger"
        );

        if let Err(e) = self.store.open().await {
            tracing::error!(backend = self.store.name(), error = %e, "Failed to open backend");
            if let Err(close_err) = self.store.close().await {
                tracing::warn!(error = %close_err, "Close after failed open also failed");
            }
            self.phase = Phase::Closed;

            return Err(match e {
                Error::BackendUnavailable(_) => e,
                other => Error::BackendUnavailable(other.to_string()),
            });
        }

        Ok(())
    }

    /// Load balances, trusting the cache unless drift is found or `force_full_scan`
    pub async fn reconcile(&mut self, force_full_scan: bool) -> Result<Decision> {
        self.expect_phase(&[Phase::Opening], "reconcile")?;

        let reconciliation = validator::reconcile(self.store.as_ref(), force_full_scan).await?;
        if !reconciliation.trust_cache() {
            self.metrics.record_full_scan();
        }

        self.state = reconciliation.state;
        self.metrics.set_index(self.state.index);
        self.phase = Phase::Reconciled;

        tracing::info!(
            index = self.state.index,
            coins = %self.state.coins,
            accounts = self.state.balances.len(),
            trust_cache = reconciliation.decision == Decision::TrustCache,
            "Ledger reconciled"
        );

        Ok(reconciliation.decision)
    }

    /// Append one transaction
    ///
    /// The outer error is a lifecycle violation; the inner one a rejection
    /// that left the ledger unchanged.
    pub async fn append(
        &mut self,
        sender: AccountId,
        receiver: AccountId,
        amount: Decimal,
        tx_type: TransactionType,
    ) -> Result<std::result::Result<TxId, RejectReason>> {
        self.begin_mutation("append")?;
        Ok(self
            .processor
            .append(&mut self.state, self.store.as_ref(), sender, receiver, amount, tx_type)
            .await)
    }

    /// Append one transfer parsed from `from,to,amount`
    pub async fn create_transfer(
        &mut self,
        request: &TransferRequest,
    ) -> Result<std::result::Result<TxId, RejectReason>> {
        tracing::info!(
            sender = %request.from,
            receiver = %request.to,
            amount = %request.amount,
            "Creating custom transfer"
        );
        self.append(request.from, request.to, request.amount, TransactionType::Transfer)
            .await
    }

    /// Reward every known account, `reward_amount` when `amount` is `None`
    pub async fn send_rewards(&mut self, amount: Option<Decimal>) -> Result<BulkOutcome> {
        self.begin_mutation("send_rewards")?;
        Ok(self
            .processor
            .send_rewards(&mut self.state, self.store.as_ref(), amount)
            .await)
    }

    /// Append up to `count` random transfers between existing accounts
    pub async fn fill_history(&mut self, count: u64) -> Result<BulkOutcome> {
        self.begin_mutation("fill_history")?;
        Ok(self
            .processor
            .fill_history(&mut self.state, self.store.as_ref(), &mut self.rng, count)
            .await)
    }

    /// Bootstrap accounts `1..=count` on an empty ledger
    pub async fn start_history(&mut self, count: u64) -> Result<BulkOutcome> {
        if self.state.index != 0 || !self.state.balances.is_empty() {
            return Err(Error::InvalidState(format!(
                "start_history requires an empty ledger, index is {}",
                self.state.index
            )));
        }

        self.begin_mutation("start_history")?;
        Ok(self
            .processor
            .start_history(&mut self.state, self.store.as_ref(), count)
            .await)
    }

    /// Bulk append: genesis on an empty ledger, random transfers otherwise
    pub async fn append_count(&mut self, count: u64) -> Result<BulkOutcome> {
        if self.state.index == 0 {
            self.start_history(self.config.genesis_accounts).await
        } else {
            self.fill_history(count).await
        }
    }

    /// Wipe every transaction, account and metadata record
    pub async fn erase(&mut self) -> Result<()> {
        self.expect_phase(
            &[Phase::Opening, Phase::Reconciled, Phase::Mutating],
            "erase",
        )?;

        let transactions = self.store.clear(RecordKind::Transactions).await?;
        let accounts = self.store.clear(RecordKind::Accounts).await?;
        let metadata = self.store.clear(RecordKind::Metadata).await?;

        self.state = LedgerState::new();
        self.metrics.set_index(0);
        self.phase = Phase::Erased;

        tracing::info!(transactions, accounts, metadata, "Ledger erased");
        Ok(())
    }

    /// Persist buffered transactions, dirty accounts and metadata
    pub async fn flush(&mut self) -> Result<()> {
        self.expect_phase(&[Phase::Reconciled, Phase::Mutating], "flush")?;

        if !self.state.is_dirty() {
            self.phase = Phase::Reconciled;
            return Ok(());
        }

        self.phase = Phase::Flushing;
        let started = Instant::now();

        match self.write_dirty().await {
            Ok(()) => {
                self.state.mark_clean();
                self.metrics.record_flush(started.elapsed().as_secs_f64());
                self.phase = Phase::Reconciled;

                tracing::info!(
                    index = self.state.index,
                    coins = %self.state.coins,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Ledger flushed"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Flush failed");
                // still dirty, a later flush retries
                self.phase = Phase::Mutating;
                Err(e)
            }
        }
    }

    async fn write_dirty(&mut self) -> Result<()> {
        if !self.state.pending.is_empty() {
            let written = self.store.write_transactions(&self.state.pending).await?;
            if written != self.state.pending.len() {
                return Err(Error::Storage(format!(
                    "Wrote {} of {} buffered transactions",
                    written,
                    self.state.pending.len()
                )));
            }
            tracing::debug!(written, "Buffered transactions written");
            self.state.pending.clear();
        }

        if self.state.rewrite_accounts() {
            let removed = self.store.clear(RecordKind::Accounts).await?;
            tracing::debug!(removed, "Stale account records removed");
        }

        let records = self.state.dirty_records();
        let written = self.store.write_accounts(&records).await?;
        tracing::debug!(written, "Account records written");

        self.store.write_metadata(&self.state.metadata()).await?;
        Ok(())
    }

    /// Flush pending work if needed and release the backend
    pub async fn close(&mut self) -> Result<()> {
        if self.phase == Phase::Closed {
            return Ok(());
        }

        let flushed =
            if matches!(self.phase, Phase::Reconciled | Phase::Mutating) && self.state.is_dirty() {
                self.flush().await
            } else {
                Ok(())
            };

        // the backend is released even when the final flush failed
        let released = self.release().await;
        flushed.and(released)
    }

    async fn release(&mut self) -> Result<()> {
        let result = self.store.close().await;
        self.phase = Phase::Closed;
        tracing::info!(backend = self.store.name(), "Ledger closed");
        result
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// In-memory state
    pub fn state(&self) -> &LedgerState {
        &self.state
    }

    /// Balance of one account
    pub fn balance(&self, account: AccountId) -> Decimal {
        self.state.balance(account)
    }

    /// Circulating supply
    pub fn coins(&self) -> Decimal {
        self.state.coins
    }

    /// Last committed transaction id
    pub fn index(&self) -> TxId {
        self.state.index
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Read a transaction through the backend
    pub async fn transaction(&self, id: TxId) -> Result<Option<Transaction>> {
        self.expect_open("transaction")?;
        self.store.read_transaction(id).await
    }

    /// Read an account record through the backend
    pub async fn account(&self, id: AccountId) -> Result<Option<AccountRecord>> {
        self.expect_open("account")?;
        self.store.read_account(id).await
    }

    async fn apply_options(&mut self, options: &RunOptions) -> Result<BulkOutcome> {
        let mut total = BulkOutcome::default();

        if let Some(amount) = options.airdrop {
            merge(&mut total, self.send_rewards(Some(amount)).await?);
        } else if options.reward {
            merge(&mut total, self.send_rewards(None).await?);
        }

        if let Some(request) = &options.transfer {
            match self.create_transfer(request).await? {
                Ok(tx_id) => total.committed.push(tx_id),
                Err(reason) => total.rejected.push(reason),
            }
        }

        if let Some(count) = options.count {
            merge(&mut total, self.append_count(count).await?);
        }

        Ok(total)
    }

    fn summary(&self, decision: Option<Decision>, outcome: &BulkOutcome, erased: bool) -> LedgerSummary {
        LedgerSummary {
            coins: self.state.coins,
            index: self.state.index,
            balances: self.state.balances.clone(),
            decision,
            committed: outcome.committed.len(),
            rejected: outcome.rejected.len(),
            erased,
        }
    }

    fn begin_mutation(&mut self, operation: &str) -> Result<()> {
        self.expect_phase(&[Phase::Reconciled, Phase::Mutating], operation)?;
        self.phase = Phase::Mutating;
        Ok(())
    }

    fn expect_phase(&self, allowed: &[Phase], operation: &str) -> Result<()> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(Error::InvalidState(format!(
                "{} not allowed while {}",
                operation, self.phase
            )))
        }
    }

    fn expect_open(&self, operation: &str) -> Result<()> {
        if self.phase == Phase::Closed {
            return Err(Error::InvalidState(format!("{} on a closed ledger", operation)));
        }
        Ok(())
    }
}

fn merge(total: &mut BulkOutcome, outcome: BulkOutcome) {
    total.committed.extend(outcome.committed);
    total.rejected.extend(outcome.rejected);
    total.exhausted |= outcome.exhausted;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendKind, WritePolicy};
    use crate::storage::FileStore;
    use crate::validator::DriftReason;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn test_config(temp: &TempDir) -> Config {
        Config {
            data_dir: temp.path().join("ledger"),
            random_seed: Some(11),
            ..Default::default()
        }
    }

    async fn open_ledger(config: Config) -> Ledger {
        let mut ledger = Ledger::new(config).unwrap();
        ledger.open().await.unwrap();
        ledger.reconcile(false).await.unwrap();
        ledger
    }

    fn id(n: u64) -> AccountId {
        AccountId::new(n)
    }

    #[tokio::test]
    async fn test_genesis_transfer_and_rewards() {
        let temp = TempDir::new().unwrap();
        let mut ledger = open_ledger(test_config(&temp)).await;
        assert_eq!(ledger.phase(), Phase::Reconciled);

        ledger.start_history(3).await.unwrap();
        assert_eq!(ledger.index(), 3);
        assert_eq!(ledger.coins(), dec!(3000));
        for n in 1..=3 {
            assert_eq!(ledger.balance(id(n)), dec!(1000));
        }

        let tx_id = ledger
            .append(id(1), id(2), dec!(100), TransactionType::Transfer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tx_id, 4);
        assert_eq!(ledger.balance(id(1)), dec!(899));
        assert_eq!(ledger.balance(id(2)), dec!(1100));
        assert_eq!(ledger.coins(), dec!(2999));

        let outcome = ledger.send_rewards(Some(dec!(50))).await.unwrap();
        assert_eq!(outcome.committed, vec![5, 6, 7]);
        assert_eq!(ledger.coins(), dec!(3149));
        assert_eq!(ledger.phase(), Phase::Mutating);

        ledger.close().await.unwrap();
        assert_eq!(ledger.phase(), Phase::Closed);
    }

    #[tokio::test]
    async fn test_reopen_trusts_cache() {
        let temp = TempDir::new().unwrap();
        let config = test_config(&temp);

        let mut ledger = open_ledger(config.clone()).await;
        ledger.start_history(4).await.unwrap();
        ledger.fill_history(10).await.unwrap();
        let balances = ledger.state().balances.clone();
        let coins = ledger.coins();
        let index = ledger.index();
        ledger.close().await.unwrap();

        let mut ledger = Ledger::new(config).unwrap();
        ledger.open().await.unwrap();
        assert_eq!(ledger.reconcile(false).await.unwrap(), Decision::TrustCache);
        assert_eq!(ledger.state().balances, balances);
        assert_eq!(ledger.coins(), coins);
        assert_eq!(ledger.index(), index);
        assert_eq!(ledger.metrics().full_scans_total.get(), 0);
    }

    #[tokio::test]
    async fn test_tampered_account_triggers_rebuild() {
        let temp = TempDir::new().unwrap();
        let config = test_config(&temp);

        let mut ledger = open_ledger(config.clone()).await;
        ledger.start_history(3).await.unwrap();
        ledger.close().await.unwrap();

        let mut store = FileStore::new(&config.data_dir);
        store.open().await.unwrap();
        store
            .write_account(&AccountRecord { id: id(2), balance: dec!(1000000), index: 3 })
            .await
            .unwrap();

        let mut ledger = Ledger::new(config.clone()).unwrap();
        ledger.open().await.unwrap();
        assert_eq!(
            ledger.reconcile(false).await.unwrap(),
            Decision::Rebuild(DriftReason::FingerprintMismatch)
        );
        assert_eq!(ledger.balance(id(2)), dec!(1000));
        assert_eq!(ledger.metrics().full_scans_total.get(), 1);
        ledger.close().await.unwrap();

        // the rebuild was persisted
        let mut ledger = Ledger::new(config).unwrap();
        ledger.open().await.unwrap();
        assert_eq!(ledger.reconcile(false).await.unwrap(), Decision::TrustCache);
        assert_eq!(ledger.balance(id(2)), dec!(1000));
    }

    #[tokio::test]
    async fn test_missing_transaction_triggers_rebuild() {
        let temp = TempDir::new().unwrap();
        let config = test_config(&temp);

        let mut ledger = open_ledger(config.clone()).await;
        ledger.start_history(3).await.unwrap();
        ledger.close().await.unwrap();

        std::fs::remove_file(config.data_dir.join("tx_00000000000000000002.json")).unwrap();

        let mut ledger = Ledger::new(config).unwrap();
        ledger.open().await.unwrap();
        assert_eq!(
            ledger.reconcile(false).await.unwrap(),
            Decision::Rebuild(DriftReason::CountMismatch { expected: 3, observed: 2 })
        );
        assert_eq!(ledger.index(), 3);
        assert_eq!(ledger.coins(), dec!(2000));
        assert_eq!(ledger.balance(id(2)), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_forced_scan() {
        let temp = TempDir::new().unwrap();
        let config = test_config(&temp);

        let mut ledger = open_ledger(config.clone()).await;
        ledger.start_history(2).await.unwrap();
        ledger.close().await.unwrap();

        let mut ledger = Ledger::new(config).unwrap();
        ledger.open().await.unwrap();
        assert_eq!(
            ledger.reconcile(true).await.unwrap(),
            Decision::Rebuild(DriftReason::Forced)
        );
        assert_eq!(ledger.coins(), dec!(2000));
    }

    #[tokio::test]
    async fn test_persist_failure_leaves_state_unchanged() {
        let temp = TempDir::new().unwrap();
        let config = test_config(&temp);

        let mut ledger = open_ledger(config.clone()).await;
        ledger.start_history(2).await.unwrap();
        std::fs::remove_dir_all(&config.data_dir).unwrap();

        let result = ledger
            .append(id(1), id(2), dec!(10), TransactionType::Transfer)
            .await
            .unwrap();
        assert!(matches!(result, Err(RejectReason::PersistFailure { tx_id: 3, .. })));
        assert_eq!(ledger.index(), 2);
        assert_eq!(ledger.balance(id(1)), dec!(1000));
        assert_eq!(ledger.metrics().rejected_total.with_label_values(&["persist_failure"]).get(), 1);
    }

    #[tokio::test]
    async fn test_buffered_policy_writes_on_flush() {
        let temp = TempDir::new().unwrap();
        let config = Config {
            write_policy: WritePolicy::Buffered,
            ..test_config(&temp)
        };

        let mut ledger = open_ledger(config.clone()).await;
        ledger.start_history(3).await.unwrap();
        assert!(ledger.transaction(1).await.unwrap().is_none());

        ledger.flush().await.unwrap();
        assert_eq!(ledger.phase(), Phase::Reconciled);
        assert_eq!(ledger.transaction(3).await.unwrap().unwrap().receiver, id(3));
        assert!(ledger.state().pending.is_empty());

        let account = ledger.account(id(1)).await.unwrap().unwrap();
        assert_eq!(account.balance, dec!(1000));
        assert_eq!(account.index, 3);
    }

    #[tokio::test]
    async fn test_buffered_queue_lost_without_flush() {
        let temp = TempDir::new().unwrap();
        let config = Config {
            write_policy: WritePolicy::Buffered,
            ..test_config(&temp)
        };

        let mut ledger = open_ledger(config.clone()).await;
        ledger.start_history(3).await.unwrap();
        ledger.flush().await.unwrap();

        ledger.send_rewards(Some(dec!(50))).await.unwrap();
        assert_eq!(ledger.state().pending.len(), 3);
        assert_eq!(ledger.index(), 6);
        // crash: the queue never reaches the backend
        drop(ledger);

        let mut ledger = Ledger::new(config).unwrap();
        ledger.open().await.unwrap();
        assert_eq!(ledger.reconcile(false).await.unwrap(), Decision::TrustCache);
        assert_eq!(ledger.index(), 3);
        assert_eq!(ledger.coins(), dec!(3000));
        assert_eq!(ledger.balance(id(1)), dec!(1000));
        assert!(ledger.transaction(4).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_overflowing_airdrop_keeps_ledger_usable() {
        let temp = TempDir::new().unwrap();
        let config = test_config(&temp);

        let seed = RunOptions { count: Some(1), ..Default::default() };
        Ledger::run(config.clone(), &seed).await.unwrap();

        let airdrop = RunOptions {
            airdrop: Some(Decimal::MAX - dec!(500)),
            ..Default::default()
        };
        let summary = Ledger::run(config.clone(), &airdrop).await.unwrap();
        assert_eq!(summary.committed, 0);
        assert_eq!(summary.rejected, 10);
        assert_eq!(summary.index, 10);

        let summary = Ledger::run(config, &RunOptions::default()).await.unwrap();
        assert_eq!(summary.decision, Some(Decision::TrustCache));
        assert_eq!(summary.coins, dec!(10000));
    }

    #[tokio::test]
    async fn test_failed_run_releases_backend() {
        let temp = TempDir::new().unwrap();
        let config = test_config(&temp);
        // an account "record" that cannot be read fails reconciliation
        std::fs::create_dir_all(config.data_dir.join("account_1.json")).unwrap();

        let mut ledger = Ledger::new(config).unwrap();
        let err = ledger.execute(&RunOptions::default()).await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(ledger.phase(), Phase::Closed);
    }

    #[tokio::test]
    async fn test_close_releases_after_flush_failure() {
        let temp = TempDir::new().unwrap();
        let config = test_config(&temp);

        let mut ledger = open_ledger(config.clone()).await;
        ledger.start_history(2).await.unwrap();
        std::fs::remove_dir_all(&config.data_dir).unwrap();

        assert!(ledger.close().await.is_err());
        assert_eq!(ledger.phase(), Phase::Closed);
    }

    #[tokio::test]
    async fn test_erase() {
        let temp = TempDir::new().unwrap();
        let config = test_config(&temp);

        let mut ledger = open_ledger(config.clone()).await;
        ledger.start_history(3).await.unwrap();
        ledger.flush().await.unwrap();
        ledger.erase().await.unwrap();
        assert_eq!(ledger.phase(), Phase::Erased);
        assert_eq!(ledger.index(), 0);

        let err = ledger.send_rewards(None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        assert!(matches!(ledger.flush().await, Err(Error::InvalidState(_))));
        ledger.close().await.unwrap();

        let ledger = open_ledger(config).await;
        assert_eq!(ledger.index(), 0);
        assert!(ledger.state().balances.is_empty());
    }

    #[tokio::test]
    async fn test_phase_errors() {
        let temp = TempDir::new().unwrap();
        let mut ledger = Ledger::new(test_config(&temp)).unwrap();

        let err = ledger
            .append(id(0), id(1), dec!(1), TransactionType::Reward)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        assert!(matches!(ledger.reconcile(false).await, Err(Error::InvalidState(_))));
        assert!(matches!(ledger.transaction(1).await, Err(Error::InvalidState(_))));

        ledger.open().await.unwrap();
        assert!(matches!(ledger.open().await, Err(Error::InvalidState(_))));
        assert!(matches!(ledger.fill_history(1).await, Err(Error::InvalidState(_))));

        ledger.reconcile(false).await.unwrap();
        ledger.start_history(1).await.unwrap();
        assert!(matches!(ledger.start_history(1).await, Err(Error::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_open_failure_is_backend_unavailable() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let config = Config {
            data_dir: blocker.join("ledger"),
            ..Default::default()
        };
        let mut ledger = Ledger::new(config).unwrap();
        assert!(matches!(ledger.open().await, Err(Error::BackendUnavailable(_))));
        assert_eq!(ledger.phase(), Phase::Closed);
    }

    #[tokio::test]
    async fn test_run_options_order() {
        let temp = TempDir::new().unwrap();
        let config = test_config(&temp);

        let options = RunOptions {
            count: Some(5),
            ..Default::default()
        };
        let summary = Ledger::run(config.clone(), &options).await.unwrap();
        assert_eq!(summary.index, config.genesis_accounts);
        assert_eq!(summary.decision, Some(Decision::TrustCache));

        let options = RunOptions {
            reward: true,
            transfer: Some("1,2,100".parse().unwrap()),
            count: Some(5),
            ..Default::default()
        };
        let summary = Ledger::run(config.clone(), &options).await.unwrap();
        // 10 rewards, 1 transfer, 5 random transfers
        assert_eq!(summary.committed, 16);
        assert_eq!(summary.index, 26);
        assert_eq!(summary.balances.len(), 10);
        assert_eq!(summary.rejected, 0);

        let summary = Ledger::run(config.clone(), &RunOptions { erase: true, ..Default::default() })
            .await
            .unwrap();
        assert!(summary.erased);
        assert_eq!(summary.index, 0);
    }

    #[tokio::test]
    async fn test_document_backend_run() {
        let temp = TempDir::new().unwrap();
        let config = Config {
            backend: BackendKind::Document,
            ..test_config(&temp)
        };

        let options = RunOptions {
            count: Some(1),
            airdrop: Some(dec!(5)),
            ..Default::default()
        };
        // airdrop on an empty ledger rewards nobody, then genesis runs
        let summary = Ledger::run(config.clone(), &options).await.unwrap();
        assert_eq!(summary.index, 10);
        assert_eq!(summary.coins, dec!(10000));

        let summary = Ledger::run(config, &options).await.unwrap();
        assert_eq!(summary.decision, Some(Decision::TrustCache));
        assert_eq!(summary.index, 21);
    }
}
