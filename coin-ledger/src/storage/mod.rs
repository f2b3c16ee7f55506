//! Storage backends
//!
//! The ledger core only talks to [`LedgerStore`]. Two implementations exist,
//! selected once at construction time by [`open_store`]:
//!
//! - [`FileStore`] - one JSON file per record in a data directory
//! - [`DocumentStore`] - RocksDB column families holding JSON documents
//!
//! Record kinds:
//!
//! - transactions - append-only log, keyed by transaction id
//! - accounts - cached balance per account, keyed by account id
//! - metadata - one singleton (`coins`, `index`, `accounts_fingerprint`)

mod document;
mod file;

pub use document::DocumentStore;
pub use file::FileStore;

use crate::{
    config::{BackendKind, Config},
    error::Result,
    types::{
        AccountId, AccountRecord, LedgerMetadata, RecordKind, StoredMetadata, StoredTransaction,
        Transaction, TxId,
    },
};
use async_trait::async_trait;

/// Persistence capability required by the ledger
///
/// Writes are all-or-nothing per record: a failed `write_transaction` leaves
/// no partial record behind.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Acquire resources (create directory, open database)
    async fn open(&mut self) -> Result<()>;

    /// Release resources; safe to call more than once
    async fn close(&mut self) -> Result<()>;

    /// All transaction records in ascending id order, malformed ones included
    async fn read_transactions(&self) -> Result<Vec<StoredTransaction>>;

    /// One transaction, `None` if absent or malformed
    async fn read_transaction(&self, id: TxId) -> Result<Option<Transaction>>;

    /// Persist one transaction
    async fn write_transaction(&self, tx: &Transaction) -> Result<()>;

    /// Persist many transactions, returns the number written
    async fn write_transactions(&self, txs: &[Transaction]) -> Result<usize>;

    /// Highest transaction id present, `0` when the log is empty
    async fn last_transaction_id(&self) -> Result<TxId>;

    /// Number of transaction records present
    async fn transaction_count(&self) -> Result<u64>;

    /// All readable account records
    async fn read_accounts(&self) -> Result<Vec<AccountRecord>>;

    /// One account record
    async fn read_account(&self, id: AccountId) -> Result<Option<AccountRecord>>;

    /// Upsert account records, returns the number written
    async fn write_accounts(&self, records: &[AccountRecord]) -> Result<usize>;

    /// Upsert one account record
    async fn write_account(&self, record: &AccountRecord) -> Result<()> {
        self.write_accounts(std::slice::from_ref(record)).await?;
        Ok(())
    }

    /// Metadata singleton, `None` if never written
    async fn read_metadata(&self) -> Result<Option<StoredMetadata>>;

    /// Overwrite the metadata singleton
    async fn write_metadata(&self, metadata: &LedgerMetadata) -> Result<()>;

    /// Delete every record of a kind, returns the number deleted
    async fn clear(&self, kind: RecordKind) -> Result<u64>;
}

/// Build the backend selected by the configuration (not yet opened)
pub fn open_store(config: &Config) -> Box<dyn LedgerStore> {
    match config.backend {
        BackendKind::File => Box::new(FileStore::new(&config.data_dir)),
        BackendKind::Document => Box::new(DocumentStore::new(
            config.data_dir.join("ledger-db"),
            config.rocksdb.clone(),
        )),
    }
}
