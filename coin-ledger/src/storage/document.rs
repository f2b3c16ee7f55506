//! Document store backend using RocksDB
//!
//! # Column Families
//!
//! - `transactions` - Append-only transaction log (key: tx id, big endian)
//! - `accounts` - Cached balances (key: account id, big endian)
//! - `meta` - Metadata singleton (key: `ledger`)
//!
//! Values are JSON documents. Big-endian keys make RocksDB's natural key
//! order the commit order, so the last transaction is one reverse seek away.

use super::LedgerStore;
use crate::{
    config::RocksDBConfig,
    error::{Error, Result},
    types::{
        AccountId, AccountRecord, LedgerMetadata, RecordKind, StoredMetadata, StoredTransaction,
        Transaction, TxId,
    },
};
use async_trait::async_trait;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, WriteOptions, DB,
};
use std::path::{Path, PathBuf};

/// Column family names
const CF_TRANSACTIONS: &str = "transactions";
const CF_ACCOUNTS: &str = "accounts";
const CF_META: &str = "meta";

const METADATA_KEY: &[u8] = b"ledger";

/// RocksDB-backed document store
pub struct DocumentStore {
    path: PathBuf,
    tuning: RocksDBConfig,
    db: Option<DB>,
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("path", &self.path)
            .field("open", &self.db.is_some())
            .finish()
    }
}

impl DocumentStore {
    /// Store at `path` (opened by [`LedgerStore::open`])
    pub fn new(path: impl AsRef<Path>, tuning: RocksDBConfig) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            tuning,
            db: None,
        }
    }

    fn db_options(&self) -> Options {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_write_buffer_size(self.tuning.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_background_jobs(self.tuning.max_background_jobs);

        if self.tuning.enable_statistics {
            db_opts.enable_statistics();
        }
        db_opts
    }

    fn cf_options_transactions() -> Options {
        let mut opts = Options::default();
        // written once, read back only by full scans
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_accounts() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn db(&self) -> Result<&DB> {
        self.db
            .as_ref()
            .ok_or_else(|| Error::InvalidState("document store is not open".to_string()))
    }

    // Helper: get column family handle

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db()?
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn cf_for(&self, kind: RecordKind) -> Result<&ColumnFamily> {
        match kind {
            RecordKind::Transactions => self.cf_handle(CF_TRANSACTIONS),
            RecordKind::Accounts => self.cf_handle(CF_ACCOUNTS),
            RecordKind::Metadata => self.cf_handle(CF_META),
        }
    }

    fn durable() -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(true);
        opts
    }

    fn decode_id(key: &[u8]) -> Result<u64> {
        <[u8; 8]>::try_from(key)
            .map(u64::from_be_bytes)
            .map_err(|_| Error::Storage(format!("Invalid key length {}", key.len())))
    }
}

#[async_trait]
impl LedgerStore for DocumentStore {
    fn name(&self) -> &'static str {
        "document"
    }

    async fn open(&mut self) -> Result<()> {
        if self.db.is_some() {
            return Ok(());
        }

        std::fs::create_dir_all(&self.path).map_err(|e| {
            Error::BackendUnavailable(format!("cannot create {:?}: {}", self.path, e))
        })?;

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_TRANSACTIONS, Self::cf_options_transactions()),
            ColumnFamilyDescriptor::new(CF_ACCOUNTS, Self::cf_options_accounts()),
            ColumnFamilyDescriptor::new(CF_META, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&self.db_options(), &self.path, cf_descriptors)
            .map_err(|e| Error::BackendUnavailable(e.to_string()))?;

        tracing::info!(path = ?self.path, "Opened RocksDB document store");
        self.db = Some(db);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(db) = self.db.take() {
            db.flush()?;
            drop(db);
            tracing::info!("RocksDB closed gracefully");
        }
        Ok(())
    }

    async fn read_transactions(&self) -> Result<Vec<StoredTransaction>> {
        let cf = self.cf_handle(CF_TRANSACTIONS)?;
        let mut records = Vec::new();

        for item in self.db()?.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            let id = Self::decode_id(&key)?;

            let mut record = serde_json::from_slice::<StoredTransaction>(&value).unwrap_or_else(|e| {
                tracing::warn!(tx_id = id, error = %e, "Unreadable transaction document");
                StoredTransaction::unreadable(id)
            });
            record.id.get_or_insert(id);
            records.push(record);
        }

        Ok(records)
    }

    async fn read_transaction(&self, id: TxId) -> Result<Option<Transaction>> {
        let cf = self.cf_handle(CF_TRANSACTIONS)?;
        let Some(value) = self.db()?.get_cf(cf, id.to_be_bytes())? else {
            return Ok(None);
        };

        Ok(serde_json::from_slice::<StoredTransaction>(&value)
            .ok()
            .and_then(StoredTransaction::into_transaction))
    }

    async fn write_transaction(&self, tx: &Transaction) -> Result<()> {
        let cf = self.cf_handle(CF_TRANSACTIONS)?;
        let value = serde_json::to_vec(tx)?;

        self.db()?
            .put_cf_opt(cf, tx.id.to_be_bytes(), &value, &Self::durable())?;

        tracing::debug!(tx_id = tx.id, "Transaction document written");
        Ok(())
    }

    async fn write_transactions(&self, txs: &[Transaction]) -> Result<usize> {
        if txs.is_empty() {
            return Ok(0);
        }

        let cf = self.cf_handle(CF_TRANSACTIONS)?;
        let mut batch = WriteBatch::default();
        for tx in txs {
            batch.put_cf(cf, tx.id.to_be_bytes(), serde_json::to_vec(tx)?);
        }

        // Atomic commit
        self.db()?.write_opt(batch, &Self::durable())?;

        tracing::debug!(count = txs.len(), "Transaction batch written");
        Ok(txs.len())
    }

    async fn last_transaction_id(&self) -> Result<TxId> {
        let cf = self.cf_handle(CF_TRANSACTIONS)?;

        match self.db()?.iterator_cf(cf, IteratorMode::End).next() {
            Some(item) => {
                let (key, _) = item?;
                Self::decode_id(&key)
            }
            None => Ok(0),
        }
    }

    async fn transaction_count(&self) -> Result<u64> {
        let cf = self.cf_handle(CF_TRANSACTIONS)?;

        // exact count; the rocksdb key estimate is not good enough for drift checks
        let mut count = 0u64;
        for item in self.db()?.iterator_cf(cf, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    async fn read_accounts(&self) -> Result<Vec<AccountRecord>> {
        let cf = self.cf_handle(CF_ACCOUNTS)?;
        let mut records = Vec::new();

        for item in self.db()?.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            match serde_json::from_slice::<AccountRecord>(&value) {
                Ok(record) => records.push(record),
                Err(e) => {
                    let account = Self::decode_id(&key)?;
                    tracing::warn!(account, error = %e, "Unreadable account document, ignored");
                }
            }
        }

        Ok(records)
    }

    async fn read_account(&self, id: AccountId) -> Result<Option<AccountRecord>> {
        let cf = self.cf_handle(CF_ACCOUNTS)?;
        match self.db()?.get_cf(cf, id.as_u64().to_be_bytes())? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    async fn write_accounts(&self, records: &[AccountRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let cf = self.cf_handle(CF_ACCOUNTS)?;
        let mut batch = WriteBatch::default();
        for record in records {
            batch.put_cf(cf, record.id.as_u64().to_be_bytes(), serde_json::to_vec(record)?);
        }

        self.db()?.write_opt(batch, &Self::durable())?;
        Ok(records.len())
    }

    async fn read_metadata(&self) -> Result<Option<StoredMetadata>> {
        let cf = self.cf_handle(CF_META)?;
        let Some(value) = self.db()?.get_cf(cf, METADATA_KEY)? else {
            return Ok(None);
        };

        let metadata = serde_json::from_slice(&value).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Unreadable metadata document");
            StoredMetadata::default()
        });
        Ok(Some(metadata))
    }

    async fn write_metadata(&self, metadata: &LedgerMetadata) -> Result<()> {
        let cf = self.cf_handle(CF_META)?;
        let value = serde_json::to_vec(metadata)?;
        self.db()?
            .put_cf_opt(cf, METADATA_KEY, &value, &Self::durable())?;
        Ok(())
    }

    async fn clear(&self, kind: RecordKind) -> Result<u64> {
        let cf = self.cf_for(kind)?;
        let db = self.db()?;

        let mut batch = WriteBatch::default();
        let mut removed = 0u64;
        for item in db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            batch.delete_cf(cf, key);
            removed += 1;
        }

        db.write_opt(batch, &Self::durable())?;
        tracing::info!(kind = %kind, removed, "Cleared records");
        Ok(removed)
    }
}
