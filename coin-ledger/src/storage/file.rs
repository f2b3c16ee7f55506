//! Flat-file JSON backend
//!
//! # Layout
//!
//! - `tx_<id>.json` - one file per transaction, id zero padded to 20 digits
//!   so a directory listing sorts in commit order
//! - `account_<id>.json` - cached balance per account
//! - `chain.json` - metadata singleton
//!
//! Every write goes to `<name>.tmp` first and is renamed into place, so a
//! reader never observes a half-written record.

use super::LedgerStore;
use crate::{
    error::{Error, Result},
    types::{
        AccountId, AccountRecord, LedgerMetadata, RecordKind, StoredMetadata, StoredTransaction,
        Transaction, TxId,
    },
};
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;

const TX_PREFIX: &str = "tx_";
const ACCOUNT_PREFIX: &str = "account_";
const METADATA_FILE: &str = "chain.json";
const JSON_EXT: &str = ".json";

/// JSON-file store rooted at a data directory
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Store rooted at `dir` (created on open)
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn tx_path(&self, id: TxId) -> PathBuf {
        self.dir.join(format!("{}{:020}{}", TX_PREFIX, id, JSON_EXT))
    }

    fn account_path(&self, id: AccountId) -> PathBuf {
        self.dir.join(format!("{}{}{}", ACCOUNT_PREFIX, id, JSON_EXT))
    }

    fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    /// Numeric ids of every file with `prefix`, ascending
    async fn list_ids(&self, prefix: &str) -> Result<Vec<(u64, PathBuf)>> {
        let mut entries = fs::read_dir(&self.dir).await?;
        let mut ids = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(id) = name.to_str().and_then(|n| parse_id(n, prefix)) else {
                continue;
            };
            ids.push((id, entry.path()));
        }

        ids.sort_unstable_by_key(|(id, _)| *id);
        Ok(ids)
    }

    async fn write_json<T: Serialize + Sync>(&self, path: &Path, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        let tmp = path.with_extension("json.tmp");

        fs::write(&tmp, &bytes).await?;
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn remove_all(&self, files: Vec<PathBuf>) -> Result<u64> {
        let mut removed = 0;
        for path in files {
            fs::remove_file(&path).await?;
            removed += 1;
        }
        Ok(removed)
    }
}

/// `tx_00000000000000000042.json` -> 42 (unpadded names are accepted too)
fn parse_id(name: &str, prefix: &str) -> Option<u64> {
    name.strip_prefix(prefix)?
        .strip_suffix(JSON_EXT)?
        .parse()
        .ok()
}

#[async_trait]
impl LedgerStore for FileStore {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn open(&mut self) -> Result<()> {
        fs::create_dir_all(&self.dir).await.map_err(|e| {
            Error::BackendUnavailable(format!("cannot create {:?}: {}", self.dir, e))
        })?;

        tracing::info!(dir = ?self.dir, "Using file system to store ledger data");
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    async fn read_transactions(&self) -> Result<Vec<StoredTransaction>> {
        let files = self.list_ids(TX_PREFIX).await?;
        let mut records = Vec::with_capacity(files.len());

        for (id, path) in files {
            let bytes = fs::read(&path).await?;
            let mut record = match serde_json::from_slice::<StoredTransaction>(&bytes) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(tx_id = id, error = %e, "Unreadable transaction file");
                    StoredTransaction::unreadable(id)
                }
            };

            // the file name is the record identity
            if record.id != Some(id) {
                if let Some(body_id) = record.id {
                    tracing::warn!(tx_id = id, body_id, "Transaction id differs from file name");
                }
                record.id = Some(id);
            }
            records.push(record);
        }

        Ok(records)
    }

    async fn read_transaction(&self, id: TxId) -> Result<Option<Transaction>> {
        let path = self.tx_path(id);
        if !fs::try_exists(&path).await? {
            return Ok(None);
        }

        let bytes = fs::read(&path).await?;
        Ok(serde_json::from_slice::<StoredTransaction>(&bytes)
            .ok()
            .and_then(StoredTransaction::into_transaction))
    }

    async fn write_transaction(&self, tx: &Transaction) -> Result<()> {
        self.write_json(&self.tx_path(tx.id), tx).await
    }

    async fn write_transactions(&self, txs: &[Transaction]) -> Result<usize> {
        for tx in txs {
            self.write_transaction(tx).await?;
        }
        Ok(txs.len())
    }

    async fn last_transaction_id(&self) -> Result<TxId> {
        Ok(self
            .list_ids(TX_PREFIX)
            .await?
            .last()
            .map(|(id, _)| *id)
            .unwrap_or(0))
    }

    async fn transaction_count(&self) -> Result<u64> {
        Ok(self.list_ids(TX_PREFIX).await?.len() as u64)
    }

    async fn read_accounts(&self) -> Result<Vec<AccountRecord>> {
        let files = self.list_ids(ACCOUNT_PREFIX).await?;
        let mut records = Vec::with_capacity(files.len());

        for (id, path) in files {
            let bytes = fs::read(&path).await?;
            match serde_json::from_slice::<AccountRecord>(&bytes) {
                Ok(mut record) => {
                    let file_id = AccountId::new(id);
                    if record.id != file_id {
                        tracing::warn!(
                            account = id,
                            body_id = %record.id,
                            "Account id differs from file name"
                        );
                        record.id = file_id;
                    }
                    records.push(record)
                }
                Err(e) => {
                    tracing::warn!(account = id, error = %e, "Unreadable account file, ignored");
                }
            }
        }

        Ok(records)
    }

    async fn read_account(&self, id: AccountId) -> Result<Option<AccountRecord>> {
        let path = self.account_path(id);
        if !fs::try_exists(&path).await? {
            return Ok(None);
        }

        let bytes = fs::read(&path).await?;
        let mut record: AccountRecord = serde_json::from_slice(&bytes)?;
        record.id = id;
        Ok(Some(record))
    }

    async fn write_accounts(&self, records: &[AccountRecord]) -> Result<usize> {
        for record in records {
            self.write_json(&self.account_path(record.id), record).await?;
        }
        Ok(records.len())
    }

    async fn read_metadata(&self) -> Result<Option<StoredMetadata>> {
        let path = self.metadata_path();
        if !fs::try_exists(&path).await? {
            return Ok(None);
        }

        let bytes = fs::read(&path).await?;
        let metadata = serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Unreadable metadata file");
            StoredMetadata::default()
        });
        Ok(Some(metadata))
    }

    async fn write_metadata(&self, metadata: &LedgerMetadata) -> Result<()> {
        self.write_json(&self.metadata_path(), metadata).await
    }

    async fn clear(&self, kind: RecordKind) -> Result<u64> {
        let files = match kind {
            RecordKind::Transactions => self.list_ids(TX_PREFIX).await?,
            RecordKind::Accounts => self.list_ids(ACCOUNT_PREFIX).await?,
            RecordKind::Metadata => {
                let path = self.metadata_path();
                if fs::try_exists(&path).await? {
                    vec![(0, path)]
                } else {
                    vec![]
                }
            }
        };

        let removed = self.remove_all(files.into_iter().map(|(_, p)| p).collect()).await?;
        tracing::info!(kind = %kind, removed, "Cleared records");
        Ok(removed)
    }
}
