//! Configuration for the ledger

use crate::types::AccountId;
use crate::{Error, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory (JSON files or RocksDB)
    pub data_dir: PathBuf,

    /// Storage backend
    pub backend: BackendKind,

    /// Fee charged on non-system transactions, in percent of the amount
    pub fee_rate_percent: Decimal,

    /// Decimal places fees are rounded to
    pub fee_scale: u32,

    /// Default reward per account
    pub reward_amount: Decimal,

    /// Accounts bootstrapped by genesis on an empty ledger
    pub genesis_accounts: u64,

    /// Self transfer policy
    pub self_transfer: SelfTransferPolicy,

    /// When transaction records reach the backend
    pub write_policy: WritePolicy,

    /// Seed for synthetic history; random when unset
    pub random_seed: Option<u64>,

    /// RocksDB configuration (document backend)
    pub rocksdb: RocksDBConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            backend: BackendKind::File,
            fee_rate_percent: Decimal::ONE,
            fee_scale: 8,
            reward_amount: Decimal::from(1000),
            genesis_accounts: 10,
            self_transfer: SelfTransferPolicy::Reject,
            write_policy: WritePolicy::WriteThrough,
            random_seed: None,
            rocksdb: RocksDBConfig::default(),
        }
    }
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// One JSON file per record
    File,
    /// RocksDB column families holding JSON documents
    Document,
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" | "files" => Ok(BackendKind::File),
            "document" | "db" | "rocksdb" => Ok(BackendKind::Document),
            other => Err(Error::Config(format!("Unknown backend: {}", other))),
        }
    }
}

/// Whether a transfer to oneself is accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelfTransferPolicy {
    /// Reject with `SelfTransfer`
    Reject,
    /// Accept (only the fee moves)
    Allow,
}

/// When transaction records are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePolicy {
    /// Every append writes its record before balances change
    WriteThrough,
    /// Appends are queued and written as one batch on flush.
    /// A crash before flush loses the queue.
    Buffered,
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_background_jobs: 2,
            enable_statistics: false,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("LEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(backend) = std::env::var("LEDGER_BACKEND") {
            config.backend = backend.parse()?;
        }

        if let Ok(rate) = std::env::var("LEDGER_FEE_RATE_PERCENT") {
            config.fee_rate_percent = parse_env("LEDGER_FEE_RATE_PERCENT", &rate)?;
        }

        if let Ok(reward) = std::env::var("LEDGER_REWARD_AMOUNT") {
            config.reward_amount = parse_env("LEDGER_REWARD_AMOUNT", &reward)?;
        }

        if let Ok(scale) = std::env::var("LEDGER_FEE_SCALE") {
            config.fee_scale = parse_env("LEDGER_FEE_SCALE", &scale)?;
        }

        if let Ok(count) = std::env::var("LEDGER_GENESIS_ACCOUNTS") {
            config.genesis_accounts = parse_env("LEDGER_GENESIS_ACCOUNTS", &count)?;
        }

        if let Ok(policy) = std::env::var("LEDGER_SELF_TRANSFER") {
            config.self_transfer = match policy.to_ascii_lowercase().as_str() {
                "allow" => SelfTransferPolicy::Allow,
                "reject" => SelfTransferPolicy::Reject,
                other => {
                    return Err(Error::Config(format!("Unknown self transfer policy: {}", other)))
                }
            };
        }

        if let Ok(policy) = std::env::var("LEDGER_WRITE_POLICY") {
            config.write_policy = match policy.to_ascii_lowercase().as_str() {
                "write_through" => WritePolicy::WriteThrough,
                "buffered" => WritePolicy::Buffered,
                other => return Err(Error::Config(format!("Unknown write policy: {}", other))),
            };
        }

        if let Ok(seed) = std::env::var("LEDGER_RANDOM_SEED") {
            config.random_seed = Some(parse_env("LEDGER_RANDOM_SEED", &seed)?);
        }

        // RocksDB tuning
        if let Ok(size) = std::env::var("LEDGER_ROCKSDB_WRITE_BUFFER_SIZE_MB") {
            config.rocksdb.write_buffer_size_mb =
                parse_env("LEDGER_ROCKSDB_WRITE_BUFFER_SIZE_MB", &size)?;
        }

        if let Ok(jobs) = std::env::var("LEDGER_ROCKSDB_MAX_BACKGROUND_JOBS") {
            config.rocksdb.max_background_jobs =
                parse_env("LEDGER_ROCKSDB_MAX_BACKGROUND_JOBS", &jobs)?;
        }

        if let Ok(enabled) = std::env::var("LEDGER_ROCKSDB_ENABLE_STATISTICS") {
            config.rocksdb.enable_statistics =
                parse_env("LEDGER_ROCKSDB_ENABLE_STATISTICS", &enabled)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject economically meaningless settings
    pub fn validate(&self) -> Result<()> {
        if self.fee_rate_percent.is_sign_negative() {
            return Err(Error::Config("fee_rate_percent cannot be negative".to_string()));
        }
        if self.reward_amount.is_sign_negative() {
            return Err(Error::Config("reward_amount cannot be negative".to_string()));
        }
        Ok(())
    }
}

fn parse_env<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("Invalid value for {}: {}", name, value)))
}

/// Mutations requested for one run
///
/// Applied in a fixed order: rewards, custom transfer, bulk append.
/// `erase` overrides everything else.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOptions {
    /// Force a full rebuild regardless of drift detection
    pub scan: bool,

    /// Bulk append: genesis on an empty ledger, random transfers otherwise
    pub count: Option<u64>,

    /// Reward every account with a custom amount
    pub airdrop: Option<Decimal>,

    /// Reward every account with the default amount
    pub reward: bool,

    /// One explicit transfer
    pub transfer: Option<TransferRequest>,

    /// Wipe the ledger
    pub erase: bool,
}

/// Parsed `from,to,amount` transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRequest {
    /// Sender
    pub from: AccountId,
    /// Receiver
    pub to: AccountId,
    /// Amount
    pub amount: Decimal,
}

impl FromStr for TransferRequest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        let [from, to, amount] = parts.as_slice() else {
            return Err(Error::Config(format!(
                "Transfer must be formatted as from,to,amount: {}",
                s
            )));
        };

        let from: u64 = parse_env("transfer sender", from)?;
        let to: u64 = parse_env("transfer receiver", to)?;
        let amount: Decimal = parse_env("transfer amount", amount)?;

        Ok(Self {
            from: AccountId::new(from),
            to: AccountId::new(to),
            amount,
        })
    }
}
