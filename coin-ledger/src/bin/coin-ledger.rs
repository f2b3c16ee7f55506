//! Coin ledger command line runner

use anyhow::Context;
use clap::Parser;
use coin_ledger::{Config, Decision, Ledger, RunOptions, TransferRequest};
use rust_decimal::Decimal;
use std::path::PathBuf;

/// Open the coin ledger, apply the requested mutations and flush.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Reward every account with a custom amount.
    #[arg(short, long, value_name = "AMOUNT")]
    airdrop: Option<Decimal>,

    /// Log every account balance after the run.
    #[arg(short, long)]
    balances: bool,

    /// Append N random transfers (bootstraps the ledger when empty).
    #[arg(short, long, value_name = "N")]
    count: Option<u64>,

    /// Wipe every transaction, account and metadata record.
    #[arg(short, long)]
    erase: bool,

    /// Reward every account with the configured default amount.
    #[arg(short, long)]
    reward: bool,

    /// Rebuild balances from the full transaction log.
    #[arg(short, long)]
    scan: bool,

    /// Create one transfer, formatted as from,to,amount.
    #[arg(short, long, value_name = "FROM,TO,AMOUNT")]
    transfer: Option<TransferRequest>,

    /// TOML configuration file; LEDGER_* environment variables otherwise.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

impl Args {
    fn run_options(&self) -> RunOptions {
        RunOptions {
            scan: self.scan,
            count: self.count,
            airdrop: self.airdrop,
            reward: self.reward,
            transfer: self.transfer,
            erase: self.erase,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::from_env().context("loading config from environment")?,
    };

    tracing::info!(
        backend = ?config.backend,
        data_dir = %config.data_dir.display(),
        "Starting coin ledger"
    );

    let summary = Ledger::run(config, &args.run_options()).await?;

    if summary.erased {
        tracing::info!("Ledger erased");
        return Ok(());
    }

    if let Some(Decision::Rebuild(reason)) = &summary.decision {
        tracing::info!(reason = %reason, "Balances were rebuilt from the transaction log");
    }

    tracing::info!(
        coins = %summary.coins,
        index = summary.index,
        accounts = summary.balances.len(),
        committed = summary.committed,
        rejected = summary.rejected,
        "Run complete"
    );

    if args.balances {
        for (account, balance) in &summary.balances {
            tracing::info!(account = %account, balance = %balance, "Balance");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_are_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_short_flags() {
        let args = Args::parse_from(["coin-ledger", "-r", "-s", "-c", "25", "-t", "1,2,10.5"]);
        let options = args.run_options();
        assert!(options.reward);
        assert!(options.scan);
        assert_eq!(options.count, Some(25));
        assert_eq!(options.transfer.unwrap().amount, Decimal::new(105, 1));
        assert!(!options.erase);
    }

    #[test]
    fn test_bad_transfer_is_rejected() {
        assert!(Args::try_parse_from(["coin-ledger", "-t", "1,2"]).is_err());
    }
}
