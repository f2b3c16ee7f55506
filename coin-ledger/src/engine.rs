//! Balance engine
//!
//! Two ways to obtain balances:
//!
//! - [`incremental_load`] reads the cached account records, O(accounts)
//! - [`full_scan`] replays the whole transaction log from genesis,
//!   O(transactions); only run when drift is detected or a scan is forced

use crate::{
    error::Result,
    state::LedgerState,
    storage::LedgerStore,
    types::{AccountId, TxId},
};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::time::Instant;

/// Result of a full scan
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    /// Rebuilt state (balances, coins, index)
    pub state: LedgerState,

    /// Transactions replayed
    pub applied: u64,

    /// Malformed or unreplayable records skipped
    pub skipped: Vec<TxId>,
}

/// Read cached balances straight from the account records
pub async fn incremental_load(store: &dyn LedgerStore) -> Result<BTreeMap<AccountId, Decimal>> {
    let records = store.read_accounts().await?;
    tracing::debug!(accounts = records.len(), "Loaded cached account balances");

    Ok(records
        .into_iter()
        .map(|record| (record.id, record.balance))
        .collect())
}

/// Rebuild balances, supply and index by replaying every transaction
///
/// Replay follows ascending id order. Records missing a required field, or
/// whose replay would overflow a balance or the supply, are skipped and
/// reported in [`ScanOutcome::skipped`]. The resulting index is the
/// highest id present in the log, malformed records included.
pub async fn full_scan(store: &dyn LedgerStore) -> Result<ScanOutcome> {
    let started = Instant::now();
    tracing::info!(backend = store.name(), "Running full transaction scan");

    let mut records = store.read_transactions().await?;
    records.sort_by_key(|record| record.id);

    let mut state = LedgerState::new();
    let mut applied = 0u64;
    let mut skipped = Vec::new();
    let mut highest_id: TxId = 0;

    for record in records {
        let record_id = record.id.unwrap_or(0);
        highest_id = highest_id.max(record_id);

        let Some(tx) = record.into_transaction() else {
            tracing::warn!(tx_id = record_id, "Skipping malformed transaction record");
            skipped.push(record_id);
            continue;
        };

        match state.apply(&tx) {
            Ok(()) => applied += 1,
            Err(e) => {
                tracing::warn!(tx_id = record_id, error = %e, "Skipping unreplayable transaction record");
                skipped.push(record_id);
            }
        }
    }

    state.index = highest_id;
    state.mark_rebuilt();

    tracing::info!(
        applied,
        skipped = skipped.len(),
        accounts = state.balances.len(),
        coins = %state.coins,
        index = state.index,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Full scan complete"
    );

    Ok(ScanOutcome {
        state,
        applied,
        skipped,
    })
}
