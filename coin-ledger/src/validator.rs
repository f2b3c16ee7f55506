//! Consistency validator
//!
//! Decides on open whether the cached account records can be trusted or the
//! balances must be rebuilt from the transaction log. The check is cheap: one
//! metadata read, one pass over the account records, and two probes of the
//! transaction log (last id, count).

use crate::{
    engine::{self, ScanOutcome},
    error::Result,
    state::LedgerState,
    storage::LedgerStore,
    types::{LedgerMetadata, TxId},
};
use crate::fingerprint::accounts_fingerprint;
use std::fmt;

/// Why a rebuild was chosen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriftReason {
    /// Caller asked for a full scan
    Forced,
    /// No metadata although the ledger holds records
    MissingMetadata,
    /// Metadata exists but lacks a required field
    IncompleteMetadata,
    /// Highest stored id differs from the metadata index
    LastIdMismatch {
        /// Index claimed by metadata
        expected: TxId,
        /// Highest id present
        observed: TxId,
    },
    /// Number of stored transactions differs from the metadata index
    CountMismatch {
        /// Index claimed by metadata
        expected: TxId,
        /// Records present
        observed: u64,
    },
    /// Account records no longer hash to the stored fingerprint
    FingerprintMismatch,
}

impl fmt::Display for DriftReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriftReason::Forced => write!(f, "full scan requested"),
            DriftReason::MissingMetadata => write!(f, "metadata missing"),
            DriftReason::IncompleteMetadata => write!(f, "metadata incomplete"),
            DriftReason::LastIdMismatch { expected, observed } => {
                write!(f, "last tx id {} != index {}", observed, expected)
            }
            DriftReason::CountMismatch { expected, observed } => {
                write!(f, "tx count {} != index {}", observed, expected)
            }
            DriftReason::FingerprintMismatch => write!(f, "accounts fingerprint mismatch"),
        }
    }
}

/// Outcome of the consistency check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Cached balances are used as-is
    TrustCache,
    /// Balances were rebuilt by a full scan
    Rebuild(DriftReason),
}

/// What `reconcile` found and the state it produced
#[derive(Debug)]
pub struct Reconciliation {
    /// Trust or rebuild
    pub decision: Decision,

    /// State to continue the run with
    pub state: LedgerState,

    /// Highest transaction id in the backend
    pub observed_last_id: TxId,

    /// Transaction records in the backend
    pub observed_tx_count: u64,

    /// Full scan details when a rebuild ran
    pub scan: Option<ScanOutcome>,
}

impl Reconciliation {
    /// Whether the cache was trusted
    pub fn trust_cache(&self) -> bool {
        self.decision == Decision::TrustCache
    }
}

/// Compare persisted metadata with what the backend holds and build the state
pub async fn reconcile(store: &dyn LedgerStore, force_full_scan: bool) -> Result<Reconciliation> {
    let stored_metadata = store.read_metadata().await?;
    let balances = engine::incremental_load(store).await?;
    let observed_last_id = store.last_transaction_id().await?;
    let observed_tx_count = store.transaction_count().await?;
    let observed_fingerprint = accounts_fingerprint(&balances);

    let metadata_present = stored_metadata.is_some();
    let metadata = stored_metadata.and_then(|m| m.into_metadata());

    let drift = if force_full_scan {
        Some(DriftReason::Forced)
    } else {
        detect_drift(
            metadata_present,
            metadata.as_ref(),
            balances.is_empty(),
            observed_last_id,
            observed_tx_count,
            &observed_fingerprint,
        )
    };

    let Some(reason) = drift else {
        let state = match &metadata {
            Some(metadata) => LedgerState::from_cache(balances, metadata),
            None => LedgerState::new(),
        };

        tracing::info!(
            index = state.index,
            accounts = state.balances.len(),
            coins = %state.coins,
            "Ledger consistent, using cached balances"
        );

        return Ok(Reconciliation {
            decision: Decision::TrustCache,
            state,
            observed_last_id,
            observed_tx_count,
            scan: None,
        });
    };

    tracing::warn!(reason = %reason, "Ledger drift detected, rebuilding balances");

    let scan = engine::full_scan(store).await?;
    let state = scan.state.clone();

    Ok(Reconciliation {
        decision: Decision::Rebuild(reason),
        state,
        observed_last_id,
        observed_tx_count,
        scan: Some(scan),
    })
}

/// Pure drift rule; `None` means the cache is trustworthy
fn detect_drift(
    metadata_present: bool,
    metadata: Option<&LedgerMetadata>,
    no_accounts: bool,
    observed_last_id: TxId,
    observed_tx_count: u64,
    observed_fingerprint: &str,
) -> Option<DriftReason> {
    let Some(metadata) = metadata else {
        if metadata_present {
            return Some(DriftReason::IncompleteMetadata);
        }
        // empty ledger: nothing to rebuild
        if observed_last_id == 0 && observed_tx_count == 0 && no_accounts {
            return None;
        }
        return Some(DriftReason::MissingMetadata);
    };

    if observed_last_id != metadata.index {
        return Some(DriftReason::LastIdMismatch {
            expected: metadata.index,
            observed: observed_last_id,
        });
    }

    if observed_tx_count != metadata.index {
        return Some(DriftReason::CountMismatch {
            expected: metadata.index,
            observed: observed_tx_count,
        });
    }

    if observed_fingerprint != metadata.accounts_fingerprint {
        return Some(DriftReason::FingerprintMismatch);
    }

    None
}
