//! Balance-set fingerprinting
//!
//! The fingerprint is a BLAKE3 digest over a canonical encoding of the
//! balance mapping. It is stored in the metadata singleton so that a load can
//! tell whether the cached account records still match what was last flushed
//! without replaying the transaction log.
//!
//! Canonical encoding, per account in ascending id order:
//! `id (u64, big endian) || normalized balance (UTF-8) || 0x00`

use crate::types::AccountId;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Fingerprint of a balance mapping, as lowercase hex
///
/// Trailing zeros are normalized away, so `1000` and `1000.00` hash the same.
pub fn accounts_fingerprint(balances: &BTreeMap<AccountId, Decimal>) -> String {
    let mut hasher = blake3::Hasher::new();
    for (id, balance) in balances {
        hasher.update(&id.as_u64().to_be_bytes());
        hasher.update(balance.normalize().to_string().as_bytes());
        hasher.update(&[0u8]);
    }
    hasher.finalize().to_hex().to_string()
}
