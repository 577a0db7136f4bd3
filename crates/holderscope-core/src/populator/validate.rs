//! Output invariant validation for aggregated holder lists.
//!
//! Defense-in-depth before any cache write: a holder list that violates its
//! documented invariants must never displace a known-good cache entry. A
//! violation here is fatal to the run, not repaired.

use thiserror::Error;

use crate::types::{Address, HolderSummary};

/// Invariant violations detectable on a finished holder list.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("holder {wallet}: tier counts sum to {tier_sum} but total is {total}")]
    TierSumMismatch { wallet: Address, tier_sum: u64, total: u64 },

    #[error("rank at position {position} is {found}, expected {expected}")]
    NonDenseRanks { position: usize, found: u32, expected: u32 },

    #[error("duplicate holder entry for wallet {0}")]
    DuplicateWallet(Address),

    #[error("holder entry with zero address at position {0}")]
    ZeroWallet(usize),

    #[error("holder {wallet} has zero tokens")]
    EmptyHolder { wallet: Address },
}

/// Validates the holder-list invariants.
///
/// - every holder's tier counts sum to its total, which is positive
/// - ranks are exactly `1..=N` in list order
/// - wallets are distinct and never the zero address
///
/// # Errors
///
/// Returns the first violation found.
pub fn validate_holders(holders: &[HolderSummary]) -> Result<(), ValidationError> {
    let mut seen = ahash::AHashSet::with_capacity(holders.len());

    for (position, holder) in holders.iter().enumerate() {
        if holder.wallet.is_zero() {
            return Err(ValidationError::ZeroWallet(position));
        }
        if !seen.insert(holder.wallet) {
            return Err(ValidationError::DuplicateWallet(holder.wallet));
        }
        if holder.total == 0 {
            return Err(ValidationError::EmptyHolder { wallet: holder.wallet });
        }

        let tier_sum = holder.tier_sum();
        if tier_sum != holder.total {
            return Err(ValidationError::TierSumMismatch {
                wallet: holder.wallet,
                tier_sum,
                total: holder.total,
            });
        }

        let expected = position as u32 + 1;
        if holder.rank != expected {
            return Err(ValidationError::NonDenseRanks {
                position,
                found: holder.rank,
                expected,
            });
        }
    }

    Ok(())
}
