//! Core type definitions for holder analytics, caching, and the population
//! pipeline.
//!
//! # Type Categories
//!
//! ## Domain Types
//! - [`Address`]: 20-byte Ethereum address with checked hex parsing
//! - [`ContractKey`]: closed enumeration of supported NFT contracts
//! - [`OwnerRecord`], [`TokenOwnerMap`]: intermediate ownership data
//!
//! ## Cache-Resident Types
//! - [`HolderSummary`]: aggregated per-wallet statistics, one per holder
//! - [`CacheEntry`]: the externally visible holders artifact
//! - [`TransferSummary`]: classified transfer counts with resume cursor
//!
//! All wire-facing types serialize with camelCase field names because the
//! dashboard consuming this API expects the original JSON shape.

use ahash::AHashMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Error type for address parsing.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AddressParseError {
    #[error("missing 0x prefix")]
    MissingPrefix,
    #[error("invalid hex: {0}")]
    InvalidHex(String),
    #[error("invalid length: expected 20 bytes, got {0}")]
    InvalidLength(usize),
}

/// 20-byte Ethereum address.
///
/// Provides `TryFrom<&str>` for idiomatic parsing of 0x-prefixed hex strings.
/// Comparison and hashing are byte-wise, so two addresses that differ only in
/// hex casing are equal after parsing.
///
/// # Example
/// ```
/// use holderscope_core::types::Address;
///
/// let addr: Address = "0x00000000000000000000000000000000DeaDBeef".try_into().unwrap();
/// assert_eq!(addr.to_string(), "0x00000000000000000000000000000000deadbeef");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// The zero address, used as the mint sentinel in transfer logs.
    pub const ZERO: Address = Address([0u8; 20]);

    /// Conventional burn address (`0x…dEaD`).
    pub const DEAD: Address = Address([
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0xde, 0xad,
    ]);

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Returns true for the zero address.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

impl TryFrom<&str> for Address {
    type Error = AddressParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let hex_str = value.strip_prefix("0x").ok_or(AddressParseError::MissingPrefix)?;

        let bytes =
            hex::decode(hex_str).map_err(|e| AddressParseError::InvalidHex(e.to_string()))?;

        if bytes.len() != 20 {
            return Err(AddressParseError::InvalidLength(bytes.len()));
        }

        let mut arr = [0u8; 20];
        arr.copy_from_slice(&bytes);
        Ok(Address(arr))
    }
}

impl std::str::FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Serialize for Address {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Closed enumeration of the NFT contracts this deployment serves.
///
/// Route parameters, cache keys, and the contract registry are all keyed by
/// this enum rather than raw strings, so an unknown contract is rejected at
/// the boundary instead of surfacing as a missing-field panic deep in the
/// pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractKey {
    Element280,
    Element369,
    Stax,
    Flux,
}

impl ContractKey {
    /// All supported contract keys, in registry order.
    pub const ALL: &'static [ContractKey] =
        &[ContractKey::Element280, ContractKey::Element369, ContractKey::Stax, ContractKey::Flux];

    /// Stable lowercase identifier used in routes and cache keys.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractKey::Element280 => "element280",
            ContractKey::Element369 => "element369",
            ContractKey::Stax => "stax",
            ContractKey::Flux => "flux",
        }
    }
}

impl std::fmt::Display for ContractKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContractKey {
    type Err = UnknownContract;

    /// Case-insensitive lookup; route parameters arrive in arbitrary casing.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "element280" => Ok(ContractKey::Element280),
            "element369" => Ok(ContractKey::Element369),
            "stax" => Ok(ContractKey::Stax),
            "flux" => Ok(ContractKey::Flux),
            _ => Err(UnknownContract(s.to_string())),
        }
    }
}

/// Error returned when a route or config references a contract outside
/// [`ContractKey::ALL`].
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown contract: {0}")]
pub struct UnknownContract(pub String);

/// A single token held by a wallet, as reported by the indexing service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalance {
    pub token_id: u64,
    pub balance: u64,
}

/// One wallet's holdings as returned by the owner enumerator.
///
/// Ephemeral: recomputed on every population run, never persisted standalone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerRecord {
    pub owner_address: Address,
    pub token_balances: Vec<TokenBalance>,
}

impl OwnerRecord {
    /// Sum of token balances across all tokens this wallet holds.
    #[must_use]
    pub fn total_balance(&self) -> u64 {
        self.token_balances.iter().map(|t| t.balance).sum()
    }
}

/// Bidirectional token ↔ owner mapping built once per population run.
///
/// Invariant: every token id appears in exactly one owner's list. When the
/// indexing service reports a token under two owners (stale pagination
/// snapshots can do this), the last-seen assignment wins and the conflict is
/// counted for logging. It never fails the run.
#[derive(Debug, Default)]
pub struct TokenOwnerMap {
    token_to_owner: AHashMap<u64, Address>,
    owner_to_tokens: AHashMap<Address, Vec<u64>>,
    duplicate_assignments: u64,
}

impl TokenOwnerMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns `token_id` to `owner`, displacing any previous assignment.
    ///
    /// Returns the displaced owner when the token was already claimed.
    pub fn assign(&mut self, token_id: u64, owner: Address) -> Option<Address> {
        let previous = self.token_to_owner.insert(token_id, owner);

        if let Some(prev) = previous {
            if prev == owner {
                return Some(prev);
            }
            self.duplicate_assignments += 1;
            if let Some(tokens) = self.owner_to_tokens.get_mut(&prev) {
                tokens.retain(|t| *t != token_id);
            }
        }

        self.owner_to_tokens.entry(owner).or_default().push(token_id);
        previous
    }

    #[must_use]
    pub fn owner_of(&self, token_id: u64) -> Option<Address> {
        self.token_to_owner.get(&token_id).copied()
    }

    #[must_use]
    pub fn tokens_of(&self, owner: &Address) -> Option<&[u64]> {
        self.owner_to_tokens.get(owner).map(Vec::as_slice)
    }

    /// Number of distinct tokens with an assigned owner.
    #[must_use]
    pub fn token_count(&self) -> usize {
        self.token_to_owner.len()
    }

    /// Number of distinct owners holding at least one token.
    #[must_use]
    pub fn owner_count(&self) -> usize {
        self.owner_to_tokens.len()
    }

    /// Conflicting assignments observed while building the map.
    #[must_use]
    pub fn duplicate_assignments(&self) -> u64 {
        self.duplicate_assignments
    }

    /// Iterates `(owner, token ids)` pairs in unspecified order.
    pub fn iter_owners(&self) -> impl Iterator<Item = (&Address, &Vec<u64>)> {
        self.owner_to_tokens.iter()
    }

    /// All token ids with an assigned owner, sorted ascending.
    ///
    /// Sorted so downstream batch calls are deterministic and batch
    /// boundaries stay stable across runs for the same owner set.
    #[must_use]
    pub fn sorted_token_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.token_to_owner.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

/// Per-protocol extension fields carried on a [`HolderSummary`].
///
/// Which fields are present depends on the contract: Element 280 exposes
/// share-based pending rewards per payout day, Flux and Inferno expose their
/// own reward pools. Absent fields are omitted from the serialized response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HolderExtras {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shares: Option<u128>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_day8: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_day28: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_day90: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inferno_rewards: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flux_rewards: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e280_rewards: Option<f64>,
}

/// Aggregated statistics for one wallet, the unit stored in a [`CacheEntry`].
///
/// Invariants (enforced by `populator::validate` before any cache write):
/// - `sum(tiers.values()) == total`
/// - `rank` is dense and 1-based across the containing holder list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HolderSummary {
    pub wallet: Address,
    /// Count of live tokens this wallet holds.
    pub total: u64,
    /// Token counts per tier id, ordered by tier id.
    pub tiers: BTreeMap<u8, u64>,
    /// Sum of tier multipliers over all held tokens.
    pub multiplier_sum: u64,
    /// Claimable rewards denominated in the protocol's reward token.
    pub claimable_rewards: f64,
    /// Share of the total multiplier pool, in percent.
    pub percentage: f64,
    /// Dense 1-based rank by `multiplier_sum` desc, ties broken by `total`.
    pub rank: u32,
    #[serde(flatten)]
    pub extras: HolderExtras,
}

impl HolderSummary {
    /// Sum of per-tier counts; equals `total` for a valid summary.
    #[must_use]
    pub fn tier_sum(&self) -> u64 {
        self.tiers.values().sum()
    }
}

/// The externally visible holders artifact, written once per successful
/// population run and read by any number of concurrent requests until the
/// next successful write or remote-tier TTL expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub holders: Vec<HolderSummary>,
    pub total_minted: u64,
    pub total_live: u64,
    pub total_burned: u64,
    pub total_holders: u64,
    /// Sum of all live tokens' tier multipliers; denominator for reward share.
    pub multiplier_pool: u64,
    pub updated_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Whether this entry is older than `ttl_seconds`.
    #[must_use]
    pub fn is_stale(&self, ttl_seconds: u64) -> bool {
        let age = Utc::now().signed_duration_since(self.updated_at);
        age.num_seconds() < 0 || age.num_seconds().unsigned_abs() >= ttl_seconds
    }
}

/// Classification of a single NFT transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    /// Minted from the zero address.
    Buy,
    /// Wallet-to-wallet transfer.
    Sell,
    /// Sent to the burn or zero address.
    Burn,
}

impl TransferKind {
    /// Classifies a transfer by its endpoints.
    ///
    /// `from == zero` wins over `to == burn`: a mint directly into the burn
    /// address (never observed in practice, but representable) counts as a
    /// buy so that `total_minted` stays consistent with supply.
    #[must_use]
    pub fn classify(from: Address, to: Address, burn_address: Address) -> Self {
        if from.is_zero() {
            TransferKind::Buy
        } else if to == burn_address || to.is_zero() {
            TransferKind::Burn
        } else {
            TransferKind::Sell
        }
    }
}

/// Timestamped record of a non-fatal failure during a population run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorLogEntry {
    pub timestamp: DateTime<Utc>,
    pub phase: String,
    pub error: String,
}

impl ErrorLogEntry {
    #[must_use]
    pub fn now(phase: impl Into<String>, error: impl Into<String>) -> Self {
        Self { timestamp: Utc::now(), phase: phase.into(), error: error.into() }
    }
}

/// Classified transfer counts for a contract with the resume cursor.
///
/// Persisted per contract so subsequent runs fetch only `last_block + 1`
/// onward. `error_log` records sub-ranges that were skipped after retries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSummary {
    pub buys: u64,
    pub sells: u64,
    pub burns: u64,
    pub last_block: u64,
    #[serde(default)]
    pub error_log: Vec<ErrorLogEntry>,
}

impl TransferSummary {
    /// Folds newly fetched counts into this summary, advancing the cursor.
    pub fn absorb(&mut self, other: &TransferSummary) {
        self.buys += other.buys;
        self.sells += other.sells;
        self.burns += other.burns;
        self.last_block = self.last_block.max(other.last_block);
        self.error_log.extend(other.error_log.iter().cloned());
    }
}
