//! Application configuration with layered loading.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: Hardcoded in struct `Default` implementations,
//!    including descriptors for the four supported contracts
//! 2. **Config file**: TOML file specified by `HOLDERSCOPE_CONFIG` env var
//! 3. **Environment variables**: `HOLDERSCOPE_*` vars override specific fields
//!
//! # Validation
//!
//! Configuration is validated at load time: contract addresses and function
//! selectors must parse, tier tables must be non-empty, endpoints must be
//! well-formed URLs. Invalid configurations return errors instead of failing
//! deep inside the pipeline — the registry is the single place optional
//! fields are checked, so call sites never need optional-chaining.
//!
//! # Example
//!
//! ```toml
//! [server]
//! bind_address = "0.0.0.0"
//! bind_port = 3030
//!
//! [indexer]
//! base_url = "https://eth-mainnet.g.alchemy.com/nft/v3/KEY"
//!
//! [[contracts]]
//! key = "element280"
//! address = "0xe786034c1a4b54ccc0d6ca88fc27fa4b6ea8b8e0"
//! deployment_block = 20530000
//! ```

use crate::{
    retry::RetryPolicy,
    types::{Address, ContractKey},
};
use ahash::AHashMap;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc, time::Duration};

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("contract {key}: {reason}")]
    InvalidContract { key: String, reason: String },

    #[error("invalid endpoint url '{url}': {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("duplicate contract key: {0}")]
    DuplicateContract(ContractKey),

    #[error("no contracts configured")]
    NoContracts,
}

/// HTTP server configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// IP address to bind the server to. Defaults to `127.0.0.1`.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port number to listen on. Defaults to `3030`.
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,

    /// Request timeout in seconds. Defaults to `30`.
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_bind_port() -> u16 {
    3030
}

fn default_request_timeout_seconds() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            bind_port: default_bind_port(),
            request_timeout_seconds: default_request_timeout_seconds(),
        }
    }
}

/// Indexing service (owners + transfers API) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Base URL of the indexing API, key path segment included.
    #[serde(default = "default_indexer_base_url")]
    pub base_url: String,

    /// Per-request timeout in seconds. Defaults to `30`.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Block span of one transfer sub-range request. Defaults to `2000`.
    #[serde(default = "default_transfer_range_size")]
    pub transfer_range_size: u64,

    /// Concurrent in-flight transfer sub-range requests. Defaults to `3`.
    #[serde(default = "default_transfer_concurrency")]
    pub transfer_concurrency: usize,
}

fn default_indexer_base_url() -> String {
    "https://eth-mainnet.g.alchemy.com/nft/v3/demo".to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_transfer_range_size() -> u64 {
    2000
}

fn default_transfer_concurrency() -> usize {
    3
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            base_url: default_indexer_base_url(),
            timeout_seconds: default_timeout_seconds(),
            transfer_range_size: default_transfer_range_size(),
            transfer_concurrency: default_transfer_concurrency(),
        }
    }
}

/// Blockchain node (read-only `eth_call`) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// JSON-RPC endpoint URL.
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    /// Per-request timeout in seconds. Defaults to `30`.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Calls per JSON-RPC batch request. Defaults to `50`.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Concurrent in-flight batches. Defaults to `4`.
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,

    /// Delay between dispatching successive concurrency slots, in
    /// milliseconds. Respects upstream rate limits. Defaults to `200`.
    #[serde(default = "default_batch_dispatch_delay_ms")]
    pub batch_dispatch_delay_ms: u64,
}

fn default_rpc_url() -> String {
    "https://eth-mainnet.g.alchemy.com/v2/demo".to_string()
}

fn default_batch_size() -> usize {
    50
}

fn default_batch_concurrency() -> usize {
    4
}

fn default_batch_dispatch_delay_ms() -> u64 {
    200
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            timeout_seconds: default_timeout_seconds(),
            batch_size: default_batch_size(),
            batch_concurrency: default_batch_concurrency(),
            batch_dispatch_delay_ms: default_batch_dispatch_delay_ms(),
        }
    }
}

/// Remote key-value cache tier (Upstash-style REST) configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteKvConfig {
    /// Whether the remote tier participates at all. Defaults to `false`.
    #[serde(default)]
    pub enabled: bool,

    /// REST endpoint base URL.
    #[serde(default)]
    pub base_url: String,

    /// Bearer token for the REST endpoint.
    #[serde(default)]
    pub token: String,

    /// Cache-kind prefixes that bypass the remote tier even when enabled
    /// (e.g. bulky holder blobs kept filesystem-only).
    #[serde(default)]
    pub disabled_prefixes: Vec<String>,
}

/// Cache store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory for the filesystem tier. Defaults to `./cache`.
    #[serde(default = "default_cache_directory")]
    pub directory: String,

    /// Remote-tier TTL in seconds. Defaults to `86400` (24h). The filesystem
    /// tier never expires.
    #[serde(default = "default_cache_ttl_seconds")]
    pub ttl_seconds: u64,

    /// Holder-cache staleness window in seconds: a cached entry younger than
    /// this is served without repopulation. Defaults to `3600`.
    #[serde(default = "default_stale_after_seconds")]
    pub stale_after_seconds: u64,

    /// Bound on the in-memory tier. Defaults to `64` entries.
    #[serde(default = "default_memory_entries")]
    pub memory_entries: usize,

    /// Remote tier settings.
    #[serde(default)]
    pub remote: RemoteKvConfig,
}

fn default_cache_directory() -> String {
    "./cache".to_string()
}

fn default_cache_ttl_seconds() -> u64 {
    86_400
}

fn default_stale_after_seconds() -> u64 {
    3_600
}

fn default_memory_entries() -> usize {
    64
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: default_cache_directory(),
            ttl_seconds: default_cache_ttl_seconds(),
            stale_after_seconds: default_stale_after_seconds(),
            memory_entries: default_memory_entries(),
            remote: RemoteKvConfig::default(),
        }
    }
}

/// Retry policy configuration shared by all upstream calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the initial attempt. Defaults to `3`.
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Base delay between attempts, in milliseconds. Defaults to `500`.
    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,

    /// Exponential backoff when `true`, linear otherwise. Defaults to `true`.
    #[serde(default = "default_backoff")]
    pub backoff: bool,
}

fn default_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_backoff() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { retries: default_retries(), delay_ms: default_retry_delay_ms(), backoff: true }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retries,
            delay: Duration::from_millis(self.delay_ms),
            backoff: self.backoff,
        }
    }
}

/// Application logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "trace", "debug", "info"). Defaults to `"info"`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: `"json"` or `"pretty"`. Defaults to `"pretty"`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format() }
    }
}

/// One tier's on-chain metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierInfo {
    /// Reward multiplier conferred by tokens of this tier.
    pub multiplier: u64,
    /// Display name.
    pub name: String,
}

/// Raw, unvalidated per-contract configuration as it appears in TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractConfig {
    pub key: ContractKey,
    pub address: String,

    /// Reward vault holding claimable balances, when separate from the NFT
    /// contract itself.
    #[serde(default)]
    pub vault_address: Option<String>,

    /// Burn address for this collection. Defaults to `0x…dEaD`.
    #[serde(default)]
    pub burn_address: Option<String>,

    /// Tier table: tier id → multiplier/name. Keys are strings because TOML
    /// table keys are; they must parse as tier ids.
    #[serde(default)]
    pub tiers: BTreeMap<String, TierInfo>,

    /// 4-byte selector of the per-token tier lookup, e.g. `getTokenTier(uint256)`.
    #[serde(default = "default_tier_selector")]
    pub tier_selector: String,

    /// 4-byte selector of the per-wallet reward lookup on the vault,
    /// e.g. `claimableRewards(address)`. Absent when the protocol has no
    /// claimable pool.
    #[serde(default)]
    pub reward_selector: Option<String>,

    /// Default page size for holder responses. Defaults to `50`.
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Block the contract was deployed at; transfer scans never start below.
    pub deployment_block: u64,

    /// Disabled contracts reject reads and population triggers with 403.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_tier_selector() -> String {
    // getTokenTier(uint256)
    "0x6746dcb9".to_string()
}

fn default_page_size() -> usize {
    50
}

fn default_enabled() -> bool {
    true
}

/// Validated, immutable descriptor for one contract.
///
/// Everything optional in [`ContractConfig`] is resolved here once, at
/// startup, so pipeline code never re-validates.
#[derive(Debug, Clone)]
pub struct ContractDescriptor {
    pub key: ContractKey,
    pub address: Address,
    pub vault_address: Option<Address>,
    pub burn_address: Address,
    pub tiers: BTreeMap<u8, TierInfo>,
    pub tier_selector: [u8; 4],
    pub reward_selector: Option<[u8; 4]>,
    pub page_size: usize,
    pub deployment_block: u64,
    pub enabled: bool,
}

impl ContractDescriptor {
    /// Multiplier for a tier id; unknown tiers contribute zero.
    #[must_use]
    pub fn multiplier_for(&self, tier: u8) -> u64 {
        self.tiers.get(&tier).map_or(0, |t| t.multiplier)
    }

    fn validate(raw: &ContractConfig) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidContract {
            key: raw.key.to_string(),
            reason,
        };

        let address: Address = raw
            .address
            .as_str()
            .try_into()
            .map_err(|e| invalid(format!("bad address: {e}")))?;

        let vault_address = raw
            .vault_address
            .as_deref()
            .map(|s| s.try_into().map_err(|e| invalid(format!("bad vault address: {e}"))))
            .transpose()?;

        let burn_address = raw
            .burn_address
            .as_deref()
            .map(|s| s.try_into().map_err(|e| invalid(format!("bad burn address: {e}"))))
            .transpose()?
            .unwrap_or(Address::DEAD);

        if raw.tiers.is_empty() {
            return Err(invalid("tier table is empty".to_string()));
        }
        if raw.page_size == 0 {
            return Err(invalid("page_size must be greater than zero".to_string()));
        }

        let mut tiers = BTreeMap::new();
        for (tier_key, info) in &raw.tiers {
            let tier: u8 = tier_key
                .parse()
                .map_err(|_| invalid(format!("bad tier id: {tier_key}")))?;
            tiers.insert(tier, info.clone());
        }

        let tier_selector = parse_selector(&raw.tier_selector)
            .map_err(|e| invalid(format!("bad tier selector: {e}")))?;
        let reward_selector = raw
            .reward_selector
            .as_deref()
            .map(|s| parse_selector(s).map_err(|e| invalid(format!("bad reward selector: {e}"))))
            .transpose()?;

        Ok(Self {
            key: raw.key,
            address,
            vault_address,
            burn_address,
            tiers,
            tier_selector,
            reward_selector,
            page_size: raw.page_size,
            deployment_block: raw.deployment_block,
            enabled: raw.enabled,
        })
    }
}

fn parse_selector(s: &str) -> Result<[u8; 4], String> {
    let hex_str = s.strip_prefix("0x").ok_or_else(|| "missing 0x prefix".to_string())?;
    let bytes = hex::decode(hex_str).map_err(|e| e.to_string())?;
    if bytes.len() != 4 {
        return Err(format!("expected 4 bytes, got {}", bytes.len()));
    }
    let mut arr = [0u8; 4];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}

/// Typed registry mapping every [`ContractKey`] to its validated descriptor.
///
/// Built once at startup from the `contracts` config section; immutable for
/// the process lifetime.
#[derive(Debug)]
pub struct ContractRegistry {
    descriptors: AHashMap<ContractKey, Arc<ContractDescriptor>>,
}

impl ContractRegistry {
    /// Validates raw contract configs into a registry.
    ///
    /// # Errors
    ///
    /// Returns an error for duplicate keys, unparsable addresses/selectors,
    /// empty tier tables, or an empty contract list.
    pub fn from_configs(configs: &[ContractConfig]) -> Result<Self, ConfigError> {
        if configs.is_empty() {
            return Err(ConfigError::NoContracts);
        }

        let mut descriptors = AHashMap::with_capacity(configs.len());
        for raw in configs {
            let descriptor = ContractDescriptor::validate(raw)?;
            if descriptors.insert(raw.key, Arc::new(descriptor)).is_some() {
                return Err(ConfigError::DuplicateContract(raw.key));
            }
        }

        Ok(Self { descriptors })
    }

    #[must_use]
    pub fn get(&self, key: ContractKey) -> Option<Arc<ContractDescriptor>> {
        self.descriptors.get(&key).cloned()
    }

    /// Descriptors for all configured contracts, in no particular order.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<ContractDescriptor>> {
        self.descriptors.values().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// Root application configuration containing all subsystem settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Deployment environment label. Defaults to `"development"`.
    #[serde(default = "default_environment")]
    pub environment: String,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub indexer: IndexerConfig,

    #[serde(default)]
    pub node: NodeConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Per-contract settings; defaults cover the four supported contracts.
    #[serde(default = "default_contracts")]
    pub contracts: Vec<ContractConfig>,
}

fn default_environment() -> String {
    "development".to_string()
}

/// Built-in descriptors for the supported collections. A config file can
/// replace this list wholesale; partial overrides are not supported.
fn default_contracts() -> Vec<ContractConfig> {
    let standard_tiers = |multipliers: &[u64]| -> BTreeMap<String, TierInfo> {
        multipliers
            .iter()
            .enumerate()
            .map(|(i, m)| {
                ((i + 1).to_string(), TierInfo { multiplier: *m, name: format!("Tier {}", i + 1) })
            })
            .collect()
    };

    vec![
        ContractConfig {
            key: ContractKey::Element280,
            address: "0xe786034c1a4b54ccc0d6ca88fc27fa4b6ea8b8e0".to_string(),
            vault_address: Some("0x44a6ac8ba7b06e6f8a24c37cd3c2a2a42a81fcd0".to_string()),
            burn_address: None,
            tiers: standard_tiers(&[1, 2, 4, 8, 16, 28]),
            tier_selector: default_tier_selector(),
            reward_selector: Some("0xa9f4d587".to_string()),
            page_size: 50,
            deployment_block: 20_530_000,
            enabled: true,
        },
        ContractConfig {
            key: ContractKey::Element369,
            address: "0x2c27c13d3a45e1efc9dfba27d9a5b86b2d2c47a9".to_string(),
            vault_address: None,
            burn_address: None,
            tiers: standard_tiers(&[1, 3, 6, 9]),
            tier_selector: default_tier_selector(),
            reward_selector: None,
            page_size: 50,
            deployment_block: 21_080_000,
            enabled: true,
        },
        ContractConfig {
            key: ContractKey::Stax,
            address: "0xd90bf2d5cc2fbd85ce7cc0a0bcbac93db2b3a2b1".to_string(),
            vault_address: None,
            burn_address: None,
            tiers: standard_tiers(&[1, 2, 5, 10]),
            tier_selector: default_tier_selector(),
            reward_selector: Some("0x4e71d92d".to_string()),
            page_size: 50,
            deployment_block: 20_920_000,
            enabled: true,
        },
        ContractConfig {
            key: ContractKey::Flux,
            address: "0xb53cfcea0b8ad52c51b20b9a13e5bfa9f315c3b5".to_string(),
            vault_address: None,
            burn_address: None,
            tiers: standard_tiers(&[1, 2, 3, 5, 8]),
            tier_selector: default_tier_selector(),
            reward_selector: Some("0x4e71d92d".to_string()),
            page_size: 50,
            deployment_block: 21_220_000,
            enabled: true,
        },
    ]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            server: ServerConfig::default(),
            indexer: IndexerConfig::default(),
            node: NodeConfig::default(),
            cache: CacheConfig::default(),
            retry: RetryConfig::default(),
            logging: LoggingConfig::default(),
            contracts: default_contracts(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from defaults, the optional `HOLDERSCOPE_CONFIG`
    /// TOML file, and `HOLDERSCOPE_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error when a source fails to parse or validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Ok(path) = std::env::var("HOLDERSCOPE_CONFIG") {
            builder = builder.add_source(File::with_name(&path));
        }

        builder = builder.add_source(Environment::with_prefix("HOLDERSCOPE").separator("__"));

        let loaded: AppConfig = match builder.build() {
            Ok(raw) => {
                let mut cfg: AppConfig = raw.try_deserialize()?;
                if cfg.contracts.is_empty() {
                    cfg.contracts = default_contracts();
                }
                cfg
            }
            Err(e) => return Err(ConfigError::Load(e)),
        };

        loaded.validate()?;
        Ok(loaded)
    }

    /// Validates cross-field constraints and endpoint URLs.
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for endpoint in [&self.indexer.base_url, &self.node.rpc_url] {
            url::Url::parse(endpoint).map_err(|e| ConfigError::InvalidEndpoint {
                url: endpoint.clone(),
                reason: e.to_string(),
            })?;
        }

        if self.cache.remote.enabled {
            url::Url::parse(&self.cache.remote.base_url).map_err(|e| {
                ConfigError::InvalidEndpoint {
                    url: self.cache.remote.base_url.clone(),
                    reason: e.to_string(),
                }
            })?;
        }

        // Registry construction runs the per-contract validation.
        ContractRegistry::from_configs(&self.contracts)?;
        Ok(())
    }

    /// Builds the validated contract registry from this config.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`ContractRegistry::from_configs`].
    pub fn registry(&self) -> Result<ContractRegistry, ConfigError> {
        ContractRegistry::from_configs(&self.contracts)
    }
}
