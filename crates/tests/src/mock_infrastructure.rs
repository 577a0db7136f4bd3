//! Reusable mock upstream stack: indexing API + JSON-RPC node.
//!
//! A [`TestStack`] owns two mockito servers and a temp cache directory, with
//! helpers that mount the canned responses each pipeline phase expects. The
//! node mock distinguishes request kinds by matching on the method name or
//! the 4-byte selector inside `eth_call` calldata, which mirrors how the
//! real batches differ on the wire.

use holderscope_core::{
    config::{AppConfig, CacheConfig},
    metrics::MetricsCollector,
    populator::Populator,
    runtime::HolderscopeRuntime,
    types::ContractKey,
};
use mockito::{Matcher, Mock, ServerGuard};
use serde_json::json;
use std::{path::Path, sync::Arc};
use tempfile::TempDir;

/// Tier-lookup selector configured for every test contract.
pub const TIER_SELECTOR_HEX: &str = "6746dcb9";
/// Reward-lookup selector configured for the Stax test contract.
pub const REWARD_SELECTOR_HEX: &str = "4e71d92d";

pub const ALICE: &str = "0x00000000000000000000000000000000000000a1";
pub const BOB: &str = "0x00000000000000000000000000000000000000b2";
pub const DEAD: &str = "0x000000000000000000000000000000000000dead";
pub const ZERO: &str = "0x0000000000000000000000000000000000000000";

pub struct TestStack {
    pub indexer: ServerGuard,
    pub node: ServerGuard,
    pub dir: TempDir,
    pub config: AppConfig,
}

impl TestStack {
    pub async fn new() -> Self {
        let indexer = mockito::Server::new_async().await;
        let node = mockito::Server::new_async().await;
        let dir = TempDir::new().unwrap();

        let config = test_config(dir.path(), &indexer.url(), &node.url());
        Self { indexer, node, dir, config }
    }

    pub fn populator(&self) -> (Arc<Populator>, Arc<MetricsCollector>) {
        let runtime =
            HolderscopeRuntime::builder().with_config(self.config.clone()).build().unwrap();
        (runtime.populator(), runtime.metrics())
    }

    /// Mounts the owners endpoint with the given owner entries.
    pub async fn mock_owners(&mut self, owners: serde_json::Value) -> Mock {
        self.indexer
            .mock("GET", "/getOwnersForContract")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(json!({ "owners": owners }).to_string())
            .create_async()
            .await
    }

    /// Mounts the transfers endpoint with the given transfer entries.
    pub async fn mock_transfers(&mut self, transfers: serde_json::Value) -> Mock {
        self.indexer
            .mock("POST", "/getAssetTransfers")
            .with_status(200)
            .with_body(json!({ "transfers": transfers }).to_string())
            .create_async()
            .await
    }

    /// Mounts `eth_blockNumber` on the node mock.
    pub async fn mock_block_number(&mut self, tip: u64) -> Mock {
        self.node
            .mock("POST", "/")
            .match_body(Matcher::Regex("eth_blockNumber".to_string()))
            .with_status(200)
            .with_body(
                json!({ "jsonrpc": "2.0", "id": 1, "result": format!("0x{tip:x}") }).to_string(),
            )
            .create_async()
            .await
    }

    /// Mounts the tier-lookup batch: entry `i` of the batch resolves to
    /// `tiers[i]`. Matches any batch whose calldata carries the tier
    /// selector.
    pub async fn mock_tier_batch(&mut self, tiers: &[u64]) -> Mock {
        self.mock_selector_batch(TIER_SELECTOR_HEX, tiers).await
    }

    /// Mounts the reward-lookup batch analogously (values in wei).
    pub async fn mock_reward_batch(&mut self, rewards: &[u128]) -> Mock {
        let values: Vec<u64> = rewards.iter().map(|r| *r as u64).collect();
        self.mock_selector_batch(REWARD_SELECTOR_HEX, &values).await
    }

    async fn mock_selector_batch(&mut self, selector: &str, values: &[u64]) -> Mock {
        let entries: Vec<serde_json::Value> = values
            .iter()
            .enumerate()
            .map(|(id, value)| {
                let mut word = [0u8; 32];
                word[24..].copy_from_slice(&value.to_be_bytes());
                json!({ "jsonrpc": "2.0", "id": id, "result": format!("0x{}", hex::encode(word)) })
            })
            .collect();

        self.node
            .mock("POST", "/")
            .match_body(Matcher::Regex(selector.to_string()))
            .with_status(200)
            .with_body(serde_json::Value::Array(entries).to_string())
            .create_async()
            .await
    }
}

/// Config wired to the mock servers: Stax only uses small pages, zero retry
/// delays, and no dispatch staggering so tests stay fast.
pub fn test_config(cache_dir: &Path, indexer_url: &str, node_url: &str) -> AppConfig {
    let mut config = AppConfig::default();
    config.cache = CacheConfig {
        directory: cache_dir.to_string_lossy().into_owned(),
        ..CacheConfig::default()
    };
    config.indexer.base_url = indexer_url.to_string();
    config.node.rpc_url = node_url.to_string();
    config.node.batch_dispatch_delay_ms = 0;
    config.retry.retries = 0;
    config.retry.delay_ms = 1;
    config
}

/// A populator over an existing cache directory whose upstreams are
/// unroutable — every network phase fails immediately.
pub fn broken_populator(cache_dir: &Path) -> Arc<Populator> {
    let config = test_config(cache_dir, "http://127.0.0.1:1", "http://127.0.0.1:1");
    let runtime = HolderscopeRuntime::builder().with_config(config).build().unwrap();
    runtime.populator()
}

/// The contract key every pipeline test drives.
pub const TEST_CONTRACT: ContractKey = ContractKey::Stax;

/// Owner entry helper in the indexing API's wire shape.
pub fn owner_entry(address: &str, token_ids: &[u64]) -> serde_json::Value {
    json!({
        "ownerAddress": address,
        "tokenBalances": token_ids
            .iter()
            .map(|id| json!({ "tokenId": id.to_string(), "balance": 1 }))
            .collect::<Vec<_>>(),
    })
}

/// Transfer entry helper in the indexing API's wire shape.
pub fn transfer_entry(from: &str, to: &str, token_id: u64) -> serde_json::Value {
    json!({ "from": from, "to": to, "tokenId": format!("0x{token_id:x}") })
}
