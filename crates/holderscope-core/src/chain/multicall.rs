//! Batched read-only contract calls with per-call failure isolation.
//!
//! Calls are partitioned into fixed-size JSON-RPC batch requests of
//! `eth_call`. The node reports success or failure per entry, so one
//! reverting call never poisons its neighbors; a transport-level failure
//! degrades exactly the calls of the affected batch. Output is always
//! index-aligned with input — callers zip inputs to outcomes.
//!
//! Batches run under a bounded concurrency limit with a fixed delay
//! separating successive dispatch waves, which keeps a full-collection tier
//! scan inside public-provider rate limits.

use futures::{stream, StreamExt};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

use crate::{
    chain::{ChainError, NodeClient},
    config::NodeConfig,
    types::Address,
};

/// A single read-only contract call: target address plus ABI calldata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    pub target: Address,
    pub data: Vec<u8>,
}

impl ContractCall {
    /// Call taking one `uint256` argument (e.g. `getTokenTier(uint256)`).
    #[must_use]
    pub fn uint_arg(target: Address, selector: [u8; 4], value: u64) -> Self {
        let mut data = Vec::with_capacity(36);
        data.extend_from_slice(&selector);
        data.extend_from_slice(&encode_uint256(u128::from(value)));
        Self { target, data }
    }

    /// Call taking one `address` argument (e.g. `claimableRewards(address)`).
    #[must_use]
    pub fn address_arg(target: Address, selector: [u8; 4], addr: Address) -> Self {
        let mut data = Vec::with_capacity(36);
        data.extend_from_slice(&selector);
        data.extend_from_slice(&encode_address(addr));
        Self { target, data }
    }

    fn calldata_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.data))
    }
}

/// Result of one call within a batch, index-aligned with the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    /// Raw return data from the call.
    Success(Vec<u8>),
    /// Why the call (or its whole batch) failed.
    Failure(String),
}

impl CallOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Success(_))
    }

    /// Decodes the first 32-byte return word as an unsigned integer.
    ///
    /// Returns `None` on failure outcomes, short return data, or values that
    /// do not fit in a `u128` (the upper half of the word is non-zero).
    #[must_use]
    pub fn decode_uint(&self) -> Option<u128> {
        match self {
            CallOutcome::Success(bytes) => decode_uint256(bytes),
            CallOutcome::Failure(_) => None,
        }
    }

    /// The failure reason, if any.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self {
            CallOutcome::Success(_) => None,
            CallOutcome::Failure(reason) => Some(reason),
        }
    }
}

/// Batching parameters, normally derived from [`NodeConfig`].
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Calls per JSON-RPC batch request.
    pub batch_size: usize,
    /// Concurrent in-flight batches.
    pub concurrency: usize,
    /// Delay separating successive dispatch waves.
    pub dispatch_delay: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self { batch_size: 50, concurrency: 4, dispatch_delay: Duration::from_millis(200) }
    }
}

impl BatchOptions {
    #[must_use]
    pub fn from_config(config: &NodeConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            concurrency: config.batch_concurrency.max(1),
            dispatch_delay: Duration::from_millis(config.batch_dispatch_delay_ms),
        }
    }
}

/// Executes `calls` as fixed-size `eth_call` batches.
///
/// The returned vector has exactly `calls.len()` entries in input order.
/// This function never fails as a whole: upstream problems surface as
/// [`CallOutcome::Failure`] entries scoped to a call or its batch.
pub async fn batch_call(
    client: &NodeClient,
    calls: &[ContractCall],
    opts: &BatchOptions,
) -> Vec<CallOutcome> {
    if calls.is_empty() {
        return Vec::new();
    }

    let batch_size = opts.batch_size.max(1);
    let concurrency = opts.concurrency.max(1);

    debug!(
        calls = calls.len(),
        batch_size,
        concurrency,
        "dispatching batched contract calls"
    );

    let batches: Vec<(usize, usize, &[ContractCall])> = calls
        .chunks(batch_size)
        .enumerate()
        .map(|(i, chunk)| (i, i * batch_size, chunk))
        .collect();

    let batch_futures: Vec<_> = batches
        .into_iter()
        .map(|(batch_index, offset, chunk)| {
            let wave = (batch_index / concurrency) as u32;
            let delay = opts.dispatch_delay.saturating_mul(wave);
            dispatch_batch(client, offset, chunk, delay)
        })
        .collect();

    let results = stream::iter(batch_futures)
        .buffer_unordered(concurrency)
        .collect::<Vec<(usize, Vec<CallOutcome>)>>()
        .await;

    let mut outcomes: Vec<CallOutcome> =
        vec![CallOutcome::Failure("call not dispatched".to_string()); calls.len()];
    for (offset, batch_outcomes) in results {
        for (i, outcome) in batch_outcomes.into_iter().enumerate() {
            outcomes[offset + i] = outcome;
        }
    }

    let failures = outcomes.iter().filter(|o| !o.is_success()).count();
    if failures > 0 {
        warn!(failures, total = outcomes.len(), "batched contract calls completed with failures");
    }

    outcomes
}

/// Dispatches a single batch after its wave delay, tagging the result with
/// the batch's offset so callers can re-align outcomes to input order.
async fn dispatch_batch<'a>(
    client: &'a NodeClient,
    offset: usize,
    chunk: &'a [ContractCall],
    delay: Duration,
) -> (usize, Vec<CallOutcome>) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    (offset, execute_batch(client, offset, chunk).await)
}

/// Sends one JSON-RPC batch and maps entries back to call positions by id.
///
/// A transport-level failure degrades every call in this batch; calls in
/// other batches are unaffected.
async fn execute_batch(
    client: &NodeClient,
    offset: usize,
    chunk: &[ContractCall],
) -> Vec<CallOutcome> {
    let payload: Vec<serde_json::Value> = chunk
        .iter()
        .enumerate()
        .map(|(i, call)| {
            json!({
                "jsonrpc": "2.0",
                "method": "eth_call",
                "params": [
                    {"to": call.target.to_string(), "data": call.calldata_hex()},
                    "latest"
                ],
                "id": offset + i,
            })
        })
        .collect();

    let response = match client.send(&serde_json::Value::Array(payload)).await {
        Ok(response) => response,
        Err(e) => {
            warn!(offset, batch_len = chunk.len(), error = %e, "batch transport failure");
            return vec![CallOutcome::Failure(e.to_string()); chunk.len()];
        }
    };

    let Some(entries) = response.as_array() else {
        let reason = "batch response is not an array".to_string();
        return vec![CallOutcome::Failure(reason); chunk.len()];
    };

    // Entries may arrive in any order; zip them back by id.
    let mut outcomes: Vec<CallOutcome> =
        vec![CallOutcome::Failure("missing response for call".to_string()); chunk.len()];

    for entry in entries {
        let Some(id) = entry.get("id").and_then(serde_json::Value::as_u64) else {
            continue;
        };
        let Some(slot) = (id as usize).checked_sub(offset).filter(|s| *s < chunk.len()) else {
            continue;
        };

        outcomes[slot] = parse_entry(entry);
    }

    outcomes
}

fn parse_entry(entry: &serde_json::Value) -> CallOutcome {
    if let Some(error) = entry.get("error") {
        let code = error.get("code").and_then(serde_json::Value::as_i64).unwrap_or(0);
        let message =
            error.get("message").and_then(serde_json::Value::as_str).unwrap_or("unknown error");
        return CallOutcome::Failure(ChainError::RpcError(code as i32, message.to_string())
            .to_string());
    }

    match entry.get("result").and_then(serde_json::Value::as_str) {
        Some(result_hex) => match decode_hex(result_hex) {
            Ok(bytes) => CallOutcome::Success(bytes),
            Err(reason) => CallOutcome::Failure(reason),
        },
        None => CallOutcome::Failure("entry has neither result nor error".to_string()),
    }
}

/// ABI-encodes an unsigned integer as a 32-byte big-endian word.
#[must_use]
pub fn encode_uint256(value: u128) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

/// ABI-encodes an address as a 32-byte left-padded word.
#[must_use]
pub fn encode_address(addr: Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(addr.as_bytes());
    word
}

/// Decodes the first 32-byte return word as a `u128`.
///
/// Returns `None` on short data or when the value exceeds `u128::MAX`.
#[must_use]
pub fn decode_uint256(bytes: &[u8]) -> Option<u128> {
    if bytes.len() < 32 {
        return None;
    }
    if bytes[..16].iter().any(|b| *b != 0) {
        return None;
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&bytes[16..32]);
    Some(u128::from_be_bytes(low))
}

fn decode_hex(s: &str) -> Result<Vec<u8>, String> {
    let stripped = s.strip_prefix("0x").ok_or_else(|| "result missing 0x prefix".to_string())?;
    hex::decode(stripped).map_err(|e| format!("result is not valid hex: {e}"))
}
