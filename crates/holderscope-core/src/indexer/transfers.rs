//! Historical transfer fetching with adaptive range shrinking.
//!
//! The requested block span is split into fixed-size sub-ranges processed
//! with bounded concurrency. When the provider rejects a sub-range as too
//! large, only that slice is halved (down to a floor) and re-fetched — the
//! rest of the run is untouched. A slice that keeps failing after retries is
//! recorded in the summary's error log and skipped; failure is local and
//! recorded, never fatal to the fetch.

use futures::{stream, StreamExt};
use serde_json::json;
use tracing::{debug, warn};

use crate::{
    indexer::{IndexerClient, IndexerError},
    retry::{is_rate_limit_message, RetryPolicy},
    types::{Address, ErrorLogEntry, TransferKind, TransferSummary},
};

/// Options controlling sub-range sizing and fan-out.
#[derive(Debug, Clone)]
pub struct TransferFetchOptions {
    /// Block span of one sub-range request.
    pub range_size: u64,
    /// Concurrent in-flight sub-ranges.
    pub concurrency: usize,
    /// Floor below which oversize slices are no longer halved.
    pub min_range_size: u64,
}

impl Default for TransferFetchOptions {
    fn default() -> Self {
        Self { range_size: 2000, concurrency: 3, min_range_size: 64 }
    }
}

/// Classified transfer counts for one processed slice.
#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    buys: u64,
    sells: u64,
    burns: u64,
}

impl Tally {
    fn add(&mut self, kind: TransferKind) {
        match kind {
            TransferKind::Buy => self.buys += 1,
            TransferKind::Sell => self.sells += 1,
            TransferKind::Burn => self.burns += 1,
        }
    }

    fn absorb(&mut self, other: Tally) {
        self.buys += other.buys;
        self.sells += other.sells;
        self.burns += other.burns;
    }
}

/// Fetches and classifies all transfers of `contract` in `[from_block,
/// to_block]`.
///
/// Never fails as a whole: the returned summary's `error_log` records every
/// slice that was skipped after retries, and `last_block` always advances to
/// `to_block` so the next run does not re-request ranges that were already
/// attempted (skipped failures stay inspectable in the log).
pub async fn fetch_transfers(
    client: &IndexerClient,
    contract: Address,
    burn_address: Address,
    from_block: u64,
    to_block: u64,
    opts: &TransferFetchOptions,
    policy: &RetryPolicy,
) -> TransferSummary {
    if from_block > to_block {
        return TransferSummary {
            last_block: from_block.saturating_sub(1),
            ..TransferSummary::default()
        };
    }

    let range_size = opts.range_size.max(1);
    let mut sub_ranges = Vec::new();
    let mut start = from_block;
    while start <= to_block {
        let end = to_block.min(start + range_size - 1);
        sub_ranges.push((start, end));
        start = end + 1;
    }

    debug!(
        contract = %contract,
        from_block,
        to_block,
        sub_ranges = sub_ranges.len(),
        "fetching transfer history"
    );

    let results: Vec<(Tally, Vec<ErrorLogEntry>)> =
        stream::iter(sub_ranges.into_iter().map(|(range_from, range_to)| {
            process_range(client, contract, burn_address, range_from, range_to, opts, policy)
        }))
        .buffer_unordered(opts.concurrency.max(1))
        .collect()
        .await;

    let mut total = Tally::default();
    let mut error_log = Vec::new();
    for (tally, errors) in results {
        total.absorb(tally);
        error_log.extend(errors);
    }

    if !error_log.is_empty() {
        warn!(
            contract = %contract,
            skipped = error_log.len(),
            "transfer fetch completed with skipped ranges"
        );
    }

    TransferSummary {
        buys: total.buys,
        sells: total.sells,
        burns: total.burns,
        last_block: to_block,
        error_log,
    }
}

/// Processes one top-level sub-range, halving oversize slices in place.
///
/// Uses an explicit slice stack instead of recursion: halving can nest a few
/// levels deep and each level would otherwise need a boxed future.
async fn process_range(
    client: &IndexerClient,
    contract: Address,
    burn_address: Address,
    from: u64,
    to: u64,
    opts: &TransferFetchOptions,
    policy: &RetryPolicy,
) -> (Tally, Vec<ErrorLogEntry>) {
    let mut tally = Tally::default();
    let mut errors = Vec::new();
    let mut slices = vec![(from, to)];

    while let Some((slice_from, slice_to)) = slices.pop() {
        match fetch_slice_with_retry(client, contract, burn_address, slice_from, slice_to, policy)
            .await
        {
            Ok(slice_tally) => tally.absorb(slice_tally),
            Err(e) if e.is_oversize() && slice_to - slice_from + 1 > opts.min_range_size => {
                let mid = slice_from + (slice_to - slice_from) / 2;
                debug!(
                    from = slice_from,
                    to = slice_to,
                    "transfer slice too large, halving"
                );
                slices.push((mid + 1, slice_to));
                slices.push((slice_from, mid));
            }
            Err(e) => {
                warn!(from = slice_from, to = slice_to, error = %e, "skipping transfer slice");
                errors.push(ErrorLogEntry::now(
                    "fetching_events",
                    format!("blocks {slice_from}-{slice_to}: {e}"),
                ));
            }
        }
    }

    (tally, errors)
}

/// Fetches one slice with the retry policy applied manually so that oversize
/// errors surface immediately — halving is the fix, not waiting.
async fn fetch_slice_with_retry(
    client: &IndexerClient,
    contract: Address,
    burn_address: Address,
    from: u64,
    to: u64,
    policy: &RetryPolicy,
) -> Result<Tally, IndexerError> {
    let attempts = policy.retries.saturating_add(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        match fetch_slice(client, contract, burn_address, from, to).await {
            Ok(tally) => return Ok(tally),
            Err(e) if e.is_oversize() => return Err(e),
            Err(e) if is_rate_limit_message(&e.to_string()) => return Err(e),
            Err(e) => {
                last_error = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(policy.wait_for(attempt)).await;
                }
            }
        }
    }

    Err(last_error.expect("at least one attempt was made"))
}

/// Fetches one slice, following pagination, and classifies every transfer.
async fn fetch_slice(
    client: &IndexerClient,
    contract: Address,
    burn_address: Address,
    from: u64,
    to: u64,
) -> Result<Tally, IndexerError> {
    let mut tally = Tally::default();
    let mut page_key: Option<String> = None;

    loop {
        let mut body = json!({
            "contractAddress": contract.to_string(),
            "fromBlock": format!("0x{from:x}"),
            "toBlock": format!("0x{to:x}"),
            "category": ["erc721"],
        });
        if let Some(key) = &page_key {
            body["pageKey"] = json!(key);
        }

        let page = client.post_json("getAssetTransfers", &body).await?;

        let transfers = page
            .get("transfers")
            .and_then(serde_json::Value::as_array)
            .ok_or_else(|| {
                IndexerError::InvalidResponse("missing or non-list transfers field".to_string())
            })?;

        for transfer in transfers {
            let Some(from_addr) = parse_address(transfer.get("from")) else { continue };
            let Some(to_addr) = parse_address(transfer.get("to")) else { continue };
            tally.add(TransferKind::classify(from_addr, to_addr, burn_address));
        }

        page_key = page
            .get("pageKey")
            .and_then(serde_json::Value::as_str)
            .filter(|k| !k.is_empty())
            .map(str::to_string);

        if page_key.is_none() {
            return Ok(tally);
        }
    }
}

fn parse_address(value: Option<&serde_json::Value>) -> Option<Address> {
    // A null `to` means the token was destroyed; treat it as the zero address
    // so classification counts it as a burn.
    match value {
        Some(serde_json::Value::String(s)) => s.as_str().try_into().ok(),
        Some(serde_json::Value::Null) | None => Some(Address::ZERO),
        _ => None,
    }
}
