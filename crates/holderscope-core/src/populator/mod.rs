//! Holder cache population orchestrator.
//!
//! One [`Populator`] instance owns population for every configured contract.
//! A run walks the fixed phase order (owners → filter → token map → tiers →
//! rewards → holder processing), persisting progress state before each
//! phase's heavy work so pollers always see the step actually in flight.
//!
//! # Invariants
//!
//! - **At most one run per contract.** Enforced by a per-contract
//!   `Semaphore(1)` whose permit is acquired *before* any async work; the
//!   RAII guard releases it on every exit path including panics. This is a
//!   process-local lock — horizontally scaled deployments would need a
//!   distributed one, which this service intentionally does not carry
//!   (single-instance ownership is the documented operating mode).
//! - **Last good wins.** A failed or invalid run never overwrites the
//!   previously persisted cache entry; readers keep being served the last
//!   known-good data.
//! - **Partial failure is local.** Single-token tier failures and
//!   single-wallet reward failures are logged into the run's error log and
//!   excluded from aggregation; only validation failures and phase-level
//!   errors abort the run.

pub mod aggregate;
pub mod validate;

use ahash::AHashMap;
use dashmap::DashMap;
use std::{sync::Arc, time::Instant};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use crate::{
    cache::{CacheStateTracker, CacheStore, PopulationStep, ProgressState},
    chain::{batch_call, BatchOptions, ContractCall, NodeClient},
    config::{AppConfig, ContractDescriptor, ContractRegistry},
    indexer::{fetch_owners, fetch_transfers, IndexerClient, TransferFetchOptions},
    metrics::MetricsCollector,
    retry::RetryPolicy,
    types::{Address, CacheEntry, ContractKey, ErrorLogEntry, OwnerRecord, TransferSummary},
};

pub use aggregate::{aggregate_holders, build_token_owner_map, rank_holders};
pub use validate::{validate_holders, ValidationError};

/// Cache-kind prefix for holder cache entries.
const HOLDERS_PREFIX: &str = "holders";
/// Cache-kind prefix for transfer summaries.
const EVENTS_PREFIX: &str = "events";

/// Cap on per-item failure entries recorded per phase; the remainder is
/// collapsed into one summary entry so a degraded upstream cannot balloon
/// the persisted state record.
const MAX_PHASE_ERRORS: usize = 25;

/// Configuration errors surfaced to callers as 4xx, never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PopulateError {
    #[error("unknown contract: {0}")]
    UnknownContract(ContractKey),

    #[error("contract {0} is disabled")]
    ContractDisabled(ContractKey),
}

/// Result of a `populate` call.
#[derive(Debug, Clone)]
pub enum PopulateOutcome {
    /// Fresh cache already exists; nothing was recomputed.
    UpToDate,
    /// Another run for this contract is in flight; no work was duplicated.
    InProgress,
    /// The pipeline ran to completion and the cache was replaced.
    Completed { entry: CacheEntry },
    /// The pipeline failed; the previous cache entry (if any) is untouched.
    Failed { error: String },
}

impl PopulateOutcome {
    /// Stable machine-checkable status string.
    #[must_use]
    pub fn status(&self) -> &'static str {
        match self {
            PopulateOutcome::UpToDate => "up_to_date",
            PopulateOutcome::InProgress => "in_progress",
            PopulateOutcome::Completed { .. } => "completed",
            PopulateOutcome::Failed { .. } => "error",
        }
    }
}

/// RAII guard for the per-contract population slot.
///
/// Dropping the guard releases the slot, including on panic — the permit is
/// the whole mechanism, so an aborted run can never wedge its contract.
pub struct PopulateGuard {
    _permit: OwnedSemaphorePermit,
    contract: ContractKey,
}

impl PopulateGuard {
    #[must_use]
    pub fn contract(&self) -> ContractKey {
        self.contract
    }
}

/// A phase-scoped fatal error inside a run.
struct PhaseError {
    phase: &'static str,
    message: String,
}

impl PhaseError {
    fn new(phase: &'static str, error: impl std::fmt::Display) -> Self {
        Self { phase, message: error.to_string() }
    }
}

/// The population pipeline orchestrator. See module docs for invariants.
pub struct Populator {
    registry: Arc<ContractRegistry>,
    store: Arc<CacheStore>,
    tracker: CacheStateTracker,
    indexer: Arc<IndexerClient>,
    node: Arc<NodeClient>,
    metrics: Arc<MetricsCollector>,
    retry_policy: RetryPolicy,
    batch_options: BatchOptions,
    transfer_options: TransferFetchOptions,
    stale_after_seconds: u64,
    inflight: DashMap<ContractKey, Arc<Semaphore>>,
}

impl Populator {
    #[must_use]
    pub fn new(
        registry: Arc<ContractRegistry>,
        store: Arc<CacheStore>,
        indexer: Arc<IndexerClient>,
        node: Arc<NodeClient>,
        metrics: Arc<MetricsCollector>,
        config: &AppConfig,
    ) -> Self {
        Self {
            registry,
            tracker: CacheStateTracker::new(Arc::clone(&store)),
            store,
            indexer,
            node,
            metrics,
            retry_policy: config.retry.policy(),
            batch_options: BatchOptions::from_config(&config.node),
            transfer_options: TransferFetchOptions {
                range_size: config.indexer.transfer_range_size,
                concurrency: config.indexer.transfer_concurrency,
                ..TransferFetchOptions::default()
            },
            stale_after_seconds: config.cache.stale_after_seconds,
            inflight: DashMap::new(),
        }
    }

    /// Resolves and authorizes a contract key.
    ///
    /// # Errors
    ///
    /// Returns the configuration-level error for unknown or disabled
    /// contracts.
    pub fn descriptor(&self, key: ContractKey) -> Result<Arc<ContractDescriptor>, PopulateError> {
        let descriptor = self.registry.get(key).ok_or(PopulateError::UnknownContract(key))?;
        if !descriptor.enabled {
            return Err(PopulateError::ContractDisabled(key));
        }
        Ok(descriptor)
    }

    /// Tries to claim the population slot for `contract` without waiting.
    ///
    /// Returns `None` when a run is already in flight. The claim happens
    /// before any async work in [`populate`](Self::populate), which is what
    /// makes the at-most-one invariant atomic.
    #[must_use]
    pub fn try_begin(&self, contract: ContractKey) -> Option<PopulateGuard> {
        let semaphore = self
            .inflight
            .entry(contract)
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone();

        semaphore
            .try_acquire_owned()
            .ok()
            .map(|permit| PopulateGuard { _permit: permit, contract })
    }

    /// Whether a population run for `contract` is currently in flight in
    /// this process.
    #[must_use]
    pub fn is_populating(&self, contract: ContractKey) -> bool {
        self.inflight.get(&contract).is_some_and(|sem| sem.available_permits() == 0)
    }

    /// Staleness window for cached holder entries, in seconds.
    #[must_use]
    pub fn stale_after_seconds(&self) -> u64 {
        self.stale_after_seconds
    }

    /// Entry point: populates (or refreshes) the holder cache for `key`.
    ///
    /// Returns [`PopulateOutcome::InProgress`] without re-entering the
    /// pipeline when a run is already in flight, and
    /// [`PopulateOutcome::UpToDate`] when fresh cache exists and `force` is
    /// not set. Pipeline failures are reported in the outcome, never as an
    /// `Err` — only configuration problems are.
    ///
    /// # Errors
    ///
    /// [`PopulateError`] for unknown or disabled contracts.
    pub async fn populate(
        &self,
        key: ContractKey,
        force: bool,
    ) -> Result<PopulateOutcome, PopulateError> {
        let descriptor = self.descriptor(key)?;

        let Some(_guard) = self.try_begin(key) else {
            debug!(contract = %key, "population already in flight");
            return Ok(PopulateOutcome::InProgress);
        };

        if !force {
            if let Some(entry) = self.cached_entry(key).await {
                if !entry.is_stale(self.stale_after_seconds) {
                    debug!(contract = %key, "cache entry fresh, skipping population");
                    return Ok(PopulateOutcome::UpToDate);
                }
            }
        }

        info!(contract = %key, force, "starting population run");
        self.metrics.population_started();

        // Fresh run state; only the transfer resume cursor survives runs.
        let prior = self.tracker.load(key).await;
        let mut state = ProgressState {
            last_processed_block: prior.last_processed_block,
            ..ProgressState::default()
        };

        match self.run_pipeline(&descriptor, &mut state).await {
            Ok(entry) => {
                state.transition(PopulationStep::Completed);
                self.persist_state(key, &state).await;
                self.metrics.population_completed();
                info!(
                    contract = %key,
                    holders = entry.total_holders,
                    live = entry.total_live,
                    "population run completed"
                );
                Ok(PopulateOutcome::Completed { entry })
            }
            Err(PhaseError { phase, message }) => {
                error!(contract = %key, phase, error = %message, "population run failed");
                state.fail(phase, message.clone());
                self.persist_state(key, &state).await;
                self.metrics.population_failed();
                Ok(PopulateOutcome::Failed { error: message })
            }
        }
    }

    /// Reads the current holder cache entry for `key`, if any tier holds one.
    pub async fn cached_entry(&self, key: ContractKey) -> Option<CacheEntry> {
        let value = self.store.get(HOLDERS_PREFIX, key.as_str()).await;
        eprintln!("DBG cached_entry key={} as_str={:?} dir={:?} got_some={} files={:?}",
            key, key.as_str(), self.store.directory(), value.is_some(),
            std::fs::read_dir(self.store.directory()).map(|rd| rd.filter_map(|e| e.ok().map(|e| e.file_name())).collect::<Vec<_>>()).ok());
        match value {
            Some(value) => match serde_json::from_value::<CacheEntry>((*value).clone()) {
                Ok(entry) => {
                    self.metrics.cache_hit();
                    Some(entry)
                }
                Err(e) => {
                    warn!(contract = %key, error = %e, "cached holders entry is unreadable");
                    self.metrics.cache_miss();
                    None
                }
            },
            None => {
                self.metrics.cache_miss();
                None
            }
        }
    }

    /// Current progress record for `key`.
    pub async fn progress(&self, key: ContractKey) -> ProgressState {
        self.tracker.load(key).await
    }

    /// Startup reconciliation: a persisted record claiming an in-flight run
    /// cannot correspond to live work after a restart (population ownership
    /// is process-local), so it is converted to an inspectable error state.
    pub async fn reconcile_stale_runs(&self) {
        for descriptor in self.registry.all() {
            let mut state = self.tracker.load(descriptor.key).await;
            if state.is_populating {
                warn!(
                    contract = %descriptor.key,
                    step = %state.step,
                    "found stale in-flight state from a previous process, marking failed"
                );
                state.fail("startup", "process restarted mid-population");
                self.persist_state(descriptor.key, &state).await;
            }
        }
    }

    // ---- pipeline internals ----

    async fn run_pipeline(
        &self,
        descriptor: &ContractDescriptor,
        state: &mut ProgressState,
    ) -> Result<CacheEntry, PhaseError> {
        let key = descriptor.key;

        // Phase 1: enumerate owners.
        self.enter_phase(key, state, PopulationStep::FetchingOwners).await?;
        let phase_start = Instant::now();
        self.metrics.upstream_call();
        let owners = fetch_owners(&self.indexer, descriptor.address, &self.retry_policy)
            .await
            .map_err(|e| {
                self.metrics.upstream_error();
                PhaseError::new("fetching_owners", e)
            })?;
        state.total_owners = owners.len() as u64;
        state.total_nfts = owners.iter().map(OwnerRecord::total_balance).sum();
        self.metrics.phase_duration("fetching_owners", phase_start.elapsed().as_millis() as u64);

        // Phase 2: drop burn/zero-address holders.
        self.enter_phase(key, state, PopulationStep::FilteringOwners).await?;
        let filtered: Vec<OwnerRecord> = owners
            .into_iter()
            .filter(|o| !o.owner_address.is_zero() && o.owner_address != descriptor.burn_address)
            .collect();

        // Phase 3: build the token/owner map.
        self.enter_phase(key, state, PopulationStep::BuildingTokenMap).await?;
        let map = build_token_owner_map(&filtered, descriptor.burn_address);
        if map.duplicate_assignments() > 0 {
            warn!(
                contract = %key,
                duplicates = map.duplicate_assignments(),
                "token ids claimed by multiple owners, kept last-seen assignment"
            );
            state.error_log.push(ErrorLogEntry::now(
                "building_token_map",
                format!(
                    "{} token ids claimed by multiple owners, kept last-seen assignment",
                    map.duplicate_assignments()
                ),
            ));
        }

        // Phase 4: per-token tier lookups.
        state.total_tiers = map.token_count() as u64;
        self.enter_phase(key, state, PopulationStep::FetchingTiers).await?;
        let phase_start = Instant::now();
        let tier_map = self.fetch_tiers(descriptor, &map.sorted_token_ids(), state).await?;
        self.metrics.phase_duration("fetching_tiers", phase_start.elapsed().as_millis() as u64);

        // Phase 5: per-wallet reward lookups.
        self.enter_phase(key, state, PopulationStep::FetchingRewards).await?;
        let phase_start = Instant::now();
        let rewards = self.fetch_rewards(descriptor, &map, state).await?;
        self.metrics.phase_duration("fetching_rewards", phase_start.elapsed().as_millis() as u64);

        // Phase 6: refresh transfer history, aggregate, validate, persist.
        self.enter_phase(key, state, PopulationStep::ProcessingHolders).await?;
        let events = self.refresh_events(descriptor, state).await;

        let holders = aggregate_holders(descriptor, &map, &tier_map, &rewards);
        validate_holders(&holders)
            .map_err(|e| PhaseError::new("processing_holders", format!("validation failed: {e}")))?;

        let total_live = map.token_count() as u64;
        let total_burned = events.burns;
        let multiplier_pool = holders.iter().map(|h| h.multiplier_sum).sum();
        let entry = CacheEntry {
            total_holders: holders.len() as u64,
            holders,
            // Mint history can lag behind the live set when event ranges were
            // skipped; the floor keeps supply arithmetic consistent.
            total_minted: events.buys.max(total_live + total_burned),
            total_live,
            total_burned,
            multiplier_pool,
            updated_at: chrono::Utc::now(),
        };

        let value = serde_json::to_value(&entry)
            .map_err(|e| PhaseError::new("processing_holders", e))?;
        self.store
            .set(HOLDERS_PREFIX, key.as_str(), &value, None)
            .await
            .map_err(|e| PhaseError::new("processing_holders", e))?;

        Ok(entry)
    }

    /// Transitions into `step` and durably saves the record before the
    /// phase's heavy work starts.
    async fn enter_phase(
        &self,
        key: ContractKey,
        state: &mut ProgressState,
        step: PopulationStep,
    ) -> Result<(), PhaseError> {
        state.transition(step);
        self.tracker
            .save(key, state)
            .await
            .map_err(|e| PhaseError::new("persisting_state", e))
    }

    /// Best-effort state save for terminal transitions.
    async fn persist_state(&self, key: ContractKey, state: &ProgressState) {
        if let Err(e) = self.tracker.save(key, state).await {
            error!(contract = %key, error = %e, "failed to persist progress state");
        }
    }

    /// Fetches tier ids for every token, in waves so progress counters stay
    /// current between saves. Per-token failures are logged and the token is
    /// excluded; they never abort the run.
    async fn fetch_tiers(
        &self,
        descriptor: &ContractDescriptor,
        token_ids: &[u64],
        state: &mut ProgressState,
    ) -> Result<AHashMap<u64, u8>, PhaseError> {
        let mut tier_map = AHashMap::with_capacity(token_ids.len());
        let wave_size = (self.batch_options.batch_size * self.batch_options.concurrency).max(1);
        let mut suppressed = 0usize;

        for wave in token_ids.chunks(wave_size) {
            let calls: Vec<ContractCall> = wave
                .iter()
                .map(|id| ContractCall::uint_arg(descriptor.address, descriptor.tier_selector, *id))
                .collect();

            self.metrics.upstream_call();
            let outcomes = batch_call(&self.node, &calls, &self.batch_options).await;

            for (token_id, outcome) in wave.iter().zip(outcomes) {
                match outcome.decode_uint() {
                    Some(tier) if tier >= 1 && tier <= u128::from(u8::MAX) => {
                        tier_map.insert(*token_id, tier as u8);
                    }
                    decoded => {
                        self.metrics.upstream_error();
                        let reason = outcome
                            .error()
                            .map(str::to_string)
                            .unwrap_or_else(|| format!("tier value out of range: {decoded:?}"));
                        Self::log_item_failure(
                            state,
                            "fetching_tiers",
                            format!("token {token_id}: {reason}"),
                            &mut suppressed,
                        );
                    }
                }
            }

            state.processed_tiers += wave.len() as u64;
            self.persist_state(descriptor.key, state).await;
        }

        Self::flush_suppressed(state, "fetching_tiers", suppressed);
        Ok(tier_map)
    }

    /// Fetches claimable rewards per wallet against the vault (or the NFT
    /// contract itself when no vault is configured). A failed wallet lookup
    /// defaults that wallet's reward to zero.
    async fn fetch_rewards(
        &self,
        descriptor: &ContractDescriptor,
        map: &crate::types::TokenOwnerMap,
        state: &mut ProgressState,
    ) -> Result<AHashMap<Address, u128>, PhaseError> {
        let mut rewards = AHashMap::with_capacity(map.owner_count());

        let Some(selector) = descriptor.reward_selector else {
            // No claimable pool for this protocol; the phase is a no-op.
            state.processed_nfts = state.total_nfts;
            self.persist_state(descriptor.key, state).await;
            return Ok(rewards);
        };

        let target = descriptor.vault_address.unwrap_or(descriptor.address);

        let mut wallets: Vec<(Address, u64)> =
            map.iter_owners().map(|(owner, tokens)| (*owner, tokens.len() as u64)).collect();
        wallets.sort_by_key(|(owner, _)| *owner);

        let wave_size = (self.batch_options.batch_size * self.batch_options.concurrency).max(1);
        let mut suppressed = 0usize;

        for wave in wallets.chunks(wave_size) {
            let calls: Vec<ContractCall> = wave
                .iter()
                .map(|(owner, _)| ContractCall::address_arg(target, selector, *owner))
                .collect();

            self.metrics.upstream_call();
            let outcomes = batch_call(&self.node, &calls, &self.batch_options).await;

            for ((owner, _), outcome) in wave.iter().zip(outcomes) {
                match outcome.decode_uint() {
                    Some(amount) => {
                        rewards.insert(*owner, amount);
                    }
                    None => {
                        self.metrics.upstream_error();
                        let reason =
                            outcome.error().unwrap_or("undecodable reward value").to_string();
                        Self::log_item_failure(
                            state,
                            "fetching_rewards",
                            format!("wallet {owner}: {reason}, defaulting to zero"),
                            &mut suppressed,
                        );
                    }
                }
            }

            state.processed_nfts += wave.iter().map(|(_, tokens)| tokens).sum::<u64>();
            self.persist_state(descriptor.key, state).await;
        }

        Self::flush_suppressed(state, "fetching_rewards", suppressed);
        Ok(rewards)
    }

    /// Refreshes the persisted transfer summary from the resume cursor to the
    /// current tip. Entirely non-fatal: any failure is recorded and the run
    /// continues with whatever history exists.
    async fn refresh_events(
        &self,
        descriptor: &ContractDescriptor,
        state: &mut ProgressState,
    ) -> TransferSummary {
        let key = descriptor.key;

        let mut summary = match self.store.get(EVENTS_PREFIX, key.as_str()).await {
            Some(value) => serde_json::from_value((*value).clone()).unwrap_or_else(|e| {
                warn!(contract = %key, error = %e, "persisted transfer summary unreadable");
                TransferSummary::default()
            }),
            None => TransferSummary::default(),
        };

        let from_block = if summary.last_block == 0 {
            descriptor.deployment_block
        } else {
            summary.last_block + 1
        };

        self.metrics.upstream_call();
        let tip = match self.node.block_number().await {
            Ok(tip) => tip,
            Err(e) => {
                self.metrics.upstream_error();
                warn!(contract = %key, error = %e, "could not fetch chain tip, skipping events");
                state
                    .error_log
                    .push(ErrorLogEntry::now("fetching_events", format!("chain tip: {e}")));
                state.last_processed_block = summary.last_block;
                return summary;
            }
        };

        if from_block <= tip {
            let fetched = fetch_transfers(
                &self.indexer,
                descriptor.address,
                descriptor.burn_address,
                from_block,
                tip,
                &self.transfer_options,
                &self.retry_policy,
            )
            .await;

            state.error_log.extend(fetched.error_log.iter().cloned());
            summary.absorb(&fetched);

            let value = serde_json::to_value(&summary).unwrap_or_default();
            if let Err(e) = self.store.set(EVENTS_PREFIX, key.as_str(), &value, None).await {
                warn!(contract = %key, error = %e, "failed to persist transfer summary");
            }
        }

        state.last_processed_block = summary.last_block;
        summary
    }

    fn log_item_failure(
        state: &mut ProgressState,
        phase: &str,
        message: String,
        suppressed: &mut usize,
    ) {
        if state.error_log.len() < MAX_PHASE_ERRORS {
            warn!(phase, "{message}");
            state.error_log.push(ErrorLogEntry::now(phase, message));
        } else {
            *suppressed += 1;
        }
    }

    fn flush_suppressed(state: &mut ProgressState, phase: &str, suppressed: usize) {
        if suppressed > 0 {
            state
                .error_log
                .push(ErrorLogEntry::now(phase, format!("{suppressed} further failures suppressed")));
        }
    }
}
