//! Per-contract population progress state.
//!
//! The [`ProgressState`] record is the only mutable shared resource of a
//! population run. The populator persists it through the
//! [`CacheStateTracker`] *before* each phase's heavy work begins, so a
//! polling client always observes the step actually in flight and a crash
//! mid-run leaves an inspectable, resumable record.
//!
//! Loading is salvaging: a corrupt or partially written record merges
//! field-by-field into the idle zero-state instead of being discarded, so a
//! parse hiccup never wipes historical fields (notably the transfer resume
//! cursor) that are still valid.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{
    cache::{CacheError, CacheStore},
    types::{ContractKey, ErrorLogEntry},
};

/// Cache-kind prefix for progress records.
const STATE_PREFIX: &str = "state";

/// Pipeline phase of a population run.
///
/// Transitions are linear from `Idle` through `Completed`; `Error` is
/// reachable from every step. `is_populating` is true exactly for the steps
/// between `Idle` and `Completed`/`Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PopulationStep {
    #[default]
    Idle,
    FetchingOwners,
    FilteringOwners,
    BuildingTokenMap,
    FetchingTiers,
    FetchingRewards,
    ProcessingHolders,
    Completed,
    Error,
}

impl PopulationStep {
    /// Whether this step means a run is in flight.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !matches!(self, PopulationStep::Idle | PopulationStep::Completed | PopulationStep::Error)
    }

    /// Progress share completed when this step *begins*, and this step's own
    /// share, in percent.
    ///
    /// Weights: owners 15, filtering 5, token map 5, tiers 35, rewards 25,
    /// holder processing 15.
    #[must_use]
    pub fn progress_window(&self) -> (f64, f64) {
        match self {
            PopulationStep::Idle | PopulationStep::Error => (0.0, 0.0),
            PopulationStep::FetchingOwners => (0.0, 15.0),
            PopulationStep::FilteringOwners => (15.0, 5.0),
            PopulationStep::BuildingTokenMap => (20.0, 5.0),
            PopulationStep::FetchingTiers => (25.0, 35.0),
            PopulationStep::FetchingRewards => (60.0, 25.0),
            PopulationStep::ProcessingHolders => (85.0, 15.0),
            PopulationStep::Completed => (100.0, 0.0),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            PopulationStep::Idle => "idle",
            PopulationStep::FetchingOwners => "fetching_owners",
            PopulationStep::FilteringOwners => "filtering_owners",
            PopulationStep::BuildingTokenMap => "building_token_map",
            PopulationStep::FetchingTiers => "fetching_tiers",
            PopulationStep::FetchingRewards => "fetching_rewards",
            PopulationStep::ProcessingHolders => "processing_holders",
            PopulationStep::Completed => "completed",
            PopulationStep::Error => "error",
        }
    }
}

impl std::fmt::Display for PopulationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable per-contract record describing the population pipeline's current
/// phase, counters, and error history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProgressState {
    pub is_populating: bool,
    pub step: PopulationStep,
    /// Total live tokens (sum of owner balances) discovered this run.
    pub total_nfts: u64,
    /// Tokens whose wallet-level reward lookups have resolved.
    pub processed_nfts: u64,
    /// Tokens queued for tier lookups.
    pub total_tiers: u64,
    /// Tier lookups resolved (success or recorded failure).
    pub processed_tiers: u64,
    /// Distinct owner addresses before filtering.
    pub total_owners: u64,
    pub error: Option<String>,
    pub error_log: Vec<ErrorLogEntry>,
    pub last_processed_block: u64,
    pub last_updated: Option<DateTime<Utc>>,
}

impl ProgressState {
    /// Weighted progress across the whole pipeline, in percent.
    ///
    /// Within the tier and reward phases the step's share scales with the
    /// respective processed/total counters; the other phases count all or
    /// nothing because they have no meaningful intra-phase granularity.
    #[must_use]
    pub fn progress_percentage(&self) -> f64 {
        let (base, share) = self.step.progress_window();
        let fraction = match self.step {
            PopulationStep::FetchingTiers => ratio(self.processed_tiers, self.total_tiers),
            PopulationStep::FetchingRewards => ratio(self.processed_nfts, self.total_nfts),
            _ => 0.0,
        };
        base + share * fraction
    }

    /// Records a phase transition, stamping `last_updated` and keeping the
    /// `is_populating` flag consistent with the step.
    pub fn transition(&mut self, step: PopulationStep) {
        self.step = step;
        self.is_populating = step.is_active();
        self.last_updated = Some(Utc::now());
        if step.is_active() {
            self.error = None;
        }
    }

    /// Marks the run failed, preserving counters and appending to the log.
    pub fn fail(&mut self, phase: &str, error: impl Into<String>) {
        let error = error.into();
        self.error_log.push(ErrorLogEntry::now(phase, error.clone()));
        self.error = Some(error);
        self.step = PopulationStep::Error;
        self.is_populating = false;
        self.last_updated = Some(Utc::now());
    }

    /// Serializes for persistence, mirroring `lastProcessedBlock` both at the
    /// top level and nested under `events` for backward-compatible readers.
    #[must_use]
    pub fn to_persisted_value(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({}));
        value["events"] = serde_json::json!({
            "lastProcessedBlock": self.last_processed_block,
        });
        value
    }

    /// Salvaging deserialization: starts from the idle zero-state and merges
    /// in every field that is present with the right type. The nested
    /// `events.lastProcessedBlock` form written by older versions is
    /// honored when the top-level field is absent.
    #[must_use]
    pub fn from_persisted_value(value: &serde_json::Value) -> Self {
        // The strict path covers records written by this version.
        if let Ok(mut state) = serde_json::from_value::<ProgressState>(value.clone()) {
            if state.last_processed_block == 0 {
                if let Some(nested) = nested_last_block(value) {
                    state.last_processed_block = nested;
                }
            }
            return state;
        }

        warn!("progress state record is partially corrupt, salvaging fields");

        let mut state = ProgressState::default();
        let Some(map) = value.as_object() else { return state };

        if let Some(b) = map.get("isPopulating").and_then(serde_json::Value::as_bool) {
            state.is_populating = b;
        }
        if let Some(step) = map
            .get("step")
            .and_then(|v| serde_json::from_value::<PopulationStep>(v.clone()).ok())
        {
            state.step = step;
        }
        let get_u64 = |field: &str| map.get(field).and_then(serde_json::Value::as_u64);
        if let Some(n) = get_u64("totalNfts") {
            state.total_nfts = n;
        }
        if let Some(n) = get_u64("processedNfts") {
            state.processed_nfts = n;
        }
        if let Some(n) = get_u64("totalTiers") {
            state.total_tiers = n;
        }
        if let Some(n) = get_u64("processedTiers") {
            state.processed_tiers = n;
        }
        if let Some(n) = get_u64("totalOwners") {
            state.total_owners = n;
        }
        if let Some(n) = get_u64("lastProcessedBlock") {
            state.last_processed_block = n;
        }
        if let Some(e) = map.get("error").and_then(serde_json::Value::as_str) {
            state.error = Some(e.to_string());
        }
        if let Some(log) = map
            .get("errorLog")
            .and_then(|v| serde_json::from_value::<Vec<ErrorLogEntry>>(v.clone()).ok())
        {
            state.error_log = log;
        }
        if let Some(ts) = map
            .get("lastUpdated")
            .and_then(|v| serde_json::from_value::<DateTime<Utc>>(v.clone()).ok())
        {
            state.last_updated = Some(ts);
        }
        if state.last_processed_block == 0 {
            if let Some(nested) = nested_last_block(value) {
                state.last_processed_block = nested;
            }
        }

        state
    }
}

fn nested_last_block(value: &serde_json::Value) -> Option<u64> {
    value.get("events")?.get("lastProcessedBlock")?.as_u64()
}

fn ratio(processed: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (processed.min(total) as f64) / (total as f64)
    }
}

/// Write-through accessor for per-contract progress records.
#[derive(Clone)]
pub struct CacheStateTracker {
    store: Arc<CacheStore>,
}

impl CacheStateTracker {
    #[must_use]
    pub fn new(store: Arc<CacheStore>) -> Self {
        Self { store }
    }

    /// Loads the progress record for `contract`, defaulting to the idle
    /// zero-state when absent and salvaging when partially corrupt.
    pub async fn load(&self, contract: ContractKey) -> ProgressState {
        match self.store.get(STATE_PREFIX, contract.as_str()).await {
            Some(value) => ProgressState::from_persisted_value(&value),
            None => {
                debug!(contract = %contract, "no persisted progress state, starting idle");
                ProgressState::default()
            }
        }
    }

    /// Persists the progress record for `contract`.
    ///
    /// # Errors
    ///
    /// Propagates filesystem-tier failures; the progress record is the
    /// pipeline's observability surface and must not be silently lost.
    pub async fn save(
        &self,
        contract: ContractKey,
        state: &ProgressState,
    ) -> Result<(), CacheError> {
        self.store.set(STATE_PREFIX, contract.as_str(), &state.to_persisted_value(), None).await
    }
}
