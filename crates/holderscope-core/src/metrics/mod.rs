//! In-memory service metrics.
//!
//! Counters are process-global, cheap to bump, and exported two ways: as the
//! `globalMetrics` object on the progress endpoint and as the `/metrics`
//! JSON snapshot. No external metrics backend is assumed.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub populations_started: u64,
    pub populations_completed: u64,
    pub populations_failed: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub upstream_calls: u64,
    pub upstream_errors: u64,
    /// Cumulative wall-clock per pipeline phase, milliseconds.
    pub phase_durations_ms: BTreeMap<String, u64>,
}

/// Thread-safe metrics collector.
///
/// Uses a `parking_lot::RwLock` rather than per-field atomics: writes are
/// rare (a handful per population run plus one per request) and the snapshot
/// path wants a consistent view.
#[derive(Default)]
pub struct MetricsCollector {
    inner: RwLock<MetricsSnapshot>,
}

impl MetricsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn population_started(&self) {
        self.inner.write().populations_started += 1;
    }

    #[inline]
    pub fn population_completed(&self) {
        self.inner.write().populations_completed += 1;
    }

    #[inline]
    pub fn population_failed(&self) {
        self.inner.write().populations_failed += 1;
    }

    #[inline]
    pub fn cache_hit(&self) {
        self.inner.write().cache_hits += 1;
    }

    #[inline]
    pub fn cache_miss(&self) {
        self.inner.write().cache_misses += 1;
    }

    #[inline]
    pub fn upstream_call(&self) {
        self.inner.write().upstream_calls += 1;
    }

    #[inline]
    pub fn upstream_error(&self) {
        self.inner.write().upstream_errors += 1;
    }

    /// Accumulates wall-clock spent in a pipeline phase.
    pub fn phase_duration(&self, phase: &str, millis: u64) {
        *self.inner.write().phase_durations_ms.entry(phase.to_string()).or_insert(0) += millis;
    }

    /// Consistent copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.read().clone()
    }
}
