//! Multi-tier persistent cache and the population progress tracker.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                       CacheStore                          │
//! │   (keyed by prefix + contract, e.g. "holders_element280") │
//! └───────────────────────────────────────────────────────────┘
//!           │                 │                    │
//!   ┌───────▼──────┐  ┌───────▼────────┐  ┌────────▼────────┐
//!   │  Memory tier │  │  Remote tier   │  │ Filesystem tier │
//!   │  (LRU-bound) │  │  (REST KV,     │  │ (pretty JSON,   │
//!   │              │  │   TTL, best-   │  │  no TTL, last-  │
//!   │              │  │   effort)      │  │  resort truth)  │
//!   └──────────────┘  └────────────────┘  └─────────────────┘
//! ```
//!
//! Read path: memory → remote (when enabled and not disabled for the
//! prefix) → filesystem. Write path: remote best-effort with TTL, then an
//! unconditional filesystem mirror whose failure *does* propagate — the
//! filesystem copy is the durable fallback and must not silently fail.
//!
//! The [`state`] module layers the per-contract [`ProgressState`] record on
//! top of the store; it is persisted before each pipeline phase starts so an
//! external poller always observes the step actually in flight.
//!
//! [`ProgressState`]: state::ProgressState

pub mod remote;
pub mod state;
pub mod store;

pub use remote::RemoteKv;
pub use state::{CacheStateTracker, PopulationStep, ProgressState};
pub use store::CacheStore;

use thiserror::Error;

/// Errors from the cache store boundary.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CacheError {
    /// Filesystem tier failure. Fatal for writes.
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),

    /// Value could not be serialized or deserialized.
    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote tier failure. Logged on writes, surfaced only when the caller
    /// explicitly queries the remote tier.
    #[error("remote cache error: {0}")]
    Remote(String),
}
