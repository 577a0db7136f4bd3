//! Read-only blockchain access: JSON-RPC node client and batched contract
//! calls.
//!
//! The pipeline's on-chain reads (per-token tier lookups, per-wallet reward
//! lookups) all flow through [`multicall::batch_call`], which partitions
//! calls into fixed-size JSON-RPC batches and runs them with bounded
//! concurrency. Failure is isolated to the smallest possible unit: a single
//! call where the node reports a per-entry error, the whole batch when the
//! transport fails — never the run.

pub mod client;
pub mod multicall;

pub use client::{NodeClient, NodeClientConfig};
pub use multicall::{batch_call, BatchOptions, CallOutcome, ContractCall};

use thiserror::Error;

/// Errors from the blockchain node boundary.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ChainError {
    /// Request exceeded the configured timeout duration.
    #[error("request timeout")]
    Timeout,

    /// Failed to establish a connection to the node endpoint.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// HTTP-level error (non-2xx status code).
    #[error("HTTP error {0}: {1}")]
    HttpError(u16, String),

    /// JSON-RPC error returned by the node.
    #[error("RPC error {0}: {1}")]
    RpcError(i32, String),

    /// Response could not be parsed or was malformed.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Maximum concurrent requests limit has been reached.
    #[error("concurrency limit reached")]
    ConcurrencyLimit,
}
