//! Indexing-service access: owner enumeration and historical transfers.
//!
//! The indexing API is the authoritative source for "who holds what" and for
//! transfer history. Both capabilities are paginated and rate-limited, so
//! every request goes through the shared [`retry`](crate::retry) wrapper and
//! responses are shape-validated before use.

pub mod client;
pub mod owners;
pub mod transfers;

pub use client::IndexerClient;
pub use owners::fetch_owners;
pub use transfers::{fetch_transfers, TransferFetchOptions};

use thiserror::Error;

/// Errors from the indexing-service boundary.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IndexerError {
    /// Request exceeded the configured timeout duration.
    #[error("request timeout")]
    Timeout,

    /// Failed to reach the indexing endpoint.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// HTTP-level error; the body is carried so rate-limit and size-limit
    /// conditions remain detectable from the message.
    #[error("HTTP error {0}: {1}")]
    HttpError(u16, String),

    /// The owners endpoint returned something other than a list.
    #[error("invalid owners response: {0}")]
    InvalidOwnersResponse(String),

    /// Response body could not be parsed as JSON.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl IndexerError {
    /// Whether this error is the provider's "response too large" condition,
    /// which the transfer fetcher answers by halving the block range.
    #[must_use]
    pub fn is_oversize(&self) -> bool {
        match self {
            IndexerError::HttpError(_, body) => {
                let lower = body.to_ascii_lowercase();
                lower.contains("response size exceeded") ||
                    lower.contains("query returned more than") ||
                    lower.contains("log response size")
            }
            _ => false,
        }
    }
}
