//! # Holderscope Core
//!
//! Core library for the Holderscope NFT holder analytics service: holder
//! cache population for the TitanX-ecosystem collections, backed by an
//! indexing API and batched on-chain reads.
//!
//! This crate provides the foundational components for:
//!
//! - **[`populator`]**: The population pipeline orchestrator — enumerate
//!   owners, build the token/owner map, batch-fetch tiers and rewards,
//!   aggregate, validate, and persist, with an observable progress state
//!   machine and at-most-one-run-per-contract enforcement.
//!
//! - **[`cache`]**: Multi-tier cache store (memory / remote KV / filesystem)
//!   plus the persisted per-contract progress state.
//!
//! - **[`chain`]**: JSON-RPC node client and batched `eth_call` reader with
//!   per-call failure isolation.
//!
//! - **[`indexer`]**: Owner enumeration and transfer history with adaptive
//!   block-range shrinking.
//!
//! - **[`retry`]**: Deterministic bounded retry with rate-limit fast-fail,
//!   wrapped around every upstream call.
//!
//! - **[`response`]**: Pagination and outgoing-shape validation for the
//!   HTTP surface.
//!
//! - **[`metrics`]**: In-memory service counters exposed through the
//!   progress endpoint.
//!
//! ## Request Flow
//!
//! ```text
//! GET /holders/{contract}
//!       │
//!       ▼
//! ┌──────────────┐  hit   ┌──────────────────┐
//! │  CacheStore  │ ─────► │ format_holders_  │ ──► 200 paginated body
//! │ (mem/kv/fs)  │        │ response (+ validate)
//! └──────┬───────┘        └──────────────────┘
//!        │ miss
//!        ▼
//! ┌──────────────┐
//! │  Populator   │ ──► 202 {status: in_progress, cacheState}
//! │ (background) │
//! └──────────────┘
//! ```
//!
//! The populator is the only writer of cache entries and progress state;
//! GET handlers are pure readers of whatever is currently cached.

pub mod cache;
pub mod chain;
pub mod config;
pub mod indexer;
pub mod metrics;
pub mod populator;
pub mod response;
pub mod retry;
pub mod runtime;
pub mod types;
