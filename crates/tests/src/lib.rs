//! Integration tests for the Holderscope service.
//!
//! This crate contains test modules exercising whole slices of the system
//! against mocked upstreams:
//!
//! - `mock_infrastructure`: reusable mock indexing API + JSON-RPC node stack
//! - `pipeline_tests`: end-to-end population runs through the real
//!   `Populator` against the mock stack
//! - `api_tests`: HTTP surface driven through the axum router
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --package holderscope-tests
//! ```
//!
//! No external services are required; every upstream is a local mock.

#[cfg(test)]
pub mod mock_infrastructure;

#[cfg(test)]
mod pipeline_tests;

#[cfg(test)]
mod api_tests;
