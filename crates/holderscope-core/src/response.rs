//! Response assembly: pagination, wallet filtering, and outgoing-shape
//! validation.
//!
//! Every holders response is validated against its own arithmetic before it
//! leaves the core — a malformed response is a hard error surfaced as a 500,
//! never silently reshaped, so corrupt aggregation output can never reach a
//! client undetected.

use serde::Serialize;
use thiserror::Error;

use crate::{
    cache::ProgressState,
    metrics::MetricsSnapshot,
    types::{Address, CacheEntry, HolderSummary},
};

/// Validation failures on an assembled response. Always a server-side bug or
/// corrupt cache data, never a client error.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResponseError {
    #[error("response schema violation: {0}")]
    SchemaViolation(String),

    #[error("page and pageSize must be at least 1")]
    InvalidPaging,
}

/// Compact progress view embedded in holders responses.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CacheStateView {
    pub is_populating: bool,
    pub step: String,
    pub progress_percentage: f64,
    pub last_processed_block: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&ProgressState> for CacheStateView {
    fn from(state: &ProgressState) -> Self {
        Self {
            is_populating: state.is_populating,
            step: state.step.to_string(),
            progress_percentage: state.progress_percentage(),
            last_processed_block: state.last_processed_block,
            last_updated: state.last_updated,
            error: state.error.clone(),
        }
    }
}

/// Paginated holders payload, the body of `GET /holders/{contract}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldersResponse {
    pub holders: Vec<HolderSummary>,
    pub total_items: u64,
    pub total_pages: u64,
    pub current_page: u64,
    pub page_size: u64,
    pub total_burned: u64,
    pub total_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_shares: Option<u128>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_rewards: Option<f64>,
    pub status: String,
    pub cache_state: CacheStateView,
}

/// Full progress payload, the body of `GET /holders/{contract}/progress`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressResponse {
    pub is_populating: bool,
    pub total_live_holders: u64,
    pub total_owners: u64,
    pub phase: String,
    pub progress_percentage: f64,
    pub last_processed_block: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub error_log: Vec<crate::types::ErrorLogEntry>,
    pub global_metrics: MetricsSnapshot,
}

/// Assembles and validates a holders response.
///
/// When `wallet` is supplied pagination is bypassed: the single matching
/// holder (or an empty list) is returned in full. Otherwise 1-based
/// `page`/`page_size` slicing applies with `total_pages = ceil(total_items /
/// page_size)`.
///
/// # Errors
///
/// - [`ResponseError::InvalidPaging`] for zero page or page size
/// - [`ResponseError::SchemaViolation`] when the assembled response fails
///   its own invariants
pub fn format_holders_response(
    entry: &CacheEntry,
    state: &ProgressState,
    page: u64,
    page_size: u64,
    wallet: Option<Address>,
) -> Result<HoldersResponse, ResponseError> {
    if page == 0 || page_size == 0 {
        return Err(ResponseError::InvalidPaging);
    }

    let status = if state.is_populating { "in_progress" } else { "completed" }.to_string();
    let cache_state = CacheStateView::from(state);

    let total_shares = {
        let shares: u128 =
            entry.holders.iter().filter_map(|h| h.extras.shares).sum();
        entry.holders.iter().any(|h| h.extras.shares.is_some()).then_some(shares)
    };
    let pending_rewards = {
        let pending: f64 = entry.holders.iter().map(|h| h.claimable_rewards).sum();
        (pending > 0.0).then_some(pending)
    };

    let response = if let Some(wallet) = wallet {
        let matching: Vec<HolderSummary> =
            entry.holders.iter().filter(|h| h.wallet == wallet).cloned().collect();
        let total_items = matching.len() as u64;

        HoldersResponse {
            holders: matching,
            total_items,
            total_pages: 1,
            current_page: 1,
            page_size: total_items.max(1),
            total_burned: entry.total_burned,
            total_tokens: entry.total_live,
            total_shares,
            pending_rewards,
            status,
            cache_state,
        }
    } else {
        let total_items = entry.holders.len() as u64;
        let total_pages = total_items.div_ceil(page_size);

        let start = (page - 1).saturating_mul(page_size) as usize;
        let end = (start + page_size as usize).min(entry.holders.len());
        let holders = if start < entry.holders.len() {
            entry.holders[start..end].to_vec()
        } else {
            Vec::new()
        };

        HoldersResponse {
            holders,
            total_items,
            total_pages,
            current_page: page,
            page_size,
            total_burned: entry.total_burned,
            total_tokens: entry.total_live,
            total_shares,
            pending_rewards,
            status,
            cache_state,
        }
    };

    validate_response(&response, wallet.is_some())?;
    Ok(response)
}

/// Checks the assembled response's arithmetic and per-holder invariants.
fn validate_response(
    response: &HoldersResponse,
    wallet_filtered: bool,
) -> Result<(), ResponseError> {
    if !wallet_filtered {
        let expected_pages = response.total_items.div_ceil(response.page_size);
        if response.total_pages != expected_pages {
            return Err(ResponseError::SchemaViolation(format!(
                "totalPages is {} but ceil({} / {}) is {expected_pages}",
                response.total_pages, response.total_items, response.page_size
            )));
        }
        if response.holders.len() as u64 > response.page_size {
            return Err(ResponseError::SchemaViolation(format!(
                "page holds {} holders, exceeding pageSize {}",
                response.holders.len(),
                response.page_size
            )));
        }
    }

    for holder in &response.holders {
        if holder.wallet.is_zero() {
            return Err(ResponseError::SchemaViolation(
                "holder entry with zero address".to_string(),
            ));
        }
        if holder.tier_sum() != holder.total {
            return Err(ResponseError::SchemaViolation(format!(
                "holder {}: tier counts sum to {} but total is {}",
                holder.wallet,
                holder.tier_sum(),
                holder.total
            )));
        }
    }

    Ok(())
}

/// Assembles the progress endpoint payload.
#[must_use]
pub fn format_progress_response(
    state: &ProgressState,
    total_live_holders: u64,
    global_metrics: MetricsSnapshot,
) -> ProgressResponse {
    ProgressResponse {
        is_populating: state.is_populating,
        total_live_holders,
        total_owners: state.total_owners,
        phase: state.step.to_string(),
        progress_percentage: state.progress_percentage(),
        last_processed_block: state.last_processed_block,
        last_updated: state.last_updated,
        error: state.error.clone(),
        error_log: state.error_log.clone(),
        global_metrics,
    }
}
