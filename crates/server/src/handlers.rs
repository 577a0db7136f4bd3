//! Endpoint handlers for the holders API.
//!
//! Error responses use one canonical shape everywhere: `{error, details?}`
//! with 400 for unknown contracts, 403 for disabled contracts, and 500 for
//! run-level failures. Stack detail stays in server logs; clients get the
//! stable machine-checkable `error` string.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, warn};

use holderscope_core::{
    config::ContractDescriptor,
    metrics::MetricsCollector,
    populator::{PopulateError, Populator},
    response::{format_holders_response, format_progress_response, CacheStateView},
    types::{Address, ContractKey},
};

/// Shared state for all routes.
pub struct AppState {
    pub populator: Arc<Populator>,
    pub metrics: Arc<MetricsCollector>,
}

type ApiResponse = (StatusCode, Json<Value>);

fn error_body(status: StatusCode, error: &str, details: Option<String>) -> ApiResponse {
    let mut body = json!({ "error": error });
    if let Some(details) = details {
        body["details"] = json!(details);
    }
    (status, Json(body))
}

/// Resolves and authorizes the route's contract parameter
/// (case-insensitive).
fn resolve_contract(
    state: &AppState,
    raw: &str,
) -> Result<(ContractKey, Arc<ContractDescriptor>), ApiResponse> {
    let key: ContractKey = raw.parse().map_err(|_| {
        error_body(StatusCode::BAD_REQUEST, "unknown contract", Some(raw.to_string()))
    })?;

    match state.populator.descriptor(key) {
        Ok(descriptor) => Ok((key, descriptor)),
        Err(PopulateError::ContractDisabled(_)) => Err(error_body(
            StatusCode::FORBIDDEN,
            "contract disabled",
            Some(key.to_string()),
        )),
        Err(PopulateError::UnknownContract(_)) => Err(error_body(
            StatusCode::BAD_REQUEST,
            "unknown contract",
            Some(key.to_string()),
        )),
    }
}

/// Spawns a background population run; outcome is logged, not awaited.
fn spawn_population(populator: Arc<Populator>, key: ContractKey, force: bool) {
    tokio::spawn(async move {
        match populator.populate(key, force).await {
            Ok(outcome) => {
                info!(contract = %key, status = outcome.status(), "background population finished")
            }
            Err(e) => warn!(contract = %key, error = %e, "background population rejected"),
        }
    });
}

#[derive(Debug, Deserialize)]
pub struct HoldersQuery {
    pub page: Option<u64>,
    #[serde(rename = "pageSize")]
    pub page_size: Option<u64>,
    pub wallet: Option<String>,
}

/// `GET /holders/{contract}` — paginated holder summaries from cache.
///
/// Serves whatever is currently cached; a stale or absent entry triggers a
/// background population run (202 when nothing is servable yet).
pub async fn get_holders(
    State(state): State<Arc<AppState>>,
    Path(contract): Path<String>,
    Query(query): Query<HoldersQuery>,
) -> ApiResponse {
    let (key, descriptor) = match resolve_contract(&state, &contract) {
        Ok(resolved) => resolved,
        Err(response) => return response,
    };

    let wallet = match &query.wallet {
        Some(raw) => match Address::try_from(raw.as_str()) {
            Ok(address) => Some(address),
            Err(_) => {
                return error_body(
                    StatusCode::BAD_REQUEST,
                    "invalid wallet address",
                    Some(raw.clone()),
                )
            }
        },
        None => None,
    };

    let page = query.page.unwrap_or(1);
    let page_size = query.page_size.unwrap_or(descriptor.page_size as u64);

    let Some(entry) = state.populator.cached_entry(key).await else {
        spawn_population(Arc::clone(&state.populator), key, false);
        let progress = state.populator.progress(key).await;
        return (
            StatusCode::ACCEPTED,
            Json(json!({
                "status": "in_progress",
                "cacheState": CacheStateView::from(&progress),
            })),
        );
    };

    if entry.is_stale(state.populator.stale_after_seconds()) {
        spawn_population(Arc::clone(&state.populator), key, false);
    }

    let progress = state.populator.progress(key).await;
    match format_holders_response(&entry, &progress, page, page_size, wallet) {
        Ok(response) => match serde_json::to_value(&response) {
            Ok(body) => (StatusCode::OK, Json(body)),
            Err(e) => {
                error!(contract = %key, error = %e, "holders response serialization failed");
                error_body(StatusCode::INTERNAL_SERVER_ERROR, "internal error", None)
            }
        },
        Err(e) => {
            // Schema violations mean corrupt cached data; do not leak detail
            // beyond the stable error string and the violation summary.
            error!(contract = %key, error = %e, "holders response failed validation");
            error_body(
                StatusCode::INTERNAL_SERVER_ERROR,
                "response validation failed",
                Some(e.to_string()),
            )
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PopulateRequest {
    #[serde(default, rename = "forceUpdate")]
    pub force_update: bool,
}

/// `POST /holders/{contract}` — triggers (or reports on) a population run.
pub async fn post_holders(
    State(state): State<Arc<AppState>>,
    Path(contract): Path<String>,
    Json(request): Json<PopulateRequest>,
) -> ApiResponse {
    let (key, _descriptor) = match resolve_contract(&state, &contract) {
        Ok(resolved) => resolved,
        Err(response) => return response,
    };

    let force = request.force_update;

    if state.populator.is_populating(key) {
        return (
            StatusCode::OK,
            Json(json!({
                "message": "population already running",
                "status": "in_progress",
            })),
        );
    }

    if !force {
        if let Some(entry) = state.populator.cached_entry(key).await {
            if !entry.is_stale(state.populator.stale_after_seconds()) {
                return (
                    StatusCode::OK,
                    Json(json!({
                        "message": "holder cache already up to date",
                        "status": "up_to_date",
                    })),
                );
            }
        }
    }

    spawn_population(Arc::clone(&state.populator), key, force);
    (
        StatusCode::ACCEPTED,
        Json(json!({
            "message": "population started",
            "status": "in_progress",
        })),
    )
}

/// `GET /holders/{contract}/progress` — population progress for pollers.
pub async fn get_progress(
    State(state): State<Arc<AppState>>,
    Path(contract): Path<String>,
) -> ApiResponse {
    let (key, _descriptor) = match resolve_contract(&state, &contract) {
        Ok(resolved) => resolved,
        Err(response) => return response,
    };

    let progress = state.populator.progress(key).await;
    let total_live_holders =
        state.populator.cached_entry(key).await.map_or(0, |entry| entry.total_holders);

    let response =
        format_progress_response(&progress, total_live_holders, state.metrics.snapshot());

    match serde_json::to_value(&response) {
        Ok(body) => (StatusCode::OK, Json(body)),
        Err(e) => {
            error!(contract = %key, error = %e, "progress response serialization failed");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "internal error", None)
        }
    }
}

/// `GET /health` — liveness probe.
pub async fn health() -> ApiResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

/// `GET /metrics` — JSON metrics snapshot.
pub async fn metrics(State(state): State<Arc<AppState>>) -> ApiResponse {
    match serde_json::to_value(state.metrics.snapshot()) {
        Ok(body) => (StatusCode::OK, Json(body)),
        Err(e) => {
            error!(error = %e, "metrics serialization failed");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "internal error", None)
        }
    }
}
