//! Route table and middleware stack.

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::handlers::{self, AppState};

/// Maximum accepted request body. The only POST body is a tiny flag object.
const MAX_BODY_BYTES: usize = 16 * 1024;

/// Builds the application router with shared state and middleware.
#[must_use]
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/holders/{contract}", get(handlers::get_holders).post(handlers::post_holders))
        .route("/holders/{contract}/progress", get(handlers::get_progress))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use holderscope_core::{config::AppConfig, runtime::HolderscopeRuntime};
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn test_router(dir: &TempDir) -> Router {
        let mut config = AppConfig::default();
        config.cache.directory = dir.path().to_string_lossy().into_owned();
        // Unroutable upstreams: handlers must still answer, populations fail
        // in the background.
        config.indexer.base_url = "http://127.0.0.1:1".to_string();
        config.node.rpc_url = "http://127.0.0.1:1".to_string();
        config.retry.retries = 0;
        config.retry.delay_ms = 1;

        let runtime = HolderscopeRuntime::builder().with_config(config).build().unwrap();
        runtime.start().await;

        build_router(Arc::new(AppState {
            populator: runtime.populator(),
            metrics: runtime.metrics(),
        }))
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_contract_is_400() {
        let dir = TempDir::new().unwrap();
        let router = test_router(&dir).await;

        let response = router
            .oneshot(Request::builder().uri("/holders/nonsense").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "unknown contract");
    }

    #[tokio::test]
    async fn test_contract_key_case_insensitive() {
        let dir = TempDir::new().unwrap();
        let router = test_router(&dir).await;

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/holders/STAX/progress")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_get_without_cache_is_202() {
        let dir = TempDir::new().unwrap();
        let router = test_router(&dir).await;

        let response = router
            .oneshot(Request::builder().uri("/holders/stax").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = body_json(response).await;
        assert_eq!(body["status"], "in_progress");
        assert!(body.get("cacheState").is_some());
    }

    #[tokio::test]
    async fn test_invalid_wallet_is_400() {
        let dir = TempDir::new().unwrap();
        let router = test_router(&dir).await;

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/holders/stax?wallet=garbage")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "invalid wallet address");
    }

    #[tokio::test]
    async fn test_post_triggers_population() {
        let dir = TempDir::new().unwrap();
        let router = test_router(&dir).await;

        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/holders/flux")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"forceUpdate": false}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = body_json(response).await;
        assert_eq!(body["status"], "in_progress");
    }

    #[tokio::test]
    async fn test_progress_shape() {
        let dir = TempDir::new().unwrap();
        let router = test_router(&dir).await;

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/holders/element280/progress")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["isPopulating"], false);
        assert_eq!(body["phase"], "idle");
        assert!(body.get("globalMetrics").is_some());
        assert!(body.get("errorLog").is_some());
    }

    #[tokio::test]
    async fn test_health_and_metrics() {
        let dir = TempDir::new().unwrap();
        let router = test_router(&dir).await;

        let health = router
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(health.status(), StatusCode::OK);

        let metrics = router
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(metrics.status(), StatusCode::OK);
        let body = body_json(metrics).await;
        assert!(body.get("populationsStarted").is_some());
    }
}
