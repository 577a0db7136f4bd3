//! HTTP surface tests driven through the axum router against the mock
//! upstream stack.

use crate::mock_infrastructure::{owner_entry, transfer_entry, TestStack, ALICE, BOB, DEAD, ZERO};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use holderscope_core::runtime::HolderscopeRuntime;
use serde_json::json;
use server::{handlers::AppState, router::build_router};
use std::sync::Arc;
use tower::ServiceExt;

const TIP: u64 = 20_920_050;

async fn populated_router(stack: &mut TestStack) -> Router {
    stack
        .mock_owners(json!([owner_entry(ALICE, &[1, 2]), owner_entry(BOB, &[3])]))
        .await;
    stack.mock_tier_batch(&[1, 1, 2]).await;
    stack.mock_reward_batch(&[0, 0]).await;
    stack.mock_block_number(TIP).await;
    stack
        .mock_transfers(json!([
            transfer_entry(ZERO, ALICE, 1),
            transfer_entry(ZERO, ALICE, 2),
            transfer_entry(ZERO, BOB, 3),
            transfer_entry(ALICE, DEAD, 9),
        ]))
        .await;

    let runtime =
        HolderscopeRuntime::builder().with_config(stack.config.clone()).build().unwrap();
    runtime.start().await;

    // Populate synchronously so GET requests have data to serve.
    runtime.populator().populate(crate::mock_infrastructure::TEST_CONTRACT, true).await.unwrap();

    build_router(Arc::new(AppState {
        populator: runtime.populator(),
        metrics: runtime.metrics(),
    }))
}

async fn get_json(
    router: Router,
    uri: &str,
) -> (StatusCode, serde_json::Value) {
    let response = router
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_get_holders_paginated() {
    let mut stack = TestStack::new().await;
    let router = populated_router(&mut stack).await;

    let (status, body) = get_json(router.clone(), "/holders/stax?page=1&pageSize=1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["holders"].as_array().unwrap().len(), 1);
    assert_eq!(body["totalItems"], 2);
    assert_eq!(body["totalPages"], 2);
    assert_eq!(body["currentPage"], 1);
    assert_eq!(body["totalTokens"], 3);
    assert_eq!(body["totalBurned"], 1);
    assert_eq!(body["status"], "completed");

    // Page 2 holds the remaining holder; together the pages round-trip the
    // full list in rank order.
    let (_, page2) = get_json(router, "/holders/stax?page=2&pageSize=1").await;
    assert_eq!(page2["holders"].as_array().unwrap().len(), 1);
    assert_ne!(
        body["holders"][0]["wallet"], page2["holders"][0]["wallet"],
        "pages must not overlap"
    );
}

#[tokio::test]
async fn test_get_holders_wallet_filter() {
    let mut stack = TestStack::new().await;
    let router = populated_router(&mut stack).await;

    let (status, body) =
        get_json(router, &format!("/holders/stax?wallet={ALICE}")).await;

    assert_eq!(status, StatusCode::OK);
    let holders = body["holders"].as_array().unwrap();
    assert_eq!(holders.len(), 1);
    assert_eq!(holders[0]["wallet"], ALICE);
    assert_eq!(holders[0]["total"], 2);
}

#[tokio::test]
async fn test_post_reports_up_to_date_after_run() {
    let mut stack = TestStack::new().await;
    let router = populated_router(&mut stack).await;

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/holders/stax")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"forceUpdate": false}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "up_to_date");
}

#[tokio::test]
async fn test_progress_after_completed_run() {
    let mut stack = TestStack::new().await;
    let router = populated_router(&mut stack).await;

    let (status, body) = get_json(router, "/holders/stax/progress").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phase"], "completed");
    assert_eq!(body["isPopulating"], false);
    assert_eq!(body["totalLiveHolders"], 2);
    assert_eq!(body["lastProcessedBlock"], TIP);
    assert_eq!(body["progressPercentage"], 100.0);
    assert_eq!(body["globalMetrics"]["populationsCompleted"], 1);
}
