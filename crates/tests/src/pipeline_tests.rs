//! End-to-end population runs through the real `Populator` against the mock
//! upstream stack.

use crate::mock_infrastructure::{
    owner_entry, transfer_entry, TestStack, ALICE, BOB, DEAD, TEST_CONTRACT, ZERO,
};
use holderscope_core::{
    cache::PopulationStep,
    populator::PopulateOutcome,
    types::{Address, CacheEntry},
};
use serde_json::json;

/// Chain tip just past the Stax deployment block so the transfer window is a
/// single sub-range.
const TIP: u64 = 20_920_050;

async fn mount_happy_path(stack: &mut TestStack) {
    // alice holds tokens 1,2; bob holds 3; the burn wallet shows up holding
    // 4 and must be filtered out.
    stack
        .mock_owners(json!([
            owner_entry(ALICE, &[1, 2]),
            owner_entry(BOB, &[3]),
            owner_entry(DEAD, &[4]),
        ]))
        .await;

    // Sorted live tokens [1, 2, 3] resolve to tiers [1, 1, 2].
    stack.mock_tier_batch(&[1, 1, 2]).await;

    // Wallets sorted by address: alice then bob.
    stack.mock_reward_batch(&[1_000_000_000_000_000_000, 0]).await;

    stack.mock_block_number(TIP).await;

    // Four mints, then token 4 burned.
    stack
        .mock_transfers(json!([
            transfer_entry(ZERO, ALICE, 1),
            transfer_entry(ZERO, ALICE, 2),
            transfer_entry(ZERO, BOB, 3),
            transfer_entry(ZERO, ALICE, 4),
            transfer_entry(ALICE, DEAD, 4),
        ]))
        .await;
}

fn assert_happy_entry(entry: &CacheEntry) {
    let alice: Address = ALICE.try_into().unwrap();
    let bob: Address = BOB.try_into().unwrap();

    assert_eq!(entry.total_live, 3);
    assert_eq!(entry.total_burned, 1);
    assert_eq!(entry.total_minted, 4);
    assert_eq!(entry.total_holders, 2);
    assert_eq!(entry.multiplier_pool, 4);

    // Equal multiplier sums (2 vs 2): the tie breaks by token count, so
    // alice outranks bob, and ranks are dense 1-based.
    assert_eq!(entry.holders[0].wallet, alice);
    assert_eq!(entry.holders[0].rank, 1);
    assert_eq!(entry.holders[0].total, 2);
    assert_eq!(entry.holders[1].wallet, bob);
    assert_eq!(entry.holders[1].rank, 2);

    for holder in &entry.holders {
        assert_eq!(holder.tier_sum(), holder.total, "tier-sum invariant");
        assert!((holder.percentage - 50.0).abs() < 1e-9);
    }

    assert!((entry.holders[0].claimable_rewards - 1.0).abs() < 1e-9);
    assert_eq!(entry.holders[1].claimable_rewards, 0.0);
}

#[tokio::test]
async fn test_full_population_run() {
    let mut stack = TestStack::new().await;
    mount_happy_path(&mut stack).await;

    let (populator, metrics) = stack.populator();
    let outcome = populator.populate(TEST_CONTRACT, true).await.unwrap();

    let PopulateOutcome::Completed { entry } = outcome else {
        panic!("expected Completed, got {}", outcome.status());
    };
    assert_happy_entry(&entry);

    // The persisted cache round-trips through the store.
    let cached = populator.cached_entry(TEST_CONTRACT).await.unwrap();
    assert_happy_entry(&cached);

    let state = populator.progress(TEST_CONTRACT).await;
    assert_eq!(state.step, PopulationStep::Completed);
    assert!(!state.is_populating);
    assert_eq!(state.last_processed_block, TIP);
    assert_eq!(state.total_owners, 3);
    assert!(state.error.is_none());

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.populations_started, 1);
    assert_eq!(snapshot.populations_completed, 1);
    assert_eq!(snapshot.populations_failed, 0);

    // The filesystem tier holds the pretty-printed artifact.
    assert!(stack.dir.path().join("holders_stax.json").exists());
    assert!(stack.dir.path().join("state_stax.json").exists());
}

#[tokio::test]
async fn test_concurrent_populate_runs_pipeline_once() {
    let mut stack = TestStack::new().await;
    let owners_mock = stack
        .indexer
        .mock("GET", "/getOwnersForContract")
        .match_query(mockito::Matcher::Any)
        .expect(1)
        .with_status(200)
        .with_body(json!({ "owners": [owner_entry(ALICE, &[1])] }).to_string())
        .create_async()
        .await;
    stack.mock_tier_batch(&[1]).await;
    stack.mock_reward_batch(&[0]).await;
    stack.mock_block_number(TIP).await;
    stack.mock_transfers(json!([])).await;

    let (populator, _metrics) = stack.populator();

    // Both calls start before either completes; the population slot is
    // claimed synchronously, so exactly one pipeline runs.
    let (first, second) = tokio::join!(
        populator.populate(TEST_CONTRACT, true),
        populator.populate(TEST_CONTRACT, true),
    );

    let statuses = [first.unwrap().status(), second.unwrap().status()];
    assert!(statuses.contains(&"completed"), "one call must complete: {statuses:?}");
    assert!(statuses.contains(&"in_progress"), "one call must short-circuit: {statuses:?}");

    owners_mock.assert_async().await;
}

#[tokio::test]
async fn test_fresh_cache_is_served_without_recompute() {
    let mut stack = TestStack::new().await;
    mount_happy_path(&mut stack).await;

    let (populator, metrics) = stack.populator();

    let first = populator.populate(TEST_CONTRACT, true).await.unwrap();
    assert!(matches!(first, PopulateOutcome::Completed { .. }));

    let second = populator.populate(TEST_CONTRACT, false).await.unwrap();
    assert!(matches!(second, PopulateOutcome::UpToDate));

    // Only the first call ran the pipeline.
    assert_eq!(metrics.snapshot().populations_started, 1);
}

#[tokio::test]
async fn test_failed_run_preserves_last_good_cache() {
    let mut stack = TestStack::new().await;
    mount_happy_path(&mut stack).await;

    let (populator, _) = stack.populator();
    let outcome = populator.populate(TEST_CONTRACT, true).await.unwrap();
    assert!(matches!(outcome, PopulateOutcome::Completed { .. }));
    let good = populator.cached_entry(TEST_CONTRACT).await.unwrap();

    // Same cache directory, dead upstreams: the forced re-population fails
    // in the owners phase.
    let broken = crate::mock_infrastructure::broken_populator(stack.dir.path());
    let outcome = broken.populate(TEST_CONTRACT, true).await.unwrap();
    assert!(matches!(outcome, PopulateOutcome::Failed { .. }));

    // Readers still see the last known-good entry, byte for byte.
    let served = broken.cached_entry(TEST_CONTRACT).await.unwrap();
    assert_eq!(served, good);

    let state = broken.progress(TEST_CONTRACT).await;
    assert_eq!(state.step, PopulationStep::Error);
    assert!(state.error.is_some());
    assert!(!state.error_log.is_empty());
}

#[tokio::test]
async fn test_single_tier_failure_excludes_token_not_run() {
    let mut stack = TestStack::new().await;

    stack
        .mock_owners(json!([owner_entry(ALICE, &[1, 2]), owner_entry(BOB, &[3])]))
        .await;

    // Token 2's tier call reverts; tokens 1 and 3 resolve.
    let entries = json!([
        { "jsonrpc": "2.0", "id": 0, "result": format!("0x{:064x}", 1) },
        { "jsonrpc": "2.0", "id": 1, "error": { "code": 3, "message": "execution reverted" } },
        { "jsonrpc": "2.0", "id": 2, "result": format!("0x{:064x}", 2) },
    ]);
    stack
        .node
        .mock("POST", "/")
        .match_body(mockito::Matcher::Regex(
            crate::mock_infrastructure::TIER_SELECTOR_HEX.to_string(),
        ))
        .with_status(200)
        .with_body(entries.to_string())
        .create_async()
        .await;

    stack.mock_reward_batch(&[0, 0]).await;
    stack.mock_block_number(TIP).await;
    stack.mock_transfers(json!([])).await;

    let (populator, _) = stack.populator();
    let outcome = populator.populate(TEST_CONTRACT, true).await.unwrap();

    let PopulateOutcome::Completed { entry } = outcome else {
        panic!("run must survive a single tier failure");
    };

    // alice keeps token 1 only; the failed token is excluded everywhere.
    let alice: Address = ALICE.try_into().unwrap();
    let alice_holder = entry.holders.iter().find(|h| h.wallet == alice).unwrap();
    assert_eq!(alice_holder.total, 1);
    assert_eq!(alice_holder.tier_sum(), 1);

    let state = populator.progress(TEST_CONTRACT).await;
    assert_eq!(state.step, PopulationStep::Completed);
    assert!(
        state.error_log.iter().any(|e| e.phase == "fetching_tiers" && e.error.contains("token 2")),
        "the failed token must be recorded in the error log"
    );
}
