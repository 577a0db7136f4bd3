//! Per-wallet aggregation and ranking.
//!
//! Turns the run's intermediate data (token/owner map, tier lookups, reward
//! lookups) into the final [`HolderSummary`] list. Tokens whose tier lookup
//! failed are excluded from aggregation entirely — counting them toward a
//! wallet's total without a tier would break the tier-sum invariant the
//! validator enforces.

use ahash::AHashMap;
use std::collections::BTreeMap;
use tracing::debug;

use crate::{
    config::ContractDescriptor,
    types::{Address, ContractKey, HolderExtras, HolderSummary, OwnerRecord, TokenOwnerMap},
};

/// Wei per whole reward token.
const WEI_PER_TOKEN: f64 = 1e18;

/// Element 369 payout cycle lengths in days; pending pools are weighted by
/// cycle length (8 + 28 + 90 = 126).
const E369_CYCLES: [f64; 3] = [8.0, 28.0, 90.0];

/// Builds the token/owner map from enumerated owners, excluding burn and
/// zero addresses.
///
/// Duplicate token claims are resolved last-seen-wins inside the map and
/// surfaced through [`TokenOwnerMap::duplicate_assignments`].
#[must_use]
pub fn build_token_owner_map(owners: &[OwnerRecord], burn_address: Address) -> TokenOwnerMap {
    let mut map = TokenOwnerMap::new();

    for record in owners {
        if record.owner_address.is_zero() || record.owner_address == burn_address {
            continue;
        }
        for balance in &record.token_balances {
            if balance.balance > 0 {
                map.assign(balance.token_id, record.owner_address);
            }
        }
    }

    map
}

/// Aggregates holder summaries from the run's lookups.
///
/// `tiers` maps token id → resolved tier; tokens absent from it were lookup
/// failures and are skipped. `rewards` maps wallet → claimable wei; absent
/// wallets default to zero (the run already logged the failure).
///
/// Ranks and percentages are assigned by [`rank_holders`] before return.
#[must_use]
pub fn aggregate_holders(
    descriptor: &ContractDescriptor,
    map: &TokenOwnerMap,
    tiers: &AHashMap<u64, u8>,
    rewards: &AHashMap<Address, u128>,
) -> Vec<HolderSummary> {
    let mut holders: Vec<HolderSummary> = Vec::with_capacity(map.owner_count());

    for (owner, tokens) in map.iter_owners() {
        let mut tier_counts: BTreeMap<u8, u64> = BTreeMap::new();
        let mut multiplier_sum = 0u64;
        let mut total = 0u64;

        for token_id in tokens {
            let Some(tier) = tiers.get(token_id) else {
                continue;
            };
            *tier_counts.entry(*tier).or_insert(0) += 1;
            multiplier_sum += descriptor.multiplier_for(*tier);
            total += 1;
        }

        if total == 0 {
            continue;
        }

        let claimable_wei = rewards.get(owner).copied().unwrap_or(0);
        let claimable_rewards = claimable_wei as f64 / WEI_PER_TOKEN;

        holders.push(HolderSummary {
            wallet: *owner,
            total,
            tiers: tier_counts,
            multiplier_sum,
            claimable_rewards,
            percentage: 0.0,
            rank: 0,
            extras: extras_for(descriptor, multiplier_sum, claimable_rewards),
        });
    }

    let multiplier_pool: u64 = holders.iter().map(|h| h.multiplier_sum).sum();
    rank_holders(&mut holders, multiplier_pool);

    debug!(
        contract = %descriptor.key,
        holders = holders.len(),
        multiplier_pool,
        "holder aggregation complete"
    );

    holders
}

/// Per-protocol extension fields.
///
/// Element 280 and Stax expose share-style totals; Element 369's pending
/// pools are apportioned by payout cycle length because the distilled
/// per-cycle vault accounting is not queried here; Flux carries its reward
/// pool verbatim.
fn extras_for(
    descriptor: &ContractDescriptor,
    multiplier_sum: u64,
    claimable_rewards: f64,
) -> HolderExtras {
    let mut extras = HolderExtras::default();

    match descriptor.key {
        ContractKey::Element280 => {
            extras.shares = Some(u128::from(multiplier_sum));
            extras.e280_rewards = Some(claimable_rewards);
        }
        ContractKey::Element369 => {
            let cycle_total: f64 = E369_CYCLES.iter().sum();
            extras.pending_day8 = Some(claimable_rewards * E369_CYCLES[0] / cycle_total);
            extras.pending_day28 = Some(claimable_rewards * E369_CYCLES[1] / cycle_total);
            extras.pending_day90 = Some(claimable_rewards * E369_CYCLES[2] / cycle_total);
            extras.inferno_rewards = Some(claimable_rewards);
        }
        ContractKey::Stax => {
            extras.shares = Some(u128::from(multiplier_sum));
        }
        ContractKey::Flux => {
            extras.flux_rewards = Some(claimable_rewards);
        }
    }

    extras
}

/// Sorts holders by the protocol's primary metric and assigns dense 1-based
/// ranks and reward-share percentages.
///
/// Sort key: `multiplier_sum` descending, ties broken by token count
/// descending, then wallet ascending so ordering is fully deterministic.
pub fn rank_holders(holders: &mut [HolderSummary], multiplier_pool: u64) {
    holders.sort_by(|a, b| {
        b.multiplier_sum
            .cmp(&a.multiplier_sum)
            .then_with(|| b.total.cmp(&a.total))
            .then_with(|| a.wallet.cmp(&b.wallet))
    });

    for (index, holder) in holders.iter_mut().enumerate() {
        holder.rank = index as u32 + 1;
        holder.percentage = if multiplier_pool == 0 {
            0.0
        } else {
            holder.multiplier_sum as f64 / multiplier_pool as f64 * 100.0
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::types::TokenBalance;
    use std::sync::Arc;

    fn addr(n: u8) -> Address {
        let mut bytes = [0u8; 20];
        bytes[19] = n;
        Address(bytes)
    }

    fn descriptor() -> Arc<ContractDescriptor> {
        AppConfig::default().registry().unwrap().get(ContractKey::Element280).unwrap()
    }

    fn owner(addr: Address, tokens: &[u64]) -> OwnerRecord {
        OwnerRecord {
            owner_address: addr,
            token_balances: tokens
                .iter()
                .map(|id| TokenBalance { token_id: *id, balance: 1 })
                .collect(),
        }
    }

    #[test]
    fn test_build_map_excludes_burn_and_zero() {
        let alice = addr(0xa1);
        let owners = vec![
            owner(alice, &[1, 2]),
            owner(Address::DEAD, &[3]),
            owner(Address::ZERO, &[4]),
        ];

        let map = build_token_owner_map(&owners, Address::DEAD);

        assert_eq!(map.token_count(), 2);
        assert_eq!(map.owner_count(), 1);
        assert_eq!(map.owner_of(1), Some(alice));
        assert_eq!(map.owner_of(3), None);
    }

    #[test]
    fn test_concrete_filtering_scenario() {
        // Owner enumerator output: 0xA holds tokens 1,2; the burn address
        // holds token 3. After filtering only tokens 1,2 remain, owned by
        // 0xa, and that holder's total is 2.
        let alice: Address = "0x00000000000000000000000000000000000000aa".try_into().unwrap();
        let owners = vec![owner(alice, &[1, 2]), owner(Address::DEAD, &[3])];

        let map = build_token_owner_map(&owners, Address::DEAD);
        assert_eq!(map.token_count(), 2);
        assert_eq!(map.tokens_of(&alice).map(<[u64]>::len), Some(2));

        let descriptor = descriptor();
        let tiers: AHashMap<u64, u8> = [(1u64, 1u8), (2, 1)].into_iter().collect();
        let rewards = AHashMap::new();

        let holders = aggregate_holders(&descriptor, &map, &tiers, &rewards);
        assert_eq!(holders.len(), 1);
        assert_eq!(holders[0].wallet, alice);
        assert_eq!(holders[0].total, 2);
    }

    #[test]
    fn test_failed_tier_lookup_excluded_from_aggregation() {
        let alice = addr(0xa1);
        let map = build_token_owner_map(&[owner(alice, &[1, 2, 3])], Address::DEAD);

        // Token 3's tier lookup failed — it is absent from the tier map.
        let tiers: AHashMap<u64, u8> = [(1u64, 1u8), (2, 2)].into_iter().collect();
        let holders = aggregate_holders(&descriptor(), &map, &tiers, &AHashMap::new());

        assert_eq!(holders[0].total, 2);
        assert_eq!(holders[0].tier_sum(), 2);
    }

    #[test]
    fn test_wallet_with_no_resolved_tiers_dropped() {
        let alice = addr(0xa1);
        let map = build_token_owner_map(&[owner(alice, &[9])], Address::DEAD);

        let holders = aggregate_holders(&descriptor(), &map, &AHashMap::new(), &AHashMap::new());
        assert!(holders.is_empty());
    }

    #[test]
    fn test_tier_sum_invariant_holds() {
        let map = build_token_owner_map(
            &[owner(addr(1), &[1, 2, 3]), owner(addr(2), &[4, 5])],
            Address::DEAD,
        );
        let tiers: AHashMap<u64, u8> =
            [(1u64, 1u8), (2, 2), (3, 6), (4, 1), (5, 3)].into_iter().collect();

        let holders = aggregate_holders(&descriptor(), &map, &tiers, &AHashMap::new());
        for holder in &holders {
            assert_eq!(holder.tier_sum(), holder.total);
        }
    }

    #[test]
    fn test_ranking_dense_with_tie_break() {
        let mut holders = vec![
            HolderSummary {
                wallet: addr(1),
                total: 1,
                tiers: BTreeMap::from([(1, 1)]),
                multiplier_sum: 10,
                claimable_rewards: 0.0,
                percentage: 0.0,
                rank: 0,
                extras: HolderExtras::default(),
            },
            HolderSummary {
                wallet: addr(2),
                total: 3,
                tiers: BTreeMap::from([(1, 3)]),
                multiplier_sum: 10,
                claimable_rewards: 0.0,
                percentage: 0.0,
                rank: 0,
                extras: HolderExtras::default(),
            },
            HolderSummary {
                wallet: addr(3),
                total: 1,
                tiers: BTreeMap::from([(2, 1)]),
                multiplier_sum: 40,
                claimable_rewards: 0.0,
                percentage: 0.0,
                rank: 0,
                extras: HolderExtras::default(),
            },
        ];

        rank_holders(&mut holders, 60);

        // Highest multiplier first; the 10/10 tie breaks by token count.
        assert_eq!(holders[0].wallet, addr(3));
        assert_eq!(holders[1].wallet, addr(2));
        assert_eq!(holders[2].wallet, addr(1));
        assert_eq!(
            holders.iter().map(|h| h.rank).collect::<Vec<_>>(),
            vec![1, 2, 3],
            "ranks must be dense and 1-based"
        );

        assert!((holders[0].percentage - 40.0 / 60.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_rewards_default_to_zero() {
        let alice = addr(0xa1);
        let bob = addr(0xb2);
        let map =
            build_token_owner_map(&[owner(alice, &[1]), owner(bob, &[2])], Address::DEAD);
        let tiers: AHashMap<u64, u8> = [(1u64, 1u8), (2, 1)].into_iter().collect();
        let rewards: AHashMap<Address, u128> =
            [(alice, 2_000_000_000_000_000_000u128)].into_iter().collect();

        let holders = aggregate_holders(&descriptor(), &map, &tiers, &rewards);

        let alice_holder = holders.iter().find(|h| h.wallet == alice).unwrap();
        let bob_holder = holders.iter().find(|h| h.wallet == bob).unwrap();
        assert!((alice_holder.claimable_rewards - 2.0).abs() < 1e-9);
        assert_eq!(bob_holder.claimable_rewards, 0.0);
    }

    #[test]
    fn test_e369_pending_pools_weighted_by_cycle() {
        let registry = AppConfig::default().registry().unwrap();
        let descriptor = registry.get(ContractKey::Element369).unwrap();
        let map = build_token_owner_map(&[owner(addr(1), &[1])], Address::DEAD);
        let tiers: AHashMap<u64, u8> = [(1u64, 1u8)].into_iter().collect();
        let rewards: AHashMap<Address, u128> =
            [(addr(1), 126_000_000_000_000_000_000u128)].into_iter().collect();

        let holders = aggregate_holders(&descriptor, &map, &tiers, &rewards);
        let extras = &holders[0].extras;

        assert!((extras.pending_day8.unwrap() - 8.0).abs() < 1e-6);
        assert!((extras.pending_day28.unwrap() - 28.0).abs() < 1e-6);
        assert!((extras.pending_day90.unwrap() - 90.0).abs() < 1e-6);
    }
}
