use proptest::prelude::*;
use restake_harness::sim::pool::Pool;
use restake_harness::*;
use restake_harness::Strategy;

proptest! {
    // Operator-visible change equals the change in the positive part of the staker's shares.
    #[test]
    fn test_delegatable_delta_tracks_positive_part(before in -1_000_000i128..1_000_000, after in -1_000_000i128..1_000_000) {
        let delta = delegatable_share_delta(before, after);
        let expected = delegatable_shares(after) as i128 - delegatable_shares(before) as i128;
        prop_assert_eq!(delta, expected);
    }

    // Summing deltas along any path telescopes to the end-to-end delta.
    #[test]
    fn test_delegatable_delta_telescopes(path in prop::collection::vec(-1_000i128..1_000, 2..12)) {
        let stepwise: i128 = path.windows(2).map(|w| delegatable_share_delta(w[0], w[1])).sum();
        let first = path[0];
        let last = path[path.len() - 1];
        prop_assert_eq!(stepwise, delegatable_share_delta(first, last));
    }

    #[test]
    fn test_within_tolerance_accepts_exactly_one_unit(previous in -1_000_000i128..1_000_000, delta in -1_000i128..1_000, error in -3i128..=3) {
        let current = previous + delta + error;
        prop_assert_eq!(within_tolerance(previous, delta, current, SHARE_TOLERANCE), error.abs() <= 1);
        prop_assert_eq!(within_tolerance(previous, delta, current, EXACT), error == 0);
    }

    #[test]
    fn test_gwei_wei_round_trip(gwei in any::<u32>()) {
        let gwei = u64::from(gwei);
        prop_assert_eq!(wei_to_gwei(gwei_to_wei(gwei)), gwei);
        prop_assert_eq!(signed_gwei_to_wei(-(gwei as i64)), -(gwei_to_wei(gwei) as i128));
    }

    // Without yield every deposit keeps the pool at one share per unit, so round trips are exact.
    #[test]
    fn test_pool_round_trip_at_unit_price(deposits in prop::collection::vec(1u128..1_000_000_000_000, 1..8)) {
        let mut pool = Pool::default();
        for amount in &deposits {
            let shares = pool.deposit(*amount).unwrap();
            prop_assert_eq!(shares, *amount);
        }
        let last = deposits[deposits.len() - 1];
        prop_assert_eq!(pool.withdraw(last).unwrap(), last);
    }

    // With yield the price moves, but a round trip never pays out more than was deposited.
    #[test]
    fn test_pool_round_trip_never_gains(seed in 1_000u128..1_000_000_000, yield_amount in 0u128..1_000_000_000, amount in 1_000_000_000u128..1_000_000_000_000) {
        let mut pool = Pool::default();
        pool.deposit(seed).unwrap();
        pool.add_yield(yield_amount);
        let shares = pool.deposit(amount).unwrap();
        let back = pool.withdraw(shares).unwrap();
        prop_assert!(back <= amount);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn test_deposit_checks_hold_for_any_amount(first in 1u128..1_000_000_000_000_000_000, second in 1u128..1_000_000_000_000_000_000) {
        let registry = StrategyRegistry::new(["stETH"], false);
        let config = HarnessConfig::default();
        let ledger = SimLedger::from_config(&registry, &config);
        let mut h = Harness::new(ledger, registry, config).unwrap();
        let strategy = Strategy::Fungible("stETH".to_string());
        let operator = "operator".to_string();
        h.step("register", |l| l.register_operator(&operator)).unwrap();

        for (name, amount) in [("alice", first), ("bob", second)] {
            let staker = name.to_string();
            h.ledger_mut().mint(&staker, &"stETH".to_string(), amount).unwrap();
            h.step("delegate", |l| l.delegate(&staker, &operator)).unwrap();
            let shares = h.step("deposit", |l| l.deposit(&staker, &strategy, amount)).unwrap();
            h.check_deposit_state(&staker, std::slice::from_ref(&strategy), &[amount], &[shares]).unwrap();
        }
        let stakers = vec!["alice".to_string(), "bob".to_string()];
        h.assert_operator_shares_match_delegators(&operator, &stakers, std::slice::from_ref(&strategy), "sum").unwrap();
    }
}
