//! Randomized actor factory: creates stakers and operators holding a random non-empty subset of strategies with random
//! balances, all drawn from one seeded generator.
//!
//! # Determinism
//! Every draw comes from `StdRng::seed_from_u64(seed)`, so a scenario replays byte-for-byte from its seed. The sequence
//! counter only names actors; identities are hashes of (seed, sequence).

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::core::actor::{Actor, ActorId, Role};
use crate::core::ledger::{Ledger, LedgerError};
use crate::core::shares::VALIDATOR_BALANCE_WEI;
use crate::core::strategy::{Strategy, StrategyRegistry};
use crate::core::Harness;
use crate::error::{HarnessError, Result};

/// Number of `k`-element subsets of an `n`-element set.
fn binomial(n: usize, k: usize) -> f64 {
    let k = k.min(n - k);
    (0..k).fold(1.0, |acc, i| acc * (n - i) as f64 / (i + 1) as f64)
}

/// Uniform sampler over the non-empty subsets of `0..n`.
#[derive(Debug, Clone)]
pub struct SubsetSampler {
    n: usize,
    sizes: WeightedIndex<f64>,
}

impl SubsetSampler {
    pub fn new(n: usize) -> Result<Self> {
        if n == 0 {
            return Err(HarnessError::Domain("cannot sample a non-empty subset of an empty set".to_string()));
        }
        // a subset of size k is drawn with probability C(n, k) / (2^n - 1)
        let weights: Vec<f64> = (1..=n).map(|k| binomial(n, k)).collect();
        let sizes = WeightedIndex::new(&weights)
            .map_err(|e| HarnessError::Domain(format!("subset size weights: {}", e)))?;
        Ok(Self { n, sizes })
    }

    /// Sorted indices of a non-empty subset.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<usize> {
        let size = self.sizes.sample(rng) + 1;
        let mut picked = index::sample(rng, self.n, size).into_vec();
        picked.sort_unstable();
        picked
    }
}

#[derive(Debug, Clone)]
pub struct ActorFactory {
    rng: StdRng,
    seed: u64,
    sequence: u64,
}

impl ActorFactory {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            seed,
            sequence: 0,
        }
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Actors created so far.
    pub fn created(&self) -> u64 {
        self.sequence
    }

    fn next_identity(&mut self, role: Role) -> (ActorId, String) {
        let sequence = self.sequence;
        self.sequence += 1;
        let mut hasher = Sha256::new();
        hasher.update(b"restake-harness/actor");
        hasher.update(self.seed.to_be_bytes());
        hasher.update(sequence.to_be_bytes());
        let digest = hasher.finalize();
        (format!("0x{}", hex::encode(&digest[..20])), format!("{}{}", role, sequence))
    }

    /// Random non-empty subset of the registry, in registry order.
    pub fn random_strategies(&mut self, registry: &StrategyRegistry) -> Result<Vec<Strategy>> {
        let sampler = SubsetSampler::new(registry.len())?;
        Ok(sampler
            .sample(&mut self.rng)
            .into_iter()
            .filter_map(|i| registry.get(i).cloned())
            .collect())
    }

    fn random_balance<L: Ledger>(&mut self, harness: &Harness<L>, strategy: &Strategy) -> u128 {
        let config = harness.config();
        match strategy {
            Strategy::Fungible(_) => self
                .rng
                .gen_range(config.min_token_balance..=config.max_token_balance) as u128,
            Strategy::NativeStake => {
                let count = self.rng.gen_range(1..=config.max_validators);
                count as u128 * VALIDATOR_BALANCE_WEI
            }
        }
    }

    /// Creates an actor and funds it with `balances` of `strategies` underlying (ETH for native stake).
    pub fn new_actor_with<L: Ledger>(
        &mut self,
        harness: &mut Harness<L>,
        role: Role,
        strategies: &[Strategy],
        balances: &[u128],
    ) -> Result<Actor> {
        if strategies.len() != balances.len() {
            return Err(HarnessError::Domain(format!(
                "{} strategies paired with {} balances",
                strategies.len(),
                balances.len()
            )));
        }
        let (id, name) = self.next_identity(role);
        let mut actor = Actor::new(id, role, name);
        for (strategy, balance) in strategies.iter().zip(balances) {
            match strategy {
                Strategy::Fungible(token) => harness.ledger_mut().mint(&actor.id, token, *balance)?,
                Strategy::NativeStake => {
                    if *balance % VALIDATOR_BALANCE_WEI != 0 {
                        return Err(HarnessError::Domain(format!(
                            "native balance {} is not a whole number of validators",
                            balance
                        )));
                    }
                    harness.ledger_mut().deal_eth(&actor.id, *balance)?;
                    actor.has_pod = true;
                }
            }
        }
        verify_funding(harness, &actor, strategies, balances)?;
        info!(actor = %actor, role = %role, strategies = strategies.len(), "actor created");
        Ok(actor)
    }

    fn new_random_actor<L: Ledger>(&mut self, harness: &mut Harness<L>, role: Role) -> Result<(Actor, Vec<Strategy>, Vec<u128>)> {
        let strategies = self.random_strategies(harness.registry())?;
        let mut balances = Vec::with_capacity(strategies.len());
        for strategy in &strategies {
            balances.push(self.random_balance(harness, strategy));
        }
        let actor = self.new_actor_with(harness, role, &strategies, &balances)?;
        Ok((actor, strategies, balances))
    }

    /// A funded staker with a random strategy subset; nothing deposited.
    pub fn new_random_staker<L: Ledger>(&mut self, harness: &mut Harness<L>) -> Result<(Actor, Vec<Strategy>, Vec<u128>)> {
        self.new_random_actor(harness, Role::Staker)
    }

    /// A registered operator that has deposited its whole random assignment. The deposit is checked against the
    /// engine: operator and staker shares both grow by the converted amounts.
    pub fn new_random_operator<L: Ledger>(
        &mut self,
        harness: &mut Harness<L>,
    ) -> Result<(Actor, Vec<Strategy>, Vec<u128>)> {
        let (mut actor, strategies, balances) = self.new_random_actor(harness, Role::Operator)?;
        harness.step("register operator", |ledger| ledger.register_operator(&actor.id))?;

        let expected = {
            let query = harness.query();
            strategies
                .iter()
                .zip(&balances)
                .map(|(s, b)| query.underlying_to_shares(s, *b))
                .collect::<Result<Vec<_>>>()?
        };
        deposit_all(harness, &mut actor, &strategies, &balances)?;
        harness.assert_snap_added_operator_shares(&actor.id, &strategies, &expected, "operator deposit")?;
        let deltas = expected
            .iter()
            .map(|e| i128::try_from(*e).map_err(|_| HarnessError::Domain(format!("{} exceeds signed range", e))))
            .collect::<Result<Vec<_>>>()?;
        harness.assert_snap_moved_staker_shares(&actor.id, &strategies, &deltas, "operator deposit")?;
        Ok((actor, strategies, balances))
    }
}

/// Measured balances must equal the assignment within tolerance, and native balances must cover exactly the assigned
/// number of validators.
fn verify_funding<L: Ledger>(
    harness: &Harness<L>,
    actor: &Actor,
    strategies: &[Strategy],
    balances: &[u128],
) -> Result<()> {
    let label = "actor funding";
    harness.assert_has_underlying_token_balances(&actor.id, strategies, balances, label)?;
    let query = harness.query();
    for (strategy, assigned) in strategies.iter().zip(balances) {
        if strategy.is_native() {
            let measured = query.token_balance(&actor.id, strategy);
            if measured / VALIDATOR_BALANCE_WEI != assigned / VALIDATOR_BALANCE_WEI {
                return Err(HarnessError::violation(
                    label,
                    &actor.id,
                    format!("{} validators", assigned / VALIDATOR_BALANCE_WEI),
                    format!("{} validators", measured / VALIDATOR_BALANCE_WEI),
                ));
            }
        }
    }
    Ok(())
}

/// Deposits every balance into its strategy as one harness step and refreshes the actor's validator list. Returns the
/// shares credited per strategy.
pub fn deposit_all<L: Ledger>(
    harness: &mut Harness<L>,
    actor: &mut Actor,
    strategies: &[Strategy],
    balances: &[u128],
) -> Result<Vec<u128>> {
    if strategies.len() != balances.len() {
        return Err(HarnessError::Domain(format!(
            "{} strategies paired with {} balances",
            strategies.len(),
            balances.len()
        )));
    }
    let staker = actor.id.clone();
    let shares = harness.step("deposit", |ledger| {
        strategies
            .iter()
            .zip(balances)
            .map(|(s, amount)| ledger.deposit(&staker, s, *amount))
            .collect::<std::result::Result<Vec<_>, LedgerError>>()
    })?;
    if strategies.iter().any(Strategy::is_native) {
        actor.has_pod = true;
        actor.validators = harness.ledger().pod_validators(&staker);
    }
    Ok(shares)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_subsets_are_non_empty_and_in_range() {
        let sampler = SubsetSampler::new(4).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..200 {
            let subset = sampler.sample(&mut rng);
            assert!(!subset.is_empty());
            assert!(subset.iter().all(|i| *i < 4));
            assert!(subset.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn test_every_subset_reachable() {
        let sampler = SubsetSampler::new(3).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let seen: HashSet<Vec<usize>> = (0..500).map(|_| sampler.sample(&mut rng)).collect();
        assert_eq!(seen.len(), 7);
    }

    #[test]
    fn test_empty_set_rejected() {
        assert!(matches!(SubsetSampler::new(0), Err(HarnessError::Domain(_))));
    }

    #[test]
    fn test_binomial() {
        assert_eq!(binomial(4, 2), 6.0);
        assert_eq!(binomial(5, 0), 1.0);
        assert_eq!(binomial(5, 5), 1.0);
    }

    #[test]
    fn test_identities_are_seeded() {
        let mut a = ActorFactory::new(9);
        let mut b = ActorFactory::new(9);
        let mut c = ActorFactory::new(10);
        let first = a.next_identity(Role::Staker);
        assert_eq!(first, b.next_identity(Role::Staker));
        assert_ne!(first.0, c.next_identity(Role::Staker).0);
        assert_eq!(first.1, "staker0");
        assert_ne!(a.next_identity(Role::Staker).0, first.0);
    }
}
