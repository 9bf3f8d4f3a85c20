//! Seeded randomized lifecycle scenarios. Every action runs as one harness step followed by its composite check; the
//! first failure aborts the scenario with the step number and name attached.

use anyhow::Context;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeMap;
use tracing::info;

use crate::core::actor::{Actor, ActorId, Role, ValidatorId};
use crate::core::checkpoint::CheckpointModel;
use crate::core::factory::{deposit_all, ActorFactory};
use crate::core::ledger::{Gwei, Ledger};
use crate::core::shares::{signed_gwei_to_wei, GWEI_TO_WEI, VALIDATOR_BALANCE_GWEI, VALIDATOR_BALANCE_WEI};
use crate::core::strategy::Strategy;
use crate::core::withdrawal::{Withdrawal, WithdrawalQueue, WithdrawalStatus};
use crate::core::Harness;
use crate::error::Result;

/// What a scenario run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScenarioReport {
    pub seed: u64,
    pub steps: usize,
    pub actors: u64,
    pub withdrawals_completed: usize,
    pub checkpoints_completed: usize,
}

pub struct Scenario<L: Ledger> {
    harness: Harness<L>,
    factory: ActorFactory,
    steps: usize,
    withdrawals_completed: usize,
    checkpoints_completed: usize,
    withdrawals: WithdrawalQueue,
    /// Restaked balance per validator as last credited, tracked on the harness side.
    restaked: BTreeMap<ValidatorId, Gwei>,
}

impl<L: Ledger> Scenario<L> {
    pub fn new(harness: Harness<L>) -> Self {
        let factory = ActorFactory::new(harness.config().seed);
        Self {
            harness,
            factory,
            steps: 0,
            withdrawals_completed: 0,
            checkpoints_completed: 0,
            withdrawals: WithdrawalQueue::new(),
            restaked: BTreeMap::new(),
        }
    }

    pub fn harness(&self) -> &Harness<L> {
        &self.harness
    }

    pub fn harness_mut(&mut self) -> &mut Harness<L> {
        &mut self.harness
    }

    /// Every withdrawal this scenario queued, with its ledger-side status.
    pub fn withdrawals(&self) -> &WithdrawalQueue {
        &self.withdrawals
    }

    pub fn into_harness(self) -> Harness<L> {
        self.harness
    }

    pub fn report(&self) -> ScenarioReport {
        ScenarioReport {
            seed: self.harness.config().seed,
            steps: self.steps,
            actors: self.factory.created(),
            withdrawals_completed: self.withdrawals_completed,
            checkpoints_completed: self.checkpoints_completed,
        }
    }

    fn run_step<T>(
        &mut self,
        name: &str,
        action: impl FnOnce(&mut Harness<L>, &mut ActorFactory) -> Result<T>,
    ) -> anyhow::Result<T> {
        self.steps += 1;
        let step = self.steps;
        info!(step, name, "scenario step");
        action(&mut self.harness, &mut self.factory).with_context(|| format!("step {} ({})", step, name))
    }

    fn track_validators(&mut self, actor: &Actor) {
        for id in &actor.validators {
            self.restaked.entry(*id).or_insert(VALIDATOR_BALANCE_GWEI);
        }
    }

    pub fn new_operator(&mut self) -> anyhow::Result<Actor> {
        let (operator, _, _) = self.run_step("create operator", |h, f| f.new_random_operator(h))?;
        self.track_validators(&operator);
        Ok(operator)
    }

    /// A funded staker delegated to `operator` with its whole assignment deposited.
    pub fn new_delegated_staker(&mut self, operator: &ActorId) -> anyhow::Result<(Actor, Vec<Strategy>)> {
        let (mut staker, strategies, balances) = self.run_step("create staker", |h, f| f.new_random_staker(h))?;
        self.delegate(&staker.id, operator, &strategies)?;
        self.deposit(&mut staker, &strategies, &balances)?;
        Ok((staker, strategies))
    }

    pub fn delegate(&mut self, staker: &ActorId, operator: &ActorId, strategies: &[Strategy]) -> anyhow::Result<()> {
        self.run_step("delegate", |h, _| {
            h.step("delegate", |l| l.delegate(staker, operator))?;
            h.check_delegation_state(staker, operator, strategies)
        })
    }

    pub fn deposit(&mut self, staker: &mut Actor, strategies: &[Strategy], balances: &[u128]) -> anyhow::Result<Vec<u128>> {
        let shares = self.run_step("deposit", |h, _| {
            let shares = deposit_all(h, staker, strategies, balances)?;
            h.check_deposit_state(&staker.id, strategies, balances, &shares)?;
            Ok(shares)
        })?;
        self.track_validators(staker);
        Ok(shares)
    }

    pub fn queue_withdrawal(&mut self, staker: &ActorId, strategies: &[Strategy], shares: &[u128]) -> anyhow::Result<Withdrawal> {
        let withdrawal = self.run_step("queue withdrawal", |h, _| {
            let withdrawal = h.step("queue withdrawal", |l| l.queue_withdrawal(staker, strategies, shares))?;
            h.check_queued_withdrawal_state(staker, strategies, shares, std::slice::from_ref(&withdrawal))?;
            Ok(withdrawal)
        })?;
        self.withdrawals.track(withdrawal.clone());
        Ok(withdrawal)
    }

    pub fn complete_withdrawal(&mut self, withdrawal: &Withdrawal, as_tokens: bool) -> anyhow::Result<()> {
        let name = if as_tokens { "complete as tokens" } else { "complete as shares" };
        let root = self.withdrawals.track(withdrawal.clone());
        self.harness.advance_to_completable(std::slice::from_ref(withdrawal));
        let status = self.withdrawals.status(&self.harness.query(), &root);
        anyhow::ensure!(
            status == Some(WithdrawalStatus::Completable),
            "withdrawal {} is {:?} after advancing past its delay",
            root,
            status
        );

        self.run_step(name, |h, _| {
            if as_tokens {
                let tokens = h.expected_tokens_on_completion(withdrawal)?;
                h.step(name, |l| l.complete_withdrawal(&root, true))?;
                h.check_withdrawal_as_tokens_state(withdrawal, &tokens)
            } else {
                h.step(name, |l| l.complete_withdrawal(&root, false))?;
                h.check_withdrawal_as_shares_state(withdrawal)
            }
        })?;

        let status = self.withdrawals.status(&self.harness.query(), &root);
        anyhow::ensure!(
            status == Some(WithdrawalStatus::Completed),
            "withdrawal {} is {:?} after completion",
            root,
            status
        );
        self.withdrawals_completed += 1;
        Ok(())
    }

    pub fn undelegate(&mut self, staker: &ActorId, operator: &ActorId) -> anyhow::Result<Vec<Withdrawal>> {
        let withdrawals = self.run_step("undelegate", |h, _| {
            let withdrawals = h.step("undelegate", |l| l.undelegate(staker))?;
            h.check_undelegation_state(staker, operator, &withdrawals)?;
            Ok(withdrawals)
        })?;
        for withdrawal in &withdrawals {
            self.withdrawals.track(withdrawal.clone());
        }
        Ok(withdrawals)
    }

    /// Starts a checkpoint for `owner` and proves every active validator at its current beacon balance, checking the
    /// harness-side checkpoint model against the ledger after each proof.
    pub fn checkpoint_cycle(&mut self, owner: &Actor) -> anyhow::Result<()> {
        self.run_step("start checkpoint", |h, _| {
            h.step("start checkpoint", |l| l.start_checkpoint(&owner.id))?;
            h.check_start_checkpoint_state(&owner.id)
        })?;

        let mut model = CheckpointModel::from_ledger(&self.harness.query(), &owner.id);
        let pending: Vec<ValidatorId> = owner
            .validators
            .iter()
            .copied()
            .filter(|id| self.restaked.get(id).copied().unwrap_or(0) > 0)
            .collect();
        for id in pending {
            let previous = self.restaked.get(&id).copied().unwrap_or(0);
            let proof = self
                .harness
                .ledger()
                .balance_proof(id)
                .with_context(|| format!("balance proof for validator {}", id))?;
            let outcome = model.prove(previous, proof.balance_gwei)?;
            self.restaked.insert(id, proof.balance_gwei);

            self.run_step("balance proof", |h, _| {
                h.step("balance proof", |l| l.submit_balance_proof(&owner.id, &proof))?;
                if outcome.exited_gwei > 0 {
                    h.check_exit_proofs_state(&owner.id, &[proof.pubkey_hash], outcome.exited_gwei)?;
                }
                match outcome.finalized {
                    Some(done) => h.check_completed_checkpoint_state(&owner.id, signed_gwei_to_wei(done.share_delta_gwei)),
                    None => h.check_balance_proof_state(&owner.id),
                }
            })?;
        }
        if model.is_active() {
            anyhow::bail!("checkpoint for {} still active after proving every validator", owner.id);
        }
        self.checkpoints_completed += 1;
        Ok(())
    }

    /// Deposit, delegate, queue a random part of every position, and complete each withdrawal as tokens or shares.
    pub fn run_lifecycle(&mut self, stakers: usize) -> anyhow::Result<ScenarioReport> {
        let operator = self.new_operator()?;
        let mut everyone = vec![operator.id.clone()];
        let mut last_staker = None;

        for _ in 0..stakers {
            let (staker, strategies) = self.new_delegated_staker(&operator.id)?;
            everyone.push(staker.id.clone());
            let registry = self.harness.registry().strategies().to_vec();
            self.run_step("operator share sum", |h, _| {
                h.assert_operator_shares_match_delegators(&operator.id, &everyone, &registry, "operator share sum")
            })?;

            let fungible: Vec<Strategy> = strategies.iter().filter(|s| !s.is_native()).cloned().collect();
            if !fungible.is_empty() {
                let held = self.harness.query().staker_shares_all(&staker.id, &fungible)?;
                let amounts: Vec<u128> = held.iter().map(|h| self.factory.rng().gen_range(1..=*h)).collect();
                let withdrawal = self.queue_withdrawal(&staker.id, &fungible, &amounts)?;
                let as_tokens = self.factory.rng().gen_bool(0.5);
                self.complete_withdrawal(&withdrawal, as_tokens)?;
            }
            if strategies.contains(&Strategy::NativeStake) {
                let held = self.harness.query().staker_shares(&staker.id, &Strategy::NativeStake)?;
                let withdrawal = self.queue_withdrawal(&staker.id, &[Strategy::NativeStake], &[held])?;
                // no checkpoint has credited withdrawable ETH yet, so native shares return as shares
                self.complete_withdrawal(&withdrawal, false)?;
            }
            last_staker = Some(staker);
        }

        if let Some(staker) = last_staker {
            let withdrawals = self.undelegate(&staker.id, &operator.id)?;
            for withdrawal in &withdrawals {
                self.complete_withdrawal(withdrawal, false)?;
            }
        }
        Ok(self.report())
    }

    /// Native stake through rewards, a checkpoint, a voluntary exit and a final checkpoint that retires the exited
    /// validator; the freed ETH is then withdrawn.
    pub fn run_native_cycle(&mut self, epochs: u64) -> anyhow::Result<ScenarioReport> {
        let operator = self.new_operator()?;
        let count = {
            let max = self.harness.config().max_validators;
            self.factory.rng().gen_range(1..=max)
        };
        let strategies = vec![Strategy::NativeStake];
        let balances = vec![count as u128 * VALIDATOR_BALANCE_WEI];
        let mut staker = self.run_step("create native staker", |h, f| {
            f.new_actor_with(h, Role::Staker, &strategies, &balances)
        })?;
        self.delegate(&staker.id, &operator.id, &strategies)?;
        self.deposit(&mut staker, &strategies, &balances)?;

        for _ in 0..epochs {
            self.harness.ledger_mut().advance_epoch();
        }
        self.checkpoint_cycle(&staker)?;

        let exiting = match staker.validators.choose(self.factory.rng()) {
            Some(id) => *id,
            None => anyhow::bail!("native staker {} has no validators", staker.id),
        };
        self.run_step("exit validator", |h, _| {
            h.ledger_mut().exit_validators(&[exiting])?;
            h.ledger_mut().advance_epoch();
            Ok(())
        })?;
        self.checkpoint_cycle(&staker)?;

        let withdrawable = self.harness.query().withdrawable_gwei(&staker.id);
        let held = self.harness.query().staker_shares(&staker.id, &Strategy::NativeStake)?;
        let amount = held.min(u128::from(withdrawable) * GWEI_TO_WEI);
        if amount > 0 {
            let withdrawal = self.queue_withdrawal(&staker.id, &strategies, &[amount])?;
            self.complete_withdrawal(&withdrawal, true)?;
        }
        Ok(self.report())
    }

    /// A staker withdraws all native shares, then gets slashed. The checkpoint drives its shares negative; the operator
    /// loses nothing further. Completing the queued withdrawal repays the deficit before releasing ETH.
    pub fn run_slashing(&mut self) -> anyhow::Result<ScenarioReport> {
        let operator = self.new_operator()?;
        let strategies = vec![Strategy::NativeStake];
        let balances = vec![VALIDATOR_BALANCE_WEI];
        let mut staker = self.run_step("create native staker", |h, f| {
            f.new_actor_with(h, Role::Staker, &strategies, &balances)
        })?;
        self.delegate(&staker.id, &operator.id, &strategies)?;
        self.deposit(&mut staker, &strategies, &balances)?;

        let withdrawal = self.queue_withdrawal(&staker.id, &strategies, &[VALIDATOR_BALANCE_WEI])?;
        let validators = staker.validators.clone();
        self.run_step("slash", |h, _| {
            h.ledger_mut().slash_validators(&validators)?;
            h.ledger_mut().advance_epoch_no_rewards();
            Ok(())
        })?;
        self.checkpoint_cycle(&staker)?;
        self.complete_withdrawal(&withdrawal, true)?;
        Ok(self.report())
    }
}
