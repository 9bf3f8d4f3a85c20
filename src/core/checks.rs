//! Composite post-action checks. Each runs right after the `Harness::step` that performed the action and compares the
//! present against the snapshot that step took.

use tracing::info;

use crate::core::actor::ActorId;
use crate::core::checkpoint::ValidatorStatus;
use crate::core::ledger::{Gwei, Ledger, PubkeyHash};
use crate::core::shares::delegatable_share_delta;
use crate::core::strategy::Strategy;
use crate::core::withdrawal::Withdrawal;
use crate::core::Harness;
use crate::error::{HarnessError, Result};

fn signed_all(values: &[u128]) -> Result<Vec<i128>> {
    values
        .iter()
        .map(|v| i128::try_from(*v).map_err(|_| HarnessError::Domain(format!("{} exceeds signed range", v))))
        .collect()
}

impl<L: Ledger> Harness<L> {
    /// Operator share deltas implied by staker share `deltas` applied since the last snapshot.
    pub fn operator_deltas_since_snapshot(
        &mut self,
        staker: &ActorId,
        strategies: &[Strategy],
        deltas: &[i128],
    ) -> Result<Vec<i128>> {
        let previous = self.with_previous(|past| past.signed_shares_all(staker, strategies))?;
        previous
            .iter()
            .zip(deltas)
            .map(|(before, delta)| {
                let after = before
                    .checked_add(*delta)
                    .ok_or_else(|| HarnessError::Domain(format!("share delta {} overflows", delta)))?;
                Ok(delegatable_share_delta(*before, after))
            })
            .collect()
    }

    /// Operator side of a staker share change: exact delegatable deltas if delegated.
    fn check_operator_follows(&mut self, staker: &ActorId, strategies: &[Strategy], deltas: &[i128], label: &str) -> Result<()> {
        if let Some(operator) = self.query().delegated_to(staker) {
            let operator_deltas = self.operator_deltas_since_snapshot(staker, strategies, deltas)?;
            self.assert_snap_delta_operator_shares(&operator, strategies, &operator_deltas, label)?;
        }
        Ok(())
    }

    /// Underlying expected from completing `withdrawal` as tokens, at the present share price. Native shares first
    /// pay down any deficit of the withdrawer and only the remainder leaves as ETH.
    pub fn expected_tokens_on_completion(&self, withdrawal: &Withdrawal) -> Result<Vec<u128>> {
        let query = self.query();
        withdrawal
            .strategies
            .iter()
            .zip(&withdrawal.shares)
            .map(|(s, shares)| match s {
                Strategy::NativeStake => {
                    let current = query.signed_shares(&withdrawal.withdrawer, s)?;
                    let deficit = if current < 0 { current.unsigned_abs() } else { 0 };
                    Ok(shares - deficit.min(*shares))
                }
                Strategy::Fungible(_) => query.shares_to_underlying(s, *shares),
            })
            .collect()
    }

    pub fn check_deposit_state(
        &mut self,
        staker: &ActorId,
        strategies: &[Strategy],
        balances: &[u128],
        shares: &[u128],
    ) -> Result<()> {
        let label = "deposit";
        let deltas = signed_all(shares)?;
        self.assert_snap_removed_token_balances(staker, strategies, balances, label)?;
        self.assert_snap_moved_staker_shares(staker, strategies, &deltas, label)?;
        self.assert_snap_added_total_shares(strategies, shares, label)?;
        self.check_operator_follows(staker, strategies, &deltas, label)?;
        if strategies.iter().any(Strategy::is_native) {
            let validators = self.ledger().pod_validators(staker);
            let started = self.with_previous(|past| Ok(past.ledger().pod_validators(staker).len()))?;
            let new: Vec<_> = validators[started.min(validators.len())..].to_vec();
            let hashes = self.ledger().pubkey_hashes(&new)?;
            self.check_validator_registration_state(staker, &hashes)?;
        }
        info!(staker = %staker, strategies = strategies.len(), "deposit checked");
        Ok(())
    }

    pub fn check_validator_registration_state(&mut self, owner: &ActorId, pubkey_hashes: &[PubkeyHash]) -> Result<()> {
        let label = "validator registration";
        self.assert_snap_added_active_validators(owner, pubkey_hashes.len() as u64, label)?;
        self.assert_snap_validator_transition(
            owner,
            pubkey_hashes,
            ValidatorStatus::Inactive,
            ValidatorStatus::Active,
            label,
        )
    }

    pub fn check_delegation_state(&mut self, staker: &ActorId, operator: &ActorId, strategies: &[Strategy]) -> Result<()> {
        let label = "delegation";
        self.assert_delegated_to(staker, Some(operator), label)?;
        let visible = {
            let query = self.query();
            strategies
                .iter()
                .map(|s| query.delegatable_shares(staker, s))
                .collect::<Result<Vec<_>>>()?
        };
        self.assert_snap_added_operator_shares(operator, strategies, &visible, label)?;
        self.assert_snap_unchanged_staker_shares(staker, strategies, label)?;
        self.assert_snap_unchanged_token_balances(staker, strategies, label)
    }

    pub fn check_queued_withdrawal_state(
        &mut self,
        staker: &ActorId,
        strategies: &[Strategy],
        shares: &[u128],
        withdrawals: &[Withdrawal],
    ) -> Result<()> {
        let label = "queue withdrawal";
        let deltas: Vec<i128> = signed_all(shares)?.into_iter().map(|s| -s).collect();
        self.assert_snap_moved_staker_shares(staker, strategies, &deltas, label)?;
        self.check_operator_follows(staker, strategies, &deltas, label)?;
        self.assert_snap_added_queued_withdrawals(staker, withdrawals.len() as u64, label)?;
        self.assert_withdrawals_pending(withdrawals, label)?;
        self.assert_snap_unchanged_token_balances(staker, strategies, label)?;
        self.assert_snap_unchanged_total_shares(strategies, label)
    }

    /// `tokens` is what the staker should receive, usually from `expected_tokens_on_completion` before the step.
    pub fn check_withdrawal_as_tokens_state(&mut self, withdrawal: &Withdrawal, tokens: &[u128]) -> Result<()> {
        let label = "complete withdrawal as tokens";
        let staker = &withdrawal.withdrawer;
        self.assert_snap_withdrawals_completed(std::slice::from_ref(withdrawal), label)?;
        self.assert_snap_added_token_balances(staker, &withdrawal.strategies, tokens, label)?;
        self.assert_snap_removed_total_shares(&withdrawal.strategies, &withdrawal.shares, label)?;
        let fungible: Vec<Strategy> = withdrawal
            .strategies
            .iter()
            .filter(|s| !s.is_native())
            .cloned()
            .collect();
        self.assert_snap_unchanged_staker_shares(staker, &fungible, label)?;
        if let Some(operator) = self.query().delegated_to(staker) {
            self.assert_snap_unchanged_operator_shares(&operator, &withdrawal.strategies, label)?;
        }
        Ok(())
    }

    pub fn check_withdrawal_as_shares_state(&mut self, withdrawal: &Withdrawal) -> Result<()> {
        let label = "complete withdrawal as shares";
        let staker = &withdrawal.withdrawer;
        let deltas = signed_all(&withdrawal.shares)?;
        self.assert_snap_withdrawals_completed(std::slice::from_ref(withdrawal), label)?;
        self.assert_snap_delta_staker_shares(staker, &withdrawal.strategies, &deltas, label)?;
        self.check_operator_follows(staker, &withdrawal.strategies, &deltas, label)?;
        self.assert_snap_unchanged_token_balances(staker, &withdrawal.strategies, label)?;
        self.assert_snap_unchanged_total_shares(&withdrawal.strategies, label)
    }

    /// Every share the staker held left the operator and sits in the returned withdrawals.
    pub fn check_undelegation_state(&mut self, staker: &ActorId, operator: &ActorId, withdrawals: &[Withdrawal]) -> Result<()> {
        let label = "undelegate";
        self.assert_delegated_to(staker, None, label)?;
        for withdrawal in withdrawals {
            if withdrawal.delegated_to.as_ref() != Some(operator) {
                return Err(HarnessError::violation(
                    label,
                    withdrawal.root(),
                    format!("delegated_to {}", operator),
                    format!("{:?}", withdrawal.delegated_to),
                ));
            }
            self.assert_snap_removed_operator_shares(operator, &withdrawal.strategies, &withdrawal.shares, label)?;
            let deltas: Vec<i128> = signed_all(&withdrawal.shares)?.into_iter().map(|s| -s).collect();
            self.assert_snap_moved_staker_shares(staker, &withdrawal.strategies, &deltas, label)?;
        }
        self.assert_has_no_delegatable_shares(staker, label)?;
        self.assert_snap_added_queued_withdrawals(staker, withdrawals.len() as u64, label)?;
        self.assert_withdrawals_pending(withdrawals, label)
    }

    /// For a pod with at least one active validator; an empty pod's checkpoint finalizes within the same step.
    pub fn check_start_checkpoint_state(&mut self, owner: &ActorId) -> Result<()> {
        let label = "start checkpoint";
        self.assert_snap_created_checkpoint(owner, label)?;
        self.assert_proofs_remaining_eq_active_validators(owner, label)?;
        self.assert_snap_unchanged_last_checkpoint(owner, label)?;
        self.assert_snap_unchanged_active_validators(owner, label)?;
        self.assert_snap_unchanged_staker_shares(owner, &[Strategy::NativeStake], label)
    }

    /// One balance proof accepted without closing the checkpoint.
    pub fn check_balance_proof_state(&mut self, owner: &ActorId) -> Result<()> {
        let label = "balance proof";
        self.assert_snap_removed_proofs_remaining(owner, 1, label)?;
        self.assert_snap_unchanged_checkpoint(owner, label)?;
        self.assert_snap_unchanged_staker_shares(owner, &[Strategy::NativeStake], label)
    }

    /// The checkpoint active at the snapshot closed: native shares moved by `share_delta_wei`, the operator by its
    /// delegatable part, and the checkpoint's pod balance became withdrawable.
    pub fn check_completed_checkpoint_state(&mut self, owner: &ActorId, share_delta_wei: i128) -> Result<()> {
        let label = "complete checkpoint";
        let credited = self.with_previous(|past| Ok(past.checkpoint(owner).pod_balance_gwei))?;
        self.assert_snap_removed_checkpoint(owner, label)?;
        self.assert_snap_updated_last_checkpoint(owner, label)?;
        self.assert_snap_added_withdrawable_gwei(owner, credited, label)?;
        let native = [Strategy::NativeStake];
        self.assert_snap_delta_staker_shares(owner, &native, &[share_delta_wei], label)?;
        self.check_operator_follows(owner, &native, &[share_delta_wei], label)
    }

    /// Exit proofs accepted for `exited`: each went Active to Withdrawn, the active count dropped, and the retired
    /// restaked balance was recorded under the checkpoint that processed it.
    pub fn check_exit_proofs_state(&mut self, owner: &ActorId, exited: &[PubkeyHash], exited_gwei: Gwei) -> Result<()> {
        let label = "exit proofs";
        self.assert_snap_validator_transition(owner, exited, ValidatorStatus::Active, ValidatorStatus::Withdrawn, label)?;
        self.assert_snap_removed_active_validators(owner, exited.len() as u64, label)?;
        self.assert_snap_added_balance_exited_gwei(owner, exited_gwei, label)
    }

    /// A slashed checkpoint closed: the exit proofs and the completed checkpoint both hold, with the operator change
    /// clamped by the delegatable share rule.
    pub fn check_slashing_state(
        &mut self,
        owner: &ActorId,
        slashed: &[PubkeyHash],
        exited_gwei: Gwei,
        share_delta_wei: i128,
    ) -> Result<()> {
        self.check_exit_proofs_state(owner, slashed, exited_gwei)?;
        self.check_completed_checkpoint_state(owner, share_delta_wei)
    }
}
