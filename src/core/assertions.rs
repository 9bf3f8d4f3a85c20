//! Differential assertion engine.
//!
//! Every `assert_snap_*` check reads a quantity now, reads the same quantity at the most recent snapshot, and requires
//! `current == previous + expected_delta` within a tolerance: `SHARE_TOLERANCE` (configurable) for share and balance
//! quantities, which absorbs one unit of integer rounding in share/underlying conversion, and `EXACT` for counts,
//! statuses, timestamps and signed share deltas. The `assert_*` checks without `snap` inspect the present only.
//!
//! A failing check logs the mismatch and returns `HarnessError::InvariantViolation` naming the check, the subject and
//! the expected and actual values.

use tracing::{debug, error};

use crate::core::actor::ActorId;
use crate::core::checkpoint::{exited_balance_lookup_timestamp, ValidatorStatus};
use crate::core::ledger::{Gwei, Ledger, PubkeyHash};
use crate::core::query::LedgerQuery;
use crate::core::shares::{delegatable_share_delta, within_tolerance, EXACT};
use crate::core::strategy::Strategy;
use crate::core::withdrawal::Withdrawal;
use crate::core::Harness;
use crate::error::{HarnessError, Result};

fn signed(value: u128) -> Result<i128> {
    i128::try_from(value).map_err(|_| HarnessError::Domain(format!("quantity {} exceeds signed range", value)))
}

fn signed_all(values: Vec<u128>) -> Result<Vec<i128>> {
    values.into_iter().map(signed).collect()
}

fn negated(amounts: &[u128]) -> Result<Vec<i128>> {
    amounts.iter().map(|a| signed(*a).map(|v| -v)).collect()
}

fn subjects(owner: &str, strategies: &[Strategy]) -> Vec<String> {
    strategies.iter().map(|s| format!("{}:{}", owner, s)).collect()
}

fn ensure_paired(label: &str, strategies: &[Strategy], amounts: usize) -> Result<()> {
    if strategies.len() != amounts {
        return Err(HarnessError::Domain(format!(
            "{}: {} strategies paired with {} amounts",
            label,
            strategies.len(),
            amounts
        )));
    }
    Ok(())
}

/// Compares one quantity against `previous + delta`.
fn compare(label: &str, subject: &str, previous: i128, delta: i128, current: i128, tolerance: u128) -> Result<()> {
    if within_tolerance(previous, delta, current, tolerance) {
        debug!(check = label, subject, previous, delta, current, "delta check passed");
        return Ok(());
    }
    let expected = previous
        .checked_add(delta)
        .map(|e| e.to_string())
        .unwrap_or_else(|| format!("{} + {} (overflow)", previous, delta));
    error!(check = label, subject, %expected, current, tolerance, "delta check failed");
    Err(HarnessError::violation(label, subject, expected, current))
}

fn require(label: &str, subject: &str, holds: bool, expected: impl ToString, actual: impl ToString) -> Result<()> {
    if holds {
        return Ok(());
    }
    let (expected, actual) = (expected.to_string(), actual.to_string());
    error!(check = label, subject, %expected, %actual, "state check failed");
    Err(HarnessError::violation(label, subject, expected, actual))
}

impl<L: Ledger> Harness<L> {
    /// Scalar differential check: `quantity(now) == quantity(last snapshot) + expected_delta` within `tolerance`.
    pub fn delta_check<Q>(
        &mut self,
        label: &str,
        subject: &str,
        quantity: Q,
        expected_delta: i128,
        tolerance: u128,
    ) -> Result<()>
    where
        Q: Fn(&LedgerQuery<'_, L>) -> Result<i128>,
    {
        let current = quantity(&self.query())?;
        let previous = self.with_previous(|past| quantity(&past))?;
        compare(label, subject, previous, expected_delta, current, tolerance)
    }

    /// Vector differential check; element `i` of the quantity is compared against `expected_deltas[i]`.
    pub fn delta_check_all<Q>(
        &mut self,
        label: &str,
        subjects: &[String],
        quantity: Q,
        expected_deltas: &[i128],
        tolerance: u128,
    ) -> Result<()>
    where
        Q: Fn(&LedgerQuery<'_, L>) -> Result<Vec<i128>>,
    {
        let current = quantity(&self.query())?;
        let previous = self.with_previous(|past| quantity(&past))?;
        if current.len() != expected_deltas.len() || previous.len() != expected_deltas.len() {
            return Err(HarnessError::Domain(format!(
                "{}: {} expected deltas for {} quantities",
                label,
                expected_deltas.len(),
                current.len()
            )));
        }
        for (i, delta) in expected_deltas.iter().enumerate() {
            let subject = subjects.get(i).map(String::as_str).unwrap_or("?");
            compare(label, subject, previous[i], *delta, current[i], tolerance)?;
        }
        Ok(())
    }

    // staker shares

    pub fn assert_snap_added_staker_shares(
        &mut self,
        staker: &ActorId,
        strategies: &[Strategy],
        added: &[u128],
        label: &str,
    ) -> Result<()> {
        ensure_paired(label, strategies, added.len())?;
        let deltas = added.iter().map(|a| signed(*a)).collect::<Result<Vec<_>>>()?;
        let tolerance = self.config().share_tolerance;
        self.delta_check_all(
            label,
            &subjects(staker, strategies),
            |q| signed_all(q.staker_shares_all(staker, strategies)?),
            &deltas,
            tolerance,
        )
    }

    pub fn assert_snap_removed_staker_shares(
        &mut self,
        staker: &ActorId,
        strategies: &[Strategy],
        removed: &[u128],
        label: &str,
    ) -> Result<()> {
        ensure_paired(label, strategies, removed.len())?;
        let deltas = negated(removed)?;
        let tolerance = self.config().share_tolerance;
        self.delta_check_all(
            label,
            &subjects(staker, strategies),
            |q| signed_all(q.staker_shares_all(staker, strategies)?),
            &deltas,
            tolerance,
        )
    }

    pub fn assert_snap_unchanged_staker_shares(
        &mut self,
        staker: &ActorId,
        strategies: &[Strategy],
        label: &str,
    ) -> Result<()> {
        let tolerance = self.config().share_tolerance;
        self.delta_check_all(
            label,
            &subjects(staker, strategies),
            |q| q.signed_shares_all(staker, strategies),
            &vec![0; strategies.len()],
            tolerance,
        )
    }

    /// Signed variant for native stake, where shares may go negative. Exact.
    pub fn assert_snap_delta_staker_shares(
        &mut self,
        staker: &ActorId,
        strategies: &[Strategy],
        deltas: &[i128],
        label: &str,
    ) -> Result<()> {
        ensure_paired(label, strategies, deltas.len())?;
        self.delta_check_all(
            label,
            &subjects(staker, strategies),
            |q| q.signed_shares_all(staker, strategies),
            deltas,
            EXACT,
        )
    }

    /// Mixed-strategy staker share change: fungible strategies through the non-negative read with the share tolerance,
    /// native stake through the signed read, exact.
    pub fn assert_snap_moved_staker_shares(
        &mut self,
        staker: &ActorId,
        strategies: &[Strategy],
        deltas: &[i128],
        label: &str,
    ) -> Result<()> {
        ensure_paired(label, strategies, deltas.len())?;
        let (native, fungible): (Vec<_>, Vec<_>) = strategies
            .iter()
            .cloned()
            .zip(deltas.iter().copied())
            .partition(|(s, _)| s.is_native());
        if !fungible.is_empty() {
            let (strategies, deltas): (Vec<Strategy>, Vec<i128>) = fungible.into_iter().unzip();
            let tolerance = self.config().share_tolerance;
            self.delta_check_all(
                label,
                &subjects(staker, &strategies),
                |q| signed_all(q.staker_shares_all(staker, &strategies)?),
                &deltas,
                tolerance,
            )?;
        }
        if !native.is_empty() {
            let (strategies, deltas): (Vec<Strategy>, Vec<i128>) = native.into_iter().unzip();
            self.assert_snap_delta_staker_shares(staker, &strategies, &deltas, label)?;
        }
        Ok(())
    }

    // operator shares

    pub fn assert_snap_added_operator_shares(
        &mut self,
        operator: &ActorId,
        strategies: &[Strategy],
        added: &[u128],
        label: &str,
    ) -> Result<()> {
        ensure_paired(label, strategies, added.len())?;
        let deltas = added.iter().map(|a| signed(*a)).collect::<Result<Vec<_>>>()?;
        let tolerance = self.config().share_tolerance;
        self.delta_check_all(
            label,
            &subjects(operator, strategies),
            |q| signed_all(q.operator_shares_all(operator, strategies)?),
            &deltas,
            tolerance,
        )
    }

    pub fn assert_snap_removed_operator_shares(
        &mut self,
        operator: &ActorId,
        strategies: &[Strategy],
        removed: &[u128],
        label: &str,
    ) -> Result<()> {
        ensure_paired(label, strategies, removed.len())?;
        let deltas = negated(removed)?;
        let tolerance = self.config().share_tolerance;
        self.delta_check_all(
            label,
            &subjects(operator, strategies),
            |q| signed_all(q.operator_shares_all(operator, strategies)?),
            &deltas,
            tolerance,
        )
    }

    pub fn assert_snap_unchanged_operator_shares(
        &mut self,
        operator: &ActorId,
        strategies: &[Strategy],
        label: &str,
    ) -> Result<()> {
        let tolerance = self.config().share_tolerance;
        self.delta_check_all(
            label,
            &subjects(operator, strategies),
            |q| signed_all(q.operator_shares_all(operator, strategies)?),
            &vec![0; strategies.len()],
            tolerance,
        )
    }

    pub fn assert_snap_delta_operator_shares(
        &mut self,
        operator: &ActorId,
        strategies: &[Strategy],
        deltas: &[i128],
        label: &str,
    ) -> Result<()> {
        ensure_paired(label, strategies, deltas.len())?;
        self.delta_check_all(
            label,
            &subjects(operator, strategies),
            |q| signed_all(q.operator_shares_all(operator, strategies)?),
            deltas,
            EXACT,
        )
    }

    /// Expected change in an operator's native shares when its delegator's native shares move by `share_delta`.
    /// Evaluated against the present, so call it before the mutation.
    pub fn calc_native_operator_share_delta(&self, staker: &ActorId, share_delta: i128) -> Result<i128> {
        let before = self.query().signed_shares(staker, &Strategy::NativeStake)?;
        let after = before
            .checked_add(share_delta)
            .ok_or_else(|| HarnessError::Domain(format!("native share delta {} overflows", share_delta)))?;
        Ok(delegatable_share_delta(before, after))
    }

    // underlying balances

    pub fn assert_snap_added_token_balances(
        &mut self,
        actor: &ActorId,
        strategies: &[Strategy],
        added: &[u128],
        label: &str,
    ) -> Result<()> {
        ensure_paired(label, strategies, added.len())?;
        let deltas = added.iter().map(|a| signed(*a)).collect::<Result<Vec<_>>>()?;
        let tolerance = self.config().share_tolerance;
        self.delta_check_all(
            label,
            &subjects(actor, strategies),
            |q| signed_all(q.token_balances(actor, strategies)),
            &deltas,
            tolerance,
        )
    }

    pub fn assert_snap_removed_token_balances(
        &mut self,
        actor: &ActorId,
        strategies: &[Strategy],
        removed: &[u128],
        label: &str,
    ) -> Result<()> {
        ensure_paired(label, strategies, removed.len())?;
        let deltas = negated(removed)?;
        let tolerance = self.config().share_tolerance;
        self.delta_check_all(
            label,
            &subjects(actor, strategies),
            |q| signed_all(q.token_balances(actor, strategies)),
            &deltas,
            tolerance,
        )
    }

    pub fn assert_snap_unchanged_token_balances(
        &mut self,
        actor: &ActorId,
        strategies: &[Strategy],
        label: &str,
    ) -> Result<()> {
        let tolerance = self.config().share_tolerance;
        self.delta_check_all(
            label,
            &subjects(actor, strategies),
            |q| signed_all(q.token_balances(actor, strategies)),
            &vec![0; strategies.len()],
            tolerance,
        )
    }

    // strategy totals; native stake has no pooled total and is skipped

    fn total_shares_check(&mut self, strategies: &[Strategy], deltas: &[i128], label: &str) -> Result<()> {
        let (fungible, deltas): (Vec<Strategy>, Vec<i128>) = strategies
            .iter()
            .zip(deltas)
            .filter(|(s, _)| !s.is_native())
            .map(|(s, d)| (s.clone(), *d))
            .unzip();
        let tolerance = self.config().share_tolerance;
        self.delta_check_all(
            label,
            &subjects("total", &fungible),
            |q| {
                q.total_shares_all(&fungible)?
                    .into_iter()
                    .map(|t| signed(t.unwrap_or(0)))
                    .collect()
            },
            &deltas,
            tolerance,
        )
    }

    pub fn assert_snap_added_total_shares(&mut self, strategies: &[Strategy], added: &[u128], label: &str) -> Result<()> {
        ensure_paired(label, strategies, added.len())?;
        let deltas = added.iter().map(|a| signed(*a)).collect::<Result<Vec<_>>>()?;
        self.total_shares_check(strategies, &deltas, label)
    }

    pub fn assert_snap_removed_total_shares(
        &mut self,
        strategies: &[Strategy],
        removed: &[u128],
        label: &str,
    ) -> Result<()> {
        ensure_paired(label, strategies, removed.len())?;
        self.total_shares_check(strategies, &negated(removed)?, label)
    }

    pub fn assert_snap_unchanged_total_shares(&mut self, strategies: &[Strategy], label: &str) -> Result<()> {
        self.total_shares_check(strategies, &vec![0; strategies.len()], label)
    }

    // withdrawals

    pub fn assert_snap_added_queued_withdrawals(&mut self, staker: &ActorId, count: u64, label: &str) -> Result<()> {
        self.delta_check(
            label,
            staker,
            |q| Ok(i128::from(q.queued_withdrawal_count(staker))),
            i128::from(count),
            EXACT,
        )
    }

    /// Each withdrawal was pending at the last snapshot and is no longer pending.
    pub fn assert_snap_withdrawals_completed(&mut self, withdrawals: &[Withdrawal], label: &str) -> Result<()> {
        let before = self.with_previous(|past| Ok(past.withdrawals_pending(withdrawals)))?;
        let now = self.query().withdrawals_pending(withdrawals);
        for ((w, was), is) in withdrawals.iter().zip(before).zip(now) {
            let subject = w.root().to_string();
            require(label, &subject, was && !is, "pending -> completed", format!("pending {} -> {}", was, is))?;
        }
        Ok(())
    }

    pub fn assert_withdrawals_pending(&self, withdrawals: &[Withdrawal], label: &str) -> Result<()> {
        let q = self.query();
        for w in withdrawals {
            let root = w.root();
            require(label, &root.to_string(), q.withdrawal_pending(&root), true, false)?;
        }
        Ok(())
    }

    pub fn assert_withdrawals_not_pending(&self, withdrawals: &[Withdrawal], label: &str) -> Result<()> {
        let q = self.query();
        for w in withdrawals {
            let root = w.root();
            require(label, &root.to_string(), !q.withdrawal_pending(&root), false, true)?;
        }
        Ok(())
    }

    // validators

    pub fn assert_snap_added_active_validators(&mut self, owner: &ActorId, count: u64, label: &str) -> Result<()> {
        self.delta_check(
            label,
            owner,
            |q| Ok(i128::from(q.active_validator_count(owner))),
            i128::from(count),
            EXACT,
        )
    }

    pub fn assert_snap_removed_active_validators(&mut self, owner: &ActorId, count: u64, label: &str) -> Result<()> {
        self.delta_check(
            label,
            owner,
            |q| Ok(i128::from(q.active_validator_count(owner))),
            -i128::from(count),
            EXACT,
        )
    }

    pub fn assert_snap_unchanged_active_validators(&mut self, owner: &ActorId, label: &str) -> Result<()> {
        self.assert_snap_added_active_validators(owner, 0, label)
    }

    /// Every validator was `from` at the last snapshot and is `to` now. Only forward lifecycle transitions may be
    /// asserted.
    pub fn assert_snap_validator_transition(
        &mut self,
        owner: &ActorId,
        pubkey_hashes: &[PubkeyHash],
        from: ValidatorStatus,
        to: ValidatorStatus,
        label: &str,
    ) -> Result<()> {
        if !from.can_transition_to(to) {
            return Err(HarnessError::Domain(format!(
                "{}: {} -> {} is not a validator lifecycle transition",
                label, from, to
            )));
        }
        let before = self.with_previous(|past| Ok(past.validator_statuses(owner, pubkey_hashes)))?;
        let now = self.query().validator_statuses(owner, pubkey_hashes);
        for ((hash, was), is) in pubkey_hashes.iter().zip(before).zip(now) {
            require(
                label,
                &hash.to_string(),
                was == from && is == to,
                format!("{} -> {}", from, to),
                format!("{} -> {}", was, is),
            )?;
        }
        Ok(())
    }

    pub fn assert_validators_status(
        &self,
        owner: &ActorId,
        pubkey_hashes: &[PubkeyHash],
        status: ValidatorStatus,
        label: &str,
    ) -> Result<()> {
        let q = self.query();
        for hash in pubkey_hashes {
            let actual = q.validator_status(owner, hash);
            require(label, &hash.to_string(), actual == status, status, actual)?;
        }
        Ok(())
    }

    // checkpoints

    /// No checkpoint at the last snapshot; one is active now, stamped with the current block time.
    pub fn assert_snap_created_checkpoint(&mut self, owner: &ActorId, label: &str) -> Result<()> {
        let before = self.with_previous(|past| Ok(past.current_checkpoint_timestamp(owner)))?;
        let q = self.query();
        let now = q.current_checkpoint_timestamp(owner);
        require(label, owner, before == 0, 0, before)?;
        require(label, owner, now != 0 && now == q.timestamp(), q.timestamp(), now)
    }

    /// A checkpoint was active at the last snapshot and none is active now.
    pub fn assert_snap_removed_checkpoint(&mut self, owner: &ActorId, label: &str) -> Result<()> {
        let before = self.with_previous(|past| Ok(past.current_checkpoint_timestamp(owner)))?;
        let now = self.query().current_checkpoint_timestamp(owner);
        require(label, owner, before != 0, "active checkpoint before", before)?;
        require(label, owner, now == 0, 0, now)
    }

    pub fn assert_snap_unchanged_checkpoint(&mut self, owner: &ActorId, label: &str) -> Result<()> {
        self.delta_check(
            label,
            owner,
            |q| Ok(i128::from(q.current_checkpoint_timestamp(owner))),
            0,
            EXACT,
        )
    }

    /// The last checkpoint timestamp now equals the checkpoint that was active at the last snapshot.
    pub fn assert_snap_updated_last_checkpoint(&mut self, owner: &ActorId, label: &str) -> Result<()> {
        let (closed, last_before) = self.with_previous(|past| {
            Ok((
                past.current_checkpoint_timestamp(owner),
                past.last_checkpoint_timestamp(owner),
            ))
        })?;
        let last_now = self.query().last_checkpoint_timestamp(owner);
        require(
            label,
            owner,
            last_now == closed && last_now > last_before,
            closed,
            last_now,
        )
    }

    pub fn assert_snap_unchanged_last_checkpoint(&mut self, owner: &ActorId, label: &str) -> Result<()> {
        self.delta_check(
            label,
            owner,
            |q| Ok(i128::from(q.last_checkpoint_timestamp(owner))),
            0,
            EXACT,
        )
    }

    pub fn assert_snap_added_withdrawable_gwei(&mut self, owner: &ActorId, gwei: Gwei, label: &str) -> Result<()> {
        self.delta_check(
            label,
            owner,
            |q| Ok(i128::from(q.withdrawable_gwei(owner))),
            i128::from(gwei),
            EXACT,
        )
    }

    /// Exited balance recorded under the checkpoint that processed the exit. If the active checkpoint changed since
    /// the last snapshot, that is the checkpoint active at the snapshot; otherwise the current one.
    pub fn assert_snap_added_balance_exited_gwei(&mut self, owner: &ActorId, gwei: Gwei, label: &str) -> Result<()> {
        let previous_current = self.with_previous(|past| Ok(past.current_checkpoint_timestamp(owner)))?;
        let current = self.query().current_checkpoint_timestamp(owner);
        let at = exited_balance_lookup_timestamp(previous_current, current);
        self.delta_check(
            label,
            owner,
            |q| Ok(i128::from(q.balance_exited_gwei(owner, at))),
            i128::from(gwei),
            EXACT,
        )
    }

    /// Only meaningful while the checkpoint stays active.
    pub fn assert_snap_removed_proofs_remaining(&mut self, owner: &ActorId, count: u64, label: &str) -> Result<()> {
        self.delta_check(
            label,
            owner,
            |q| Ok(i128::from(q.checkpoint(owner).proofs_remaining)),
            -i128::from(count),
            EXACT,
        )
    }

    /// A freshly started checkpoint must expect one proof per active validator.
    pub fn assert_proofs_remaining_eq_active_validators(&self, owner: &ActorId, label: &str) -> Result<()> {
        let q = self.query();
        let checkpoint = q.checkpoint(owner);
        let active = q.active_validator_count(owner);
        require(label, owner, checkpoint.is_active(), "active checkpoint", "none")?;
        require(label, owner, checkpoint.proofs_remaining == active, active, checkpoint.proofs_remaining)
    }

    // present-state invariants

    /// Operator shares equal the summed delegatable shares of the stakers in `stakers` delegated to it (the operator's
    /// own self-delegated stake included when listed).
    pub fn assert_operator_shares_match_delegators(
        &self,
        operator: &ActorId,
        stakers: &[ActorId],
        strategies: &[Strategy],
        label: &str,
    ) -> Result<()> {
        let q = self.query();
        let tolerance = self.config().share_tolerance;
        let delegators: Vec<&ActorId> = stakers
            .iter()
            .filter(|s| q.delegated_to(s).as_ref() == Some(operator))
            .collect();
        for strategy in strategies {
            let mut sum: u128 = 0;
            for staker in &delegators {
                sum = sum.saturating_add(q.delegatable_shares(staker, strategy)?);
            }
            let actual = signed(q.operator_shares(operator, strategy)?)?;
            let subject = format!("{}:{}", operator, strategy);
            compare(label, &subject, signed(sum)?, 0, actual, tolerance)?;
        }
        Ok(())
    }

    pub fn assert_has_no_delegatable_shares(&self, staker: &ActorId, label: &str) -> Result<()> {
        let q = self.query();
        for strategy in self.registry().strategies() {
            let shares = q.delegatable_shares(staker, strategy)?;
            require(label, &format!("{}:{}", staker, strategy), shares == 0, 0, shares)?;
        }
        Ok(())
    }

    pub fn assert_has_underlying_token_balances(
        &self,
        actor: &ActorId,
        strategies: &[Strategy],
        expected: &[u128],
        label: &str,
    ) -> Result<()> {
        ensure_paired(label, strategies, expected.len())?;
        let q = self.query();
        let tolerance = self.config().share_tolerance;
        for (strategy, want) in strategies.iter().zip(expected) {
            let have = signed(q.token_balance(actor, strategy))?;
            compare(label, &format!("{}:{}", actor, strategy), signed(*want)?, 0, have, tolerance)?;
        }
        Ok(())
    }

    pub fn assert_delegated_to(&self, staker: &ActorId, operator: Option<&ActorId>, label: &str) -> Result<()> {
        let actual = self.query().delegated_to(staker);
        require(
            label,
            staker,
            actual.as_ref() == operator,
            format!("{:?}", operator),
            format!("{:?}", actual),
        )
    }
}
