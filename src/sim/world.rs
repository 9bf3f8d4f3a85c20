//! Global state of the reference backend: balances, strategy pools, shares, delegations, queued withdrawals, pods and
//! the beacon chain.
//!
//! # Determinism
//! Every map is ordered, so iteration (and therefore the state root) is a pure function of the call sequence.
//!
//! # Invariants
//! - Each collection sits behind an `Arc`; cloning a `World` is O(number of collections) and mutation goes through
//!   `Arc::make_mut`, so retained snapshots never observe later writes.
//! - Operator shares move with every staker share change by the delegatable share delta of that change.

use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::core::actor::{ActorId, ValidatorId};
use crate::core::ledger::{BalanceProof, BlockNumber, LedgerError, Timestamp, Wei};
use crate::core::shares::{
    apply_signed, delegatable_share_delta, delegatable_shares, gwei_to_wei, signed_gwei_to_wei, wei_to_gwei,
    GWEI_TO_WEI, VALIDATOR_BALANCE_GWEI, VALIDATOR_BALANCE_WEI,
};
use crate::core::strategy::{Strategy, TokenId};
use crate::core::withdrawal::{Withdrawal, WithdrawalRoot};
use crate::sim::beacon::{Beacon, BLOCKS_PER_EPOCH, SECONDS_PER_BLOCK};
use crate::sim::pod::Pod;
use crate::sim::pool::Pool;

/// Block number at genesis.
pub const GENESIS_BLOCK: BlockNumber = 1;

/// Unix time at genesis. Non-zero so that a checkpoint timestamp of 0 can mean "none".
pub const GENESIS_TIMESTAMP: Timestamp = 1_700_000_000;

fn to_signed(value: u128) -> Result<i128, LedgerError> {
    i128::try_from(value).map_err(|_| LedgerError::InvalidAmount(format!("{} exceeds the share range", value)))
}

#[derive(Debug, Clone, Default)]
pub struct World {
    pub(crate) block_number: BlockNumber,
    pub(crate) timestamp: Timestamp,
    tokens: Arc<BTreeMap<(ActorId, TokenId), u128>>,
    eth: Arc<BTreeMap<ActorId, Wei>>,
    pools: Arc<BTreeMap<TokenId, Pool>>,
    staker_shares: Arc<BTreeMap<(ActorId, Strategy), i128>>,
    operator_shares: Arc<BTreeMap<(ActorId, Strategy), u128>>,
    delegations: Arc<BTreeMap<ActorId, ActorId>>,
    operators: Arc<BTreeSet<ActorId>>,
    nonces: Arc<BTreeMap<ActorId, u64>>,
    pending: Arc<BTreeMap<WithdrawalRoot, Withdrawal>>,
    pods: Arc<BTreeMap<ActorId, Pod>>,
    beacon: Arc<Beacon>,
    delays: Arc<BTreeMap<Strategy, BlockNumber>>,
    default_delay: BlockNumber,
}

impl World {
    /// Genesis state with one empty pool per token and a uniform withdrawal delay.
    pub fn new(tokens: &[TokenId], withdrawal_delay_blocks: BlockNumber) -> Self {
        let pools = tokens.iter().map(|t| (t.clone(), Pool::default())).collect();
        Self {
            block_number: GENESIS_BLOCK,
            timestamp: GENESIS_TIMESTAMP,
            pools: Arc::new(pools),
            default_delay: withdrawal_delay_blocks,
            ..Self::default()
        }
    }

    // reads

    pub fn token_balance(&self, actor: &ActorId, token: &TokenId) -> u128 {
        self.tokens
            .get(&(actor.clone(), token.clone()))
            .copied()
            .unwrap_or(0)
    }

    pub fn eth_balance(&self, actor: &ActorId) -> Wei {
        self.eth.get(actor).copied().unwrap_or(0)
    }

    pub fn pool(&self, token: &TokenId) -> Result<&Pool, LedgerError> {
        self.pools
            .get(token)
            .ok_or_else(|| LedgerError::UnknownStrategy(Strategy::Fungible(token.clone())))
    }

    pub fn staker_shares(&self, staker: &ActorId, strategy: &Strategy) -> i128 {
        self.staker_shares
            .get(&(staker.clone(), strategy.clone()))
            .copied()
            .unwrap_or(0)
    }

    pub fn operator_shares(&self, operator: &ActorId, strategy: &Strategy) -> u128 {
        self.operator_shares
            .get(&(operator.clone(), strategy.clone()))
            .copied()
            .unwrap_or(0)
    }

    pub fn delegated_to(&self, staker: &ActorId) -> Option<ActorId> {
        self.delegations.get(staker).cloned()
    }

    pub fn is_operator(&self, actor: &ActorId) -> bool {
        self.operators.contains(actor)
    }

    pub fn withdrawal_pending(&self, root: &WithdrawalRoot) -> bool {
        self.pending.contains_key(root)
    }

    pub fn withdrawal_nonce(&self, staker: &ActorId) -> u64 {
        self.nonces.get(staker).copied().unwrap_or(0)
    }

    pub fn withdrawal_delay(&self, strategy: &Strategy) -> BlockNumber {
        self.delays.get(strategy).copied().unwrap_or(self.default_delay)
    }

    pub fn pod(&self, owner: &ActorId) -> Option<&Pod> {
        self.pods.get(owner)
    }

    pub fn beacon(&self) -> &Beacon {
        &self.beacon
    }

    /// Deterministic state root over every collection, in key order.
    pub fn state_root(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.block_number.to_le_bytes());
        hasher.update(self.timestamp.to_le_bytes());
        for ((actor, token), bal) in self.tokens.iter() {
            hasher.update(actor.as_bytes());
            hasher.update(token.as_bytes());
            hasher.update(bal.to_le_bytes());
        }
        for (actor, bal) in self.eth.iter() {
            hasher.update(actor.as_bytes());
            hasher.update(bal.to_le_bytes());
        }
        for (token, pool) in self.pools.iter() {
            hasher.update(token.as_bytes());
            hasher.update(pool.total_shares.to_le_bytes());
            hasher.update(pool.balance.to_le_bytes());
        }
        for ((actor, strategy), shares) in self.staker_shares.iter() {
            hasher.update(actor.as_bytes());
            hasher.update(strategy.as_canonical().as_bytes());
            hasher.update(shares.to_le_bytes());
        }
        for ((operator, strategy), shares) in self.operator_shares.iter() {
            hasher.update(operator.as_bytes());
            hasher.update(strategy.as_canonical().as_bytes());
            hasher.update(shares.to_le_bytes());
        }
        for (staker, operator) in self.delegations.iter() {
            hasher.update(staker.as_bytes());
            hasher.update(operator.as_bytes());
        }
        for (staker, nonce) in self.nonces.iter() {
            hasher.update(staker.as_bytes());
            hasher.update(nonce.to_le_bytes());
        }
        for root in self.pending.keys() {
            hasher.update(root.0);
        }
        for (owner, pod) in self.pods.iter() {
            let checkpoint = pod.checkpoint();
            hasher.update(owner.as_bytes());
            hasher.update(pod.eth_balance_wei.to_le_bytes());
            hasher.update(pod.withdrawable_restaked_gwei.to_le_bytes());
            hasher.update(pod.active_validators().to_le_bytes());
            hasher.update(checkpoint.timestamp.to_le_bytes());
            hasher.update(checkpoint.proofs_remaining.to_le_bytes());
            hasher.update(pod.last_checkpoint_timestamp().to_le_bytes());
        }
        for (id, balance) in self.beacon.balances() {
            hasher.update(id.to_le_bytes());
            hasher.update(balance.to_le_bytes());
        }
        hex::encode(hasher.finalize())
    }

    // configuration

    pub fn set_withdrawal_delay(&mut self, strategy: Strategy, blocks: BlockNumber) {
        Arc::make_mut(&mut self.delays).insert(strategy, blocks);
    }

    // balances

    pub fn mint(&mut self, actor: &ActorId, token: &TokenId, amount: u128) -> Result<(), LedgerError> {
        self.pool(token)?;
        self.credit_token(actor, token, amount)
    }

    fn credit_token(&mut self, actor: &ActorId, token: &TokenId, amount: u128) -> Result<(), LedgerError> {
        let entry = Arc::make_mut(&mut self.tokens)
            .entry((actor.clone(), token.clone()))
            .or_insert(0);
        *entry = entry
            .checked_add(amount)
            .ok_or_else(|| LedgerError::Other(format!("token balance overflow for {}", actor)))?;
        Ok(())
    }

    fn debit_token(&mut self, actor: &ActorId, token: &TokenId, amount: u128) -> Result<(), LedgerError> {
        let available = self.token_balance(actor, token);
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                required: amount,
                available,
            });
        }
        Arc::make_mut(&mut self.tokens).insert((actor.clone(), token.clone()), available - amount);
        Ok(())
    }

    pub fn credit_eth(&mut self, actor: &ActorId, amount: Wei) -> Result<(), LedgerError> {
        let entry = Arc::make_mut(&mut self.eth).entry(actor.clone()).or_insert(0);
        *entry = entry
            .checked_add(amount)
            .ok_or_else(|| LedgerError::Other(format!("ETH balance overflow for {}", actor)))?;
        Ok(())
    }

    fn debit_eth(&mut self, actor: &ActorId, amount: Wei) -> Result<(), LedgerError> {
        let available = self.eth_balance(actor);
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                required: amount,
                available,
            });
        }
        Arc::make_mut(&mut self.eth).insert(actor.clone(), available - amount);
        Ok(())
    }

    /// Adds underlying to a pool without minting shares, raising the share price.
    pub fn add_yield(&mut self, token: &TokenId, amount: u128) -> Result<(), LedgerError> {
        self.pool(token)?;
        if let Some(pool) = Arc::make_mut(&mut self.pools).get_mut(token) {
            pool.add_yield(amount);
        }
        Ok(())
    }

    // shares

    fn ensure_strategy(&self, strategy: &Strategy) -> Result<(), LedgerError> {
        match strategy {
            Strategy::Fungible(token) => self.pool(token).map(|_| ()),
            Strategy::NativeStake => Ok(()),
        }
    }

    fn shift_operator_shares(&mut self, operator: &ActorId, strategy: &Strategy, delta: i128) -> Result<(), LedgerError> {
        let current = self.operator_shares(operator, strategy);
        let next = apply_signed(current, delta).ok_or_else(|| LedgerError::InsufficientShares {
            strategy: strategy.clone(),
            required: delta.unsigned_abs(),
            available: i128::try_from(current).unwrap_or(i128::MAX),
        })?;
        let key = (operator.clone(), strategy.clone());
        let map = Arc::make_mut(&mut self.operator_shares);
        if next == 0 {
            map.remove(&key);
        } else {
            map.insert(key, next);
        }
        Ok(())
    }

    /// Moves a staker's shares by `delta` and its operator's shares by the delegatable part of that move.
    fn shift_staker_shares(&mut self, staker: &ActorId, strategy: &Strategy, delta: i128) -> Result<(), LedgerError> {
        let before = self.staker_shares(staker, strategy);
        let after = before
            .checked_add(delta)
            .ok_or_else(|| LedgerError::Other(format!("share overflow for {}", staker)))?;
        if after < 0 && !strategy.is_native() {
            return Err(LedgerError::InsufficientShares {
                strategy: strategy.clone(),
                required: delta.unsigned_abs(),
                available: before,
            });
        }
        let key = (staker.clone(), strategy.clone());
        let map = Arc::make_mut(&mut self.staker_shares);
        if after == 0 {
            map.remove(&key);
        } else {
            map.insert(key, after);
        }
        if let Some(operator) = self.delegated_to(staker) {
            let operator_delta = delegatable_share_delta(before, after);
            if operator_delta != 0 {
                self.shift_operator_shares(&operator, strategy, operator_delta)?;
            }
        }
        Ok(())
    }

    fn holdings(&self, staker: &ActorId) -> Vec<(Strategy, i128)> {
        self.staker_shares
            .iter()
            .filter(|((owner, _), _)| owner == staker)
            .map(|((_, strategy), shares)| (strategy.clone(), *shares))
            .collect()
    }

    // deposits

    pub fn deposit(&mut self, staker: &ActorId, strategy: &Strategy, amount: u128) -> Result<u128, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount("deposit of zero".to_string()));
        }
        match strategy {
            Strategy::Fungible(token) => {
                self.pool(token)?;
                self.debit_token(staker, token, amount)?;
                let shares = match Arc::make_mut(&mut self.pools).get_mut(token) {
                    Some(pool) => pool.deposit(amount)?,
                    None => return Err(LedgerError::UnknownStrategy(strategy.clone())),
                };
                self.shift_staker_shares(staker, strategy, to_signed(shares)?)?;
                Ok(shares)
            }
            Strategy::NativeStake => {
                let validators = self.start_validators(staker, amount)?;
                self.verify_withdrawal_credentials(staker, &validators)
            }
        }
    }

    pub fn start_validators(&mut self, owner: &ActorId, amount: Wei) -> Result<Vec<ValidatorId>, LedgerError> {
        if amount == 0 || amount % VALIDATOR_BALANCE_WEI != 0 {
            return Err(LedgerError::InvalidAmount(format!(
                "{} wei is not a positive multiple of 32 ETH",
                amount
            )));
        }
        self.debit_eth(owner, amount)?;
        let count = amount / VALIDATOR_BALANCE_WEI;
        let mut started = Vec::new();
        for _ in 0..count {
            let (id, hash) = Arc::make_mut(&mut self.beacon).new_validator(owner, VALIDATOR_BALANCE_GWEI);
            Arc::make_mut(&mut self.pods)
                .entry(owner.clone())
                .or_default()
                .add_validator(id, hash);
            started.push(id);
        }
        Ok(started)
    }

    fn pod_mut(&mut self, owner: &ActorId) -> Result<&mut Pod, LedgerError> {
        Arc::make_mut(&mut self.pods)
            .get_mut(owner)
            .ok_or_else(|| LedgerError::NoPod(owner.clone()))
    }

    pub fn verify_withdrawal_credentials(
        &mut self,
        owner: &ActorId,
        validators: &[ValidatorId],
    ) -> Result<u128, LedgerError> {
        if validators.is_empty() {
            return Err(LedgerError::InvalidAmount("no validators to verify".to_string()));
        }
        if self.pod(owner).is_none() {
            return Err(LedgerError::NoPod(owner.clone()));
        }
        let mut credited_gwei = 0u64;
        for id in validators {
            let (points_here, exited, balance) = {
                let v = self.beacon.get(*id)?;
                (v.owner == *owner, v.exited, v.balance_gwei)
            };
            if !points_here {
                return Err(LedgerError::ProofRejected(format!(
                    "withdrawal credentials of validator {} do not point to the pod of {}",
                    id, owner
                )));
            }
            if exited {
                return Err(LedgerError::ProofRejected(format!("validator {} is exiting", id)));
            }
            self.pod_mut(owner)?.verify(*id, balance)?;
            credited_gwei += balance;
        }
        let credited = gwei_to_wei(credited_gwei);
        self.shift_staker_shares(owner, &Strategy::NativeStake, to_signed(credited)?)?;
        Ok(credited)
    }

    // withdrawals

    pub fn queue_withdrawal(
        &mut self,
        staker: &ActorId,
        strategies: &[Strategy],
        shares: &[u128],
    ) -> Result<Withdrawal, LedgerError> {
        if strategies.is_empty() || strategies.len() != shares.len() {
            return Err(LedgerError::InvalidAmount(format!(
                "{} strategies paired with {} share amounts",
                strategies.len(),
                shares.len()
            )));
        }
        let distinct: BTreeSet<&Strategy> = strategies.iter().collect();
        if distinct.len() != strategies.len() {
            return Err(LedgerError::InvalidAmount("duplicate strategy in withdrawal".to_string()));
        }
        for (strategy, amount) in strategies.iter().zip(shares) {
            self.ensure_strategy(strategy)?;
            if *amount == 0 {
                return Err(LedgerError::InvalidAmount(format!("zero shares of {}", strategy)));
            }
            if strategy.is_native() && amount % GWEI_TO_WEI != 0 {
                return Err(LedgerError::InvalidAmount(format!(
                    "native withdrawal of {} wei is not a whole gwei amount",
                    amount
                )));
            }
            let available = self.staker_shares(staker, strategy);
            if available < to_signed(*amount)? {
                return Err(LedgerError::InsufficientShares {
                    strategy: strategy.clone(),
                    required: *amount,
                    available,
                });
            }
        }

        let delegated_to = self.delegated_to(staker);
        for (strategy, amount) in strategies.iter().zip(shares) {
            self.shift_staker_shares(staker, strategy, -to_signed(*amount)?)?;
        }
        let nonce = self.withdrawal_nonce(staker);
        Arc::make_mut(&mut self.nonces).insert(staker.clone(), nonce + 1);
        let withdrawal = Withdrawal {
            staker: staker.clone(),
            delegated_to,
            withdrawer: staker.clone(),
            nonce,
            start_block: self.block_number,
            strategies: strategies.to_vec(),
            shares: shares.to_vec(),
        };
        Arc::make_mut(&mut self.pending).insert(withdrawal.root(), withdrawal.clone());
        Ok(withdrawal)
    }

    pub fn complete_withdrawal(&mut self, root: &WithdrawalRoot, receive_as_tokens: bool) -> Result<(), LedgerError> {
        let withdrawal = self
            .pending
            .get(root)
            .cloned()
            .ok_or(LedgerError::WithdrawalNotPending(*root))?;
        let delay = withdrawal
            .strategies
            .iter()
            .map(|s| self.withdrawal_delay(s))
            .max()
            .unwrap_or(0);
        let completable_at = withdrawal.start_block.saturating_add(delay);
        if self.block_number < completable_at {
            return Err(LedgerError::WithdrawalDelayNotElapsed {
                completable_at,
                current: self.block_number,
            });
        }
        Arc::make_mut(&mut self.pending).remove(root);

        let recipient = &withdrawal.withdrawer;
        for (strategy, shares) in withdrawal.strategies.iter().zip(&withdrawal.shares) {
            match (strategy, receive_as_tokens) {
                (Strategy::Fungible(token), true) => {
                    let amount = match Arc::make_mut(&mut self.pools).get_mut(token) {
                        Some(pool) => pool.withdraw(*shares)?,
                        None => return Err(LedgerError::UnknownStrategy(strategy.clone())),
                    };
                    self.credit_token(recipient, token, amount)?;
                }
                (Strategy::NativeStake, true) => self.withdraw_native(recipient, *shares)?,
                (_, false) => self.shift_staker_shares(recipient, strategy, to_signed(*shares)?)?,
            }
        }
        Ok(())
    }

    /// Pays down any native share deficit first, then sends the rest out of the pod as ETH.
    fn withdraw_native(&mut self, staker: &ActorId, shares: u128) -> Result<(), LedgerError> {
        let current = self.staker_shares(staker, &Strategy::NativeStake);
        let mut remaining = shares;
        if current < 0 {
            let repaid = remaining.min(current.unsigned_abs());
            self.shift_staker_shares(staker, &Strategy::NativeStake, to_signed(repaid)?)?;
            remaining -= repaid;
        }
        if remaining == 0 {
            return Ok(());
        }
        let gwei = wei_to_gwei(remaining);
        let pod = self.pod_mut(staker)?;
        if pod.withdrawable_restaked_gwei < gwei {
            return Err(LedgerError::InsufficientBalance {
                required: remaining,
                available: gwei_to_wei(pod.withdrawable_restaked_gwei),
            });
        }
        if pod.eth_balance_wei < remaining {
            return Err(LedgerError::InsufficientBalance {
                required: remaining,
                available: pod.eth_balance_wei,
            });
        }
        pod.withdrawable_restaked_gwei -= gwei;
        pod.eth_balance_wei -= remaining;
        self.credit_eth(staker, remaining)
    }

    // delegation

    fn bind_delegation(&mut self, staker: &ActorId, operator: &ActorId) -> Result<(), LedgerError> {
        Arc::make_mut(&mut self.delegations).insert(staker.clone(), operator.clone());
        for (strategy, shares) in self.holdings(staker) {
            let visible = to_signed(delegatable_shares(shares))?;
            if visible != 0 {
                self.shift_operator_shares(operator, &strategy, visible)?;
            }
        }
        Ok(())
    }

    pub fn register_operator(&mut self, actor: &ActorId) -> Result<(), LedgerError> {
        if self.is_operator(actor) {
            return Err(LedgerError::Other(format!("{} is already an operator", actor)));
        }
        if self.delegated_to(actor).is_some() {
            return Err(LedgerError::AlreadyDelegated(actor.clone()));
        }
        Arc::make_mut(&mut self.operators).insert(actor.clone());
        self.bind_delegation(actor, actor)
    }

    pub fn delegate(&mut self, staker: &ActorId, operator: &ActorId) -> Result<(), LedgerError> {
        if !self.is_operator(operator) {
            return Err(LedgerError::NotOperator(operator.clone()));
        }
        if self.delegated_to(staker).is_some() {
            return Err(LedgerError::AlreadyDelegated(staker.clone()));
        }
        self.bind_delegation(staker, operator)
    }

    /// Queues one withdrawal per strategy with positive shares, then clears the delegation.
    pub fn undelegate(&mut self, staker: &ActorId) -> Result<Vec<Withdrawal>, LedgerError> {
        if self.delegated_to(staker).is_none() {
            return Err(LedgerError::NotDelegated(staker.clone()));
        }
        if self.is_operator(staker) {
            return Err(LedgerError::Other(format!("operator {} cannot undelegate", staker)));
        }
        let mut queued = Vec::new();
        for (strategy, shares) in self.holdings(staker) {
            if shares > 0 {
                let amount = shares.unsigned_abs();
                queued.push(self.queue_withdrawal(staker, &[strategy], &[amount])?);
            }
        }
        Arc::make_mut(&mut self.delegations).remove(staker);
        Ok(queued)
    }

    // checkpoints

    pub fn start_checkpoint(&mut self, owner: &ActorId) -> Result<(), LedgerError> {
        let timestamp = self.timestamp;
        if let Some(delta_gwei) = self.pod_mut(owner)?.start_checkpoint(timestamp)? {
            self.shift_staker_shares(owner, &Strategy::NativeStake, signed_gwei_to_wei(delta_gwei))?;
        }
        Ok(())
    }

    pub fn submit_balance_proof(&mut self, owner: &ActorId, proof: &BalanceProof) -> Result<(), LedgerError> {
        let (hash, balance) = {
            let v = self.beacon.get(proof.validator)?;
            (v.pubkey_hash, v.balance_gwei)
        };
        if hash != proof.pubkey_hash {
            return Err(LedgerError::ProofRejected(format!(
                "pubkey hash {} does not match validator {}",
                proof.pubkey_hash, proof.validator
            )));
        }
        if proof.balance_gwei != balance {
            return Err(LedgerError::ProofRejected(format!(
                "stale balance proof for validator {}: proves {} gwei, beacon holds {}",
                proof.validator, proof.balance_gwei, balance
            )));
        }
        if let Some(delta_gwei) = self.pod_mut(owner)?.prove(&proof.pubkey_hash, proof.balance_gwei)? {
            self.shift_staker_shares(owner, &Strategy::NativeStake, signed_gwei_to_wei(delta_gwei))?;
        }
        Ok(())
    }

    // consensus

    /// One epoch: optional rewards, 32 blocks of time, optional withdrawal sweep into pods.
    pub fn advance_epoch(&mut self, rewards: bool, withdraw: bool) -> Result<(), LedgerError> {
        let beacon = Arc::make_mut(&mut self.beacon);
        if rewards {
            beacon.reward();
        }
        beacon.tick();
        let swept = if withdraw { beacon.sweep() } else { BTreeMap::new() };
        self.advance_blocks(BLOCKS_PER_EPOCH);
        for (owner, gwei) in swept {
            let pod = Arc::make_mut(&mut self.pods).entry(owner).or_default();
            pod.eth_balance_wei = pod
                .eth_balance_wei
                .checked_add(gwei_to_wei(gwei))
                .ok_or_else(|| LedgerError::Other("pod balance overflow".to_string()))?;
        }
        Ok(())
    }

    pub fn slash_validators(&mut self, validators: &[ValidatorId]) -> Result<u64, LedgerError> {
        Arc::make_mut(&mut self.beacon).slash(validators)
    }

    pub fn exit_validators(&mut self, validators: &[ValidatorId]) -> Result<u64, LedgerError> {
        Arc::make_mut(&mut self.beacon).exit(validators)
    }

    // time

    pub fn advance_blocks(&mut self, blocks: u64) {
        self.block_number = self.block_number.saturating_add(blocks);
        self.timestamp = self
            .timestamp
            .saturating_add(blocks.saturating_mul(SECONDS_PER_BLOCK));
    }

    pub fn advance_time(&mut self, seconds: u64) {
        self.timestamp = self.timestamp.saturating_add(seconds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> TokenId {
        "stETH".to_string()
    }

    fn fungible() -> Strategy {
        Strategy::Fungible(token())
    }

    fn actor(name: &str) -> ActorId {
        name.to_string()
    }

    fn world() -> World {
        World::new(&[token()], 10)
    }

    #[test]
    fn test_deposit_credits_staker_and_operator() {
        let mut w = world();
        let (alice, op) = (actor("alice"), actor("op"));
        w.register_operator(&op).unwrap();
        w.delegate(&alice, &op).unwrap();
        w.mint(&alice, &token(), 1_000).unwrap();
        let shares = w.deposit(&alice, &fungible(), 600).unwrap();
        assert_eq!(shares, 600);
        assert_eq!(w.staker_shares(&alice, &fungible()), 600);
        assert_eq!(w.operator_shares(&op, &fungible()), 600);
        assert_eq!(w.token_balance(&alice, &token()), 400);
        assert_eq!(w.pool(&token()).unwrap().total_shares, 600);
    }

    #[test]
    fn test_deposit_rejects_overdraft_and_unknown_token() {
        let mut w = world();
        let alice = actor("alice");
        w.mint(&alice, &token(), 10).unwrap();
        assert!(matches!(
            w.deposit(&alice, &fungible(), 11),
            Err(LedgerError::InsufficientBalance { .. })
        ));
        assert!(matches!(
            w.deposit(&alice, &Strategy::Fungible("nope".to_string()), 1),
            Err(LedgerError::UnknownStrategy(_))
        ));
    }

    #[test]
    fn test_queue_and_complete_respects_delay() {
        let mut w = world();
        let alice = actor("alice");
        w.mint(&alice, &token(), 100).unwrap();
        w.deposit(&alice, &fungible(), 100).unwrap();
        let withdrawal = w.queue_withdrawal(&alice, &[fungible()], &[40]).unwrap();
        assert_eq!(withdrawal.nonce, 0);
        assert_eq!(w.withdrawal_nonce(&alice), 1);
        assert!(w.withdrawal_pending(&withdrawal.root()));

        w.advance_blocks(9);
        assert!(matches!(
            w.complete_withdrawal(&withdrawal.root(), true),
            Err(LedgerError::WithdrawalDelayNotElapsed { .. })
        ));
        w.advance_blocks(1);
        w.complete_withdrawal(&withdrawal.root(), true).unwrap();
        assert_eq!(w.token_balance(&alice, &token()), 40);
        assert_eq!(w.pool(&token()).unwrap().total_shares, 60);
        assert!(!w.withdrawal_pending(&withdrawal.root()));
    }

    #[test]
    fn test_undelegate_queues_per_strategy() {
        let mut w = world();
        let (alice, op) = (actor("alice"), actor("op"));
        w.register_operator(&op).unwrap();
        w.mint(&alice, &token(), 100).unwrap();
        w.deposit(&alice, &fungible(), 100).unwrap();
        w.credit_eth(&alice, VALIDATOR_BALANCE_WEI).unwrap();
        w.deposit(&alice, &Strategy::NativeStake, VALIDATOR_BALANCE_WEI).unwrap();
        w.delegate(&alice, &op).unwrap();
        assert_eq!(w.operator_shares(&op, &Strategy::NativeStake), VALIDATOR_BALANCE_WEI);

        let queued = w.undelegate(&alice).unwrap();
        assert_eq!(queued.len(), 2);
        assert_eq!(w.delegated_to(&alice), None);
        assert_eq!(w.operator_shares(&op, &fungible()), 0);
        assert_eq!(w.operator_shares(&op, &Strategy::NativeStake), 0);
        assert!(matches!(w.undelegate(&alice), Err(LedgerError::NotDelegated(_))));
    }

    #[test]
    fn test_state_root_tracks_changes() {
        let mut a = world();
        let b = world();
        assert_eq!(a.state_root(), b.state_root());
        a.mint(&actor("alice"), &token(), 1).unwrap();
        assert_ne!(a.state_root(), b.state_root());
    }
}
