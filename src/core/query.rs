//! Ledger query facade: read-only accessors translating (actor, strategy) into current ledger quantities.
//!
//! Every accessor is total over its input domain. Native-stake share reads go through the signed accessor; the
//! non-negative accessor `staker_shares` reports a `Domain` error instead of clamping when it meets a negative value.

use crate::core::actor::ActorId;
use crate::core::checkpoint::ValidatorStatus;
use crate::core::ledger::{BlockNumber, CheckpointRecord, Gwei, LedgerRead, PubkeyHash, Timestamp};
use crate::core::shares::delegatable_shares;
use crate::core::strategy::{Strategy, StrategyRegistry};
use crate::core::withdrawal::{Withdrawal, WithdrawalRoot};
use crate::error::{HarnessError, Result};

/// Read view over a ledger handle. Cheap to copy.
pub struct LedgerQuery<'a, L: LedgerRead + ?Sized> {
    ledger: &'a L,
    registry: &'a StrategyRegistry,
}

impl<'a, L: LedgerRead + ?Sized> Clone for LedgerQuery<'a, L> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, L: LedgerRead + ?Sized> Copy for LedgerQuery<'a, L> {}

impl<'a, L: LedgerRead + ?Sized> LedgerQuery<'a, L> {
    pub fn new(ledger: &'a L, registry: &'a StrategyRegistry) -> Self {
        Self { ledger, registry }
    }

    pub fn ledger(&self) -> &'a L {
        self.ledger
    }

    pub fn registry(&self) -> &'a StrategyRegistry {
        self.registry
    }

    /// Signed shares; only native stake can be negative.
    pub fn signed_shares(&self, staker: &ActorId, strategy: &Strategy) -> Result<i128> {
        Ok(self.ledger.staker_shares(staker, strategy)?)
    }

    /// Shares on a path that requires them to be non-negative.
    pub fn staker_shares(&self, staker: &ActorId, strategy: &Strategy) -> Result<u128> {
        let signed = self.signed_shares(staker, strategy)?;
        u128::try_from(signed).map_err(|_| {
            HarnessError::Domain(format!(
                "{} holds negative shares ({}) in {} where non-negative shares are required",
                staker, signed, strategy
            ))
        })
    }

    pub fn staker_shares_all(&self, staker: &ActorId, strategies: &[Strategy]) -> Result<Vec<u128>> {
        strategies.iter().map(|s| self.staker_shares(staker, s)).collect()
    }

    pub fn signed_shares_all(&self, staker: &ActorId, strategies: &[Strategy]) -> Result<Vec<i128>> {
        strategies.iter().map(|s| self.signed_shares(staker, s)).collect()
    }

    /// Shares visible to the delegation layer (negative native shares count as zero).
    pub fn delegatable_shares(&self, staker: &ActorId, strategy: &Strategy) -> Result<u128> {
        Ok(delegatable_shares(self.signed_shares(staker, strategy)?))
    }

    pub fn operator_shares(&self, operator: &ActorId, strategy: &Strategy) -> Result<u128> {
        Ok(self.ledger.operator_shares(operator, strategy)?)
    }

    pub fn operator_shares_all(&self, operator: &ActorId, strategies: &[Strategy]) -> Result<Vec<u128>> {
        strategies.iter().map(|s| self.operator_shares(operator, s)).collect()
    }

    /// Underlying balance held by the actor: token balance, or ETH (wei) for native stake.
    pub fn token_balance(&self, actor: &ActorId, strategy: &Strategy) -> u128 {
        match strategy {
            Strategy::Fungible(token) => self.ledger.token_balance(actor, token),
            Strategy::NativeStake => self.ledger.eth_balance(actor),
        }
    }

    pub fn token_balances(&self, actor: &ActorId, strategies: &[Strategy]) -> Vec<u128> {
        strategies.iter().map(|s| self.token_balance(actor, s)).collect()
    }

    /// Global share total; `None` for native stake, which has no pooled total.
    pub fn total_shares(&self, strategy: &Strategy) -> Result<Option<u128>> {
        match strategy {
            Strategy::Fungible(token) => Ok(Some(self.ledger.total_shares(token)?)),
            Strategy::NativeStake => Ok(None),
        }
    }

    pub fn total_shares_all(&self, strategies: &[Strategy]) -> Result<Vec<Option<u128>>> {
        strategies.iter().map(|s| self.total_shares(s)).collect()
    }

    pub fn underlying_to_shares(&self, strategy: &Strategy, amount: u128) -> Result<u128> {
        match strategy {
            Strategy::Fungible(token) => Ok(self.ledger.underlying_to_shares(token, amount)?),
            Strategy::NativeStake => Ok(amount),
        }
    }

    pub fn shares_to_underlying(&self, strategy: &Strategy, shares: u128) -> Result<u128> {
        match strategy {
            Strategy::Fungible(token) => Ok(self.ledger.shares_to_underlying(token, shares)?),
            Strategy::NativeStake => Ok(shares),
        }
    }

    pub fn delegated_to(&self, staker: &ActorId) -> Option<ActorId> {
        self.ledger.delegated_to(staker)
    }

    pub fn is_operator(&self, actor: &ActorId) -> bool {
        self.ledger.is_operator(actor)
    }

    pub fn withdrawal_pending(&self, root: &WithdrawalRoot) -> bool {
        self.ledger.withdrawal_pending(root)
    }

    pub fn withdrawals_pending(&self, withdrawals: &[Withdrawal]) -> Vec<bool> {
        withdrawals
            .iter()
            .map(|w| self.withdrawal_pending(&w.root()))
            .collect()
    }

    /// Withdrawals ever queued by the staker.
    pub fn queued_withdrawal_count(&self, staker: &ActorId) -> u64 {
        self.ledger.withdrawal_nonce(staker)
    }

    pub fn withdrawal_delay_blocks(&self, strategy: &Strategy) -> BlockNumber {
        self.ledger.withdrawal_delay_blocks(strategy)
    }

    pub fn checkpoint(&self, owner: &ActorId) -> CheckpointRecord {
        self.ledger.checkpoint(owner)
    }

    pub fn current_checkpoint_timestamp(&self, owner: &ActorId) -> Timestamp {
        self.ledger.checkpoint(owner).timestamp
    }

    pub fn last_checkpoint_timestamp(&self, owner: &ActorId) -> Timestamp {
        self.ledger.last_checkpoint_timestamp(owner)
    }

    pub fn balance_exited_gwei(&self, owner: &ActorId, timestamp: Timestamp) -> Gwei {
        self.ledger.checkpoint_balance_exited_gwei(owner, timestamp)
    }

    pub fn withdrawable_gwei(&self, owner: &ActorId) -> Gwei {
        self.ledger.withdrawable_restaked_gwei(owner)
    }

    pub fn validator_status(&self, owner: &ActorId, pubkey_hash: &PubkeyHash) -> ValidatorStatus {
        self.ledger.validator_status(owner, pubkey_hash)
    }

    pub fn validator_statuses(&self, owner: &ActorId, pubkey_hashes: &[PubkeyHash]) -> Vec<ValidatorStatus> {
        pubkey_hashes
            .iter()
            .map(|h| self.validator_status(owner, h))
            .collect()
    }

    pub fn active_validator_count(&self, owner: &ActorId) -> u64 {
        self.ledger.active_validator_count(owner)
    }

    pub fn block_number(&self) -> BlockNumber {
        self.ledger.block_number()
    }

    pub fn timestamp(&self) -> Timestamp {
        self.ledger.timestamp()
    }
}
