//! In-process reference backend implementing every collaborator contract over an in-memory `World`.
//!
//! # Atomicity
//! Each mutation runs against a copy-on-write clone of the world and is committed only if it succeeds, so a rejected
//! call leaves no partial effects.
//!
//! # Snapshots
//! `snapshot` retains a clone of the world under a fresh id; `revert_to` swaps it back in without consuming it.
//! Retained worlds share unchanged collections with the live one through `Arc`.

pub mod beacon;
pub mod pod;
pub mod pool;
pub mod world;

use std::collections::BTreeMap;
use tracing::debug;

use crate::config::HarnessConfig;
use crate::core::actor::{ActorId, ValidatorId};
use crate::core::checkpoint::ValidatorStatus;
use crate::core::ledger::{
    BalanceProof, BlockNumber, CheckpointRecord, ConsensusSource, Gwei, LedgerError, LedgerRead, LedgerWrite,
    PubkeyHash, SnapshotId, StateControl, Timestamp, Wei,
};
use crate::core::strategy::{Strategy, StrategyRegistry, TokenId};
use crate::core::withdrawal::{Withdrawal, WithdrawalRoot};

pub use world::{World, GENESIS_BLOCK, GENESIS_TIMESTAMP};

#[derive(Debug, Clone)]
pub struct SimLedger {
    world: World,
    snapshots: BTreeMap<SnapshotId, World>,
    next_snapshot: u64,
}

impl SimLedger {
    pub fn new(tokens: &[TokenId], withdrawal_delay_blocks: BlockNumber) -> Self {
        Self {
            world: World::new(tokens, withdrawal_delay_blocks),
            snapshots: BTreeMap::new(),
            next_snapshot: 0,
        }
    }

    /// Backend with one pool per fungible strategy in the registry.
    pub fn from_config(registry: &StrategyRegistry, config: &HarnessConfig) -> Self {
        Self::new(&registry.tokens(), config.withdrawal_delay_blocks)
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn state_root(&self) -> String {
        self.world.state_root()
    }

    pub fn retained_snapshots(&self) -> usize {
        self.snapshots.len()
    }

    pub fn set_withdrawal_delay(&mut self, strategy: Strategy, blocks: BlockNumber) {
        self.world.set_withdrawal_delay(strategy, blocks);
    }

    /// Raises a strategy's share price by adding underlying without minting shares.
    pub fn add_yield(&mut self, token: &TokenId, amount: u128) -> Result<(), LedgerError> {
        self.transact("add_yield", |w| w.add_yield(token, amount))
    }

    fn transact<T>(
        &mut self,
        op: &'static str,
        apply: impl FnOnce(&mut World) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let mut next = self.world.clone();
        match apply(&mut next) {
            Ok(out) => {
                self.world = next;
                debug!(op, block = self.world.block_number, "sim applied");
                Ok(out)
            }
            Err(e) => {
                debug!(op, error = %e, "sim rejected");
                Err(e)
            }
        }
    }
}

impl LedgerRead for SimLedger {
    fn staker_shares(&self, staker: &ActorId, strategy: &Strategy) -> Result<i128, LedgerError> {
        if let Strategy::Fungible(token) = strategy {
            self.world.pool(token)?;
        }
        Ok(self.world.staker_shares(staker, strategy))
    }

    fn operator_shares(&self, operator: &ActorId, strategy: &Strategy) -> Result<u128, LedgerError> {
        if let Strategy::Fungible(token) = strategy {
            self.world.pool(token)?;
        }
        Ok(self.world.operator_shares(operator, strategy))
    }

    fn total_shares(&self, token: &TokenId) -> Result<u128, LedgerError> {
        Ok(self.world.pool(token)?.total_shares)
    }

    fn shares_to_underlying(&self, token: &TokenId, shares: u128) -> Result<u128, LedgerError> {
        self.world.pool(token)?.shares_to_underlying(shares)
    }

    fn underlying_to_shares(&self, token: &TokenId, amount: u128) -> Result<u128, LedgerError> {
        self.world.pool(token)?.underlying_to_shares(amount)
    }

    fn token_balance(&self, actor: &ActorId, token: &TokenId) -> u128 {
        self.world.token_balance(actor, token)
    }

    fn eth_balance(&self, actor: &ActorId) -> Wei {
        self.world.eth_balance(actor)
    }

    fn delegated_to(&self, staker: &ActorId) -> Option<ActorId> {
        self.world.delegated_to(staker)
    }

    fn is_operator(&self, actor: &ActorId) -> bool {
        self.world.is_operator(actor)
    }

    fn withdrawal_pending(&self, root: &WithdrawalRoot) -> bool {
        self.world.withdrawal_pending(root)
    }

    fn withdrawal_nonce(&self, staker: &ActorId) -> u64 {
        self.world.withdrawal_nonce(staker)
    }

    fn withdrawal_delay_blocks(&self, strategy: &Strategy) -> BlockNumber {
        self.world.withdrawal_delay(strategy)
    }

    fn checkpoint(&self, owner: &ActorId) -> CheckpointRecord {
        self.world
            .pod(owner)
            .map(|p| p.checkpoint())
            .unwrap_or_default()
    }

    fn last_checkpoint_timestamp(&self, owner: &ActorId) -> Timestamp {
        self.world
            .pod(owner)
            .map(|p| p.last_checkpoint_timestamp())
            .unwrap_or(0)
    }

    fn checkpoint_balance_exited_gwei(&self, owner: &ActorId, timestamp: Timestamp) -> Gwei {
        self.world
            .pod(owner)
            .map(|p| p.balance_exited_gwei(timestamp))
            .unwrap_or(0)
    }

    fn withdrawable_restaked_gwei(&self, owner: &ActorId) -> Gwei {
        self.world
            .pod(owner)
            .map(|p| p.withdrawable_restaked_gwei)
            .unwrap_or(0)
    }

    fn validator_status(&self, owner: &ActorId, pubkey_hash: &PubkeyHash) -> ValidatorStatus {
        self.world
            .pod(owner)
            .map(|p| p.validator_status(pubkey_hash))
            .unwrap_or_default()
    }

    fn active_validator_count(&self, owner: &ActorId) -> u64 {
        self.world
            .pod(owner)
            .map(|p| p.active_validators())
            .unwrap_or(0)
    }

    fn pod_validators(&self, owner: &ActorId) -> Vec<ValidatorId> {
        self.world
            .pod(owner)
            .map(|p| p.validator_ids())
            .unwrap_or_default()
    }

    fn block_number(&self) -> BlockNumber {
        self.world.block_number
    }

    fn timestamp(&self) -> Timestamp {
        self.world.timestamp
    }
}

impl LedgerWrite for SimLedger {
    fn mint(&mut self, actor: &ActorId, token: &TokenId, amount: u128) -> Result<(), LedgerError> {
        self.transact("mint", |w| w.mint(actor, token, amount))
    }

    fn deal_eth(&mut self, actor: &ActorId, amount: Wei) -> Result<(), LedgerError> {
        self.transact("deal_eth", |w| w.credit_eth(actor, amount))
    }

    fn deposit(&mut self, staker: &ActorId, strategy: &Strategy, amount: u128) -> Result<u128, LedgerError> {
        self.transact("deposit", |w| w.deposit(staker, strategy, amount))
    }

    fn start_validators(&mut self, owner: &ActorId, amount: Wei) -> Result<Vec<ValidatorId>, LedgerError> {
        self.transact("start_validators", |w| w.start_validators(owner, amount))
    }

    fn verify_withdrawal_credentials(
        &mut self,
        owner: &ActorId,
        validators: &[ValidatorId],
    ) -> Result<u128, LedgerError> {
        self.transact("verify_withdrawal_credentials", |w| {
            w.verify_withdrawal_credentials(owner, validators)
        })
    }

    fn queue_withdrawal(
        &mut self,
        staker: &ActorId,
        strategies: &[Strategy],
        shares: &[u128],
    ) -> Result<Withdrawal, LedgerError> {
        self.transact("queue_withdrawal", |w| w.queue_withdrawal(staker, strategies, shares))
    }

    fn complete_withdrawal(&mut self, root: &WithdrawalRoot, receive_as_tokens: bool) -> Result<(), LedgerError> {
        self.transact("complete_withdrawal", |w| w.complete_withdrawal(root, receive_as_tokens))
    }

    fn register_operator(&mut self, actor: &ActorId) -> Result<(), LedgerError> {
        self.transact("register_operator", |w| w.register_operator(actor))
    }

    fn delegate(&mut self, staker: &ActorId, operator: &ActorId) -> Result<(), LedgerError> {
        self.transact("delegate", |w| w.delegate(staker, operator))
    }

    fn undelegate(&mut self, staker: &ActorId) -> Result<Vec<Withdrawal>, LedgerError> {
        self.transact("undelegate", |w| w.undelegate(staker))
    }

    fn start_checkpoint(&mut self, owner: &ActorId) -> Result<(), LedgerError> {
        self.transact("start_checkpoint", |w| w.start_checkpoint(owner))
    }

    fn submit_balance_proof(&mut self, owner: &ActorId, proof: &BalanceProof) -> Result<(), LedgerError> {
        self.transact("submit_balance_proof", |w| w.submit_balance_proof(owner, proof))
    }
}

impl ConsensusSource for SimLedger {
    fn advance_epoch(&mut self) {
        if let Err(e) = self.transact("advance_epoch", |w| w.advance_epoch(true, true)) {
            debug!(error = %e, "epoch not applied");
        }
    }

    fn advance_epoch_no_rewards(&mut self) {
        if let Err(e) = self.transact("advance_epoch_no_rewards", |w| w.advance_epoch(false, true)) {
            debug!(error = %e, "epoch not applied");
        }
    }

    fn advance_epoch_no_withdraw(&mut self) {
        if let Err(e) = self.transact("advance_epoch_no_withdraw", |w| w.advance_epoch(true, false)) {
            debug!(error = %e, "epoch not applied");
        }
    }

    fn slash_validators(&mut self, validators: &[ValidatorId]) -> Result<Gwei, LedgerError> {
        self.transact("slash_validators", |w| w.slash_validators(validators))
    }

    fn exit_validators(&mut self, validators: &[ValidatorId]) -> Result<Gwei, LedgerError> {
        self.transact("exit_validators", |w| w.exit_validators(validators))
    }

    fn pubkey_hashes(&self, validators: &[ValidatorId]) -> Result<Vec<PubkeyHash>, LedgerError> {
        validators
            .iter()
            .map(|id| self.world.beacon().get(*id).map(|v| v.pubkey_hash))
            .collect()
    }

    fn validator_balance_gwei(&self, validator: ValidatorId) -> Result<Gwei, LedgerError> {
        Ok(self.world.beacon().get(validator)?.balance_gwei)
    }

    fn balance_proof(&self, validator: ValidatorId) -> Result<BalanceProof, LedgerError> {
        let v = self.world.beacon().get(validator)?;
        Ok(BalanceProof {
            validator,
            pubkey_hash: v.pubkey_hash,
            balance_gwei: v.balance_gwei,
            beacon_timestamp: self.world.timestamp,
        })
    }
}

impl StateControl for SimLedger {
    fn snapshot(&mut self) -> SnapshotId {
        self.next_snapshot += 1;
        let id = SnapshotId(self.next_snapshot);
        self.snapshots.insert(id, self.world.clone());
        id
    }

    fn revert_to(&mut self, id: SnapshotId) -> Result<(), LedgerError> {
        let saved = self
            .snapshots
            .get(&id)
            .ok_or(LedgerError::UnknownSnapshot(id))?;
        self.world = saved.clone();
        Ok(())
    }

    fn release(&mut self, id: SnapshotId) {
        self.snapshots.remove(&id);
    }

    fn advance_blocks(&mut self, blocks: u64) {
        self.world.advance_blocks(blocks);
    }

    fn advance_time(&mut self, seconds: u64) {
        self.world.advance_time(seconds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::shares::{VALIDATOR_BALANCE_GWEI, VALIDATOR_BALANCE_WEI};

    fn alice() -> ActorId {
        "alice".to_string()
    }

    fn sim() -> SimLedger {
        SimLedger::new(&["stETH".to_string()], 10)
    }

    #[test]
    fn test_rejected_call_has_no_effect() {
        let mut ledger = sim();
        ledger.mint(&alice(), &"stETH".to_string(), 5).unwrap();
        let root = ledger.state_root();
        let strategies = [Strategy::Fungible("stETH".to_string()), Strategy::NativeStake];
        assert!(ledger.queue_withdrawal(&alice(), &strategies, &[1, 1]).is_err());
        assert_eq!(ledger.state_root(), root);
    }

    #[test]
    fn test_revert_keeps_snapshot() {
        let mut ledger = sim();
        let id = ledger.snapshot();
        ledger.mint(&alice(), &"stETH".to_string(), 5).unwrap();
        ledger.revert_to(id).unwrap();
        assert_eq!(ledger.token_balance(&alice(), &"stETH".to_string()), 0);
        ledger.mint(&alice(), &"stETH".to_string(), 7).unwrap();
        ledger.revert_to(id).unwrap();
        assert_eq!(ledger.token_balance(&alice(), &"stETH".to_string()), 0);
        ledger.release(id);
        assert_eq!(ledger.revert_to(id), Err(LedgerError::UnknownSnapshot(id)));
    }

    #[test]
    fn test_native_lifecycle_through_checkpoint() {
        let mut ledger = sim();
        ledger.deal_eth(&alice(), 2 * VALIDATOR_BALANCE_WEI).unwrap();
        let shares = ledger
            .deposit(&alice(), &Strategy::NativeStake, 2 * VALIDATOR_BALANCE_WEI)
            .unwrap();
        assert_eq!(shares, 2 * VALIDATOR_BALANCE_WEI);
        let validators = ledger.pod_validators(&alice());
        assert_eq!(ledger.active_validator_count(&alice()), 2);

        ledger.advance_epoch_no_withdraw();
        ledger.start_checkpoint(&alice()).unwrap();
        assert_eq!(ledger.checkpoint(&alice()).proofs_remaining, 2);
        for id in &validators {
            let proof = ledger.balance_proof(*id).unwrap();
            assert_eq!(proof.balance_gwei, VALIDATOR_BALANCE_GWEI + 1);
            ledger.submit_balance_proof(&alice(), &proof).unwrap();
        }
        assert!(!ledger.checkpoint(&alice()).is_active());
        assert_eq!(
            ledger.staker_shares(&alice(), &Strategy::NativeStake).unwrap(),
            (2 * VALIDATOR_BALANCE_WEI + 2_000_000_000) as i128
        );
    }
}
