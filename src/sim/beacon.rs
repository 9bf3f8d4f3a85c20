//! Simulated consensus layer: validator balances, rewards, slashing, exits and the withdrawal sweep to pods.
//!
//! # Determinism
//! Validator ids are sequential and public keys are derived from the id, so the same call sequence always produces
//! the same validators, hashes and balances.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::core::actor::{ActorId, ValidatorId};
use crate::core::ledger::{Gwei, LedgerError, PubkeyHash};
use crate::core::shares::VALIDATOR_BALANCE_GWEI;

/// Blocks per epoch.
pub const BLOCKS_PER_EPOCH: u64 = 32;

/// Seconds per block.
pub const SECONDS_PER_BLOCK: u64 = 12;

/// Consensus reward per live validator per epoch.
pub const REWARD_PER_EPOCH_GWEI: Gwei = 1;

/// Slashing penalty is `balance / SLASHING_PENALTY_QUOTIENT`.
pub const SLASHING_PENALTY_QUOTIENT: Gwei = 32;

const PUBKEY_LEN: usize = 48;

/// Deterministic 48-byte public key for a validator id.
pub fn pubkey_for(id: ValidatorId) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(b"restake-harness/validator");
    hasher.update(id.to_be_bytes());
    let seed = hasher.finalize();
    let mut pubkey = Vec::with_capacity(PUBKEY_LEN);
    pubkey.extend_from_slice(&seed);
    pubkey.extend_from_slice(&seed[..PUBKEY_LEN - seed.len()]);
    pubkey
}

/// SHA-256 of the public key padded with 16 zero bytes.
pub fn pubkey_hash(pubkey: &[u8]) -> PubkeyHash {
    let mut hasher = Sha256::new();
    hasher.update(pubkey);
    hasher.update([0u8; 16]);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    PubkeyHash(out)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconValidator {
    /// Owner of the pod the withdrawal credentials point to.
    pub owner: ActorId,
    pub pubkey: Vec<u8>,
    pub pubkey_hash: PubkeyHash,
    pub balance_gwei: Gwei,
    pub exited: bool,
    pub slashed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Beacon {
    validators: BTreeMap<ValidatorId, BeaconValidator>,
    next_id: ValidatorId,
    epoch: u64,
}

impl Beacon {
    /// Creates a validator holding `balance_gwei` with credentials pointing at `owner`'s pod.
    pub fn new_validator(&mut self, owner: &ActorId, balance_gwei: Gwei) -> (ValidatorId, PubkeyHash) {
        let id = self.next_id;
        self.next_id += 1;
        let pubkey = pubkey_for(id);
        let hash = pubkey_hash(&pubkey);
        self.validators.insert(
            id,
            BeaconValidator {
                owner: owner.clone(),
                pubkey,
                pubkey_hash: hash,
                balance_gwei,
                exited: false,
                slashed: false,
            },
        );
        (id, hash)
    }

    pub fn get(&self, id: ValidatorId) -> Result<&BeaconValidator, LedgerError> {
        self.validators.get(&id).ok_or(LedgerError::UnknownValidator(id))
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub(crate) fn tick(&mut self) {
        self.epoch += 1;
    }

    /// Credits the epoch reward to every validator that has not exited.
    pub fn reward(&mut self) {
        for v in self.validators.values_mut().filter(|v| !v.exited && v.balance_gwei > 0) {
            v.balance_gwei += REWARD_PER_EPOCH_GWEI;
        }
    }

    /// Withdraws exited balances in full and live balances above 32 ETH. Returns the amount owed to each pod owner.
    pub fn sweep(&mut self) -> BTreeMap<ActorId, Gwei> {
        let mut owed: BTreeMap<ActorId, Gwei> = BTreeMap::new();
        for v in self.validators.values_mut() {
            let amount = if v.exited {
                v.balance_gwei
            } else {
                v.balance_gwei.saturating_sub(VALIDATOR_BALANCE_GWEI)
            };
            if amount > 0 {
                v.balance_gwei -= amount;
                *owed.entry(v.owner.clone()).or_default() += amount;
            }
        }
        owed
    }

    fn ensure_live(&self, ids: &[ValidatorId]) -> Result<(), LedgerError> {
        for id in ids {
            if self.get(*id)?.exited {
                return Err(LedgerError::Other(format!("validator {} has already exited", id)));
            }
        }
        Ok(())
    }

    /// Applies the slashing penalty and forces an exit. Returns the total penalty.
    pub fn slash(&mut self, ids: &[ValidatorId]) -> Result<Gwei, LedgerError> {
        self.ensure_live(ids)?;
        let mut penalty = 0;
        for id in ids {
            if let Some(v) = self.validators.get_mut(id) {
                let lost = v.balance_gwei / SLASHING_PENALTY_QUOTIENT;
                v.balance_gwei -= lost;
                v.slashed = true;
                v.exited = true;
                penalty += lost;
            }
        }
        Ok(penalty)
    }

    /// Initiates full exits. Returns the total exiting balance.
    pub fn exit(&mut self, ids: &[ValidatorId]) -> Result<Gwei, LedgerError> {
        self.ensure_live(ids)?;
        let mut exiting = 0;
        for id in ids {
            if let Some(v) = self.validators.get_mut(id) {
                v.exited = true;
                exiting += v.balance_gwei;
            }
        }
        Ok(exiting)
    }

    /// (id, balance) pairs in id order.
    pub fn balances(&self) -> impl Iterator<Item = (ValidatorId, Gwei)> + '_ {
        self.validators.iter().map(|(id, v)| (*id, v.balance_gwei))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> ActorId {
        "alice".to_string()
    }

    #[test]
    fn test_pubkey_is_deterministic() {
        assert_eq!(pubkey_for(3), pubkey_for(3));
        assert_ne!(pubkey_for(3), pubkey_for(4));
        assert_eq!(pubkey_for(0).len(), 48);
        assert_eq!(pubkey_hash(&pubkey_for(7)), pubkey_hash(&pubkey_for(7)));
    }

    #[test]
    fn test_reward_then_sweep_moves_excess() {
        let mut beacon = Beacon::default();
        beacon.new_validator(&owner(), VALIDATOR_BALANCE_GWEI);
        beacon.new_validator(&owner(), VALIDATOR_BALANCE_GWEI);
        beacon.reward();
        let owed = beacon.sweep();
        assert_eq!(owed.get(&owner()), Some(&2));
        assert!(beacon.balances().all(|(_, b)| b == VALIDATOR_BALANCE_GWEI));
    }

    #[test]
    fn test_slash_penalizes_and_exits() {
        let mut beacon = Beacon::default();
        let (id, _) = beacon.new_validator(&owner(), VALIDATOR_BALANCE_GWEI);
        let penalty = beacon.slash(&[id]).unwrap();
        assert_eq!(penalty, 1_000_000_000);
        let v = beacon.get(id).unwrap();
        assert!(v.exited && v.slashed);
        assert_eq!(v.balance_gwei, VALIDATOR_BALANCE_GWEI - penalty);
        assert!(beacon.slash(&[id]).is_err());
    }

    #[test]
    fn test_exited_balance_swept_in_full() {
        let mut beacon = Beacon::default();
        let (id, _) = beacon.new_validator(&owner(), VALIDATOR_BALANCE_GWEI);
        assert_eq!(beacon.exit(&[id]).unwrap(), VALIDATOR_BALANCE_GWEI);
        beacon.reward();
        let owed = beacon.sweep();
        assert_eq!(owed.get(&owner()), Some(&VALIDATOR_BALANCE_GWEI));
        assert_eq!(beacon.get(id).unwrap().balance_gwei, 0);
    }

    #[test]
    fn test_unknown_validator() {
        let mut beacon = Beacon::default();
        assert_eq!(beacon.exit(&[9]).unwrap_err(), LedgerError::UnknownValidator(9));
    }
}
