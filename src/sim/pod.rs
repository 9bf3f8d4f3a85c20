//! Per-owner pod: execution-layer ETH received from the beacon sweep, the validators whose credentials point at it,
//! and the checkpoint that reconciles their beacon balances into native shares.
//!
//! # Invariants
//! - `proofs_remaining` of a checkpoint equals the active validator count when it starts and drops by one per
//!   accepted proof. A validator is proven at most once per checkpoint.
//! - `withdrawable_restaked_gwei` only grows at checkpoint finalization and only shrinks when native shares are
//!   withdrawn as ETH.

use std::collections::BTreeMap;

use crate::core::actor::ValidatorId;
use crate::core::checkpoint::ValidatorStatus;
use crate::core::ledger::{CheckpointRecord, Gwei, LedgerError, PubkeyHash, Timestamp, Wei};
use crate::core::shares::wei_to_gwei;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PodValidator {
    pub pubkey_hash: PubkeyHash,
    pub status: ValidatorStatus,
    /// Beacon balance last credited to native shares.
    pub restaked_balance_gwei: Gwei,
    pub last_checkpointed_at: Timestamp,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pod {
    pub eth_balance_wei: Wei,
    pub withdrawable_restaked_gwei: Gwei,
    validators: BTreeMap<ValidatorId, PodValidator>,
    by_hash: BTreeMap<PubkeyHash, ValidatorId>,
    active_validators: u64,
    checkpoint: CheckpointRecord,
    last_checkpoint_timestamp: Timestamp,
    exited_gwei: BTreeMap<Timestamp, Gwei>,
}

impl Pod {
    pub fn add_validator(&mut self, id: ValidatorId, pubkey_hash: PubkeyHash) {
        self.validators.insert(
            id,
            PodValidator {
                pubkey_hash,
                status: ValidatorStatus::Inactive,
                restaked_balance_gwei: 0,
                last_checkpointed_at: 0,
            },
        );
        self.by_hash.insert(pubkey_hash, id);
    }

    /// Verifies withdrawal credentials: `Inactive -> Active`, crediting `balance_gwei` as restaked.
    pub fn verify(&mut self, id: ValidatorId, balance_gwei: Gwei) -> Result<(), LedgerError> {
        let anchor = if self.checkpoint.is_active() {
            self.checkpoint.timestamp
        } else {
            self.last_checkpoint_timestamp
        };
        let v = self
            .validators
            .get_mut(&id)
            .ok_or(LedgerError::UnknownValidator(id))?;
        if v.status != ValidatorStatus::Inactive {
            return Err(LedgerError::ProofRejected(format!(
                "validator {} is already {}",
                id, v.status
            )));
        }
        v.status = ValidatorStatus::Active;
        v.restaked_balance_gwei = balance_gwei;
        v.last_checkpointed_at = anchor;
        self.active_validators += 1;
        Ok(())
    }

    /// Opens a checkpoint at `timestamp`. Returns the native share delta (gwei) if it finalized immediately.
    pub fn start_checkpoint(&mut self, timestamp: Timestamp) -> Result<Option<i64>, LedgerError> {
        if self.checkpoint.is_active() {
            return Err(LedgerError::CheckpointActive(self.checkpoint.timestamp));
        }
        if timestamp <= self.last_checkpoint_timestamp {
            return Err(LedgerError::Other(format!(
                "checkpoint already taken at timestamp {}",
                self.last_checkpoint_timestamp
            )));
        }
        let pod_balance_gwei = wei_to_gwei(self.eth_balance_wei).saturating_sub(self.withdrawable_restaked_gwei);
        self.checkpoint = CheckpointRecord {
            timestamp,
            pod_balance_gwei,
            proofs_remaining: self.active_validators,
            balance_deltas_gwei: 0,
            balance_exited_gwei: 0,
        };
        if self.active_validators == 0 {
            return Ok(Some(self.finalize_checkpoint()));
        }
        Ok(None)
    }

    /// Applies one balance proof. Returns the native share delta (gwei) if the checkpoint finalized.
    pub fn prove(&mut self, pubkey_hash: &PubkeyHash, balance_gwei: Gwei) -> Result<Option<i64>, LedgerError> {
        if !self.checkpoint.is_active() {
            return Err(LedgerError::NoActiveCheckpoint);
        }
        let timestamp = self.checkpoint.timestamp;
        let id = *self.by_hash.get(pubkey_hash).ok_or_else(|| {
            LedgerError::ProofRejected(format!("validator {} is not registered with this pod", pubkey_hash))
        })?;
        let v = self
            .validators
            .get_mut(&id)
            .ok_or(LedgerError::UnknownValidator(id))?;
        if v.status != ValidatorStatus::Active {
            return Err(LedgerError::ProofRejected(format!("validator {} is {}", id, v.status)));
        }
        if v.last_checkpointed_at >= timestamp {
            return Err(LedgerError::ProofRejected(format!(
                "validator {} already proven for checkpoint {}",
                id, timestamp
            )));
        }

        let previous = v.restaked_balance_gwei;
        let exited = balance_gwei == 0;
        v.restaked_balance_gwei = balance_gwei;
        v.last_checkpointed_at = timestamp;
        if exited {
            v.status = ValidatorStatus::Withdrawn;
            self.active_validators -= 1;
            self.checkpoint.balance_exited_gwei += previous;
            *self.exited_gwei.entry(timestamp).or_default() += previous;
        }
        self.checkpoint.proofs_remaining -= 1;
        self.checkpoint.balance_deltas_gwei += balance_gwei as i64 - previous as i64;

        if self.checkpoint.proofs_remaining == 0 {
            return Ok(Some(self.finalize_checkpoint()));
        }
        Ok(None)
    }

    fn finalize_checkpoint(&mut self) -> i64 {
        let closed = std::mem::take(&mut self.checkpoint);
        self.last_checkpoint_timestamp = closed.timestamp;
        self.withdrawable_restaked_gwei += closed.pod_balance_gwei;
        closed.pod_balance_gwei as i64 + closed.balance_deltas_gwei
    }

    pub fn checkpoint(&self) -> CheckpointRecord {
        self.checkpoint
    }

    pub fn last_checkpoint_timestamp(&self) -> Timestamp {
        self.last_checkpoint_timestamp
    }

    pub fn balance_exited_gwei(&self, timestamp: Timestamp) -> Gwei {
        self.exited_gwei.get(&timestamp).copied().unwrap_or(0)
    }

    pub fn active_validators(&self) -> u64 {
        self.active_validators
    }

    pub fn validator_status(&self, pubkey_hash: &PubkeyHash) -> ValidatorStatus {
        self.by_hash
            .get(pubkey_hash)
            .and_then(|id| self.validators.get(id))
            .map(|v| v.status)
            .unwrap_or_default()
    }

    pub fn validator(&self, id: ValidatorId) -> Option<&PodValidator> {
        self.validators.get(&id)
    }

    pub fn validator_ids(&self) -> Vec<ValidatorId> {
        self.validators.keys().copied().collect()
    }
}
