//! Checkpoint and validator state tracker for the native-stake pseudo-strategy.
//!
//! # Checkpoint lifecycle
//! `NoCheckpoint --start--> Active { proofs_remaining = active validators }`. Each accepted balance proof decrements
//! `proofs_remaining` and folds the validator's balance change into the checkpoint; a proof reporting a zero balance
//! marks the validator exited and adds its previous restaked balance to `balance_exited_gwei`. At zero proofs
//! remaining the checkpoint finalizes: the current timestamp resets to 0, `last_checkpoint_timestamp` advances to the
//! closed checkpoint's timestamp, and `pod_balance_gwei` is credited to the withdrawable accumulator. A checkpoint over
//! zero active validators finalizes as soon as it starts.
//!
//! # Validator lifecycle
//! `Inactive -> Active -> Withdrawn`, forward only.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::core::actor::ActorId;
use crate::core::ledger::{CheckpointRecord, Gwei, LedgerRead, Timestamp};
use crate::core::query::LedgerQuery;
use crate::error::HarnessError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ValidatorStatus {
    #[default]
    Inactive,
    Active,
    Withdrawn,
}

impl fmt::Display for ValidatorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidatorStatus::Inactive => write!(f, "INACTIVE"),
            ValidatorStatus::Active => write!(f, "ACTIVE"),
            ValidatorStatus::Withdrawn => write!(f, "WITHDRAWN"),
        }
    }
}

/// Events that move a validator through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidatorEvent {
    /// Withdrawal credentials verified against the pod.
    Registered,
    /// Voluntary full exit proven.
    FullExit,
    /// Slashed, force-exited and proven.
    Slashed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Invalid validator transition: {from} on {event:?}")]
    InvalidValidatorTransition {
        from: ValidatorStatus,
        event: ValidatorEvent,
    },

    #[error("Checkpoint already active at {0}")]
    CheckpointActive(Timestamp),

    #[error("No active checkpoint")]
    NoActiveCheckpoint,

    #[error("Checkpoint timestamp {requested} must be after last checkpoint {last}")]
    StaleTimestamp { requested: Timestamp, last: Timestamp },

    #[error("Exit proven with no active validators")]
    NoActiveValidators,
}

impl From<TransitionError> for HarnessError {
    fn from(err: TransitionError) -> Self {
        HarnessError::Domain(format!("Checkpoint tracker: {}", err))
    }
}

impl ValidatorStatus {
    /// Applies a lifecycle event; any transition other than `Inactive -> Active` or `Active -> Withdrawn` is rejected.
    pub fn apply(self, event: ValidatorEvent) -> Result<ValidatorStatus, TransitionError> {
        match (self, event) {
            (ValidatorStatus::Inactive, ValidatorEvent::Registered) => Ok(ValidatorStatus::Active),
            (ValidatorStatus::Active, ValidatorEvent::FullExit)
            | (ValidatorStatus::Active, ValidatorEvent::Slashed) => Ok(ValidatorStatus::Withdrawn),
            (from, event) => Err(TransitionError::InvalidValidatorTransition { from, event }),
        }
    }

    pub fn can_transition_to(self, to: ValidatorStatus) -> bool {
        matches!(
            (self, to),
            (ValidatorStatus::Inactive, ValidatorStatus::Active)
                | (ValidatorStatus::Active, ValidatorStatus::Withdrawn)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckpointPhase {
    NoCheckpoint,
    Active {
        timestamp: Timestamp,
        proofs_remaining: u64,
        pod_balance_gwei: Gwei,
        balance_deltas_gwei: i64,
        balance_exited_gwei: Gwei,
    },
}

impl From<CheckpointRecord> for CheckpointPhase {
    fn from(record: CheckpointRecord) -> Self {
        if record.is_active() {
            CheckpointPhase::Active {
                timestamp: record.timestamp,
                proofs_remaining: record.proofs_remaining,
                pod_balance_gwei: record.pod_balance_gwei,
                balance_deltas_gwei: record.balance_deltas_gwei,
                balance_exited_gwei: record.balance_exited_gwei,
            }
        } else {
            CheckpointPhase::NoCheckpoint
        }
    }
}

/// What a finalized checkpoint did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizedCheckpoint {
    pub timestamp: Timestamp,
    /// Pod balance credited to the withdrawable accumulator.
    pub credited_gwei: Gwei,
    /// Native share change: pod balance plus the sum of proven balance deltas.
    pub share_delta_gwei: i64,
    pub balance_exited_gwei: Gwei,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofOutcome {
    pub balance_delta_gwei: i64,
    /// Restaked balance retired by this proof; non-zero only when the validator exited.
    pub exited_gwei: Gwei,
    pub finalized: Option<FinalizedCheckpoint>,
}

/// Local model of one pod's checkpoint lifecycle, used to predict what the ledger should report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointModel {
    phase: CheckpointPhase,
    last_checkpoint_timestamp: Timestamp,
    withdrawable_gwei: Gwei,
    active_validators: u64,
}

impl CheckpointModel {
    pub fn new(active_validators: u64) -> Self {
        Self {
            phase: CheckpointPhase::NoCheckpoint,
            last_checkpoint_timestamp: 0,
            withdrawable_gwei: 0,
            active_validators,
        }
    }

    /// Reads the model from the ledger's current view of `owner`'s pod.
    pub fn from_ledger<L: LedgerRead + ?Sized>(query: &LedgerQuery<'_, L>, owner: &ActorId) -> Self {
        Self {
            phase: CheckpointPhase::from(query.checkpoint(owner)),
            last_checkpoint_timestamp: query.last_checkpoint_timestamp(owner),
            withdrawable_gwei: query.withdrawable_gwei(owner),
            active_validators: query.active_validator_count(owner),
        }
    }

    pub fn phase(&self) -> CheckpointPhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        matches!(self.phase, CheckpointPhase::Active { .. })
    }

    /// Timestamp of the active checkpoint, or 0.
    pub fn current_timestamp(&self) -> Timestamp {
        match self.phase {
            CheckpointPhase::Active { timestamp, .. } => timestamp,
            CheckpointPhase::NoCheckpoint => 0,
        }
    }

    pub fn proofs_remaining(&self) -> Option<u64> {
        match self.phase {
            CheckpointPhase::Active { proofs_remaining, .. } => Some(proofs_remaining),
            CheckpointPhase::NoCheckpoint => None,
        }
    }

    pub fn last_checkpoint_timestamp(&self) -> Timestamp {
        self.last_checkpoint_timestamp
    }

    pub fn withdrawable_gwei(&self) -> Gwei {
        self.withdrawable_gwei
    }

    pub fn active_validators(&self) -> u64 {
        self.active_validators
    }

    /// Opens a checkpoint. Finalizes immediately when there are no active validators.
    pub fn start(
        &mut self,
        timestamp: Timestamp,
        pod_balance_gwei: Gwei,
    ) -> Result<Option<FinalizedCheckpoint>, TransitionError> {
        if let CheckpointPhase::Active { timestamp: active, .. } = self.phase {
            return Err(TransitionError::CheckpointActive(active));
        }
        if timestamp <= self.last_checkpoint_timestamp {
            return Err(TransitionError::StaleTimestamp {
                requested: timestamp,
                last: self.last_checkpoint_timestamp,
            });
        }
        self.phase = CheckpointPhase::Active {
            timestamp,
            proofs_remaining: self.active_validators,
            pod_balance_gwei,
            balance_deltas_gwei: 0,
            balance_exited_gwei: 0,
        };
        if self.active_validators == 0 {
            return Ok(Some(self.finalize()));
        }
        Ok(None)
    }

    /// Applies one accepted proof moving a validator from `prev_balance_gwei` to `new_balance_gwei`.
    pub fn prove(&mut self, prev_balance_gwei: Gwei, new_balance_gwei: Gwei) -> Result<ProofOutcome, TransitionError> {
        if !self.is_active() {
            return Err(TransitionError::NoActiveCheckpoint);
        }
        if new_balance_gwei == 0 && self.active_validators == 0 {
            return Err(TransitionError::NoActiveValidators);
        }
        let exited_gwei = if new_balance_gwei == 0 { prev_balance_gwei } else { 0 };
        let balance_delta_gwei = new_balance_gwei as i64 - prev_balance_gwei as i64;

        match &mut self.phase {
            CheckpointPhase::NoCheckpoint => return Err(TransitionError::NoActiveCheckpoint),
            CheckpointPhase::Active {
                proofs_remaining,
                balance_deltas_gwei,
                balance_exited_gwei,
                ..
            } => {
                *proofs_remaining = proofs_remaining.saturating_sub(1);
                *balance_deltas_gwei += balance_delta_gwei;
                *balance_exited_gwei += exited_gwei;
            }
        }
        if new_balance_gwei == 0 {
            self.active_validators -= 1;
        }

        let finalized = match self.phase {
            CheckpointPhase::Active { proofs_remaining: 0, .. } => Some(self.finalize()),
            _ => None,
        };
        Ok(ProofOutcome {
            balance_delta_gwei,
            exited_gwei,
            finalized,
        })
    }

    fn finalize(&mut self) -> FinalizedCheckpoint {
        let closed = std::mem::replace(&mut self.phase, CheckpointPhase::NoCheckpoint);
        match closed {
            CheckpointPhase::Active {
                timestamp,
                pod_balance_gwei,
                balance_deltas_gwei,
                balance_exited_gwei,
                ..
            } => {
                self.last_checkpoint_timestamp = timestamp;
                self.withdrawable_gwei += pod_balance_gwei;
                FinalizedCheckpoint {
                    timestamp,
                    credited_gwei: pod_balance_gwei,
                    share_delta_gwei: pod_balance_gwei as i64 + balance_deltas_gwei,
                    balance_exited_gwei,
                }
            }
            CheckpointPhase::NoCheckpoint => FinalizedCheckpoint {
                timestamp: self.last_checkpoint_timestamp,
                credited_gwei: 0,
                share_delta_gwei: 0,
                balance_exited_gwei: 0,
            },
        }
    }
}

/// Checkpoint timestamp under which exited balance is recorded, given the active checkpoint timestamp at the last
/// snapshot and now.
///
/// If they differ, the checkpoint active at the snapshot is the one that recorded the exit (it has just closed), so
/// its timestamp is used rather than the current one.
pub fn exited_balance_lookup_timestamp(previous_current: Timestamp, current: Timestamp) -> Timestamp {
    if current != previous_current {
        previous_current
    } else {
        current
    }
}
