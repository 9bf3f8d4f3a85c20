//! Collaborator contracts consumed by the harness: ledger reads, ledger mutations, the consensus source, and global
//! time/state control.
//!
//! The harness never talks to a concrete backend directly. Every query and mutation goes through an explicitly passed
//! handle implementing these traits, so the engine runs unchanged against the in-process reference backend (`sim`)
//! or any other implementation of the same interface.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::core::actor::{ActorId, ValidatorId};
use crate::core::checkpoint::ValidatorStatus;
use crate::core::strategy::{Strategy, TokenId};
use crate::core::withdrawal::{Withdrawal, WithdrawalRoot};
use crate::error::HarnessError;

pub type Gwei = u64;
pub type Wei = u128;
pub type BlockNumber = u64;
/// Seconds. Zero means "none" in checkpoint fields.
pub type Timestamp = u64;

/// Opaque id of a recorded global-state instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotId(pub u64);

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// SHA-256 hash of a validator public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PubkeyHash(pub [u8; 32]);

impl fmt::Display for PubkeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Active checkpoint record of a pod. `timestamp == 0` means no checkpoint is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub timestamp: Timestamp,
    /// Execution-layer pod balance not yet credited when the checkpoint started.
    pub pod_balance_gwei: Gwei,
    pub proofs_remaining: u64,
    /// Sum of per-validator balance changes proven so far.
    pub balance_deltas_gwei: i64,
    /// Restaked balance of validators proven exited during this checkpoint.
    pub balance_exited_gwei: Gwei,
}

impl CheckpointRecord {
    pub fn is_active(&self) -> bool {
        self.timestamp != 0
    }
}

/// Balance proof for one validator against a beacon state. Validity of the underlying cryptography is the
/// collaborator's concern; the harness only forwards it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceProof {
    pub validator: ValidatorId,
    pub pubkey_hash: PubkeyHash,
    pub balance_gwei: Gwei,
    pub beacon_timestamp: Timestamp,
}

/// Rejections reported by ledger and consensus collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: u128, available: u128 },

    #[error("Insufficient shares in {strategy}: required {required}, available {available}")]
    InsufficientShares {
        strategy: Strategy,
        required: u128,
        available: i128,
    },

    #[error("Unknown strategy: {0}")]
    UnknownStrategy(Strategy),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Not an operator: {0}")]
    NotOperator(ActorId),

    #[error("Already delegated: {0}")]
    AlreadyDelegated(ActorId),

    #[error("Not delegated: {0}")]
    NotDelegated(ActorId),

    #[error("Withdrawal not pending: {0}")]
    WithdrawalNotPending(WithdrawalRoot),

    #[error("Withdrawal delay not elapsed: completable at block {completable_at}, current block {current}")]
    WithdrawalDelayNotElapsed {
        completable_at: BlockNumber,
        current: BlockNumber,
    },

    #[error("No pod for actor: {0}")]
    NoPod(ActorId),

    #[error("Checkpoint already active at {0}")]
    CheckpointActive(Timestamp),

    #[error("No active checkpoint")]
    NoActiveCheckpoint,

    #[error("Proof rejected: {0}")]
    ProofRejected(String),

    #[error("Unknown validator: {0}")]
    UnknownValidator(ValidatorId),

    #[error("Unknown snapshot: {0}")]
    UnknownSnapshot(SnapshotId),

    #[error("Ledger error: {0}")]
    Other(String),
}

impl From<LedgerError> for HarnessError {
    fn from(err: LedgerError) -> Self {
        HarnessError::Collaborator(err)
    }
}

/// Read side of the ledger. Every accessor is total: unknown actors/strategies read as zero/empty.
pub trait LedgerRead {
    /// Staker shares; fungible strategies are never negative, native stake may be.
    fn staker_shares(&self, staker: &ActorId, strategy: &Strategy) -> Result<i128, LedgerError>;

    fn operator_shares(&self, operator: &ActorId, strategy: &Strategy) -> Result<u128, LedgerError>;

    /// Total shares of a fungible strategy.
    fn total_shares(&self, token: &TokenId) -> Result<u128, LedgerError>;

    fn shares_to_underlying(&self, token: &TokenId, shares: u128) -> Result<u128, LedgerError>;

    fn underlying_to_shares(&self, token: &TokenId, amount: u128) -> Result<u128, LedgerError>;

    fn token_balance(&self, actor: &ActorId, token: &TokenId) -> u128;

    fn eth_balance(&self, actor: &ActorId) -> Wei;

    fn delegated_to(&self, staker: &ActorId) -> Option<ActorId>;

    fn is_operator(&self, actor: &ActorId) -> bool;

    fn withdrawal_pending(&self, root: &WithdrawalRoot) -> bool;

    /// Number of withdrawals the staker has ever queued (next withdrawal nonce).
    fn withdrawal_nonce(&self, staker: &ActorId) -> u64;

    fn withdrawal_delay_blocks(&self, strategy: &Strategy) -> BlockNumber;

    fn checkpoint(&self, owner: &ActorId) -> CheckpointRecord;

    fn last_checkpoint_timestamp(&self, owner: &ActorId) -> Timestamp;

    fn checkpoint_balance_exited_gwei(&self, owner: &ActorId, timestamp: Timestamp) -> Gwei;

    /// Execution-layer balance already credited by finalized checkpoints and available to native withdrawals.
    fn withdrawable_restaked_gwei(&self, owner: &ActorId) -> Gwei;

    fn validator_status(&self, owner: &ActorId, pubkey_hash: &PubkeyHash) -> ValidatorStatus;

    fn active_validator_count(&self, owner: &ActorId) -> u64;

    fn pod_validators(&self, owner: &ActorId) -> Vec<ValidatorId>;

    fn block_number(&self) -> BlockNumber;

    fn timestamp(&self) -> Timestamp;
}

/// Mutation side of the ledger.
pub trait LedgerWrite {
    /// Test faucet for underlying tokens.
    fn mint(&mut self, actor: &ActorId, token: &TokenId, amount: u128) -> Result<(), LedgerError>;

    /// Test faucet for native ETH.
    fn deal_eth(&mut self, actor: &ActorId, amount: Wei) -> Result<(), LedgerError>;

    /// Deposits `amount` underlying; for native stake, starts validators from `amount` wei and verifies their
    /// withdrawal credentials. Returns the shares credited.
    fn deposit(&mut self, staker: &ActorId, strategy: &Strategy, amount: u128) -> Result<u128, LedgerError>;

    /// Moves 32 ETH chunks of the actor's ETH into new validators (status Inactive in the pod).
    fn start_validators(&mut self, owner: &ActorId, amount: Wei) -> Result<Vec<ValidatorId>, LedgerError>;

    /// Registers validators with the pod (Inactive -> Active) and credits their balance as native shares.
    fn verify_withdrawal_credentials(
        &mut self,
        owner: &ActorId,
        validators: &[ValidatorId],
    ) -> Result<u128, LedgerError>;

    fn queue_withdrawal(
        &mut self,
        staker: &ActorId,
        strategies: &[Strategy],
        shares: &[u128],
    ) -> Result<Withdrawal, LedgerError>;

    fn complete_withdrawal(&mut self, root: &WithdrawalRoot, receive_as_tokens: bool) -> Result<(), LedgerError>;

    fn register_operator(&mut self, actor: &ActorId) -> Result<(), LedgerError>;

    fn delegate(&mut self, staker: &ActorId, operator: &ActorId) -> Result<(), LedgerError>;

    /// Removes the delegation, queueing one withdrawal per strategy with shares.
    fn undelegate(&mut self, staker: &ActorId) -> Result<Vec<Withdrawal>, LedgerError>;

    fn start_checkpoint(&mut self, owner: &ActorId) -> Result<(), LedgerError>;

    fn submit_balance_proof(&mut self, owner: &ActorId, proof: &BalanceProof) -> Result<(), LedgerError>;
}

/// Simulated consensus layer producing validator balances.
pub trait ConsensusSource {
    /// Rewards every live validator, then sweeps withdrawals to pods.
    fn advance_epoch(&mut self);

    /// Sweeps withdrawals without rewards.
    fn advance_epoch_no_rewards(&mut self);

    /// Rewards without sweeping withdrawals.
    fn advance_epoch_no_withdraw(&mut self);

    /// Slashes and force-exits validators; returns the total gwei lost.
    fn slash_validators(&mut self, validators: &[ValidatorId]) -> Result<Gwei, LedgerError>;

    /// Initiates full exits; returns the total exiting balance in gwei.
    fn exit_validators(&mut self, validators: &[ValidatorId]) -> Result<Gwei, LedgerError>;

    fn pubkey_hashes(&self, validators: &[ValidatorId]) -> Result<Vec<PubkeyHash>, LedgerError>;

    fn validator_balance_gwei(&self, validator: ValidatorId) -> Result<Gwei, LedgerError>;

    fn balance_proof(&self, validator: ValidatorId) -> Result<BalanceProof, LedgerError>;
}

/// Global time and state control.
pub trait StateControl {
    fn snapshot(&mut self) -> SnapshotId;

    /// Reverts all state to `id`. The snapshot stays available.
    fn revert_to(&mut self, id: SnapshotId) -> Result<(), LedgerError>;

    /// Frees a snapshot that will never be reverted to again.
    fn release(&mut self, _id: SnapshotId) {}

    fn advance_blocks(&mut self, blocks: u64);

    fn advance_time(&mut self, seconds: u64);
}

/// Everything the harness needs from a backend.
pub trait Ledger: LedgerRead + LedgerWrite + ConsensusSource + StateControl {}

impl<T> Ledger for T where T: LedgerRead + LedgerWrite + ConsensusSource + StateControl {}
