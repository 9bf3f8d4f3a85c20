pub mod config;
pub mod core;
pub mod error;
pub mod scenario;
pub mod sim;
pub mod telemetry;

pub use config::HarnessConfig;
pub use error::{HarnessError, Result};

// Harness API exports
pub use core::Harness;
pub use core::actor::{Actor, ActorId, Role, ValidatorId};
pub use core::strategy::{Strategy, StrategyRegistry, TokenId};
pub use core::ledger::{
    BalanceProof,
    BlockNumber,
    CheckpointRecord,
    ConsensusSource,
    Gwei,
    Ledger,
    LedgerError,
    LedgerRead,
    LedgerWrite,
    PubkeyHash,
    SnapshotId,
    StateControl,
    Timestamp,
    Wei,
};
pub use core::query::LedgerQuery;
pub use core::snapshot::{SnapshotStore, TimeWarp};
pub use core::withdrawal::{
    compute_identity,
    completable_at,
    max_delay_blocks,
    Withdrawal,
    WithdrawalQueue,
    WithdrawalRoot,
    WithdrawalStatus,
};
pub use core::checkpoint::{
    exited_balance_lookup_timestamp,
    CheckpointModel,
    CheckpointPhase,
    FinalizedCheckpoint,
    ProofOutcome,
    TransitionError,
    ValidatorEvent,
    ValidatorStatus,
};
pub use core::shares::{
    apply_signed,
    delegatable_share_delta,
    delegatable_shares,
    gwei_to_wei,
    signed_gwei_to_wei,
    wei_to_gwei,
    within_tolerance,
    EXACT,
    GWEI_TO_WEI,
    SHARE_TOLERANCE,
    VALIDATOR_BALANCE_GWEI,
    VALIDATOR_BALANCE_WEI,
};
pub use core::factory::{deposit_all, ActorFactory, SubsetSampler};

// Reference backend and scenario runner
pub use sim::{SimLedger, World, GENESIS_BLOCK, GENESIS_TIMESTAMP};
pub use scenario::{Scenario, ScenarioReport};
pub use telemetry::init_tracing;
