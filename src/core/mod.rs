// Core of the differential verification harness.
//
// A scenario creates actors (factory), mutates the ledger through `Harness::step` (which pushes a snapshot first), then
// runs differential checks (assertions) that compare the present against that snapshot through a guarded round trip.
//
// INVARIANTS:
// - The ledger handle is owned by the harness and passed explicitly to every read; there is no ambient global state.
// - A round trip to the past never outlives the method that started it; the ledger is back in the present whenever
//   control returns to the caller.
// - Execution is single-threaded and deterministic for a given seed.

pub mod actor;
pub mod assertions;
pub mod checkpoint;
pub mod checks;
pub mod factory;
pub mod ledger;
pub mod query;
pub mod shares;
pub mod snapshot;
pub mod strategy;
pub mod withdrawal;

use tracing::{info, warn};

use crate::config::HarnessConfig;
use crate::core::ledger::{BlockNumber, Ledger, LedgerError, SnapshotId};
use crate::core::query::LedgerQuery;
use crate::core::snapshot::SnapshotStore;
use crate::core::strategy::StrategyRegistry;
use crate::core::withdrawal::{completable_at, Withdrawal};
use crate::error::{HarnessError, Result};

/// Verification context: ledger handle, snapshot store, strategy registry and configuration.
#[derive(Debug)]
pub struct Harness<L: Ledger> {
    ledger: L,
    snapshots: SnapshotStore,
    /// Frame pushed by the latest `step`; released when the next step starts.
    step_frame: Option<SnapshotId>,
    registry: StrategyRegistry,
    config: HarnessConfig,
}

impl<L: Ledger> Harness<L> {
    /// Creates a harness over `ledger`. Fails if the configuration is invalid.
    pub fn new(ledger: L, registry: StrategyRegistry, config: HarnessConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            ledger,
            snapshots: SnapshotStore::new(),
            step_frame: None,
            registry,
            config,
        })
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Direct ledger access for setup that should not push a snapshot.
    pub fn ledger_mut(&mut self) -> &mut L {
        &mut self.ledger
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    /// Read view of the present state.
    pub fn query(&self) -> LedgerQuery<'_, L> {
        LedgerQuery::new(&self.ledger, &self.registry)
    }

    pub fn take_snapshot(&mut self) -> SnapshotId {
        self.snapshots.take(&mut self.ledger)
    }

    /// Discards the most recent snapshot and releases it on the ledger.
    pub fn pop_snapshot(&mut self) -> Option<SnapshotId> {
        let id = self.snapshots.pop(&mut self.ledger)?;
        if self.step_frame == Some(id) {
            self.step_frame = None;
        }
        Some(id)
    }

    /// Runs `read` against the state at the last snapshot, then returns to the present (on every path).
    pub fn with_previous<T>(&mut self, read: impl FnOnce(LedgerQuery<'_, L>) -> Result<T>) -> Result<T> {
        let warp = self.snapshots.warp_to_last(&mut self.ledger)?;
        let out = read(LedgerQuery::new(warp.state(), &self.registry));
        warp.finish()?;
        out
    }

    /// Takes a snapshot, then applies one ledger mutation. Rejections are propagated unchanged. The previous step's
    /// frame is released first; snapshots taken with `take_snapshot` stay until popped.
    pub fn step<T>(
        &mut self,
        label: &str,
        action: impl FnOnce(&mut L) -> std::result::Result<T, LedgerError>,
    ) -> Result<T> {
        if let Some(previous) = self.step_frame.take() {
            self.snapshots.discard(&mut self.ledger, previous);
        }
        let snapshot = self.take_snapshot();
        self.step_frame = Some(snapshot);
        info!(step = label, %snapshot, "ledger step");
        action(&mut self.ledger).map_err(|e| {
            warn!(step = label, error = %e, "ledger rejected step");
            HarnessError::from(e)
        })
    }

    /// Advances blocks until every withdrawal in `withdrawals` is past its longest strategy delay. Returns the number
    /// of blocks advanced.
    pub fn advance_to_completable(&mut self, withdrawals: &[Withdrawal]) -> BlockNumber {
        let query = self.query();
        let target = withdrawals
            .iter()
            .map(|w| completable_at(&query, w))
            .max()
            .unwrap_or(0);
        let current = query.block_number();
        if target > current {
            let blocks = target - current;
            self.ledger.advance_blocks(blocks);
            info!(blocks, target, "advanced past withdrawal delay");
            blocks
        } else {
            0
        }
    }

    pub fn into_ledger(self) -> L {
        self.ledger
    }
}
