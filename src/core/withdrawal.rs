//! Withdrawal queue model: content-addressed withdrawal identity and pending/completable/completed tracking.
//!
//! # Identity
//! The root is SHA-256 over a canonical, length-prefixed encoding of every field. Two withdrawals with identical fields
//! always share a root; they represent the same logical request. The nonce makes successive requests from the same
//! staker distinct.
//!
//! # Completion
//! The per-strategy delay is queried from the ledger. A withdrawal becomes completable at
//! `start_block + max(delay(strategy))` over its strategy list.

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

use crate::core::actor::ActorId;
use crate::core::ledger::{BlockNumber, LedgerRead};
use crate::core::query::LedgerQuery;
use crate::core::strategy::Strategy;

/// Domain separator for withdrawal roots.
const WITHDRAWAL_ROOT_DOMAIN: &[u8] = b"restake-harness/withdrawal/v1";

/// Content hash identifying a withdrawal request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WithdrawalRoot(pub [u8; 32]);

impl WithdrawalRoot {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for WithdrawalRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

/// A queued withdrawal. Immutable once queued; `strategies[i]` pairs with `shares[i]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Withdrawal {
    pub staker: ActorId,
    /// Operator the staker was delegated to when the withdrawal was queued.
    pub delegated_to: Option<ActorId>,
    pub withdrawer: ActorId,
    pub nonce: u64,
    pub start_block: BlockNumber,
    pub strategies: Vec<Strategy>,
    pub shares: Vec<u128>,
}

impl Withdrawal {
    pub fn root(&self) -> WithdrawalRoot {
        compute_identity(self)
    }
}

fn put_str(buf: &mut BytesMut, s: &str) {
    buf.put_u32(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

/// Computes the withdrawal root.
pub fn compute_identity(withdrawal: &Withdrawal) -> WithdrawalRoot {
    let mut buf = BytesMut::with_capacity(256);
    buf.put_slice(WITHDRAWAL_ROOT_DOMAIN);
    put_str(&mut buf, &withdrawal.staker);
    match &withdrawal.delegated_to {
        Some(operator) => {
            buf.put_u8(1);
            put_str(&mut buf, operator);
        }
        None => buf.put_u8(0),
    }
    put_str(&mut buf, &withdrawal.withdrawer);
    buf.put_u64(withdrawal.nonce);
    buf.put_u64(withdrawal.start_block);
    buf.put_u32(withdrawal.strategies.len() as u32);
    for strategy in &withdrawal.strategies {
        put_str(&mut buf, &strategy.as_canonical());
    }
    buf.put_u32(withdrawal.shares.len() as u32);
    for shares in &withdrawal.shares {
        buf.put_u128(*shares);
    }

    let digest = Sha256::digest(&buf[..]);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    WithdrawalRoot(out)
}

/// Longest per-strategy delay across the withdrawal's strategies.
pub fn max_delay_blocks<L: LedgerRead + ?Sized>(query: &LedgerQuery<'_, L>, withdrawal: &Withdrawal) -> BlockNumber {
    withdrawal
        .strategies
        .iter()
        .map(|s| query.withdrawal_delay_blocks(s))
        .max()
        .unwrap_or(0)
}

/// First block at which the withdrawal may be completed.
pub fn completable_at<L: LedgerRead + ?Sized>(query: &LedgerQuery<'_, L>, withdrawal: &Withdrawal) -> BlockNumber {
    withdrawal
        .start_block
        .saturating_add(max_delay_blocks(query, withdrawal))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WithdrawalStatus {
    /// Queued, delay window still open.
    Pending,
    /// Queued and past its delay window.
    Completable,
    Completed,
}

/// Scenario-side bookkeeping of withdrawals the harness has queued.
#[derive(Debug, Clone, Default)]
pub struct WithdrawalQueue {
    entries: BTreeMap<WithdrawalRoot, Withdrawal>,
}

impl WithdrawalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking a withdrawal; returns its root.
    pub fn track(&mut self, withdrawal: Withdrawal) -> WithdrawalRoot {
        let root = compute_identity(&withdrawal);
        self.entries.insert(root, withdrawal);
        root
    }

    pub fn get(&self, root: &WithdrawalRoot) -> Option<&Withdrawal> {
        self.entries.get(root)
    }

    pub fn roots(&self) -> impl Iterator<Item = &WithdrawalRoot> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Status of a tracked withdrawal as seen by the ledger; `None` if untracked.
    pub fn status<L: LedgerRead + ?Sized>(
        &self,
        query: &LedgerQuery<'_, L>,
        root: &WithdrawalRoot,
    ) -> Option<WithdrawalStatus> {
        let withdrawal = self.entries.get(root)?;
        if !query.withdrawal_pending(root) {
            return Some(WithdrawalStatus::Completed);
        }
        if query.block_number() >= completable_at(query, withdrawal) {
            Some(WithdrawalStatus::Completable)
        } else {
            Some(WithdrawalStatus::Pending)
        }
    }

    /// Tracked withdrawals still pending on the ledger, sorted by root.
    pub fn pending<L: LedgerRead + ?Sized>(&self, query: &LedgerQuery<'_, L>) -> Vec<Withdrawal> {
        self.entries
            .iter()
            .filter(|(root, _)| query.withdrawal_pending(root))
            .map(|(_, w)| w.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn withdrawal(nonce: u64) -> Withdrawal {
        Withdrawal {
            staker: "alice".to_string(),
            delegated_to: Some("op".to_string()),
            withdrawer: "alice".to_string(),
            nonce,
            start_block: 10,
            strategies: vec![Strategy::Fungible("stETH".to_string()), Strategy::NativeStake],
            shares: vec![100, 32_000_000_000_000_000_000],
        }
    }

    #[test]
    fn test_identity_is_deterministic() {
        let a = withdrawal(0);
        let b = withdrawal(0);
        assert_eq!(compute_identity(&a), compute_identity(&b));
        assert_eq!(a.root(), compute_identity(&a));
    }

    #[test]
    fn test_identity_differs_by_nonce() {
        assert_ne!(withdrawal(0).root(), withdrawal(1).root());
    }

    #[test]
    fn test_identity_covers_every_field() {
        let base = withdrawal(0);
        let mut w = base.clone();
        w.delegated_to = None;
        assert_ne!(w.root(), base.root());
        let mut w = base.clone();
        w.start_block = 11;
        assert_ne!(w.root(), base.root());
        let mut w = base.clone();
        w.shares[0] = 101;
        assert_ne!(w.root(), base.root());
        let mut w = base.clone();
        w.strategies.reverse();
        assert_ne!(w.root(), base.root());
        let mut w = base.clone();
        w.withdrawer = "bob".to_string();
        assert_ne!(w.root(), base.root());
    }

    #[test]
    fn test_length_prefix_prevents_field_shifting() {
        let mut a = withdrawal(0);
        let mut b = withdrawal(0);
        a.staker = "ab".to_string();
        a.withdrawer = "c".to_string();
        b.staker = "a".to_string();
        b.withdrawer = "bc".to_string();
        assert_ne!(a.root(), b.root());
    }

    #[test]
    fn test_root_hex_display() {
        let root = withdrawal(0).root();
        let shown = root.to_string();
        assert!(shown.starts_with("0x"));
        assert_eq!(shown.len(), 66);
    }
}
