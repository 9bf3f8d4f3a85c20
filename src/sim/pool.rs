//! Fungible strategy pool: pooled underlying balance and the share supply issued against it.
//!
//! # Invariants
//! - Conversions use virtual offsets on both sides, so a fresh pool converts 1:1 and an inflation attack on an empty
//!   pool costs the attacker the offset.
//! - Conversions round down. A deposit followed by a full withdrawal returns at most the deposit.

use crate::core::ledger::LedgerError;

/// Virtual shares added to the supply in conversions.
pub const SHARES_OFFSET: u128 = 1_000;

/// Virtual underlying added to the balance in conversions.
pub const BALANCE_OFFSET: u128 = 1_000;

/// `a * b / c`, rounding down. `None` on overflow or zero divisor.
pub fn mul_div_down(a: u128, b: u128, c: u128) -> Option<u128> {
    if c == 0 {
        return None;
    }
    a.checked_mul(b)?.checked_div(c)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pool {
    pub total_shares: u128,
    /// Underlying tokens held by the strategy.
    pub balance: u128,
}

impl Pool {
    pub fn underlying_to_shares(&self, amount: u128) -> Result<u128, LedgerError> {
        let supply = self.total_shares.saturating_add(SHARES_OFFSET);
        let balance = self.balance.saturating_add(BALANCE_OFFSET);
        mul_div_down(amount, supply, balance)
            .ok_or_else(|| LedgerError::Other(format!("share conversion overflow for amount {}", amount)))
    }

    pub fn shares_to_underlying(&self, shares: u128) -> Result<u128, LedgerError> {
        let supply = self.total_shares.saturating_add(SHARES_OFFSET);
        let balance = self.balance.saturating_add(BALANCE_OFFSET);
        mul_div_down(shares, balance, supply)
            .ok_or_else(|| LedgerError::Other(format!("share conversion overflow for {} shares", shares)))
    }

    /// Adds `amount` underlying and mints the corresponding shares, priced before the deposit.
    pub fn deposit(&mut self, amount: u128) -> Result<u128, LedgerError> {
        let shares = self.underlying_to_shares(amount)?;
        if shares == 0 {
            return Err(LedgerError::InvalidAmount(format!(
                "deposit of {} mints zero shares",
                amount
            )));
        }
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or_else(|| LedgerError::Other("pool balance overflow".to_string()))?;
        self.total_shares = self
            .total_shares
            .checked_add(shares)
            .ok_or_else(|| LedgerError::Other("share supply overflow".to_string()))?;
        Ok(shares)
    }

    /// Burns `shares` and releases the underlying they are worth, priced before the burn.
    pub fn withdraw(&mut self, shares: u128) -> Result<u128, LedgerError> {
        if shares > self.total_shares {
            return Err(LedgerError::Other(format!(
                "burn of {} shares exceeds supply {}",
                shares, self.total_shares
            )));
        }
        let amount = self.shares_to_underlying(shares)?.min(self.balance);
        self.total_shares -= shares;
        self.balance -= amount;
        Ok(amount)
    }

    /// Adds underlying without minting shares.
    pub fn add_yield(&mut self, amount: u128) {
        self.balance = self.balance.saturating_add(amount);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_pool_converts_one_to_one() {
        let pool = Pool::default();
        assert_eq!(pool.underlying_to_shares(500).unwrap(), 500);
        assert_eq!(pool.shares_to_underlying(500).unwrap(), 500);
    }

    #[test]
    fn test_deposit_then_withdraw_loses_at_most_one() {
        let mut pool = Pool::default();
        pool.deposit(1_000_000).unwrap();
        let shares = pool.deposit(777_777).unwrap();
        let back = pool.withdraw(shares).unwrap();
        assert!(back <= 777_777);
        assert!(777_777 - back <= 1);
    }

    #[test]
    fn test_withdraw_after_yield_never_exceeds_value() {
        let mut pool = Pool::default();
        pool.deposit(1_000_000).unwrap();
        pool.add_yield(333_333);
        let shares = pool.deposit(777_777).unwrap();
        let back = pool.withdraw(shares).unwrap();
        assert!(back <= 777_777);
        assert!(777_777 - back <= 2);
    }

    #[test]
    fn test_zero_share_deposit_rejected() {
        let mut pool = Pool::default();
        pool.deposit(1_000).unwrap();
        pool.add_yield(10_000_000);
        assert!(matches!(pool.deposit(1), Err(LedgerError::InvalidAmount(_))));
    }

    #[test]
    fn test_mul_div_down() {
        assert_eq!(mul_div_down(10, 3, 4), Some(7));
        assert_eq!(mul_div_down(1, 1, 0), None);
        assert_eq!(mul_div_down(u128::MAX, 2, 1), None);
    }
}
