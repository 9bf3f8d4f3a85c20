//! Share and unit accounting shared by the assertion engine and the reference backend.
//!
//! # Units
//! Native-stake shares are denominated in wei; validator and checkpoint balances are in gwei (1 gwei = 10^9 wei).
//!
//! # Delegatable shares
//! Native-stake shares are signed. Only the positive part is visible to the delegation layer, so the change in an operator's
//! native shares is derived from the staker's signed shares before and after an update with `delegatable_share_delta`.

/// Wei per gwei.
pub const GWEI_TO_WEI: u128 = 1_000_000_000;

/// Balance of one full validator (32 ETH) in gwei.
pub const VALIDATOR_BALANCE_GWEI: u64 = 32_000_000_000;

/// Balance of one full validator (32 ETH) in wei.
pub const VALIDATOR_BALANCE_WEI: u128 = VALIDATOR_BALANCE_GWEI as u128 * GWEI_TO_WEI;

/// Rounding tolerance applied to share and balance comparisons (integer-division truncation in share-price conversions).
pub const SHARE_TOLERANCE: u128 = 1;

/// Tolerance for counts, statuses and timestamps.
pub const EXACT: u128 = 0;

pub fn gwei_to_wei(gwei: u64) -> u128 {
    gwei as u128 * GWEI_TO_WEI
}

/// Truncating wei to gwei conversion.
pub fn wei_to_gwei(wei: u128) -> u64 {
    (wei / GWEI_TO_WEI).min(u64::MAX as u128) as u64
}

pub fn signed_gwei_to_wei(gwei: i64) -> i128 {
    gwei as i128 * GWEI_TO_WEI as i128
}

/// Change in delegatable shares when signed shares move from `before` to `after`.
///
/// - both non-positive: 0 (a deficit growing or staying grants no visible shares)
/// - non-positive to positive: `after` (only the above-zero portion becomes visible)
/// - positive to non-positive: `-before` (all previously visible shares disappear)
/// - both positive: `after - before`
pub fn delegatable_share_delta(before: i128, after: i128) -> i128 {
    if before <= 0 {
        if after <= 0 {
            0
        } else {
            after
        }
    } else if after <= 0 {
        -before
    } else {
        after - before
    }
}

/// Shares visible to the delegation layer.
pub fn delegatable_shares(signed: i128) -> u128 {
    if signed > 0 {
        signed as u128
    } else {
        0
    }
}

/// `|previous + delta - current| <= tolerance`, without overflow.
pub fn within_tolerance(previous: i128, delta: i128, current: i128, tolerance: u128) -> bool {
    match previous.checked_add(delta).and_then(|e| e.checked_sub(current)) {
        Some(diff) => diff.unsigned_abs() <= tolerance,
        None => false,
    }
}

/// Applies a signed delta to an unsigned quantity; `None` on underflow or overflow.
pub fn apply_signed(value: u128, delta: i128) -> Option<u128> {
    if delta >= 0 {
        value.checked_add(delta as u128)
    } else {
        value.checked_sub(delta.unsigned_abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delegatable_delta_regions() {
        assert_eq!(delegatable_share_delta(-10, -3), 0);
        assert_eq!(delegatable_share_delta(-10, -20), 0);
        assert_eq!(delegatable_share_delta(0, 0), 0);
        assert_eq!(delegatable_share_delta(-10, 4), 4);
        assert_eq!(delegatable_share_delta(0, 7), 7);
        assert_eq!(delegatable_share_delta(10, 15), 5);
        assert_eq!(delegatable_share_delta(10, 2), -8);
    }

    #[test]
    fn test_slash_below_zero_only_removes_visible_shares() {
        // shares 5, slash of 8: shares end at -3 but only 5 were ever delegated
        assert_eq!(delegatable_share_delta(5, 5 - 8), -5);
    }

    #[test]
    fn test_unit_conversions() {
        assert_eq!(gwei_to_wei(1), 1_000_000_000);
        assert_eq!(wei_to_gwei(VALIDATOR_BALANCE_WEI), VALIDATOR_BALANCE_GWEI);
        assert_eq!(wei_to_gwei(1_999_999_999), 1);
        assert_eq!(signed_gwei_to_wei(-2), -2_000_000_000);
    }

    #[test]
    fn test_within_tolerance() {
        assert!(within_tolerance(100, 10, 110, 0));
        assert!(within_tolerance(100, 10, 109, 1));
        assert!(!within_tolerance(100, 10, 108, 1));
        assert!(within_tolerance(100, -10, 91, 1));
        assert!(!within_tolerance(i128::MAX, 1, 0, 1));
    }

    #[test]
    fn test_apply_signed() {
        assert_eq!(apply_signed(10, 5), Some(15));
        assert_eq!(apply_signed(10, -10), Some(0));
        assert_eq!(apply_signed(10, -11), None);
        assert_eq!(delegatable_shares(-4), 0);
        assert_eq!(delegatable_shares(4), 4);
    }
}
