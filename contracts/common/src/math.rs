//! Mathematical Utilities for isolend
//!
//! Fixed-point helpers with explicit rounding direction. Every product is
//! taken in 256-bit space before dividing, so intermediate values never
//! overflow for amounts that fit in `u128`.
//!
//! Rounding always favours the ledger: amounts the ledger receives round up,
//! amounts it pays out round down.

use alloy_primitives::U256;

use crate::constants::precision::WAD;
use crate::constants::shares::{VIRTUAL_ASSETS, VIRTUAL_SHARES};
use crate::errors::{IsolendError, IsolendResult};

// ============================================================================
// 256-bit Primitives
// ============================================================================

/// `x * y / d` rounded down
pub fn mul_div_down(x: U256, y: U256, d: U256) -> IsolendResult<U256> {
    if d.is_zero() {
        return Err(IsolendError::DivisionByZero);
    }
    let product = x.checked_mul(y).ok_or(IsolendError::Overflow)?;
    Ok(product / d)
}

/// `x * y / d` rounded up
pub fn mul_div_up(x: U256, y: U256, d: U256) -> IsolendResult<U256> {
    if d.is_zero() {
        return Err(IsolendError::DivisionByZero);
    }
    let product = x.checked_mul(y).ok_or(IsolendError::Overflow)?;
    let quotient = product / d;
    if (product % d).is_zero() {
        Ok(quotient)
    } else {
        Ok(quotient + U256::from(1u8))
    }
}

/// Narrow a 256-bit intermediate back to `u128`
pub fn to_u128(value: U256) -> IsolendResult<u128> {
    u128::try_from(value).map_err(|_| IsolendError::Overflow)
}

fn mul_div_down_u128(x: u128, y: u128, d: u128) -> IsolendResult<u128> {
    to_u128(mul_div_down(U256::from(x), U256::from(y), U256::from(d))?)
}

fn mul_div_up_u128(x: u128, y: u128, d: u128) -> IsolendResult<u128> {
    to_u128(mul_div_up(U256::from(x), U256::from(y), U256::from(d))?)
}

// ============================================================================
// WAD Arithmetic
// ============================================================================

/// `x * y / WAD` rounded down
pub fn w_mul_down(x: u128, y: u128) -> IsolendResult<u128> {
    mul_div_down_u128(x, y, WAD)
}

/// `x * y / WAD` rounded up
pub fn w_mul_up(x: u128, y: u128) -> IsolendResult<u128> {
    mul_div_up_u128(x, y, WAD)
}

/// `x * WAD / y` rounded down
pub fn w_div_down(x: u128, y: u128) -> IsolendResult<u128> {
    mul_div_down_u128(x, WAD, y)
}

/// `x * WAD / y` rounded up
pub fn w_div_up(x: u128, y: u128) -> IsolendResult<u128> {
    mul_div_up_u128(x, WAD, y)
}

/// `e^(rate * elapsed) - 1` approximated by the first three Taylor terms.
///
/// Underestimates the true compounded growth, which keeps accrued interest
/// conservative for borrowers over long idle periods.
pub fn w_taylor_compounded(rate: u128, elapsed: u64) -> IsolendResult<u128> {
    let wad = U256::from(WAD);
    let first = U256::from(rate)
        .checked_mul(U256::from(elapsed))
        .ok_or(IsolendError::Overflow)?;
    let second = mul_div_down(first, first, wad * U256::from(2u8))?;
    let third = mul_div_down(second, first, wad * U256::from(3u8))?;

    let sum = first
        .checked_add(second)
        .and_then(|s| s.checked_add(third))
        .ok_or(IsolendError::Overflow)?;
    to_u128(sum)
}

// ============================================================================
// Share Conversions
// ============================================================================

fn offsets(total_assets: u128, total_shares: u128) -> IsolendResult<(u128, u128)> {
    let assets = total_assets.checked_add(VIRTUAL_ASSETS).ok_or(IsolendError::Overflow)?;
    let shares = total_shares.checked_add(VIRTUAL_SHARES).ok_or(IsolendError::Overflow)?;
    Ok((assets, shares))
}

/// Assets to shares, rounded down
pub fn to_shares_down(assets: u128, total_assets: u128, total_shares: u128) -> IsolendResult<u128> {
    let (a, s) = offsets(total_assets, total_shares)?;
    mul_div_down_u128(assets, s, a)
}

/// Assets to shares, rounded up
pub fn to_shares_up(assets: u128, total_assets: u128, total_shares: u128) -> IsolendResult<u128> {
    let (a, s) = offsets(total_assets, total_shares)?;
    mul_div_up_u128(assets, s, a)
}

/// Shares to assets, rounded down
pub fn to_assets_down(shares: u128, total_assets: u128, total_shares: u128) -> IsolendResult<u128> {
    let (a, s) = offsets(total_assets, total_shares)?;
    mul_div_down_u128(shares, a, s)
}

/// Shares to assets, rounded up
pub fn to_assets_up(shares: u128, total_assets: u128, total_shares: u128) -> IsolendResult<u128> {
    let (a, s) = offsets(total_assets, total_shares)?;
    mul_div_up_u128(shares, a, s)
}

// ============================================================================
// Safe Arithmetic
// ============================================================================

/// `max(x - y, 0)`
pub fn zero_floor_sub(x: u128, y: u128) -> u128 {
    x.saturating_sub(y)
}

/// Checked addition
pub fn safe_add(a: u128, b: u128) -> IsolendResult<u128> {
    a.checked_add(b).ok_or(IsolendError::Overflow)
}

/// Checked subtraction
pub fn safe_sub(a: u128, b: u128) -> IsolendResult<u128> {
    a.checked_sub(b).ok_or(IsolendError::Underflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mul_div_rounding() {
        let (x, y, d) = (U256::from(10u8), U256::from(10u8), U256::from(3u8));
        assert_eq!(mul_div_down(x, y, d).unwrap(), U256::from(33u8));
        assert_eq!(mul_div_up(x, y, d).unwrap(), U256::from(34u8));
        // Exact division does not round up
        assert_eq!(mul_div_up(x, y, U256::from(4u8)).unwrap(), U256::from(25u8));
    }

    #[test]
    fn test_mul_div_by_zero() {
        assert_eq!(
            mul_div_down(U256::from(1u8), U256::from(1u8), U256::ZERO),
            Err(IsolendError::DivisionByZero)
        );
    }

    #[test]
    fn test_wide_intermediate() {
        // u128::MAX * WAD overflows u128 but not the 256-bit product
        assert_eq!(w_mul_down(u128::MAX, WAD).unwrap(), u128::MAX);
        assert_eq!(w_div_down(u128::MAX, 2 * WAD), Ok(u128::MAX / 2));
        assert_eq!(w_div_down(u128::MAX, WAD / 2), Err(IsolendError::Overflow));
    }

    #[test]
    fn test_wad_helpers() {
        let half = WAD / 2;
        assert_eq!(w_mul_down(3, half).unwrap(), 1);
        assert_eq!(w_mul_up(3, half).unwrap(), 2);
        assert_eq!(w_div_down(1, 3 * WAD).unwrap(), 0);
        assert_eq!(w_div_up(1, 3 * WAD).unwrap(), 1);
    }

    #[test]
    fn test_first_deposit_share_price() {
        // Empty market mints VIRTUAL_SHARES per asset
        assert_eq!(to_shares_down(500, 0, 0).unwrap(), 500 * VIRTUAL_SHARES);
        assert_eq!(to_assets_down(500 * VIRTUAL_SHARES, 500, 500 * VIRTUAL_SHARES).unwrap(), 500);
    }

    #[test]
    fn test_round_trip_never_creates_value() {
        let (total_assets, total_shares) = (1_000_003u128, 999_999_937u128);
        for assets in [1u128, 7, 1_000, 123_457] {
            let shares = to_shares_down(assets, total_assets, total_shares).unwrap();
            assert!(to_assets_down(shares, total_assets, total_shares).unwrap() <= assets);

            let shares = to_shares_up(assets, total_assets, total_shares).unwrap();
            assert!(to_assets_up(shares, total_assets, total_shares).unwrap() >= assets);
        }
    }

    #[test]
    fn test_taylor_compounded() {
        assert_eq!(w_taylor_compounded(0, 1_000).unwrap(), 0);
        assert_eq!(w_taylor_compounded(WAD, 0).unwrap(), 0);

        // rate * t = 1.0: 1 + 1/2 + 1/6
        let growth = w_taylor_compounded(WAD / 100, 100).unwrap();
        assert_eq!(growth, WAD + WAD / 2 + WAD / 6);
        // Below e - 1
        assert!(growth < 1_718_281_828_459_045_236);
    }

    #[test]
    fn test_zero_floor_sub() {
        assert_eq!(zero_floor_sub(5, 7), 0);
        assert_eq!(zero_floor_sub(7, 5), 2);
        assert_eq!(safe_sub(5, 7), Err(IsolendError::Underflow));
    }
}
