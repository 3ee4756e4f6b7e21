//! Oracle Module
//!
//! Price feeds consumed by the ledger for health checks and liquidations.
//!
//! ## Price Convention
//!
//! `price()` returns how many loan-token base units one collateral-token base
//! unit is worth, scaled by `ORACLE_PRICE_SCALE` (1e36). The scale absorbs
//! the decimal difference between the two tokens: with 8-decimal collateral
//! and 6-decimal loan token, a price of `1000e36` means one collateral base
//! unit is worth 1000 loan base units.

use core::cell::Cell;

use alloy_primitives::U256;

use crate::constants::precision::ORACLE_PRICE_SCALE;
use crate::errors::{IsolendError, IsolendResult};
use crate::math::mul_div_down;
use crate::Rc;

/// Price source for one market
pub trait Oracle {
    /// Collateral price in loan units, scaled by 1e36
    fn price(&self) -> IsolendResult<U256>;
}

/// Build an oracle price from a ratio of base units:
/// `collateral_units` of collateral are worth `loan_units` of the loan token.
pub fn price_from_ratio(loan_units: u128, collateral_units: u128) -> IsolendResult<U256> {
    if collateral_units == 0 {
        return Err(IsolendError::DivisionByZero);
    }
    mul_div_down(
        U256::from(loan_units),
        U256::from(ORACLE_PRICE_SCALE),
        U256::from(collateral_units),
    )
}

/// Value of `collateral` units in loan units, rounded down
pub fn collateral_value(collateral: u128, price: U256) -> IsolendResult<U256> {
    mul_div_down(U256::from(collateral), price, U256::from(ORACLE_PRICE_SCALE))
}

// ============================================================================
// Fixed Price Oracle
// ============================================================================

/// Oracle reporting a settable price.
///
/// Clones share the same price cell, so a handle kept outside the ledger can
/// move the price of a registered oracle.
#[derive(Debug, Clone)]
pub struct FixedPriceOracle {
    price: Rc<Cell<U256>>,
}

impl FixedPriceOracle {
    pub fn new(price: U256) -> Self {
        Self {
            price: Rc::new(Cell::new(price)),
        }
    }

    /// Oracle priced from a base-unit ratio
    pub fn from_ratio(loan_units: u128, collateral_units: u128) -> IsolendResult<Self> {
        Ok(Self::new(price_from_ratio(loan_units, collateral_units)?))
    }

    /// Move the price for every handle
    pub fn set_price(&self, price: U256) {
        self.price.set(price);
    }

    /// Current price without the `Result` wrapper
    pub fn current(&self) -> U256 {
        self.price.get()
    }
}

impl Oracle for FixedPriceOracle {
    fn price(&self) -> IsolendResult<U256> {
        Ok(self.price.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn e36(units: u64) -> U256 {
        U256::from(units) * U256::from(ORACLE_PRICE_SCALE)
    }

    #[test]
    fn test_price_from_ratio() {
        assert_eq!(price_from_ratio(1_000, 1).unwrap(), e36(1_000));
        assert_eq!(price_from_ratio(1, 2).unwrap(), U256::from(ORACLE_PRICE_SCALE / 2));
        assert_eq!(price_from_ratio(1, 0), Err(IsolendError::DivisionByZero));
    }

    #[test]
    fn test_collateral_value() {
        // 6 BTC (8 decimals) at 1000 micro-USDC per satoshi = 600,000 USDC
        let value = collateral_value(600_000_000, e36(1_000)).unwrap();
        assert_eq!(value, U256::from(600_000_000_000u64));
    }

    #[test]
    fn test_shared_handle_moves_price() {
        let oracle = FixedPriceOracle::new(e36(1_000));
        let handle = oracle.clone();

        handle.set_price(e36(800));
        assert_eq!(oracle.price().unwrap(), e36(800));
        assert_eq!(oracle.current(), handle.current());
    }
}
