//! Swap Venue Interface
//!
//! The leverage engine converts between loan and collateral assets through a
//! `SwapVenue`. Venues settle against the same `TokenBank` the ledger uses,
//! so a swap inside a ledger callback rolls back with the outer operation.

use alloy_primitives::U256;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::constants::fees::BPS_DENOMINATOR;
use crate::constants::precision::ORACLE_PRICE_SCALE;
use crate::errors::{IsolendError, IsolendResult};
use crate::math::{mul_div_down, to_u128};
use crate::oracle::FixedPriceOracle;
use crate::token_ops::TokenBank;
use crate::types::Address;

/// Direction of a swap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct SwapRoute {
    pub token_in: Address,
    pub token_out: Address,
}

impl SwapRoute {
    pub fn new(token_in: Address, token_out: Address) -> Self {
        Self { token_in, token_out }
    }

    /// Opposite direction
    pub fn reversed(&self) -> Self {
        Self::new(self.token_out, self.token_in)
    }
}

/// Exchange between two tokens
pub trait SwapVenue {
    /// Account the venue settles from; traders approve it for `token_in`
    fn address(&self) -> Address;

    /// Expected output for `amount_in`
    fn quote(&self, route: &SwapRoute, amount_in: u128) -> IsolendResult<u128>;

    /// Pull `amount_in` of `route.token_in` from `trader` and pay out at least
    /// `min_amount_out` of `route.token_out`, or fail with `SlippageExceeded`
    fn swap(
        &mut self,
        bank: &mut TokenBank,
        trader: &Address,
        route: &SwapRoute,
        amount_in: u128,
        min_amount_out: u128,
    ) -> IsolendResult<u128>;
}

// ============================================================================
// Oracle-priced Venue
// ============================================================================

/// Venue quoting at an oracle price, minus a fee.
///
/// `execution_shortfall_bps` makes executed output fall short of the quote,
/// modelling price movement between quote and fill.
#[derive(Debug, Clone)]
pub struct OracleSwapVenue {
    pub address: Address,
    pub collateral_token: Address,
    pub loan_token: Address,
    oracle: FixedPriceOracle,
    pub fee_bps: u128,
    pub execution_shortfall_bps: u128,
}

impl OracleSwapVenue {
    pub fn new(address: Address, collateral_token: Address, loan_token: Address, oracle: FixedPriceOracle) -> Self {
        Self {
            address,
            collateral_token,
            loan_token,
            oracle,
            fee_bps: 0,
            execution_shortfall_bps: 0,
        }
    }

    pub fn with_fee_bps(mut self, fee_bps: u128) -> Self {
        self.fee_bps = fee_bps;
        self
    }

    pub fn with_execution_shortfall_bps(mut self, shortfall_bps: u128) -> Self {
        self.execution_shortfall_bps = shortfall_bps;
        self
    }

    fn haircut(amount: u128, bps: u128) -> IsolendResult<u128> {
        let keep = BPS_DENOMINATOR.checked_sub(bps).ok_or(IsolendError::InvalidInput {
            param: "bps",
            reason: "haircut above 100%",
        })?;
        to_u128(mul_div_down(U256::from(amount), U256::from(keep), U256::from(BPS_DENOMINATOR))?)
    }
}

impl SwapVenue for OracleSwapVenue {
    fn address(&self) -> Address {
        self.address
    }

    fn quote(&self, route: &SwapRoute, amount_in: u128) -> IsolendResult<u128> {
        let price = self.oracle.current();
        let scale = U256::from(ORACLE_PRICE_SCALE);
        let amount = U256::from(amount_in);

        let gross = if route.token_in == self.collateral_token && route.token_out == self.loan_token {
            mul_div_down(amount, price, scale)?
        } else if route.token_in == self.loan_token && route.token_out == self.collateral_token {
            mul_div_down(amount, scale, price)?
        } else {
            return Err(IsolendError::SwapFailed { reason: "unsupported route" });
        };

        Self::haircut(to_u128(gross)?, self.fee_bps)
    }

    fn swap(
        &mut self,
        bank: &mut TokenBank,
        trader: &Address,
        route: &SwapRoute,
        amount_in: u128,
        min_amount_out: u128,
    ) -> IsolendResult<u128> {
        let quoted = self.quote(route, amount_in)?;
        let amount_out = Self::haircut(quoted, self.execution_shortfall_bps)?;
        if amount_out < min_amount_out {
            return Err(IsolendError::SlippageExceeded {
                minimum: min_amount_out,
                received: amount_out,
            });
        }

        bank.transfer_from(&route.token_in, &self.address, trader, &self.address, amount_in)?;
        bank.transfer(&route.token_out, &self.address, trader, amount_out)?;
        Ok(amount_out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VENUE: Address = [9u8; 20];
    const WBTC: Address = [2u8; 20];
    const USDC: Address = [1u8; 20];
    const TRADER: Address = [5u8; 20];

    fn venue() -> OracleSwapVenue {
        let oracle = FixedPriceOracle::from_ratio(1_000, 1).unwrap();
        OracleSwapVenue::new(VENUE, WBTC, USDC, oracle)
    }

    fn funded_bank() -> TokenBank {
        let mut bank = TokenBank::new();
        bank.mint(&USDC, &VENUE, 1_000_000_000_000).unwrap();
        bank.mint(&WBTC, &VENUE, 10_000_000_000).unwrap();
        bank.mint(&USDC, &TRADER, 1_000_000).unwrap();
        bank.approve(&USDC, &TRADER, &VENUE, u128::MAX);
        bank
    }

    #[test]
    fn test_quote_both_directions() {
        let venue = venue();
        let sell = SwapRoute::new(WBTC, USDC);
        assert_eq!(venue.quote(&sell, 100).unwrap(), 100_000);
        assert_eq!(venue.quote(&sell.reversed(), 100_000).unwrap(), 100);
    }

    #[test]
    fn test_quote_applies_fee() {
        let venue = venue().with_fee_bps(30);
        assert_eq!(venue.quote(&SwapRoute::new(WBTC, USDC), 100).unwrap(), 99_700);
    }

    #[test]
    fn test_unknown_route() {
        let route = SwapRoute::new(USDC, [7u8; 20]);
        assert!(matches!(venue().quote(&route, 1), Err(IsolendError::SwapFailed { .. })));
    }

    #[test]
    fn test_swap_settles_through_bank() {
        let mut venue = venue();
        let mut bank = funded_bank();
        let route = SwapRoute::new(USDC, WBTC);

        let out = venue.swap(&mut bank, &TRADER, &route, 1_000_000, 1_000).unwrap();
        assert_eq!(out, 1_000);
        assert_eq!(bank.balance_of(&WBTC, &TRADER), 1_000);
        assert_eq!(bank.balance_of(&USDC, &TRADER), 0);
    }

    #[test]
    fn test_swap_shortfall_trips_minimum() {
        let mut venue = venue().with_execution_shortfall_bps(50);
        let mut bank = funded_bank();
        let route = SwapRoute::new(USDC, WBTC);

        let result = venue.swap(&mut bank, &TRADER, &route, 1_000_000, 1_000);
        assert_eq!(
            result,
            Err(IsolendError::SlippageExceeded { minimum: 1_000, received: 995 })
        );
    }
}
