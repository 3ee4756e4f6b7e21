//! Interest Accrual
//!
//! Computes the state of a market after interest has run up to `now`. The
//! same computation backs the mutating `accrue_interest` and the read-only
//! `expected_*` views, so previews always match what a call would commit.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use isolend_common::{
    math::{safe_add, to_shares_down, w_mul_down, w_taylor_compounded},
    IsolendError, IsolendResult, MarketParams, MarketState, RateModel, RateUpdate,
};

/// Result of accruing a market over a nonzero period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct Accrual {
    /// Market state after accrual
    pub state: MarketState,
    /// Per-second rate applied (WAD)
    pub borrow_rate: u128,
    /// Interest added to both supply and borrow totals
    pub interest: u128,
    /// Supply shares minted to the fee recipient
    pub fee_shares: u128,
}

/// Accrue through `model.borrow_rate`. `None` when no time has passed.
pub fn accrue(
    params: &MarketParams,
    state: &MarketState,
    model: &dyn RateModel,
    now: u64,
) -> IsolendResult<Option<Accrual>> {
    accrue_with(state, now, |s| model.borrow_rate(params, s, now))
}

/// Accrue through `model.borrow_rate_view`
pub fn preview(
    params: &MarketParams,
    state: &MarketState,
    model: &dyn RateModel,
    now: u64,
) -> IsolendResult<Option<Accrual>> {
    accrue_with(state, now, |s| model.borrow_rate_view(params, s, now))
}

fn accrue_with(
    state: &MarketState,
    now: u64,
    rate: impl FnOnce(&MarketState) -> IsolendResult<RateUpdate>,
) -> IsolendResult<Option<Accrual>> {
    if now < state.last_update {
        return Err(IsolendError::InvalidTimestamp {
            last_update: state.last_update,
            now,
        });
    }
    let elapsed = now - state.last_update;
    if elapsed == 0 {
        return Ok(None);
    }

    // The model runs even on idle markets so adaptive memory keeps moving
    let update = rate(state)?;
    let interest = w_mul_down(state.total_borrow_assets, w_taylor_compounded(update.rate, elapsed)?)?;

    let mut next = *state;
    next.total_borrow_assets = safe_add(next.total_borrow_assets, interest)?;
    next.total_supply_assets = safe_add(next.total_supply_assets, interest)?;

    let mut fee_shares = 0;
    if next.fee != 0 && interest != 0 {
        let fee_amount = w_mul_down(interest, next.fee)?;
        // Priced as if the fee had not been added to supply yet
        fee_shares = to_shares_down(
            fee_amount,
            next.total_supply_assets - fee_amount,
            next.total_supply_shares,
        )?;
        next.total_supply_shares = safe_add(next.total_supply_shares, fee_shares)?;
    }

    next.last_update = now;
    next.rate_at_target = update.rate_at_target;

    Ok(Some(Accrual {
        state: next,
        borrow_rate: update.rate,
        interest,
        fee_shares,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use isolend_common::{FixedRateIrm, WAD, VIRTUAL_SHARES};

    fn params() -> MarketParams {
        MarketParams {
            loan_token: [1u8; 20],
            collateral_token: [2u8; 20],
            oracle: [3u8; 20],
            irm: [4u8; 20],
            lltv: 8 * WAD / 10,
        }
    }

    fn market(fee: u128) -> MarketState {
        MarketState {
            total_supply_assets: 1_000_000,
            total_supply_shares: 1_000_000 * VIRTUAL_SHARES,
            total_borrow_assets: 500_000,
            total_borrow_shares: 500_000 * VIRTUAL_SHARES,
            fee,
            ..MarketState::new(1_000)
        }
    }

    #[test]
    fn test_zero_elapsed_is_noop() {
        let irm = FixedRateIrm::new(WAD / 1_000);
        assert_eq!(accrue(&params(), &market(0), &irm, 1_000).unwrap(), None);
    }

    #[test]
    fn test_clock_going_backwards() {
        let irm = FixedRateIrm::new(1);
        let result = accrue(&params(), &market(0), &irm, 999);
        assert!(matches!(result, Err(IsolendError::InvalidTimestamp { .. })));
    }

    #[test]
    fn test_interest_added_to_both_sides() {
        // 0.1% per second for 10 seconds: x = 0.01, growth = x + x²/2 + x³/6
        let irm = FixedRateIrm::new(WAD / 1_000);
        let accrual = accrue(&params(), &market(0), &irm, 1_010).unwrap().unwrap();

        let growth = WAD / 100 + WAD / 20_000 + WAD / 6_000_000;
        assert_eq!(accrual.interest, 500_000 * growth / WAD);
        assert_eq!(accrual.state.total_borrow_assets, 500_000 + accrual.interest);
        assert_eq!(accrual.state.total_supply_assets, 1_000_000 + accrual.interest);
        assert_eq!(accrual.state.last_update, 1_010);
        assert_eq!(accrual.fee_shares, 0);
        assert!(accrual.state.total_borrow_assets <= accrual.state.total_supply_assets);
    }

    #[test]
    fn test_fee_shares_minted() {
        let irm = FixedRateIrm::new(WAD / 1_000);
        let accrual = accrue(&params(), &market(WAD / 10), &irm, 1_010).unwrap().unwrap();

        assert!(accrual.fee_shares > 0);
        assert_eq!(
            accrual.state.total_supply_shares,
            1_000_000 * VIRTUAL_SHARES + accrual.fee_shares
        );
    }

    #[test]
    fn test_idle_market_only_advances_clock() {
        let irm = FixedRateIrm::new(WAD / 1_000);
        let idle = MarketState::new(0);
        let accrual = accrue(&params(), &idle, &irm, 500).unwrap().unwrap();
        assert_eq!(accrual.interest, 0);
        assert_eq!(accrual.state, MarketState { last_update: 500, ..idle });
    }
}
