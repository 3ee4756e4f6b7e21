//! Health and Liquidation Math
//!
//! Pure functions over market and position snapshots. Every rounding
//! direction here favours solvency: debt rounds up, borrowing capacity and
//! seized collateral round down, repaid shares round up.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use alloy_primitives::U256;
use isolend_common::{
    constants::precision::{ORACLE_PRICE_SCALE, WAD},
    math::{mul_div_down, mul_div_up, to_assets_down, to_assets_up, to_shares_up, to_u128},
    oracle::collateral_value,
    IsolendError, IsolendResult, LiquidationAmount, MarketParams, MarketState, Position,
};

// ============================================================================
// Health
// ============================================================================

/// Debt of `borrow_shares`, rounded up
pub fn borrowed_assets(borrow_shares: u128, market: &MarketState) -> IsolendResult<u128> {
    to_assets_up(borrow_shares, market.total_borrow_assets, market.total_borrow_shares)
}

/// Loan assets `collateral` can back at `price`: `(collateral * price / 1e36)↓ * lltv↓`
pub fn max_borrow(collateral: u128, price: U256, lltv: u128) -> IsolendResult<U256> {
    mul_div_down(collateral_value(collateral, price)?, U256::from(lltv), U256::from(WAD))
}

/// Healthy iff debt does not exceed borrowing capacity
pub fn is_healthy(position: &Position, market: &MarketState, params: &MarketParams, price: U256) -> IsolendResult<bool> {
    if position.borrow_shares == 0 {
        return Ok(true);
    }
    let debt = borrowed_assets(position.borrow_shares, market)?;
    Ok(U256::from(debt) <= max_borrow(position.collateral, price, params.lltv)?)
}

/// Borrowing capacity over debt (WAD). `U256::MAX` without debt.
pub fn health_factor(position: &Position, market: &MarketState, params: &MarketParams, price: U256) -> IsolendResult<U256> {
    let debt = borrowed_assets(position.borrow_shares, market)?;
    if debt == 0 {
        return Ok(U256::MAX);
    }
    let capacity = max_borrow(position.collateral, price, params.lltv)?;
    mul_div_down(capacity, U256::from(WAD), U256::from(debt))
}

/// Collateral that can leave the position while it stays healthy
pub fn withdrawable_collateral(
    position: &Position,
    market: &MarketState,
    params: &MarketParams,
    price: U256,
) -> IsolendResult<u128> {
    if position.borrow_shares == 0 {
        return Ok(position.collateral);
    }
    if price.is_zero() || params.lltv == 0 {
        return Ok(0);
    }
    let debt = borrowed_assets(position.borrow_shares, market)?;
    let debt_value = mul_div_up(U256::from(debt), U256::from(WAD), U256::from(params.lltv))?;
    let required = mul_div_up(debt_value, U256::from(ORACLE_PRICE_SCALE), price)?;

    if required >= U256::from(position.collateral) {
        return Ok(0);
    }
    Ok(position.collateral - to_u128(required)?)
}

// ============================================================================
// Liquidation Sizing
// ============================================================================

/// Resolved liquidation amounts, before bad debt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct LiquidationPlan {
    /// Collateral moved to the liquidator
    pub seized_assets: u128,
    /// Borrow shares burned
    pub repaid_shares: u128,
    /// Loan assets pulled from the liquidator
    pub repaid_assets: u128,
}

/// Borrow shares repaid for `seized` collateral:
/// `to_shares_up((seized * price / 1e36)↑ / LIF↑)`
fn repaid_shares_for_seize(seized: u128, price: U256, incentive: u128, market: &MarketState) -> IsolendResult<u128> {
    let value = mul_div_up(U256::from(seized), price, U256::from(ORACLE_PRICE_SCALE))?;
    let assets = to_u128(mul_div_up(value, U256::from(WAD), U256::from(incentive))?)?;
    to_shares_up(assets, market.total_borrow_assets, market.total_borrow_shares)
}

/// Collateral seized for `repaid_shares`:
/// `(to_assets_down(shares) * LIF)↓ * 1e36 / price↓`
fn seize_for_repaid_shares(repaid_shares: u128, price: U256, incentive: u128, market: &MarketState) -> IsolendResult<u128> {
    let assets = to_assets_down(repaid_shares, market.total_borrow_assets, market.total_borrow_shares)?;
    let with_bonus = mul_div_down(U256::from(assets), U256::from(incentive), U256::from(WAD))?;
    to_u128(mul_div_down(with_bonus, U256::from(ORACLE_PRICE_SCALE), price)?)
}

/// Size a liquidation, capping both legs at what the borrower holds.
///
/// When a cap binds, the other leg is recomputed from the capped one, so the
/// liquidator never repays more debt than the seized collateral pays for.
pub fn plan_liquidation(
    amount: LiquidationAmount,
    position: &Position,
    market: &MarketState,
    price: U256,
    incentive: u128,
) -> IsolendResult<LiquidationPlan> {
    if price.is_zero() {
        return Err(IsolendError::InvalidInput {
            param: "price",
            reason: "zero oracle price",
        });
    }
    let (seized_assets, repaid_shares) = match amount {
        LiquidationAmount::Seize(requested) => {
            let seized = requested.min(position.collateral);
            let shares = repaid_shares_for_seize(seized, price, incentive, market)?;
            if shares > position.borrow_shares {
                let shares = position.borrow_shares;
                let seized = seize_for_repaid_shares(shares, price, incentive, market)?.min(position.collateral);
                (seized, shares)
            } else {
                (seized, shares)
            }
        }
        LiquidationAmount::RepayShares(requested) => {
            let shares = requested.min(position.borrow_shares);
            let seized = seize_for_repaid_shares(shares, price, incentive, market)?;
            if seized > position.collateral {
                let seized = position.collateral;
                let shares = repaid_shares_for_seize(seized, price, incentive, market)?.min(position.borrow_shares);
                (seized, shares)
            } else {
                (seized, shares)
            }
        }
    };

    let repaid_assets = to_assets_up(repaid_shares, market.total_borrow_assets, market.total_borrow_shares)?;
    Ok(LiquidationPlan {
        seized_assets,
        repaid_shares,
        repaid_assets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use isolend_common::{LiquidationIncentiveCurve, VIRTUAL_SHARES};

    fn e36(units: u64) -> U256 {
        U256::from(units) * U256::from(ORACLE_PRICE_SCALE)
    }

    fn params() -> MarketParams {
        MarketParams {
            loan_token: [1u8; 20],
            collateral_token: [2u8; 20],
            oracle: [3u8; 20],
            irm: [4u8; 20],
            lltv: 8 * WAD / 10,
        }
    }

    /// 400,000 USDC borrowed at the initial share price
    fn market() -> MarketState {
        MarketState {
            total_supply_assets: 500_000_000_000,
            total_supply_shares: 500_000_000_000 * VIRTUAL_SHARES,
            total_borrow_assets: 400_000_000_000,
            total_borrow_shares: 400_000_000_000 * VIRTUAL_SHARES,
            ..MarketState::new(0)
        }
    }

    fn borrower() -> Position {
        Position {
            supply_shares: 0,
            borrow_shares: 400_000_000_000 * VIRTUAL_SHARES,
            collateral: 600_000_000,
        }
    }

    #[test]
    fn test_health_at_boundary() {
        // 6 BTC at 1000/sat with lltv 0.8 backs exactly 480,000 USDC
        let cap = max_borrow(600_000_000, e36(1_000), params().lltv).unwrap();
        assert_eq!(cap, U256::from(480_000_000_000u64));

        assert!(is_healthy(&borrower(), &market(), &params(), e36(1_000)).unwrap());
        assert!(!is_healthy(&borrower(), &market(), &params(), e36(800)).unwrap());
    }

    #[test]
    fn test_health_factor() {
        let hf = health_factor(&borrower(), &market(), &params(), e36(1_000)).unwrap();
        // 480,000 / 400,000
        assert_eq!(hf, U256::from(12 * WAD / 10));

        let empty = Position::default();
        assert_eq!(health_factor(&empty, &market(), &params(), e36(1_000)).unwrap(), U256::MAX);
    }

    #[test]
    fn test_withdrawable_collateral_keeps_position_healthy() {
        let position = borrower();
        let free = withdrawable_collateral(&position, &market(), &params(), e36(1_000)).unwrap();
        // 400,000 / 0.8 / 1000 = 500,000,000 sats required
        assert_eq!(free, 100_000_000);

        let after = Position { collateral: position.collateral - free, ..position };
        assert!(is_healthy(&after, &market(), &params(), e36(1_000)).unwrap());

        let worse = Position { collateral: after.collateral - 1, ..position };
        assert!(!is_healthy(&worse, &market(), &params(), e36(1_000)).unwrap());
    }

    #[test]
    fn test_repay_path_seizes_with_bonus() {
        let incentive = LiquidationIncentiveCurve::default().factor(params().lltv).unwrap();
        let plan = plan_liquidation(
            LiquidationAmount::RepayShares(100_000_000_000 * VIRTUAL_SHARES),
            &borrower(),
            &market(),
            e36(800),
            incentive,
        )
        .unwrap();

        assert_eq!(plan.repaid_assets, 100_000_000_000);
        // 100,000 USDC * 1/0.94 / 800 per sat
        let expected = 100_000_000_000u128 * incentive / WAD / 800;
        assert_eq!(plan.seized_assets, expected);

        // Seized value at the liquidation price covers what was repaid
        assert!(plan.seized_assets * 800 >= plan.repaid_assets);
    }

    #[test]
    fn test_seize_capped_at_collateral() {
        let incentive = LiquidationIncentiveCurve::default().factor(params().lltv).unwrap();
        let plan = plan_liquidation(
            LiquidationAmount::Seize(10_000_000_000),
            &borrower(),
            &market(),
            e36(100),
            incentive,
        )
        .unwrap();

        assert_eq!(plan.seized_assets, borrower().collateral);
        // Repayment scaled down to what 6 BTC at 100/sat pays for
        assert!(plan.repaid_shares < borrower().borrow_shares);
        assert!(plan.repaid_assets <= 60_000_000_000);
    }

    #[test]
    fn test_repay_capped_at_borrow_shares() {
        let incentive = LiquidationIncentiveCurve::default().factor(params().lltv).unwrap();
        let plan = plan_liquidation(
            LiquidationAmount::RepayShares(u128::MAX / 2),
            &borrower(),
            &market(),
            e36(800),
            incentive,
        )
        .unwrap();

        assert_eq!(plan.repaid_shares, borrower().borrow_shares);
        assert!(plan.seized_assets <= borrower().collateral);
    }

    #[test]
    fn test_zero_price_rejected_on_both_legs() {
        let incentive = LiquidationIncentiveCurve::default().factor(params().lltv).unwrap();
        for amount in [
            LiquidationAmount::Seize(100_000_000),
            LiquidationAmount::RepayShares(borrower().borrow_shares / 4),
        ] {
            let result = plan_liquidation(amount, &borrower(), &market(), U256::ZERO, incentive);
            assert!(matches!(result, Err(IsolendError::InvalidInput { param: "price", .. })));
        }
    }
}
