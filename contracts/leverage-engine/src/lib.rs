//! Leverage Engine
//!
//! Opens and unwinds leveraged positions on the market ledger in one atomic
//! call. The engine holds no position data: every position it builds is an
//! ordinary ledger position of the end user, who must have authorized the
//! engine as an operator beforehand.
//!
//! ## Opening
//!
//! The initial collateral is pledged, then a single `borrow` runs with a
//! callback that swaps the borrowed loan asset into collateral and pledges
//! it too. The borrow's own health check validates the assembled position.
//!
//! ## Closing
//!
//! Collateral is sold in bounded withdraw-swap-repay rounds, each round
//! freeing more collateral than the last. What the step budget cannot cover
//! is pulled from the caller.

use alloy_primitives::U256;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use isolend_common::{
    derive_address,
    math::{mul_div_down, mul_div_up, safe_add, safe_sub, to_assets_up, to_u128, w_div_down},
    namespaces, Address, AssetsOrShares, CallContext, IsolendError, IsolendResult, MarketParams, SwapRoute,
    SwapVenue, DEFAULT_MAX_LEVERAGE, DEFAULT_MAX_SLIPPAGE, DEFAULT_MAX_UNWIND_STEPS, ORACLE_PRICE_SCALE, WAD,
    ZERO_ADDRESS,
};
use isolend_market::{BorrowCallback, MarketLedger};

#[cfg(test)]
mod integration_tests;

// ============ Configuration ============

/// Engine limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct LeverageConfig {
    /// Highest leverage factor accepted (WAD)
    pub max_leverage: u128,
    /// Widest slippage tolerance accepted (WAD)
    pub max_slippage: u128,
    /// Withdraw-swap-repay rounds before falling back to the caller's funds
    pub max_unwind_steps: u8,
}

impl Default for LeverageConfig {
    fn default() -> Self {
        Self {
            max_leverage: DEFAULT_MAX_LEVERAGE,
            max_slippage: DEFAULT_MAX_SLIPPAGE,
            max_unwind_steps: DEFAULT_MAX_UNWIND_STEPS,
        }
    }
}

impl LeverageConfig {
    pub fn validate(&self) -> IsolendResult<()> {
        if self.max_leverage < WAD {
            return Err(IsolendError::InvalidLeverage {
                leverage: self.max_leverage,
                maximum: self.max_leverage,
            });
        }
        if self.max_slippage >= WAD {
            return Err(IsolendError::InvalidInput {
                param: "max_slippage",
                reason: "slippage tolerance must be below 100%",
            });
        }
        Ok(())
    }
}

// ============ Helpers ============

/// Highest leverage a market can carry at its LLTV: `1 / (1 - lltv)`
pub fn max_leverage(lltv: u128) -> IsolendResult<u128> {
    let slack = WAD.checked_sub(lltv).ok_or(IsolendError::MaxLltvExceeded { lltv })?;
    if slack == 0 {
        return Err(IsolendError::MaxLltvExceeded { lltv });
    }
    w_div_down(WAD, slack)
}

/// Loan assets to borrow so that, swapped at `price`, the position holds
/// `initial_collateral * leverage`: `(initial * (L - 1)) * price / 1e36`, rounded up
pub fn borrow_for_leverage(initial_collateral: u128, leverage: u128, price: U256) -> IsolendResult<u128> {
    let extra = leverage.checked_sub(WAD).ok_or(IsolendError::InvalidLeverage {
        leverage,
        maximum: leverage,
    })?;
    let extra_collateral = mul_div_down(U256::from(initial_collateral), U256::from(extra), U256::from(WAD))?;
    to_u128(mul_div_up(extra_collateral, price, U256::from(ORACLE_PRICE_SCALE))?)
}

/// Collateral to sell for `loan_assets` at `price`, padded for slippage
fn collateral_to_cover(loan_assets: u128, price: U256, max_slippage: u128) -> IsolendResult<u128> {
    if price.is_zero() {
        return Err(IsolendError::DivisionByZero);
    }
    let at_price = mul_div_up(U256::from(loan_assets), U256::from(ORACLE_PRICE_SCALE), price)?;
    let padded = mul_div_up(at_price, U256::from(WAD), U256::from(WAD - max_slippage))?;
    // One extra unit absorbs the venue's round-down
    safe_add(to_u128(padded)?, 1)
}

/// `quote * (1 - max_slippage)`, rounded down
fn min_amount_out(quote: u128, max_slippage: u128) -> IsolendResult<u128> {
    to_u128(mul_div_down(U256::from(quote), U256::from(WAD - max_slippage), U256::from(WAD))?)
}

/// Swap `amount_in` held by `trader` through `venue` with a slippage floor
fn swap_with_floor(
    ledger: &mut MarketLedger,
    venue: &mut dyn SwapVenue,
    trader: &Address,
    route: &SwapRoute,
    amount_in: u128,
    max_slippage: u128,
) -> IsolendResult<u128> {
    let quote = venue.quote(route, amount_in)?;
    let minimum = min_amount_out(quote, max_slippage)?;
    let tokens = ledger.tokens_mut();
    tokens.approve(&route.token_in, trader, &venue.address(), amount_in);
    venue.swap(tokens, trader, route, amount_in, minimum)
}

// ============ Results ============

/// What `open_position` put together
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct OpenedPosition {
    pub initial_collateral: u128,
    pub borrowed_assets: u128,
    pub borrow_shares: u128,
    /// Collateral bought with the borrowed assets
    pub purchased_collateral: u128,
}

impl OpenedPosition {
    /// Collateral pledged in total
    pub fn total_collateral(&self) -> u128 {
        self.initial_collateral.saturating_add(self.purchased_collateral)
    }
}

/// What `close_position` unwound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct ClosedPosition {
    pub repaid_assets: u128,
    pub repaid_shares: u128,
    /// Collateral withdrawn and sold for loan assets
    pub collateral_sold: u128,
    /// Loan assets pulled from the caller after the step budget ran out
    pub shortfall: u128,
    /// Loan assets left over and sent to the position owner
    pub leftover_assets: u128,
    /// Collateral returned to the position owner on a full close
    pub returned_collateral: u128,
    pub steps: u8,
}

// ============ Borrow Callback ============

/// Swaps the borrowed assets into collateral and pledges it for `on_behalf`
struct SwapAndPledge<'a> {
    engine: Address,
    params: &'a MarketParams,
    on_behalf: Address,
    venue: &'a mut dyn SwapVenue,
    max_slippage: u128,
    purchased: u128,
}

impl BorrowCallback for SwapAndPledge<'_> {
    fn on_borrow(&mut self, ledger: &mut MarketLedger, ctx: &CallContext, assets: u128, _shares: u128) -> IsolendResult<()> {
        // 1. Loan asset -> collateral
        let route = SwapRoute::new(self.params.loan_token, self.params.collateral_token);
        let purchased = swap_with_floor(ledger, &mut *self.venue, &self.engine, &route, assets, self.max_slippage)?;

        // 2. Pledge the output
        let custody = ledger.address();
        ledger
            .tokens_mut()
            .approve(&self.params.collateral_token, &self.engine, &custody, purchased);
        ledger.supply_collateral(ctx, self.params, purchased, self.on_behalf)?;

        self.purchased = purchased;
        Ok(())
    }
}

// ============ Leverage Engine ============

/// Stateless leverage orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct LeverageEngine {
    address: Address,
    config: LeverageConfig,
}

impl LeverageEngine {
    /// Engine at the address derived from `label`
    pub fn new(label: &[u8], config: LeverageConfig) -> IsolendResult<Self> {
        Self::with_address(derive_address(namespaces::LEVERAGE_ENGINE, label), config)
    }

    pub fn with_address(address: Address, config: LeverageConfig) -> IsolendResult<Self> {
        if address == ZERO_ADDRESS {
            return Err(IsolendError::ZeroAddress { param: "address" });
        }
        config.validate()?;
        Ok(Self { address, config })
    }

    /// Operator address users authorize on the ledger
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn config(&self) -> &LeverageConfig {
        &self.config
    }

    fn check_slippage(&self, max_slippage: u128) -> IsolendResult<()> {
        if max_slippage > self.config.max_slippage {
            return Err(IsolendError::InvalidInput {
                param: "max_slippage",
                reason: "above the engine's slippage guard",
            });
        }
        Ok(())
    }

    /// Open a position of `initial_collateral * leverage` collateral for `on_behalf`.
    ///
    /// The caller funds `initial_collateral` (approved to the engine). A
    /// leverage of exactly 1.0 only pledges it. All-or-nothing: any failure
    /// leaves the ledger as it was.
    ///
    /// # Errors
    /// - `InvalidLeverage` below 1.0 or above the configured maximum
    /// - `SlippageExceeded` if the venue fills under the slippage floor
    /// - `InsufficientCollateral` if the market's LLTV cannot carry the leverage
    /// - `Unauthorized` if `on_behalf` has not authorized both the caller and
    ///   the engine
    #[allow(clippy::too_many_arguments)]
    pub fn open_position(
        &self,
        ledger: &mut MarketLedger,
        ctx: &CallContext,
        params: &MarketParams,
        initial_collateral: u128,
        leverage: u128,
        max_slippage: u128,
        on_behalf: Address,
        venue: &mut dyn SwapVenue,
    ) -> IsolendResult<OpenedPosition> {
        // 1. Validate
        if initial_collateral == 0 {
            return Err(IsolendError::ZeroAmount);
        }
        if on_behalf == ZERO_ADDRESS {
            return Err(IsolendError::ZeroAddress { param: "on_behalf" });
        }
        if !ledger.is_authorized(&on_behalf, &ctx.sender) {
            return Err(IsolendError::Unauthorized {
                caller: ctx.sender,
                owner: on_behalf,
            });
        }
        if leverage < WAD || leverage > self.config.max_leverage {
            return Err(IsolendError::InvalidLeverage {
                leverage,
                maximum: self.config.max_leverage,
            });
        }
        self.check_slippage(max_slippage)?;

        let engine_ctx = ctx.with_sender(self.address);
        ledger.transact(|ledger| {
            // 2. Pledge the caller's collateral
            let custody = ledger.address();
            let tokens = ledger.tokens_mut();
            tokens.transfer_from(
                &params.collateral_token,
                &self.address,
                &ctx.sender,
                &self.address,
                initial_collateral,
            )?;
            tokens.approve(&params.collateral_token, &self.address, &custody, initial_collateral);
            ledger.supply_collateral(&engine_ctx, params, initial_collateral, on_behalf)?;

            let mut opened = OpenedPosition {
                initial_collateral,
                ..OpenedPosition::default()
            };
            if leverage == WAD {
                return Ok(opened);
            }

            // 3. Borrow, swapping and pledging inside the callback
            let price = ledger.price(params)?;
            let borrow = borrow_for_leverage(initial_collateral, leverage, price)?;
            let mut callback = SwapAndPledge {
                engine: self.address,
                params,
                on_behalf,
                venue,
                max_slippage,
                purchased: 0,
            };
            let (assets, shares) = ledger.borrow(
                &engine_ctx,
                params,
                AssetsOrShares::Assets(borrow),
                on_behalf,
                self.address,
                Some(&mut callback),
            )?;

            opened.borrowed_assets = assets;
            opened.borrow_shares = shares;
            opened.purchased_collateral = callback.purchased;
            Ok(opened)
        })
    }

    /// Unwind `repay_shares` of `on_behalf`'s debt by selling collateral, or
    /// the whole position when `repay_shares` is zero or covers all debt.
    ///
    /// Any shortfall left after the step budget is pulled from the caller
    /// (loan asset approved to the engine). Leftover loan assets, and on a
    /// full close all remaining collateral, go to `on_behalf`.
    ///
    /// # Errors
    /// `Unauthorized` unless the caller may act for `on_behalf`
    #[allow(clippy::too_many_arguments)]
    pub fn close_position(
        &self,
        ledger: &mut MarketLedger,
        ctx: &CallContext,
        params: &MarketParams,
        repay_shares: u128,
        on_behalf: Address,
        venue: &mut dyn SwapVenue,
        max_slippage: u128,
    ) -> IsolendResult<ClosedPosition> {
        if on_behalf == ZERO_ADDRESS {
            return Err(IsolendError::ZeroAddress { param: "on_behalf" });
        }
        if !ledger.is_authorized(&on_behalf, &ctx.sender) {
            return Err(IsolendError::Unauthorized {
                caller: ctx.sender,
                owner: on_behalf,
            });
        }
        self.check_slippage(max_slippage)?;

        let engine_ctx = ctx.with_sender(self.address);
        let market_id = params.id();
        let route = SwapRoute::new(params.collateral_token, params.loan_token);

        ledger.transact(|ledger| {
            // 1. Bring debt up to date and fix the target
            ledger.accrue_interest(&engine_ctx, params)?;
            let owed_shares = ledger.position(&market_id, &on_behalf).borrow_shares;
            let full_close = repay_shares == 0 || repay_shares >= owed_shares;
            let mut remaining = if full_close { owed_shares } else { repay_shares };

            let custody = ledger.address();
            let mut closed = ClosedPosition::default();
            let mut cash: u128 = 0;

            // 2. Withdraw-swap-repay rounds
            while remaining > 0 {
                let market = ledger.market(&market_id)?;
                let owed = to_assets_up(remaining, market.total_borrow_assets, market.total_borrow_shares)?;

                if cash >= owed {
                    ledger.tokens_mut().approve(&params.loan_token, &self.address, &custody, owed);
                    let (assets, shares) =
                        ledger.repay(&engine_ctx, params, AssetsOrShares::Shares(remaining), on_behalf)?;
                    cash = safe_sub(cash, assets)?;
                    closed.repaid_assets = safe_add(closed.repaid_assets, assets)?;
                    closed.repaid_shares = safe_add(closed.repaid_shares, shares)?;
                    remaining = 0;
                    break;
                }
                if closed.steps >= self.config.max_unwind_steps {
                    break;
                }

                let price = ledger.price(params)?;
                let needed = collateral_to_cover(owed - cash, price, max_slippage)?;
                let amount = needed.min(ledger.withdrawable_collateral(params, &on_behalf)?);
                if amount == 0 {
                    break;
                }
                closed.steps += 1;

                ledger.withdraw_collateral(&engine_ctx, params, amount, on_behalf, self.address)?;
                let proceeds = swap_with_floor(ledger, &mut *venue, &self.address, &route, amount, max_slippage)?;
                closed.collateral_sold = safe_add(closed.collateral_sold, amount)?;
                cash = safe_add(cash, proceeds)?;

                // Partial repayment frees collateral for the next round
                if cash < owed && cash > 0 {
                    ledger.tokens_mut().approve(&params.loan_token, &self.address, &custody, cash);
                    let (assets, shares) = ledger.repay(&engine_ctx, params, AssetsOrShares::Assets(cash), on_behalf)?;
                    cash = safe_sub(cash, assets)?;
                    remaining = safe_sub(remaining, shares)?;
                    closed.repaid_assets = safe_add(closed.repaid_assets, assets)?;
                    closed.repaid_shares = safe_add(closed.repaid_shares, shares)?;
                }
            }

            // 3. The caller covers what selling could not
            if remaining > 0 {
                let market = ledger.market(&market_id)?;
                let owed = to_assets_up(remaining, market.total_borrow_assets, market.total_borrow_shares)?;
                let shortfall = owed.saturating_sub(cash);
                let tokens = ledger.tokens_mut();
                tokens.transfer_from(&params.loan_token, &self.address, &ctx.sender, &self.address, shortfall)?;
                tokens.approve(&params.loan_token, &self.address, &custody, owed);
                cash = safe_add(cash, shortfall)?;
                closed.shortfall = shortfall;

                let (assets, shares) =
                    ledger.repay(&engine_ctx, params, AssetsOrShares::Shares(remaining), on_behalf)?;
                cash = safe_sub(cash, assets)?;
                closed.repaid_assets = safe_add(closed.repaid_assets, assets)?;
                closed.repaid_shares = safe_add(closed.repaid_shares, shares)?;
            }

            // 4. Hand back what is left
            if full_close {
                let collateral = ledger.position(&market_id, &on_behalf).collateral;
                if collateral > 0 {
                    ledger.withdraw_collateral(&engine_ctx, params, collateral, on_behalf, on_behalf)?;
                }
                closed.returned_collateral = collateral;

                let position = ledger.position(&market_id, &on_behalf);
                if position.borrow_shares != 0 || position.collateral != 0 {
                    return Err(IsolendError::PositionNotClosed {
                        borrow_shares: position.borrow_shares,
                        collateral: position.collateral,
                    });
                }
            }
            if cash > 0 {
                ledger.tokens_mut().transfer(&params.loan_token, &self.address, &on_behalf, cash)?;
            }
            closed.leftover_assets = cash;
            Ok(closed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isolend_common::price_from_ratio;

    #[test]
    fn test_max_leverage_from_lltv() {
        assert_eq!(max_leverage(8 * WAD / 10).unwrap(), 5 * WAD);
        assert_eq!(max_leverage(WAD / 2).unwrap(), 2 * WAD);
        assert_eq!(max_leverage(0).unwrap(), WAD);
        assert!(max_leverage(WAD).is_err());
    }

    #[test]
    fn test_borrow_for_leverage() {
        // 105,000 USDC per BTC, 1 BTC at 4x borrows 3 BTC worth
        let price = price_from_ratio(105_000_000_000, 100_000_000).unwrap();
        assert_eq!(borrow_for_leverage(100_000_000, 4 * WAD, price).unwrap(), 315_000_000_000);
        assert_eq!(borrow_for_leverage(100_000_000, WAD, price).unwrap(), 0);
        assert!(borrow_for_leverage(100_000_000, WAD / 2, price).is_err());
    }

    #[test]
    fn test_slippage_floor() {
        assert_eq!(min_amount_out(1_000_000, 0).unwrap(), 1_000_000);
        assert_eq!(min_amount_out(1_000_000, WAD / 100).unwrap(), 990_000);
    }

    #[test]
    fn test_collateral_to_cover_pads_for_slippage() {
        let price = price_from_ratio(1_050, 1).unwrap();
        assert_eq!(collateral_to_cover(1_050_000, price, 0).unwrap(), 1_001);
        assert!(collateral_to_cover(1_050_000, price, WAD / 100).unwrap() > 1_010);
    }

    #[test]
    fn test_config_validation() {
        assert!(LeverageConfig::default().validate().is_ok());
        let low = LeverageConfig {
            max_leverage: WAD / 2,
            ..LeverageConfig::default()
        };
        assert!(matches!(low.validate(), Err(IsolendError::InvalidLeverage { .. })));

        let engine = LeverageEngine::new(b"main", LeverageConfig::default()).unwrap();
        assert_eq!(engine.address(), derive_address(namespaces::LEVERAGE_ENGINE, b"main"));
        assert!(LeverageEngine::with_address(ZERO_ADDRESS, LeverageConfig::default()).is_err());
    }
}
