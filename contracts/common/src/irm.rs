//! Interest Rate Models
//!
//! A rate model maps a market's state to a per-second borrow rate (WAD).
//! Models are stateless: whatever memory a model needs between calls is
//! carried in `MarketState::rate_at_target`, which the ledger persists and
//! rolls back with the rest of the market.
//!
//! ## Key Features
//!
//! - **Fixed Rate**: constant per-second rate, configured from an APR
//! - **Adaptive Curve**: rate at 90% utilization drifts exponentially with the
//!   utilization error; the instantaneous rate follows a 4x-steep curve around it

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::constants::precision::{SECONDS_PER_YEAR, WAD};
use crate::errors::{IsolendError, IsolendResult};
use crate::types::{MarketParams, MarketState};

/// Rate returned by a model together with the memory it wants persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct RateUpdate {
    /// Average per-second borrow rate over the accrual period (WAD)
    pub rate: u128,
    /// Rate-at-target to store on the market (zero for stateless models)
    pub rate_at_target: u128,
}

/// Pluggable borrow rate model
pub trait RateModel {
    /// Borrow rate for accruing `state` up to `now`
    fn borrow_rate(&self, params: &MarketParams, state: &MarketState, now: u64) -> IsolendResult<RateUpdate>;

    /// Same computation for read-only previews
    fn borrow_rate_view(&self, params: &MarketParams, state: &MarketState, now: u64) -> IsolendResult<RateUpdate> {
        self.borrow_rate(params, state, now)
    }
}

// ============================================================================
// Fixed Rate
// ============================================================================

/// Constant per-second borrow rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct FixedRateIrm {
    /// Per-second rate (WAD)
    pub rate_per_second: u128,
}

impl FixedRateIrm {
    pub fn new(rate_per_second: u128) -> Self {
        Self { rate_per_second }
    }

    /// Build from an annual rate (WAD, e.g. 0.05e18 for 5%)
    pub fn from_apr(apr: u128) -> Self {
        Self::new(apr / SECONDS_PER_YEAR)
    }
}

impl RateModel for FixedRateIrm {
    fn borrow_rate(&self, _params: &MarketParams, state: &MarketState, _now: u64) -> IsolendResult<RateUpdate> {
        Ok(RateUpdate {
            rate: self.rate_per_second,
            rate_at_target: state.rate_at_target,
        })
    }
}

// ============================================================================
// Adaptive Curve
// ============================================================================

const I_WAD: i128 = WAD as i128;
const I_YEAR: i128 = SECONDS_PER_YEAR as i128;

/// Steepness of the rate curve around the target (4.0)
pub const CURVE_STEEPNESS: i128 = 4 * I_WAD;

/// Speed at which rate-at-target adapts, per second (50 per year)
pub const ADJUSTMENT_SPEED: i128 = 50 * I_WAD / I_YEAR;

/// Utilization the model steers towards (90%)
pub const TARGET_UTILIZATION: i128 = 9 * I_WAD / 10;

/// Rate-at-target of a fresh market (4% APR)
pub const INITIAL_RATE_AT_TARGET: i128 = 4 * I_WAD / 100 / I_YEAR;

/// Lower bound of rate-at-target (0.1% APR)
pub const MIN_RATE_AT_TARGET: i128 = I_WAD / 1000 / I_YEAR;

/// Upper bound of rate-at-target (200% APR)
pub const MAX_RATE_AT_TARGET: i128 = 2 * I_WAD / I_YEAR;

/// ln(2) in WAD
const LN_2: i128 = 693_147_180_559_945_309;

/// ln(1e-18) in WAD; below this `e^x` rounds to zero
const LN_WEI: i128 = -41_446_531_673_892_822_312;

/// Inputs above this are clamped. Any rate-at-target scaled by `e^20`
/// already exceeds the upper bound, so the clamp never changes a result.
const W_EXP_UPPER_BOUND: i128 = 20 * I_WAD;

fn w_mul_to_zero(x: i128, y: i128) -> IsolendResult<i128> {
    Ok(x.checked_mul(y).ok_or(IsolendError::Overflow)? / I_WAD)
}

fn w_div_to_zero(x: i128, y: i128) -> IsolendResult<i128> {
    if y == 0 {
        return Err(IsolendError::DivisionByZero);
    }
    Ok(x.checked_mul(I_WAD).ok_or(IsolendError::Overflow)? / y)
}

/// `e^x` in WAD, with `x` in WAD.
///
/// Decomposes `x = q * ln(2) + r` with `|r| <= ln(2) / 2` and approximates
/// `e^r` by its second-order expansion.
pub fn w_exp(x: i128) -> i128 {
    if x < LN_WEI {
        return 0;
    }
    let x = x.min(W_EXP_UPPER_BOUND);

    let rounding = if x < 0 { -(LN_2 / 2) } else { LN_2 / 2 };
    let q = (x + rounding) / LN_2;
    let r = x - q * LN_2;
    let exp_r = I_WAD + r + r * r / I_WAD / 2;

    if q >= 0 {
        exp_r << q
    } else {
        exp_r >> (-q)
    }
}

/// Rate model whose rate-at-target adapts to keep utilization near 90%
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct AdaptiveCurveIrm;

impl AdaptiveCurveIrm {
    pub fn new() -> Self {
        Self
    }

    /// Rate on the curve for a given rate-at-target and normalized utilization error
    fn curve(rate_at_target: i128, err: i128) -> IsolendResult<i128> {
        let coefficient = if err < 0 {
            I_WAD - w_div_to_zero(I_WAD, CURVE_STEEPNESS)?
        } else {
            CURVE_STEEPNESS - I_WAD
        };
        w_mul_to_zero(w_mul_to_zero(coefficient, err)? + I_WAD, rate_at_target)
    }

    fn new_rate_at_target(start: i128, linear_adaptation: i128) -> IsolendResult<i128> {
        let rate = w_mul_to_zero(start, w_exp(linear_adaptation))?;
        Ok(rate.clamp(MIN_RATE_AT_TARGET, MAX_RATE_AT_TARGET))
    }

    /// Utilization error normalized to [-1, 1] (WAD)
    fn utilization_error(state: &MarketState) -> IsolendResult<i128> {
        let utilization = i128::try_from(state.utilization()?).map_err(|_| IsolendError::Overflow)?;
        let norm = if utilization > TARGET_UTILIZATION {
            I_WAD - TARGET_UTILIZATION
        } else {
            TARGET_UTILIZATION
        };
        w_div_to_zero(utilization - TARGET_UTILIZATION, norm)
    }
}

impl RateModel for AdaptiveCurveIrm {
    fn borrow_rate(&self, _params: &MarketParams, state: &MarketState, now: u64) -> IsolendResult<RateUpdate> {
        let err = Self::utilization_error(state)?;
        let start = i128::try_from(state.rate_at_target).map_err(|_| IsolendError::Overflow)?;

        let (avg, end) = if start == 0 {
            // First interaction
            (INITIAL_RATE_AT_TARGET, INITIAL_RATE_AT_TARGET)
        } else {
            let speed = w_mul_to_zero(ADJUSTMENT_SPEED, err)?;
            let elapsed = i128::from(now.saturating_sub(state.last_update));
            let linear_adaptation = speed.checked_mul(elapsed).ok_or(IsolendError::Overflow)?;

            if linear_adaptation == 0 {
                (start, start)
            } else {
                let end = Self::new_rate_at_target(start, linear_adaptation)?;
                let mid = Self::new_rate_at_target(start, linear_adaptation / 2)?;
                // Trapezoidal average over the period
                ((start + end + 2 * mid) / 4, end)
            }
        };

        let rate = Self::curve(avg, err)?;
        Ok(RateUpdate {
            rate: u128::try_from(rate).map_err(|_| IsolendError::Underflow)?,
            rate_at_target: u128::try_from(end).map_err(|_| IsolendError::Underflow)?,
        })
    }
}
