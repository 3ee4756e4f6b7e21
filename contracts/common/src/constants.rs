//! Protocol Constants
//!
//! Pinned numeric parameters and the configurable pieces of the ledger.
//!
//! The values in `precision` and `shares` are part of the accounting
//! contract: markets created with different offsets or scales produce
//! different share prices for the same inputs, so they are constants and
//! never configuration.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::errors::{IsolendError, IsolendResult};

/// Fixed-point scales
pub mod precision {
    /// One unit of an 18-decimal fraction (rates, LLTVs, fees, leverage factors)
    pub const WAD: u128 = 1_000_000_000_000_000_000;

    /// Scale of oracle prices (1 collateral unit priced in loan units, times 1e36)
    pub const ORACLE_PRICE_SCALE: u128 = 1_000_000_000_000_000_000_000_000_000_000_000_000;

    /// Seconds in a 365-day year, used to convert APRs into per-second rates
    pub const SECONDS_PER_YEAR: u128 = 365 * 24 * 60 * 60;
}

/// Share accounting offsets
pub mod shares {
    /// Virtual shares added to every share supply.
    /// An empty market mints 1e6 shares per asset.
    pub const VIRTUAL_SHARES: u128 = 1_000_000;

    /// Virtual assets added to every asset total
    pub const VIRTUAL_ASSETS: u128 = 1;
}

/// Fee limits
pub mod fees {
    use super::precision::WAD;

    /// Maximum share of accrued interest a market can route to the fee recipient (25%)
    pub const MAX_FEE: u128 = WAD / 4;

    /// Basis points denominator
    pub const BPS_DENOMINATOR: u128 = 10_000;
}

/// Liquidation incentive defaults
pub mod liquidation {
    use super::precision::WAD;

    /// Default cursor of the incentive curve (30%)
    pub const LIQUIDATION_CURSOR: u128 = 3 * WAD / 10;

    /// Default ceiling of the incentive factor (115%)
    pub const MAX_LIQUIDATION_INCENTIVE_FACTOR: u128 = 115 * WAD / 100;
}

/// Leverage engine defaults
pub mod leverage {
    use super::precision::WAD;

    /// Highest leverage factor the engine accepts by default (10x)
    pub const DEFAULT_MAX_LEVERAGE: u128 = 10 * WAD;

    /// Widest slippage tolerance a caller may request (10%)
    pub const DEFAULT_MAX_SLIPPAGE: u128 = WAD / 10;

    /// Withdraw-swap-repay rounds attempted before the caller covers the rest
    pub const DEFAULT_MAX_UNWIND_STEPS: u8 = 32;
}

/// Namespaces used to derive deterministic addresses
pub mod namespaces {
    /// Custody address of a market ledger
    pub const LEDGER: &[u8] = b"isolend.ledger";

    /// Address of a leverage engine
    pub const LEVERAGE_ENGINE: &[u8] = b"isolend.leverage-engine";
}

pub use fees::*;
pub use leverage::*;
pub use liquidation::*;
pub use precision::*;
pub use shares::*;

// ============================================================================
// Configuration
// ============================================================================

/// Liquidation incentive as a function of the market LLTV.
///
/// `factor(lltv) = min(max_factor, 1 / (1 - cursor * (1 - lltv)))`
///
/// The factor is 1.0 for an LLTV of 100% and grows as the LLTV decreases,
/// until it reaches `max_factor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct LiquidationIncentiveCurve {
    /// Curve cursor (WAD)
    pub cursor: u128,
    /// Upper bound of the factor (WAD, at least 1.0)
    pub max_factor: u128,
}

impl Default for LiquidationIncentiveCurve {
    fn default() -> Self {
        Self {
            cursor: liquidation::LIQUIDATION_CURSOR,
            max_factor: liquidation::MAX_LIQUIDATION_INCENTIVE_FACTOR,
        }
    }
}

impl LiquidationIncentiveCurve {
    /// Validate the curve parameters
    pub fn validate(&self) -> IsolendResult<()> {
        if self.cursor >= precision::WAD {
            return Err(IsolendError::InvalidInput {
                param: "cursor",
                reason: "cursor must be below 1.0",
            });
        }
        if self.max_factor < precision::WAD {
            return Err(IsolendError::InvalidInput {
                param: "max_factor",
                reason: "incentive factor cannot be below 1.0",
            });
        }
        Ok(())
    }

    /// Incentive factor (WAD) for a market with the given LLTV
    pub fn factor(&self, lltv: u128) -> IsolendResult<u128> {
        use crate::math::{w_div_down, w_mul_down};
        use precision::WAD;

        let slack = WAD.checked_sub(lltv).ok_or(IsolendError::MaxLltvExceeded { lltv })?;
        let discount = w_mul_down(self.cursor, slack)?;
        let denominator = WAD.checked_sub(discount).ok_or(IsolendError::Underflow)?;
        let factor = w_div_down(WAD, denominator)?;

        Ok(factor.min(self.max_factor))
    }
}

/// Ledger-wide configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct LedgerConfig {
    /// Custody address holding every supplied asset and collateral
    pub address: crate::types::Address,
    /// Liquidation incentive curve
    pub liquidation_incentive: LiquidationIncentiveCurve,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            address: crate::types::derive_address(namespaces::LEDGER, b"default"),
            liquidation_incentive: LiquidationIncentiveCurve::default(),
        }
    }
}

impl LedgerConfig {
    /// Validate the configuration
    pub fn validate(&self) -> IsolendResult<()> {
        if self.address == crate::types::ZERO_ADDRESS {
            return Err(IsolendError::ZeroAddress { param: "address" });
        }
        self.liquidation_incentive.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use precision::WAD;

    #[test]
    fn test_incentive_factor_shrinks_with_lltv() {
        let curve = LiquidationIncentiveCurve::default();

        // 1 / (1 - 0.3 * 0.2) = 1 / 0.94
        let f80 = curve.factor(8 * WAD / 10).unwrap();
        assert_eq!(f80, WAD * WAD / (WAD - 6 * WAD / 100));

        let f945 = curve.factor(945 * WAD / 1000).unwrap();
        let f50 = curve.factor(WAD / 2).unwrap();
        assert!(f945 < f80);
        assert!(f80 < f50);
    }

    #[test]
    fn test_incentive_factor_is_capped() {
        let curve = LiquidationIncentiveCurve::default();
        // 1 / (1 - 0.3) = 1.428..., capped at 1.15
        assert_eq!(curve.factor(0).unwrap(), liquidation::MAX_LIQUIDATION_INCENTIVE_FACTOR);
        // No bonus at all for an LLTV of 100%
        assert_eq!(curve.factor(WAD).unwrap(), WAD);
    }

    #[test]
    fn test_invalid_curve_rejected() {
        let curve = LiquidationIncentiveCurve { cursor: WAD, max_factor: WAD };
        assert!(matches!(curve.validate(), Err(IsolendError::InvalidInput { .. })));

        let curve = LiquidationIncentiveCurve { cursor: 0, max_factor: WAD - 1 };
        assert!(curve.validate().is_err());
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(LedgerConfig::default().validate().is_ok());
    }
}
