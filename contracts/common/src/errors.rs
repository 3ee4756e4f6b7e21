//! Error Types for isolend
//!
//! Every ledger and engine operation returns one of these typed errors.
//! An error always aborts the whole operation: the ledger restores the
//! state it had before the call, so callers never observe partial effects.

use core::fmt;

use crate::types::{Address, MarketId};

/// Result type alias for isolend operations
pub type IsolendResult<T> = Result<T, IsolendError>;

/// Ledger operations, used to report which call was blocked by the re-entrancy guard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    CreateMarket,
    AccrueInterest,
    Supply,
    Withdraw,
    Borrow,
    Repay,
    SupplyCollateral,
    WithdrawCollateral,
    Liquidate,
    SetAuthorization,
    /// Owner-gated configuration calls
    Admin,
}

/// Main error enum for all isolend errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IsolendError {
    // ============ Market Errors ============
    /// No market with this id was created
    MarketNotFound { market_id: MarketId },

    /// A market with the same parameters already exists
    MarketAlreadyExists { market_id: MarketId },

    /// The LLTV is not on the allow-list
    LltvNotEnabled { lltv: u128 },

    /// The rate model is not on the allow-list
    RateModelNotEnabled { irm: Address },

    /// LLTV must stay strictly below 100%
    MaxLltvExceeded { lltv: u128 },

    /// Fee above the protocol maximum
    MaxFeeExceeded { fee: u128, maximum: u128 },

    /// Value is already set
    AlreadySet,

    /// No oracle implementation is registered at this address
    OracleNotFound { oracle: Address },

    /// Oracle reported a price of zero
    ZeroPrice { oracle: Address },

    /// Clock went backwards relative to the market's last accrual
    InvalidTimestamp { last_update: u64, now: u64 },

    // ============ Amount Errors ============
    /// Exactly one of assets / shares (or seized / repaid) must be nonzero
    InconsistentInput,

    /// Zero amount not allowed
    ZeroAmount,

    /// Borrows would exceed supplied assets
    InsufficientLiquidity { available: u128, requested: u128 },

    /// Position would be unhealthy, or holds less collateral than requested
    InsufficientCollateral,

    /// Repayment exceeds the borrow shares owed by the position
    InsufficientBorrowShares { owed: u128, requested: u128 },

    /// Withdrawal exceeds the supply shares held by the position
    InsufficientSupplyShares { held: u128, requested: u128 },

    /// Token balance too small for a transfer
    InsufficientBalance { token: Address, available: u128, requested: u128 },

    /// Allowance too small for a pull transfer
    InsufficientAllowance { token: Address, available: u128, requested: u128 },

    // ============ Authorization Errors ============
    /// Caller is neither the owner nor an authorized operator
    Unauthorized { caller: Address, owner: Address },

    /// Zero address supplied where a real account is required
    ZeroAddress { param: &'static str },

    // ============ Liquidation Errors ============
    /// Liquidation attempted on a healthy position
    PositionHealthy { borrower: Address },

    /// Liquidation would leave collateral behind on a still unhealthy position
    LiquidationIncomplete,

    // ============ Leverage Errors ============
    /// Swap output below the slippage-adjusted minimum
    SlippageExceeded { minimum: u128, received: u128 },

    /// Leverage factor outside the accepted range
    InvalidLeverage { leverage: u128, maximum: u128 },

    /// Full close left borrow shares or collateral behind
    PositionNotClosed { borrow_shares: u128, collateral: u128 },

    /// Swap venue could not execute the trade
    SwapFailed { reason: &'static str },

    // ============ Execution Errors ============
    /// Re-entry into the ledger outside a sanctioned callback window
    NestedOperationNotAllowed { operation: Operation },

    // ============ Math Errors ============
    /// Arithmetic overflow occurred
    Overflow,

    /// Arithmetic underflow occurred
    Underflow,

    /// Division by zero
    DivisionByZero,

    // ============ Input Validation Errors ============
    /// Invalid input parameter
    InvalidInput { param: &'static str, reason: &'static str },
}

impl IsolendError {
    /// Returns a human-readable error code for logging/debugging
    pub fn code(&self) -> &'static str {
        match self {
            Self::MarketNotFound { .. } => "E001_MARKET_NOT_FOUND",
            Self::MarketAlreadyExists { .. } => "E002_MARKET_EXISTS",
            Self::LltvNotEnabled { .. } => "E003_LLTV_NOT_ENABLED",
            Self::RateModelNotEnabled { .. } => "E004_IRM_NOT_ENABLED",
            Self::MaxLltvExceeded { .. } => "E005_MAX_LLTV",
            Self::MaxFeeExceeded { .. } => "E006_MAX_FEE",
            Self::AlreadySet => "E007_ALREADY_SET",
            Self::OracleNotFound { .. } => "E008_ORACLE_NOT_FOUND",
            Self::InvalidTimestamp { .. } => "E009_INVALID_TIMESTAMP",
            Self::ZeroPrice { .. } => "E018_ZERO_PRICE",
            Self::InconsistentInput => "E010_INCONSISTENT_INPUT",
            Self::ZeroAmount => "E011_ZERO_AMOUNT",
            Self::InsufficientLiquidity { .. } => "E012_INSUFFICIENT_LIQUIDITY",
            Self::InsufficientCollateral => "E013_INSUFFICIENT_COLLATERAL",
            Self::InsufficientBorrowShares { .. } => "E014_INSUFFICIENT_BORROW_SHARES",
            Self::InsufficientSupplyShares { .. } => "E015_INSUFFICIENT_SUPPLY_SHARES",
            Self::InsufficientBalance { .. } => "E016_INSUFFICIENT_BALANCE",
            Self::InsufficientAllowance { .. } => "E017_INSUFFICIENT_ALLOWANCE",
            Self::Unauthorized { .. } => "E020_UNAUTHORIZED",
            Self::ZeroAddress { .. } => "E021_ZERO_ADDRESS",
            Self::PositionHealthy { .. } => "E030_POSITION_HEALTHY",
            Self::LiquidationIncomplete => "E031_LIQ_INCOMPLETE",
            Self::SlippageExceeded { .. } => "E040_SLIPPAGE",
            Self::InvalidLeverage { .. } => "E041_INVALID_LEVERAGE",
            Self::PositionNotClosed { .. } => "E042_POSITION_NOT_CLOSED",
            Self::SwapFailed { .. } => "E043_SWAP_FAILED",
            Self::NestedOperationNotAllowed { .. } => "E050_NESTED_OPERATION",
            Self::Overflow => "E080_OVERFLOW",
            Self::Underflow => "E081_UNDERFLOW",
            Self::DivisionByZero => "E082_DIV_ZERO",
            Self::InvalidInput { .. } => "E090_INVALID_INPUT",
        }
    }

    /// Returns true if this error is recoverable (user can fix it)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::InsufficientCollateral => true,       // Add more collateral
            Self::InsufficientBalance { .. } => true,   // Get more funds
            Self::InsufficientAllowance { .. } => true, // Approve more
            Self::InsufficientLiquidity { .. } => true, // Wait for suppliers
            Self::SlippageExceeded { .. } => true,      // Retry with a wider bound
            Self::LiquidationIncomplete => true,        // Repay more
            _ => false,
        }
    }
}

impl fmt::Display for IsolendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientLiquidity { available, requested } => write!(
                f,
                "{}: requested {} with only {} available",
                self.code(),
                requested,
                available
            ),
            Self::SlippageExceeded { minimum, received } => write!(
                f,
                "{}: received {} below minimum {}",
                self.code(),
                received,
                minimum
            ),
            Self::InvalidInput { param, reason } => write!(f, "{}: {} ({})", self.code(), param, reason),
            Self::NestedOperationNotAllowed { operation } => {
                write!(f, "{}: {:?}", self.code(), operation)
            }
            _ => f.write_str(self.code()),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for IsolendError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_error_codes_unique() {
        let errors = [
            IsolendError::MarketNotFound { market_id: [0u8; 32] },
            IsolendError::MarketAlreadyExists { market_id: [0u8; 32] },
            IsolendError::InconsistentInput,
            IsolendError::ZeroPrice { oracle: [0u8; 20] },
            IsolendError::ZeroAmount,
            IsolendError::InsufficientCollateral,
            IsolendError::PositionHealthy { borrower: [0u8; 20] },
            IsolendError::SlippageExceeded { minimum: 1, received: 0 },
            IsolendError::NestedOperationNotAllowed { operation: Operation::Borrow },
            IsolendError::Overflow,
        ];

        let codes: Vec<_> = errors.iter().map(|e| e.code()).collect();
        let unique: BTreeSet<_> = codes.iter().collect();
        assert_eq!(codes.len(), unique.len(), "Error codes must be unique");
    }

    #[test]
    fn test_display_includes_code() {
        let err = IsolendError::InsufficientLiquidity { available: 5, requested: 9 };
        let text = err.to_string();
        assert!(text.starts_with("E012_INSUFFICIENT_LIQUIDITY"));
        assert!(text.contains('9'));
    }
}
