//! Re-entrancy Guard
//!
//! The ledger is locked for the whole duration of every mutating call. Two
//! callbacks open a window during which a fixed set of operations may
//! re-enter on the same market:
//!
//! | Window | Opened by | Re-entry allowed |
//! |---|---|---|
//! | `Borrow` | `borrow`, after state update, before the health check | accrue; supply and supply collateral into the borrowing position |
//! | `Liquidate` | `liquidate`, after the seize, before the repayment pull | accrue, supply, supply collateral, repay |
//!
//! Anything else while locked fails with `NestedOperationNotAllowed`.

use isolend_common::{Address, CallContext, IsolendError, IsolendResult, MarketId, Operation};

use crate::MarketLedger;

/// Market and account an operation touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Scope {
    pub market: Option<MarketId>,
    pub account: Option<Address>,
}

impl Scope {
    /// Ledger-wide call
    pub fn global() -> Self {
        Self::default()
    }

    pub fn market(market_id: MarketId) -> Self {
        Self {
            market: Some(market_id),
            account: None,
        }
    }

    /// Call on one position of a market
    pub fn position(market_id: MarketId, account: Address) -> Self {
        Self {
            market: Some(market_id),
            account: Some(account),
        }
    }
}

/// Sanctioned re-entry window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackWindow {
    Borrow { market_id: MarketId, on_behalf: Address },
    Liquidate { market_id: MarketId },
}

impl CallbackWindow {
    /// Check if `operation` within `scope` may run inside this window
    pub fn permits(&self, operation: Operation, scope: &Scope) -> bool {
        match self {
            Self::Borrow { market_id, on_behalf } => {
                if scope.market != Some(*market_id) {
                    return false;
                }
                match operation {
                    Operation::AccrueInterest => true,
                    // Only the position being borrowed against
                    Operation::Supply | Operation::SupplyCollateral => scope.account == Some(*on_behalf),
                    _ => false,
                }
            }
            Self::Liquidate { market_id } => {
                scope.market == Some(*market_id)
                    && matches!(
                        operation,
                        Operation::AccrueInterest | Operation::Supply | Operation::SupplyCollateral | Operation::Repay
                    )
            }
        }
    }
}

/// Lock state of the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockState {
    #[default]
    Idle,
    /// An operation is running
    Busy,
    /// An operation is suspended in a callback
    Open(CallbackWindow),
}

/// Re-entrancy lock
#[derive(Debug, Default)]
pub struct ReentrancyLock {
    state: LockState,
}

impl ReentrancyLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == LockState::Idle
    }

    /// Take the lock for `operation`, returning the state to restore on exit
    pub fn enter(&mut self, operation: Operation, scope: &Scope) -> IsolendResult<LockState> {
        let previous = self.state;
        match previous {
            LockState::Idle => {}
            LockState::Open(window) if window.permits(operation, scope) => {}
            _ => return Err(IsolendError::NestedOperationNotAllowed { operation }),
        }
        self.state = LockState::Busy;
        Ok(previous)
    }

    /// Release the lock taken by `enter`
    pub fn exit(&mut self, previous: LockState) {
        self.state = previous;
    }

    /// Suspend the running operation and open `window`
    pub(crate) fn open(&mut self, window: CallbackWindow) {
        self.state = LockState::Open(window);
    }

    /// Close the window opened by `open`
    pub(crate) fn close(&mut self) {
        self.state = LockState::Busy;
    }
}

// ============================================================================
// Callbacks
// ============================================================================

/// Continuation run by `borrow` after the borrowed assets reached the receiver
/// and before the borrower's health is checked
pub trait BorrowCallback {
    fn on_borrow(
        &mut self,
        ledger: &mut MarketLedger,
        ctx: &CallContext,
        assets: u128,
        shares: u128,
    ) -> IsolendResult<()>;
}

/// Continuation run by `liquidate` after the seized collateral reached the
/// liquidator and before the repayment is pulled
pub trait LiquidateCallback {
    fn on_liquidate(
        &mut self,
        ledger: &mut MarketLedger,
        ctx: &CallContext,
        repaid_assets: u128,
        seized_assets: u128,
    ) -> IsolendResult<()>;
}
