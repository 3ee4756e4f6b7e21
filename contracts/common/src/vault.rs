//! Allocation Vault Interface
//!
//! A meta-vault pools deposits of one loan token and supplies them across
//! ledger markets, subject to a per-market cap and a supply queue. Only the
//! interface lives here; share pricing and reallocation policy belong to the
//! implementation.

use crate::errors::IsolendResult;
use crate::types::{Address, CallContext, MarketId, MarketParams};
use crate::Vec;

/// Supply-side allocator sitting on top of a ledger
pub trait AllocationVault {
    /// Ledger the vault supplies into
    type Ledger;

    /// Propose a supply cap for a market. Caps are pending until accepted.
    fn submit_cap(&mut self, ctx: &CallContext, params: &MarketParams, cap: u128) -> IsolendResult<()>;

    /// Activate a pending cap
    fn accept_cap(&mut self, ctx: &CallContext, params: &MarketParams) -> IsolendResult<()>;

    /// Order in which deposits fill markets. Every entry needs an active cap.
    fn set_supply_queue(&mut self, ctx: &CallContext, queue: Vec<MarketId>) -> IsolendResult<()>;

    /// Deposit loan assets, returning vault shares minted to `receiver`
    fn deposit(
        &mut self,
        ledger: &mut Self::Ledger,
        ctx: &CallContext,
        assets: u128,
        receiver: Address,
    ) -> IsolendResult<u128>;

    /// Redeem loan assets to `receiver`, returning vault shares burned from `owner`
    fn withdraw(
        &mut self,
        ledger: &mut Self::Ledger,
        ctx: &CallContext,
        assets: u128,
        receiver: Address,
        owner: Address,
    ) -> IsolendResult<u128>;
}
