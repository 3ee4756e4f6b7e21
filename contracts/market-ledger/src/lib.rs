//! Market Ledger - Isolated-Market Lending Core
//!
//! Every market pairs one loan token with one collateral token under an
//! immutable oracle, rate model and liquidation LTV. Markets are identified
//! by the Keccak-256 hash of those parameters and never share liquidity.
//!
//! ## Core Operations
//!
//! - **CreateMarket**: Open a market for an enabled rate model and LLTV
//! - **Supply / Withdraw**: Lend loan assets against supply shares
//! - **SupplyCollateral / WithdrawCollateral**: Pledge or release collateral
//! - **Borrow / Repay**: Take and return loan assets against borrow shares
//! - **Liquidate**: Seize collateral of an unhealthy borrower at a bonus
//! - **AccrueInterest**: Roll interest forward and mint fee shares
//!
//! ## Execution Model
//!
//! Each mutating call runs under the re-entrancy lock and journals every
//! write it makes (see [`journal`]). A failing call unwinds the journal, so
//! no partial effect survives an error, including registry changes, token
//! movements and events.
//! `borrow` and `liquidate` may hand control to a callback which can
//! re-enter a small set of operations on the same market (see [`guard`]).

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use alloy_primitives::U256;
use isolend_common::{
    math::{safe_add, safe_sub, to_assets_down, to_assets_up, to_shares_down, to_shares_up, zero_floor_sub},
    Address, AdminGate, AssetsOrShares, AuthorizationRegistry, BTreeMap, BTreeSet, Box, CallContext,
    EventLog, IsolendError, IsolendEvent, IsolendResult, LedgerConfig, LiquidationAmount, MarketId, MarketParams,
    MarketState, Operation, Oracle, Position, RateModel, TokenBank, MAX_FEE, WAD, ZERO_ADDRESS,
};

pub mod guard;
pub mod interest;
mod journal;
pub mod liquidation;


pub use guard::{BorrowCallback, CallbackWindow, LiquidateCallback, LockState, ReentrancyLock, Scope};
pub use interest::Accrual;
pub use liquidation::LiquidationPlan;

use journal::{Checkpoint, Journal, Undo};

// ============ Ledger State ============

/// Everything a failed operation must roll back
#[derive(Debug)]
pub struct LedgerState {
    admin: AdminGate,
    fee_recipient: Address,
    markets: BTreeMap<MarketId, MarketState>,
    market_params: BTreeMap<MarketId, MarketParams>,
    positions: BTreeMap<(MarketId, Address), Position>,
    authorizations: AuthorizationRegistry,
    enabled_irms: BTreeSet<Address>,
    enabled_lltvs: BTreeSet<u128>,
    tokens: TokenBank,
    events: EventLog,
}

impl LedgerState {
    fn new(owner: Address) -> IsolendResult<Self> {
        Ok(Self {
            admin: AdminGate::new(owner)?,
            fee_recipient: owner,
            markets: BTreeMap::new(),
            market_params: BTreeMap::new(),
            positions: BTreeMap::new(),
            authorizations: AuthorizationRegistry::new(),
            enabled_irms: BTreeSet::new(),
            enabled_lltvs: BTreeSet::new(),
            tokens: TokenBank::new(),
            events: EventLog::new(),
        })
    }
}

/// Amounts settled by a liquidation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct LiquidationOutcome {
    pub seized_assets: u128,
    pub repaid_assets: u128,
    pub repaid_shares: u128,
    /// Debt written off against suppliers
    pub bad_debt_assets: u128,
    pub bad_debt_shares: u128,
}

// ============ Market Ledger ============

/// Isolated-market lending ledger
pub struct MarketLedger {
    config: LedgerConfig,
    state: LedgerState,
    rate_models: BTreeMap<Address, Box<dyn RateModel>>,
    oracles: BTreeMap<Address, Box<dyn Oracle>>,
    lock: ReentrancyLock,
    journal: Journal,
}

impl MarketLedger {
    /// Creates a ledger owned by `owner`, who is also the initial fee recipient.
    ///
    /// # Errors
    /// `ZeroAddress` for a zero owner or ledger address, `InvalidInput` for a
    /// malformed liquidation incentive curve.
    pub fn new(config: LedgerConfig, owner: Address) -> IsolendResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: LedgerState::new(owner)?,
            rate_models: BTreeMap::new(),
            oracles: BTreeMap::new(),
            lock: ReentrancyLock::new(),
            journal: Journal::default(),
        })
    }

    /// Custody address of the ledger
    pub fn address(&self) -> Address {
        self.config.address
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    // ============ Execution ============

    /// Run `f` under the lock, unwinding its writes if it fails
    fn execute<T>(
        &mut self,
        operation: Operation,
        scope: Scope,
        f: impl FnOnce(&mut Self) -> IsolendResult<T>,
    ) -> IsolendResult<T> {
        let previous = self.lock.enter(operation, &scope)?;
        let result = self.atomically(f);
        self.lock.exit(previous);
        result
    }

    /// Run a sequence of ledger calls as one unit: if `f` fails, every
    /// effect it had on the ledger, including registrations and token
    /// movements made through [`Self::tokens_mut`], is discarded.
    ///
    /// Does not take the lock, so the calls inside are checked individually.
    pub fn transact<T>(&mut self, f: impl FnOnce(&mut Self) -> IsolendResult<T>) -> IsolendResult<T> {
        self.atomically(f)
    }

    fn atomically<T>(&mut self, f: impl FnOnce(&mut Self) -> IsolendResult<T>) -> IsolendResult<T> {
        let checkpoint = self.checkpoint();
        let result = f(self);
        if result.is_err() {
            self.rollback(checkpoint);
        }
        self.release();
        result
    }

    // ============ Journal ============

    fn checkpoint(&mut self) -> Checkpoint {
        if !self.journal.is_recording() {
            self.state.tokens.start_recording();
        }
        Checkpoint {
            writes: self.journal.begin(),
            events: self.state.events.len(),
            tokens: self.state.tokens.mark(),
        }
    }

    fn rollback(&mut self, checkpoint: Checkpoint) {
        while let Some(undo) = self.journal.pop_after(checkpoint.writes) {
            self.revert(undo);
        }
        self.state.events.truncate(checkpoint.events);
        self.state.tokens.rollback_to(checkpoint.tokens);
    }

    fn release(&mut self) {
        if self.journal.end() {
            self.state.tokens.stop_recording();
        }
    }

    fn revert(&mut self, undo: Undo) {
        match undo {
            Undo::Owner(admin) => self.state.admin = admin,
            Undo::FeeRecipient(recipient) => self.state.fee_recipient = recipient,
            Undo::Irm(irm) => {
                self.state.enabled_irms.remove(&irm);
                self.rate_models.remove(&irm);
            }
            Undo::Lltv(lltv) => {
                self.state.enabled_lltvs.remove(&lltv);
            }
            Undo::Oracle(oracle) => {
                self.oracles.remove(&oracle);
            }
            Undo::Market(market_id, previous) => match previous {
                Some(market) => {
                    self.state.markets.insert(market_id, market);
                }
                None => {
                    self.state.markets.remove(&market_id);
                }
            },
            Undo::MarketParams(market_id) => {
                self.state.market_params.remove(&market_id);
            }
            Undo::Position(key, previous) => match previous {
                Some(position) => {
                    self.state.positions.insert(key, position);
                }
                None => {
                    self.state.positions.remove(&key);
                }
            },
            Undo::Authorization { owner, operator, granted } => {
                self.state.authorizations.set(owner, operator, granted);
            }
        }
    }

    // ============ Internal Helpers ============

    fn require_market(&self, market_id: &MarketId) -> IsolendResult<MarketState> {
        self.state
            .markets
            .get(market_id)
            .copied()
            .ok_or(IsolendError::MarketNotFound { market_id: *market_id })
    }

    fn store_market(&mut self, market_id: MarketId, market: MarketState) {
        let previous = self.state.markets.insert(market_id, market);
        self.journal.record(Undo::Market(market_id, previous));
    }

    fn position_mut(&mut self, market_id: MarketId, owner: Address) -> &mut Position {
        let key = (market_id, owner);
        let previous = self.state.positions.get(&key).copied();
        self.journal.record(Undo::Position(key, previous));
        self.state.positions.entry(key).or_default()
    }

    fn store_position(&mut self, market_id: MarketId, owner: Address, position: Position) {
        *self.position_mut(market_id, owner) = position;
    }

    fn price_of(&self, params: &MarketParams) -> IsolendResult<U256> {
        let price = self
            .oracles
            .get(&params.oracle)
            .ok_or(IsolendError::OracleNotFound { oracle: params.oracle })?
            .price()?;
        if price.is_zero() {
            return Err(IsolendError::ZeroPrice { oracle: params.oracle });
        }
        Ok(price)
    }

    fn rate_model(&self, irm: &Address) -> IsolendResult<&dyn RateModel> {
        self.rate_models
            .get(irm)
            .map(|model| model.as_ref())
            .ok_or(IsolendError::RateModelNotEnabled { irm: *irm })
    }

    /// Pull `amount` of `token` from `from` into custody
    fn pull(&mut self, token: &Address, from: &Address, amount: u128) -> IsolendResult<()> {
        let ledger = self.config.address;
        self.state.tokens.transfer_from(token, &ledger, from, &ledger, amount)
    }

    /// Pay `amount` of `token` out of custody
    fn push(&mut self, token: &Address, to: &Address, amount: u128) -> IsolendResult<()> {
        let ledger = self.config.address;
        self.state.tokens.transfer(token, &ledger, to, amount)
    }

    fn emit(&mut self, event: IsolendEvent) {
        self.state.events.emit(event);
    }

    /// Accrue `market_id` up to `now`, crediting fee shares to the fee recipient
    fn accrue(&mut self, params: &MarketParams, market_id: MarketId, now: u64) -> IsolendResult<()> {
        let market = self.require_market(&market_id)?;
        let model = self.rate_model(&params.irm)?;
        let Some(accrual) = interest::accrue(params, &market, model, now)? else {
            return Ok(());
        };

        self.store_market(market_id, accrual.state);
        if accrual.fee_shares > 0 {
            let recipient = self.state.fee_recipient;
            let position = self.position_mut(market_id, recipient);
            position.supply_shares = safe_add(position.supply_shares, accrual.fee_shares)?;
        }

        self.emit(IsolendEvent::AccrueInterest {
            market_id,
            borrow_rate: accrual.borrow_rate,
            interest: accrual.interest,
            fee_shares: accrual.fee_shares,
        });
        Ok(())
    }

    fn require_healthy(&self, params: &MarketParams, market_id: &MarketId, borrower: &Address) -> IsolendResult<()> {
        let position = self.position(market_id, borrower);
        if !position.has_debt() {
            return Ok(());
        }
        let market = self.require_market(market_id)?;
        let price = self.price_of(params)?;
        if !liquidation::is_healthy(&position, &market, params, price)? {
            return Err(IsolendError::InsufficientCollateral);
        }
        Ok(())
    }

    // ============ Administration ============

    /// Hand ownership to `new_owner`
    pub fn set_owner(&mut self, ctx: &CallContext, new_owner: Address) -> IsolendResult<()> {
        let ctx = *ctx;
        self.execute(Operation::Admin, Scope::global(), |ledger| {
            if new_owner == ZERO_ADDRESS {
                return Err(IsolendError::ZeroAddress { param: "new_owner" });
            }
            let previous = ledger.state.admin;
            ledger.state.admin.transfer(&ctx.sender, new_owner)?;
            ledger.journal.record(Undo::Owner(previous));
            ledger.emit(IsolendEvent::SetOwner { new_owner });
            Ok(())
        })
    }

    /// Change where fee shares are minted. Already-minted shares stay put.
    pub fn set_fee_recipient(&mut self, ctx: &CallContext, new_fee_recipient: Address) -> IsolendResult<()> {
        let ctx = *ctx;
        self.execute(Operation::Admin, Scope::global(), |ledger| {
            ledger.state.admin.require_owner(&ctx.sender)?;
            if new_fee_recipient == ledger.state.fee_recipient {
                return Err(IsolendError::AlreadySet);
            }
            let previous = core::mem::replace(&mut ledger.state.fee_recipient, new_fee_recipient);
            ledger.journal.record(Undo::FeeRecipient(previous));
            ledger.emit(IsolendEvent::SetFeeRecipient { new_fee_recipient });
            Ok(())
        })
    }

    /// Allow markets to use `model`, registered under `irm`
    pub fn enable_irm(&mut self, ctx: &CallContext, irm: Address, model: Box<dyn RateModel>) -> IsolendResult<()> {
        let ctx = *ctx;
        self.execute(Operation::Admin, Scope::global(), |ledger| {
            ledger.state.admin.require_owner(&ctx.sender)?;
            if irm == ZERO_ADDRESS {
                return Err(IsolendError::ZeroAddress { param: "irm" });
            }
            if !ledger.state.enabled_irms.insert(irm) {
                return Err(IsolendError::AlreadySet);
            }
            ledger.rate_models.insert(irm, model);
            ledger.journal.record(Undo::Irm(irm));
            ledger.emit(IsolendEvent::EnableIrm { irm });
            Ok(())
        })
    }

    /// Allow markets to use `lltv` (WAD, strictly below 1.0)
    pub fn enable_lltv(&mut self, ctx: &CallContext, lltv: u128) -> IsolendResult<()> {
        let ctx = *ctx;
        self.execute(Operation::Admin, Scope::global(), |ledger| {
            ledger.state.admin.require_owner(&ctx.sender)?;
            if lltv >= WAD {
                return Err(IsolendError::MaxLltvExceeded { lltv });
            }
            if !ledger.state.enabled_lltvs.insert(lltv) {
                return Err(IsolendError::AlreadySet);
            }
            ledger.journal.record(Undo::Lltv(lltv));
            ledger.emit(IsolendEvent::EnableLltv { lltv });
            Ok(())
        })
    }

    /// Register a price source under `oracle`. First registration wins.
    pub fn register_oracle(&mut self, oracle: Address, source: Box<dyn Oracle>) -> IsolendResult<()> {
        self.execute(Operation::Admin, Scope::global(), |ledger| {
            if oracle == ZERO_ADDRESS {
                return Err(IsolendError::ZeroAddress { param: "oracle" });
            }
            if ledger.oracles.contains_key(&oracle) {
                return Err(IsolendError::AlreadySet);
            }
            ledger.oracles.insert(oracle, source);
            ledger.journal.record(Undo::Oracle(oracle));
            Ok(())
        })
    }

    /// Set the share of interest taken as fee on one market (WAD, at most 25%).
    ///
    /// Interest up to now is accrued under the old fee first.
    pub fn set_fee(&mut self, ctx: &CallContext, params: &MarketParams, fee: u128) -> IsolendResult<()> {
        let ctx = *ctx;
        let market_id = params.id();
        self.execute(Operation::Admin, Scope::market(market_id), |ledger| {
            ledger.state.admin.require_owner(&ctx.sender)?;
            let market = ledger.require_market(&market_id)?;
            if fee == market.fee {
                return Err(IsolendError::AlreadySet);
            }
            if fee > MAX_FEE {
                return Err(IsolendError::MaxFeeExceeded { fee, maximum: MAX_FEE });
            }

            ledger.accrue(params, market_id, ctx.timestamp)?;

            let mut market = ledger.require_market(&market_id)?;
            market.fee = fee;
            ledger.store_market(market_id, market);
            ledger.emit(IsolendEvent::SetFee { market_id, fee });
            Ok(())
        })
    }

    // ============ Markets ============

    /// Create the market for `params`. Anyone may create a market.
    ///
    /// # Errors
    /// - `RateModelNotEnabled` / `LltvNotEnabled` for parameters off the allow-lists
    /// - `MarketAlreadyExists` if the same parameters were used before
    pub fn create_market(&mut self, ctx: &CallContext, params: &MarketParams) -> IsolendResult<MarketId> {
        let ctx = *ctx;
        let market_id = params.id();
        self.execute(Operation::CreateMarket, Scope::market(market_id), |ledger| {
            // 1. Validate parameters against the allow-lists
            if !ledger.state.enabled_irms.contains(&params.irm) {
                return Err(IsolendError::RateModelNotEnabled { irm: params.irm });
            }
            if !ledger.state.enabled_lltvs.contains(&params.lltv) {
                return Err(IsolendError::LltvNotEnabled { lltv: params.lltv });
            }
            if ledger.state.markets.contains_key(&market_id) {
                return Err(IsolendError::MarketAlreadyExists { market_id });
            }

            // 2. Let the rate model seed its memory
            let mut market = MarketState::new(ctx.timestamp);
            let update = ledger.rate_model(&params.irm)?.borrow_rate(params, &market, ctx.timestamp)?;
            market.rate_at_target = update.rate_at_target;

            // 3. Record
            ledger.store_market(market_id, market);
            ledger.state.market_params.insert(market_id, *params);
            ledger.journal.record(Undo::MarketParams(market_id));
            ledger.emit(IsolendEvent::CreateMarket {
                market_id,
                params: *params,
            });
            Ok(market_id)
        })
    }

    /// Accrue interest on a market up to `ctx.timestamp`
    pub fn accrue_interest(&mut self, ctx: &CallContext, params: &MarketParams) -> IsolendResult<()> {
        let now = ctx.timestamp;
        let market_id = params.id();
        self.execute(Operation::AccrueInterest, Scope::market(market_id), |ledger| {
            ledger.accrue(params, market_id, now)
        })
    }

    // ============ Supply Side ============

    /// Supply loan assets on behalf of `on_behalf`. Returns `(assets, shares)`.
    ///
    /// Exact assets mint shares rounded down; exact shares cost assets rounded up.
    pub fn supply(
        &mut self,
        ctx: &CallContext,
        params: &MarketParams,
        amount: AssetsOrShares,
        on_behalf: Address,
    ) -> IsolendResult<(u128, u128)> {
        let ctx = *ctx;
        let market_id = params.id();
        self.execute(Operation::Supply, Scope::position(market_id, on_behalf), |ledger| {
            // 1. Validate
            amount.validate()?;
            if on_behalf == ZERO_ADDRESS {
                return Err(IsolendError::ZeroAddress { param: "on_behalf" });
            }
            ledger.accrue(params, market_id, ctx.timestamp)?;

            // 2. Convert
            let mut market = ledger.require_market(&market_id)?;
            let (assets, shares) = match amount {
                AssetsOrShares::Assets(assets) => (
                    assets,
                    to_shares_down(assets, market.total_supply_assets, market.total_supply_shares)?,
                ),
                AssetsOrShares::Shares(shares) => (
                    to_assets_up(shares, market.total_supply_assets, market.total_supply_shares)?,
                    shares,
                ),
            };

            // 3. Update position and totals
            let position = ledger.position_mut(market_id, on_behalf);
            position.supply_shares = safe_add(position.supply_shares, shares)?;
            market.total_supply_shares = safe_add(market.total_supply_shares, shares)?;
            market.total_supply_assets = safe_add(market.total_supply_assets, assets)?;
            ledger.store_market(market_id, market);

            // 4. Settle
            ledger.pull(&params.loan_token, &ctx.sender, assets)?;
            ledger.emit(IsolendEvent::Supply {
                market_id,
                caller: ctx.sender,
                on_behalf,
                assets,
                shares,
            });
            Ok((assets, shares))
        })
    }

    /// Withdraw loan assets from `on_behalf`'s supply. Returns `(assets, shares)`.
    ///
    /// Exact assets burn shares rounded up; exact shares pay assets rounded down.
    pub fn withdraw(
        &mut self,
        ctx: &CallContext,
        params: &MarketParams,
        amount: AssetsOrShares,
        on_behalf: Address,
        receiver: Address,
    ) -> IsolendResult<(u128, u128)> {
        let ctx = *ctx;
        let market_id = params.id();
        self.execute(Operation::Withdraw, Scope::position(market_id, on_behalf), |ledger| {
            // 1. Validate
            amount.validate()?;
            if receiver == ZERO_ADDRESS {
                return Err(IsolendError::ZeroAddress { param: "receiver" });
            }
            ledger.require_market(&market_id)?;
            ledger.state.authorizations.require_authorized(&on_behalf, &ctx.sender)?;
            ledger.accrue(params, market_id, ctx.timestamp)?;

            // 2. Convert
            let mut market = ledger.require_market(&market_id)?;
            let (assets, shares) = match amount {
                AssetsOrShares::Assets(assets) => (
                    assets,
                    to_shares_up(assets, market.total_supply_assets, market.total_supply_shares)?,
                ),
                AssetsOrShares::Shares(shares) => (
                    to_assets_down(shares, market.total_supply_assets, market.total_supply_shares)?,
                    shares,
                ),
            };

            // 3. Burn shares
            let position = ledger.position_mut(market_id, on_behalf);
            if position.supply_shares < shares {
                return Err(IsolendError::InsufficientSupplyShares {
                    held: position.supply_shares,
                    requested: shares,
                });
            }
            position.supply_shares -= shares;

            // 4. Outstanding borrows stay covered
            let available = market.liquidity();
            market.total_supply_shares = safe_sub(market.total_supply_shares, shares)?;
            market.total_supply_assets = safe_sub(market.total_supply_assets, assets)?;
            if market.total_borrow_assets > market.total_supply_assets {
                return Err(IsolendError::InsufficientLiquidity {
                    available,
                    requested: assets,
                });
            }
            ledger.store_market(market_id, market);

            // 5. Settle
            ledger.push(&params.loan_token, &receiver, assets)?;
            ledger.emit(IsolendEvent::Withdraw {
                market_id,
                caller: ctx.sender,
                on_behalf,
                receiver,
                assets,
                shares,
            });
            Ok((assets, shares))
        })
    }

    // ============ Collateral ============

    /// Pledge collateral to `on_behalf`'s position
    pub fn supply_collateral(
        &mut self,
        ctx: &CallContext,
        params: &MarketParams,
        assets: u128,
        on_behalf: Address,
    ) -> IsolendResult<()> {
        let ctx = *ctx;
        let market_id = params.id();
        self.execute(Operation::SupplyCollateral, Scope::position(market_id, on_behalf), |ledger| {
            if assets == 0 {
                return Err(IsolendError::ZeroAmount);
            }
            if on_behalf == ZERO_ADDRESS {
                return Err(IsolendError::ZeroAddress { param: "on_behalf" });
            }
            ledger.accrue(params, market_id, ctx.timestamp)?;

            let position = ledger.position_mut(market_id, on_behalf);
            position.collateral = safe_add(position.collateral, assets)?;

            ledger.pull(&params.collateral_token, &ctx.sender, assets)?;
            ledger.emit(IsolendEvent::SupplyCollateral {
                market_id,
                caller: ctx.sender,
                on_behalf,
                assets,
            });
            Ok(())
        })
    }

    /// Release collateral from `on_behalf`'s position to `receiver`.
    /// The position must stay healthy.
    pub fn withdraw_collateral(
        &mut self,
        ctx: &CallContext,
        params: &MarketParams,
        assets: u128,
        on_behalf: Address,
        receiver: Address,
    ) -> IsolendResult<()> {
        let ctx = *ctx;
        let market_id = params.id();
        self.execute(Operation::WithdrawCollateral, Scope::position(market_id, on_behalf), |ledger| {
            // 1. Validate
            if assets == 0 {
                return Err(IsolendError::ZeroAmount);
            }
            if receiver == ZERO_ADDRESS {
                return Err(IsolendError::ZeroAddress { param: "receiver" });
            }
            ledger.require_market(&market_id)?;
            ledger.state.authorizations.require_authorized(&on_behalf, &ctx.sender)?;
            ledger.accrue(params, market_id, ctx.timestamp)?;

            // 2. Remove collateral
            let position = ledger.position_mut(market_id, on_behalf);
            if position.collateral < assets {
                return Err(IsolendError::InsufficientCollateral);
            }
            position.collateral -= assets;

            // 3. Health check at the current price
            ledger.require_healthy(params, &market_id, &on_behalf)?;

            // 4. Settle
            ledger.push(&params.collateral_token, &receiver, assets)?;
            ledger.emit(IsolendEvent::WithdrawCollateral {
                market_id,
                caller: ctx.sender,
                on_behalf,
                receiver,
                assets,
            });
            Ok(())
        })
    }

    // ============ Borrow Side ============

    /// Borrow loan assets against `on_behalf`'s collateral. Returns `(assets, shares)`.
    ///
    /// Exact assets mint borrow shares rounded up; exact shares pay assets
    /// rounded down. When `callback` is given it runs after the assets reached
    /// `receiver` and may supply or pledge on the same market before the
    /// health check.
    pub fn borrow(
        &mut self,
        ctx: &CallContext,
        params: &MarketParams,
        amount: AssetsOrShares,
        on_behalf: Address,
        receiver: Address,
        callback: Option<&mut dyn BorrowCallback>,
    ) -> IsolendResult<(u128, u128)> {
        let ctx = *ctx;
        let market_id = params.id();
        self.execute(Operation::Borrow, Scope::position(market_id, on_behalf), move |ledger| {
            // 1. Validate
            amount.validate()?;
            if receiver == ZERO_ADDRESS {
                return Err(IsolendError::ZeroAddress { param: "receiver" });
            }
            ledger.require_market(&market_id)?;
            ledger.state.authorizations.require_authorized(&on_behalf, &ctx.sender)?;
            ledger.accrue(params, market_id, ctx.timestamp)?;

            // 2. Convert
            let mut market = ledger.require_market(&market_id)?;
            let (assets, shares) = match amount {
                AssetsOrShares::Assets(assets) => (
                    assets,
                    to_shares_up(assets, market.total_borrow_assets, market.total_borrow_shares)?,
                ),
                AssetsOrShares::Shares(shares) => (
                    to_assets_down(shares, market.total_borrow_assets, market.total_borrow_shares)?,
                    shares,
                ),
            };

            // 3. Mint debt
            let position = ledger.position_mut(market_id, on_behalf);
            position.borrow_shares = safe_add(position.borrow_shares, shares)?;
            let available = market.liquidity();
            market.total_borrow_shares = safe_add(market.total_borrow_shares, shares)?;
            market.total_borrow_assets = safe_add(market.total_borrow_assets, assets)?;
            if market.total_borrow_assets > market.total_supply_assets {
                return Err(IsolendError::InsufficientLiquidity {
                    available,
                    requested: assets,
                });
            }
            ledger.store_market(market_id, market);

            // 4. Pay out
            ledger.push(&params.loan_token, &receiver, assets)?;
            ledger.emit(IsolendEvent::Borrow {
                market_id,
                caller: ctx.sender,
                on_behalf,
                receiver,
                assets,
                shares,
            });

            // 5. Callback window
            if let Some(callback) = callback {
                ledger.lock.open(CallbackWindow::Borrow { market_id, on_behalf });
                let result = callback.on_borrow(ledger, &ctx, assets, shares);
                ledger.lock.close();
                result?;
            }

            // 6. Health check, seeing whatever the callback pledged
            ledger.require_healthy(params, &market_id, &on_behalf)?;
            Ok((assets, shares))
        })
    }

    /// Repay debt of `on_behalf`. Anyone may repay. Returns `(assets, shares)`.
    ///
    /// Exact assets burn shares rounded down; exact shares cost assets rounded up.
    pub fn repay(
        &mut self,
        ctx: &CallContext,
        params: &MarketParams,
        amount: AssetsOrShares,
        on_behalf: Address,
    ) -> IsolendResult<(u128, u128)> {
        let ctx = *ctx;
        let market_id = params.id();
        self.execute(Operation::Repay, Scope::position(market_id, on_behalf), |ledger| {
            // 1. Validate
            amount.validate()?;
            if on_behalf == ZERO_ADDRESS {
                return Err(IsolendError::ZeroAddress { param: "on_behalf" });
            }
            ledger.accrue(params, market_id, ctx.timestamp)?;

            // 2. Convert
            let mut market = ledger.require_market(&market_id)?;
            let (assets, shares) = match amount {
                AssetsOrShares::Assets(assets) => (
                    assets,
                    to_shares_down(assets, market.total_borrow_assets, market.total_borrow_shares)?,
                ),
                AssetsOrShares::Shares(shares) => (
                    to_assets_up(shares, market.total_borrow_assets, market.total_borrow_shares)?,
                    shares,
                ),
            };

            // 3. Burn debt
            let position = ledger.position_mut(market_id, on_behalf);
            if position.borrow_shares < shares {
                return Err(IsolendError::InsufficientBorrowShares {
                    owed: position.borrow_shares,
                    requested: shares,
                });
            }
            position.borrow_shares -= shares;
            market.total_borrow_shares = safe_sub(market.total_borrow_shares, shares)?;
            // Rounding may leave assets repaid above the recorded total
            market.total_borrow_assets = zero_floor_sub(market.total_borrow_assets, assets);
            ledger.store_market(market_id, market);

            // 4. Settle
            ledger.pull(&params.loan_token, &ctx.sender, assets)?;
            ledger.emit(IsolendEvent::Repay {
                market_id,
                caller: ctx.sender,
                on_behalf,
                assets,
                shares,
            });
            Ok((assets, shares))
        })
    }

    // ============ Liquidation ============

    /// Liquidate an unhealthy `borrower`.
    ///
    /// `amount` fixes either the collateral to seize or the borrow shares to
    /// repay; the other leg follows from the oracle price and the market's
    /// incentive factor. If the borrower is left without collateral, the
    /// remaining debt is written off against suppliers. Otherwise the
    /// borrower must come out healthy.
    ///
    /// When `callback` is given it runs after the collateral reached the
    /// liquidator and before the repayment is pulled.
    pub fn liquidate(
        &mut self,
        ctx: &CallContext,
        params: &MarketParams,
        borrower: Address,
        amount: LiquidationAmount,
        callback: Option<&mut dyn LiquidateCallback>,
    ) -> IsolendResult<LiquidationOutcome> {
        let ctx = *ctx;
        let market_id = params.id();
        self.execute(Operation::Liquidate, Scope::position(market_id, borrower), move |ledger| {
            // 1. Accrue and check the borrower is liquidatable
            ledger.require_market(&market_id)?;
            ledger.accrue(params, market_id, ctx.timestamp)?;

            let mut market = ledger.require_market(&market_id)?;
            let price = ledger.price_of(params)?;
            let mut position = ledger.position(&market_id, &borrower);
            if liquidation::is_healthy(&position, &market, params, price)? {
                return Err(IsolendError::PositionHealthy { borrower });
            }

            // 2. Size both legs
            let incentive = ledger.config.liquidation_incentive.factor(params.lltv)?;
            let plan = liquidation::plan_liquidation(amount, &position, &market, price, incentive)?;
            if plan.seized_assets == 0 && plan.repaid_shares == 0 {
                return Err(IsolendError::ZeroAmount);
            }

            // 3. Apply
            position.borrow_shares -= plan.repaid_shares;
            position.collateral -= plan.seized_assets;
            market.total_borrow_shares = safe_sub(market.total_borrow_shares, plan.repaid_shares)?;
            market.total_borrow_assets = zero_floor_sub(market.total_borrow_assets, plan.repaid_assets);

            // 4. Socialize what no collateral backs any more
            let mut outcome = LiquidationOutcome {
                seized_assets: plan.seized_assets,
                repaid_assets: plan.repaid_assets,
                repaid_shares: plan.repaid_shares,
                ..LiquidationOutcome::default()
            };
            if position.collateral == 0 && position.borrow_shares > 0 {
                let bad_debt_shares = position.borrow_shares;
                let bad_debt_assets = market
                    .total_borrow_assets
                    .min(to_assets_up(bad_debt_shares, market.total_borrow_assets, market.total_borrow_shares)?);

                market.total_borrow_assets -= bad_debt_assets;
                market.total_supply_assets = safe_sub(market.total_supply_assets, bad_debt_assets)?;
                market.total_borrow_shares = safe_sub(market.total_borrow_shares, bad_debt_shares)?;
                position.borrow_shares = 0;

                outcome.bad_debt_assets = bad_debt_assets;
                outcome.bad_debt_shares = bad_debt_shares;
            } else if !liquidation::is_healthy(&position, &market, params, price)? {
                return Err(IsolendError::LiquidationIncomplete);
            }

            ledger.store_market(market_id, market);
            ledger.store_position(market_id, borrower, position);

            // 5. Seized collateral goes out first
            ledger.push(&params.collateral_token, &ctx.sender, plan.seized_assets)?;
            ledger.emit(IsolendEvent::Liquidate {
                market_id,
                caller: ctx.sender,
                borrower,
                repaid_assets: outcome.repaid_assets,
                repaid_shares: outcome.repaid_shares,
                seized_assets: outcome.seized_assets,
                bad_debt_assets: outcome.bad_debt_assets,
                bad_debt_shares: outcome.bad_debt_shares,
            });

            // 6. Callback window
            if let Some(callback) = callback {
                ledger.lock.open(CallbackWindow::Liquidate { market_id });
                let result = callback.on_liquidate(ledger, &ctx, outcome.repaid_assets, outcome.seized_assets);
                ledger.lock.close();
                result?;
            }

            // 7. Pull the repayment
            ledger.pull(&params.loan_token, &ctx.sender, outcome.repaid_assets)?;
            Ok(outcome)
        })
    }

    // ============ Authorization ============

    /// Grant or revoke `operator`'s right to act for the caller.
    /// Setting the current value again is allowed and still logged.
    pub fn set_authorization(&mut self, ctx: &CallContext, operator: Address, granted: bool) -> IsolendResult<()> {
        let ctx = *ctx;
        self.execute(Operation::SetAuthorization, Scope::global(), |ledger| {
            if operator == ZERO_ADDRESS {
                return Err(IsolendError::ZeroAddress { param: "operator" });
            }
            let previous = ledger.state.authorizations.is_granted(&ctx.sender, &operator);
            ledger.state.authorizations.set(ctx.sender, operator, granted);
            ledger.journal.record(Undo::Authorization {
                owner: ctx.sender,
                operator,
                granted: previous,
            });
            ledger.emit(IsolendEvent::SetAuthorization {
                caller: ctx.sender,
                authorizer: ctx.sender,
                authorized: operator,
                is_authorized: granted,
            });
            Ok(())
        })
    }

    // ============ Views ============

    pub fn owner(&self) -> Address {
        self.state.admin.owner
    }

    pub fn fee_recipient(&self) -> Address {
        self.state.fee_recipient
    }

    /// Stored state of a market, without pending interest
    pub fn market(&self, market_id: &MarketId) -> IsolendResult<MarketState> {
        self.require_market(market_id)
    }

    pub fn market_params(&self, market_id: &MarketId) -> IsolendResult<MarketParams> {
        self.state
            .market_params
            .get(market_id)
            .copied()
            .ok_or(IsolendError::MarketNotFound { market_id: *market_id })
    }

    /// Position of `owner`. Empty for unknown owners or markets.
    pub fn position(&self, market_id: &MarketId, owner: &Address) -> Position {
        self.state
            .positions
            .get(&(*market_id, *owner))
            .copied()
            .unwrap_or_default()
    }

    /// Check if `caller` may act for `owner`
    pub fn is_authorized(&self, owner: &Address, caller: &Address) -> bool {
        self.state.authorizations.is_authorized(owner, caller)
    }

    pub fn is_irm_enabled(&self, irm: &Address) -> bool {
        self.state.enabled_irms.contains(irm)
    }

    pub fn is_lltv_enabled(&self, lltv: u128) -> bool {
        self.state.enabled_lltvs.contains(&lltv)
    }

    /// Market state as `accrue_interest` would leave it at `now`
    pub fn expected_market_state(&self, params: &MarketParams, now: u64) -> IsolendResult<MarketState> {
        let market = self.require_market(&params.id())?;
        let model = self.rate_model(&params.irm)?;
        Ok(interest::preview(params, &market, model, now)?
            .map(|accrual| accrual.state)
            .unwrap_or(market))
    }

    /// Debt of `borrower` at `now`, rounded up
    pub fn expected_borrow_assets(&self, params: &MarketParams, borrower: &Address, now: u64) -> IsolendResult<u128> {
        let market = self.expected_market_state(params, now)?;
        let position = self.position(&params.id(), borrower);
        to_assets_up(position.borrow_shares, market.total_borrow_assets, market.total_borrow_shares)
    }

    /// Supply of `supplier` at `now`, rounded down. Counts pending fee
    /// shares for the fee recipient.
    pub fn expected_supply_assets(&self, params: &MarketParams, supplier: &Address, now: u64) -> IsolendResult<u128> {
        let market_id = params.id();
        let stored = self.require_market(&market_id)?;
        let model = self.rate_model(&params.irm)?;
        let accrual = interest::preview(params, &stored, model, now)?;

        let mut shares = self.position(&market_id, supplier).supply_shares;
        let market = match accrual {
            Some(accrual) => {
                if *supplier == self.state.fee_recipient {
                    shares = safe_add(shares, accrual.fee_shares)?;
                }
                accrual.state
            }
            None => stored,
        };
        to_assets_down(shares, market.total_supply_assets, market.total_supply_shares)
    }

    /// Check `borrower` against the stored market state and the current price
    pub fn is_healthy(&self, params: &MarketParams, borrower: &Address) -> IsolendResult<bool> {
        let market_id = params.id();
        let market = self.require_market(&market_id)?;
        let position = self.position(&market_id, borrower);
        if !position.has_debt() {
            return Ok(true);
        }
        liquidation::is_healthy(&position, &market, params, self.price_of(params)?)
    }

    /// Borrowing capacity over debt (WAD), `U256::MAX` without debt
    pub fn health_factor(&self, params: &MarketParams, borrower: &Address) -> IsolendResult<U256> {
        let market_id = params.id();
        let market = self.require_market(&market_id)?;
        let position = self.position(&market_id, borrower);
        if !position.has_debt() {
            return Ok(U256::MAX);
        }
        liquidation::health_factor(&position, &market, params, self.price_of(params)?)
    }

    /// Collateral `borrower` could withdraw right now
    pub fn withdrawable_collateral(&self, params: &MarketParams, borrower: &Address) -> IsolendResult<u128> {
        let market_id = params.id();
        let market = self.require_market(&market_id)?;
        let position = self.position(&market_id, borrower);
        if !position.has_debt() {
            return Ok(position.collateral);
        }
        liquidation::withdrawable_collateral(&position, &market, params, self.price_of(params)?)
    }

    /// Oracle price of a market's collateral (1e36 scale)
    pub fn price(&self, params: &MarketParams) -> IsolendResult<U256> {
        self.price_of(params)
    }

    /// Liquidation incentive factor for a market (WAD)
    pub fn liquidation_incentive_factor(&self, params: &MarketParams) -> IsolendResult<u128> {
        self.config.liquidation_incentive.factor(params.lltv)
    }

    pub fn lock_state(&self) -> LockState {
        self.lock.state()
    }

    pub fn events(&self) -> &EventLog {
        &self.state.events
    }

    // ============ Token Layer ============

    /// Token balances and allowances the ledger settles against
    pub fn tokens(&self) -> &TokenBank {
        &self.state.tokens
    }

    /// Mutable token layer for minting, approvals and transfers outside the
    /// ledger's own operations. Changes made here are part of the state a
    /// `transact` rolls back.
    pub fn tokens_mut(&mut self) -> &mut TokenBank {
        &mut self.state.tokens
    }
}
