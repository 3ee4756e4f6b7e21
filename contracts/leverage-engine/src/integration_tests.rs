//! Integration Tests
//!
//! Leveraged positions on a USDC/WBTC market at 105,000 USDC per BTC with
//! an LLTV of 0.8, swapped through an oracle-priced venue.

#[cfg(test)]
mod tests {
    use crate::*;
    use isolend_common::{
        EventType, FixedPriceOracle, FixedRateIrm, LedgerConfig, MarketId, OracleSwapVenue, Position,
        UNLIMITED_ALLOWANCE,
    };
    use isolend_market::LockState;

    const OWNER: Address = [1u8; 20];
    const LENDER: Address = [2u8; 20];
    const USER: Address = [3u8; 20];
    const STRANGER: Address = [4u8; 20];

    const USDC: Address = [10u8; 20];
    const WBTC: Address = [11u8; 20];
    const ORACLE: Address = [12u8; 20];
    const IRM: Address = [13u8; 20];
    const VENUE: Address = [14u8; 20];

    const USD: u128 = 1_000_000;
    const BTC: u128 = 100_000_000;
    const T0: u64 = 1_700_000_000;

    struct Fixture {
        ledger: MarketLedger,
        engine: LeverageEngine,
        params: MarketParams,
        market_id: MarketId,
        oracle: FixedPriceOracle,
    }

    fn at(sender: Address) -> CallContext {
        CallContext::new(sender, T0)
    }

    fn setup_with(config: LeverageConfig) -> Fixture {
        let mut ledger = MarketLedger::new(LedgerConfig::default(), OWNER).unwrap();
        let admin = at(OWNER);
        ledger.enable_irm(&admin, IRM, Box::new(FixedRateIrm::new(0))).unwrap();
        ledger.enable_lltv(&admin, 8 * WAD / 10).unwrap();

        let oracle = FixedPriceOracle::from_ratio(105_000 * USD, BTC).unwrap();
        ledger.register_oracle(ORACLE, Box::new(oracle.clone())).unwrap();

        let params = MarketParams {
            loan_token: USDC,
            collateral_token: WBTC,
            oracle: ORACLE,
            irm: IRM,
            lltv: 8 * WAD / 10,
        };
        let market_id = ledger.create_market(&admin, &params).unwrap();
        let engine = LeverageEngine::new(b"test", config).unwrap();
        let custody = ledger.address();

        // 1,000,000 USDC of liquidity
        let tokens = ledger.tokens_mut();
        tokens.mint(&USDC, &LENDER, 1_000_000 * USD).unwrap();
        tokens.approve(&USDC, &LENDER, &custody, UNLIMITED_ALLOWANCE);
        ledger
            .supply(&at(LENDER), &params, AssetsOrShares::Assets(1_000_000 * USD), LENDER)
            .unwrap();

        // Venue inventory and a user holding 1 BTC
        let tokens = ledger.tokens_mut();
        tokens.mint(&USDC, &VENUE, 2_000_000 * USD).unwrap();
        tokens.mint(&WBTC, &VENUE, 10 * BTC).unwrap();
        tokens.mint(&WBTC, &USER, BTC).unwrap();
        tokens.approve(&WBTC, &USER, &engine.address(), UNLIMITED_ALLOWANCE);

        Fixture {
            ledger,
            engine,
            params,
            market_id,
            oracle,
        }
    }

    fn setup() -> Fixture {
        let mut f = setup_with(LeverageConfig::default());
        f.ledger.set_authorization(&at(USER), f.engine.address(), true).unwrap();
        f
    }

    fn venue(f: &Fixture) -> OracleSwapVenue {
        OracleSwapVenue::new(VENUE, WBTC, USDC, f.oracle.clone())
    }

    fn open_4x(f: &mut Fixture) -> OpenedPosition {
        let mut venue = venue(f);
        f.engine
            .open_position(&mut f.ledger, &at(USER), &f.params, BTC, 4 * WAD, 0, USER, &mut venue)
            .unwrap()
    }

    // ============================================================================
    // Open
    // ============================================================================

    #[test]
    fn test_open_position_at_four_times() {
        let mut f = setup();
        let opened = open_4x(&mut f);

        assert_eq!(opened.borrowed_assets, 315_000 * USD);
        assert_eq!(opened.purchased_collateral, 3 * BTC);
        assert_eq!(opened.total_collateral(), 4 * BTC);

        let position = f.ledger.position(&f.market_id, &USER);
        assert_eq!(position.collateral, 4 * BTC);
        assert_eq!(position.borrow_shares, opened.borrow_shares);
        assert!(f.ledger.is_healthy(&f.params, &USER).unwrap());

        // Nothing parked on the engine
        assert_eq!(f.ledger.tokens().balance_of(&USDC, &f.engine.address()), 0);
        assert_eq!(f.ledger.tokens().balance_of(&WBTC, &f.engine.address()), 0);
        assert_eq!(f.ledger.tokens().balance_of(&WBTC, &USER), 0);

        // One borrow, two pledges
        assert_eq!(f.ledger.events().filter_by_type(EventType::Borrow).len(), 1);
        assert_eq!(f.ledger.events().filter_by_type(EventType::SupplyCollateral).len(), 2);
    }

    #[test]
    fn test_open_without_leverage_only_pledges() {
        let mut f = setup();
        let mut venue = venue(&f);
        let opened = f
            .engine
            .open_position(&mut f.ledger, &at(USER), &f.params, BTC, WAD, 0, USER, &mut venue)
            .unwrap();

        assert_eq!(opened.borrowed_assets, 0);
        let position = f.ledger.position(&f.market_id, &USER);
        assert_eq!(position.collateral, BTC);
        assert!(!position.has_debt());
    }

    #[test]
    fn test_slippage_unwinds_everything() {
        let mut f = setup();
        let mut venue = venue(&f).with_execution_shortfall_bps(100);
        let events = f.ledger.events().len();

        let result = f.engine.open_position(
            &mut f.ledger,
            &at(USER),
            &f.params,
            BTC,
            4 * WAD,
            0,
            USER,
            &mut venue,
        );
        assert!(matches!(result, Err(IsolendError::SlippageExceeded { .. })));

        assert_eq!(f.ledger.tokens().balance_of(&WBTC, &USER), BTC);
        assert_eq!(f.ledger.position(&f.market_id, &USER), Position::default());
        assert_eq!(f.ledger.market(&f.market_id).unwrap().total_borrow_assets, 0);
        assert_eq!(f.ledger.events().len(), events);
        assert_eq!(f.ledger.lock_state(), LockState::Idle);
    }

    #[test]
    fn test_leverage_beyond_lltv_fails_health_check() {
        // lltv 0.8 carries at most 5x
        let mut f = setup();
        assert_eq!(max_leverage(f.params.lltv).unwrap(), 5 * WAD);

        let mut venue = venue(&f);
        let result = f
            .engine
            .open_position(&mut f.ledger, &at(USER), &f.params, BTC, 6 * WAD, 0, USER, &mut venue);
        assert_eq!(result, Err(IsolendError::InsufficientCollateral));
        assert_eq!(f.ledger.tokens().balance_of(&WBTC, &USER), BTC);
        assert_eq!(f.ledger.tokens().balance_of(&USDC, &VENUE), 2_000_000 * USD);
    }

    #[test]
    fn test_open_input_validation() {
        let mut f = setup();
        let mut venue = venue(&f);
        let ctx = at(USER);

        let below_one = f
            .engine
            .open_position(&mut f.ledger, &ctx, &f.params, BTC, WAD / 2, 0, USER, &mut venue);
        assert!(matches!(below_one, Err(IsolendError::InvalidLeverage { .. })));

        let above_max = f
            .engine
            .open_position(&mut f.ledger, &ctx, &f.params, BTC, 11 * WAD, 0, USER, &mut venue);
        assert_eq!(
            above_max,
            Err(IsolendError::InvalidLeverage {
                leverage: 11 * WAD,
                maximum: DEFAULT_MAX_LEVERAGE,
            })
        );

        let loose = f
            .engine
            .open_position(&mut f.ledger, &ctx, &f.params, BTC, 2 * WAD, WAD / 2, USER, &mut venue);
        assert!(matches!(loose, Err(IsolendError::InvalidInput { .. })));

        let empty = f
            .engine
            .open_position(&mut f.ledger, &ctx, &f.params, 0, 2 * WAD, 0, USER, &mut venue);
        assert_eq!(empty, Err(IsolendError::ZeroAmount));
    }

    #[test]
    fn test_engine_needs_authorization() {
        let mut f = setup_with(LeverageConfig::default());
        let mut venue = venue(&f);

        let result = f
            .engine
            .open_position(&mut f.ledger, &at(USER), &f.params, BTC, 2 * WAD, 0, USER, &mut venue);
        assert_eq!(
            result,
            Err(IsolendError::Unauthorized {
                caller: f.engine.address(),
                owner: USER,
            })
        );
        assert_eq!(f.ledger.tokens().balance_of(&WBTC, &USER), BTC);
        assert_eq!(f.ledger.position(&f.market_id, &USER).collateral, 0);
    }

    #[test]
    fn test_caller_must_act_for_owner() {
        let mut f = setup();
        let opened = open_4x(&mut f);
        let before = f.ledger.position(&f.market_id, &USER);
        let events = f.ledger.events().len();
        let denied = Err(IsolendError::Unauthorized {
            caller: STRANGER,
            owner: USER,
        });

        // The engine holds USER's grant and token allowance; neither is
        // usable by a third party
        let mut venue = venue(&f);
        let open = f
            .engine
            .open_position(&mut f.ledger, &at(STRANGER), &f.params, BTC / 10, 4 * WAD, 0, USER, &mut venue);
        assert_eq!(open.map(|_| ()), denied);

        let close = f
            .engine
            .close_position(&mut f.ledger, &at(STRANGER), &f.params, opened.borrow_shares / 2, USER, &mut venue, 0);
        assert_eq!(close.map(|_| ()), denied);

        assert_eq!(f.ledger.position(&f.market_id, &USER), before);
        assert_eq!(f.ledger.events().len(), events);
        assert_eq!(f.ledger.tokens().balance_of(&USDC, &STRANGER), 0);
    }

    // ============================================================================
    // Close
    // ============================================================================

    #[test]
    fn test_round_trip_returns_initial_collateral() {
        let mut f = setup();
        let opened = open_4x(&mut f);

        let mut venue = venue(&f);
        let closed = f
            .engine
            .close_position(&mut f.ledger, &at(USER), &f.params, 0, USER, &mut venue, 0)
            .unwrap();

        assert_eq!(closed.repaid_shares, opened.borrow_shares);
        assert_eq!(closed.repaid_assets, opened.borrowed_assets);
        assert_eq!(closed.shortfall, 0);
        assert!(closed.steps > 1);
        assert_eq!(f.ledger.position(&f.market_id, &USER), Position::default());

        // Back to 1 BTC, less a few sats of rounding, plus dust in USDC
        let btc = f.ledger.tokens().balance_of(&WBTC, &USER);
        assert!(btc <= BTC && btc >= BTC - 10);
        assert_eq!(btc, closed.returned_collateral);
        assert_eq!(f.ledger.tokens().balance_of(&USDC, &USER), closed.leftover_assets);
        assert!(closed.leftover_assets < 10_000);

        let market = f.ledger.market(&f.market_id).unwrap();
        assert_eq!(market.total_borrow_shares, 0);
        assert_eq!(market.total_borrow_assets, 0);
    }

    #[test]
    fn test_step_budget_falls_back_to_caller() {
        let config = LeverageConfig {
            max_unwind_steps: 1,
            ..LeverageConfig::default()
        };
        let mut f = setup_with(config);
        f.ledger.set_authorization(&at(USER), f.engine.address(), true).unwrap();
        open_4x(&mut f);

        // One round sells the 0.25 BTC the position can spare
        let engine = f.engine.address();
        let tokens = f.ledger.tokens_mut();
        tokens.mint(&USDC, &USER, 300_000 * USD).unwrap();
        tokens.approve(&USDC, &USER, &engine, UNLIMITED_ALLOWANCE);

        let mut venue = venue(&f);
        let closed = f
            .engine
            .close_position(&mut f.ledger, &at(USER), &f.params, 0, USER, &mut venue, 0)
            .unwrap();

        assert_eq!(closed.steps, 1);
        assert_eq!(closed.collateral_sold, 25_000_000);
        assert_eq!(closed.shortfall, 288_750 * USD);
        assert_eq!(closed.returned_collateral, 4 * BTC - 25_000_000);
        assert_eq!(f.ledger.position(&f.market_id, &USER), Position::default());
        assert_eq!(
            f.ledger.tokens().balance_of(&USDC, &USER),
            300_000 * USD - 288_750 * USD
        );
    }

    #[test]
    fn test_partial_close_keeps_position_open() {
        let mut f = setup();
        let opened = open_4x(&mut f);
        let half = opened.borrow_shares / 2;

        let mut venue = venue(&f);
        let closed = f
            .engine
            .close_position(&mut f.ledger, &at(USER), &f.params, half, USER, &mut venue, 0)
            .unwrap();

        assert_eq!(closed.repaid_shares, half);
        assert_eq!(closed.returned_collateral, 0);

        let position = f.ledger.position(&f.market_id, &USER);
        assert_eq!(position.borrow_shares, opened.borrow_shares - half);
        assert_eq!(position.collateral, 4 * BTC - closed.collateral_sold);
        assert!(f.ledger.is_healthy(&f.params, &USER).unwrap());
        assert_eq!(f.ledger.tokens().balance_of(&USDC, &USER), closed.leftover_assets);
    }
}
