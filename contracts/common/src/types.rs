//! Core Types for isolend
//!
//! Identifiers, market parameters and the per-market / per-position
//! accounting records shared by the ledger and the leverage engine.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use sha3::{Digest, Keccak256};

use crate::errors::{IsolendError, IsolendResult};

/// Type alias for account and contract addresses (20 bytes, EVM-compatible)
pub type Address = [u8; 20];

/// Type alias for market identifiers (keccak256 of the encoded market params)
pub type MarketId = [u8; 32];

/// The zero address, never a valid account
pub const ZERO_ADDRESS: Address = [0u8; 20];

/// Derive a deterministic address from a namespace and a seed.
///
/// Takes the last 20 bytes of `sha256(namespace || seed)`.
pub fn derive_address(namespace: &[u8], seed: &[u8]) -> Address {
    let mut hasher = Sha256::new();
    hasher.update(namespace);
    hasher.update(seed);
    let digest = hasher.finalize();

    let mut address = [0u8; 20];
    address.copy_from_slice(&digest[12..32]);
    address
}

// ============ Market Types ============

/// Immutable parameters of an isolated market
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct MarketParams {
    /// Asset lent and borrowed
    pub loan_token: Address,
    /// Asset pledged against borrows
    pub collateral_token: Address,
    /// Price source (collateral priced in loan units, scaled by 1e36)
    pub oracle: Address,
    /// Interest rate model
    pub irm: Address,
    /// Liquidation loan-to-value (WAD)
    pub lltv: u128,
}

impl MarketParams {
    /// Encoded size: five 32-byte words
    pub const ENCODED_LEN: usize = 160;

    /// ABI-style encoding: every field left-padded into a 32-byte big-endian word
    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        for (word, address) in [self.loan_token, self.collateral_token, self.oracle, self.irm]
            .iter()
            .enumerate()
        {
            let start = word * 32 + 12;
            out[start..start + 20].copy_from_slice(address);
        }
        out[144..160].copy_from_slice(&self.lltv.to_be_bytes());
        out
    }

    /// Market id: keccak256 of the encoded parameters
    pub fn id(&self) -> MarketId {
        let digest = Keccak256::digest(self.encode());
        let mut id = [0u8; 32];
        id.copy_from_slice(&digest);
        id
    }
}

/// Mutable accounting state of a market
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct MarketState {
    /// Loan assets owed to suppliers (principal plus accrued interest)
    pub total_supply_assets: u128,
    /// Outstanding supply shares
    pub total_supply_shares: u128,
    /// Loan assets owed by borrowers
    pub total_borrow_assets: u128,
    /// Outstanding borrow shares
    pub total_borrow_shares: u128,
    /// Timestamp of the last accrual (seconds)
    pub last_update: u64,
    /// Share of interest routed to the fee recipient (WAD)
    pub fee: u128,
    /// Rate-at-target carried by adaptive rate models (per second, WAD). Zero before first use.
    pub rate_at_target: u128,
}

impl MarketState {
    /// Fresh market state created at `now`
    pub fn new(now: u64) -> Self {
        Self {
            last_update: now,
            ..Self::default()
        }
    }

    /// Loan assets available to borrow or withdraw
    pub fn liquidity(&self) -> u128 {
        self.total_supply_assets.saturating_sub(self.total_borrow_assets)
    }

    /// Borrowed share of supplied assets (WAD). Zero for an empty market.
    pub fn utilization(&self) -> IsolendResult<u128> {
        if self.total_supply_assets == 0 {
            return Ok(0);
        }
        crate::math::w_div_down(self.total_borrow_assets, self.total_supply_assets)
    }
}

// ============ Position Types ============

/// A user's holdings in one market
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct Position {
    /// Supply shares (claim on supplied assets plus interest)
    pub supply_shares: u128,
    /// Borrow shares (debt including interest)
    pub borrow_shares: u128,
    /// Collateral units (never earns interest)
    pub collateral: u128,
}

impl Position {
    /// Returns true if the position holds nothing
    pub fn is_empty(&self) -> bool {
        self.supply_shares == 0 && self.borrow_shares == 0 && self.collateral == 0
    }

    /// Returns true if the position carries debt
    pub fn has_debt(&self) -> bool {
        self.borrow_shares > 0
    }
}

// ============ Input Types ============

/// Amount given either in assets or in shares, never both
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub enum AssetsOrShares {
    /// Exact asset amount; shares are derived
    Assets(u128),
    /// Exact share amount; assets are derived
    Shares(u128),
}

impl AssetsOrShares {
    /// Build from an `(assets, shares)` pair where exactly one side is nonzero
    pub fn from_pair(assets: u128, shares: u128) -> IsolendResult<Self> {
        match (assets, shares) {
            (0, 0) => Err(IsolendError::InconsistentInput),
            (a, 0) => Ok(Self::Assets(a)),
            (0, s) => Ok(Self::Shares(s)),
            _ => Err(IsolendError::InconsistentInput),
        }
    }

    /// Reject zero amounts
    pub fn validate(&self) -> IsolendResult<()> {
        match self {
            Self::Assets(0) | Self::Shares(0) => Err(IsolendError::InconsistentInput),
            _ => Ok(()),
        }
    }
}

/// Liquidation sizing: either the collateral to seize or the debt shares to repay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub enum LiquidationAmount {
    /// Collateral units to seize; repaid shares are derived
    Seize(u128),
    /// Borrow shares to repay; seized collateral is derived
    RepayShares(u128),
}

impl LiquidationAmount {
    /// Build from a `(seized_assets, repaid_shares)` pair where exactly one side is nonzero
    pub fn from_pair(seized_assets: u128, repaid_shares: u128) -> IsolendResult<Self> {
        match (seized_assets, repaid_shares) {
            (0, 0) => Err(IsolendError::InconsistentInput),
            (s, 0) => Ok(Self::Seize(s)),
            (0, r) => Ok(Self::RepayShares(r)),
            _ => Err(IsolendError::InconsistentInput),
        }
    }
}

/// Caller identity and clock for one ledger call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct CallContext {
    /// Account invoking the operation
    pub sender: Address,
    /// Current time (seconds)
    pub timestamp: u64,
}

impl CallContext {
    pub fn new(sender: Address, timestamp: u64) -> Self {
        Self { sender, timestamp }
    }

    /// Same clock, different caller
    pub fn with_sender(&self, sender: Address) -> Self {
        Self { sender, timestamp: self.timestamp }
    }
}
