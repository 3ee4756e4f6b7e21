//! isolend Common Library
//!
//! Shared types, constants, and utilities for the isolend lending ledger
//! and the leverage engine built on top of it.
//!
//! ## Isolated Markets
//!
//! Every market is identified by the hash of its five immutable parameters
//! (loan token, collateral token, oracle, rate model, liquidation LTV).
//! Markets never share liquidity or risk: a bad debt event in one market is
//! absorbed by that market's suppliers only.
//!
//! ## Key Pieces
//!
//! - **Fixed-Point Math**: WAD (1e18) fractions, 1e36 oracle prices, explicit rounding
//! - **Share Accounting**: Virtual shares/assets offsets for the share exchange rate
//! - **Rate Models**: Pluggable per-second borrow rate models (fixed, adaptive curve)
//! - **Collaborators**: Oracle, swap venue and allocation vault interfaces
//! - **Token Bank**: Balances and allowances for every token the ledger touches
//! - **Access Control**: Single admin gate and per-owner operator authorizations
//! - **Events**: Structured, serializable protocol event log
//!
//! This crate is `no_std` compatible when built without the default `std`
//! feature.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;

// Re-export collections for submodules based on feature
#[cfg(not(feature = "std"))]
pub use alloc::{boxed::Box, collections::BTreeMap, collections::BTreeSet, rc::Rc, vec::Vec};
#[cfg(feature = "std")]
pub use std::{boxed::Box, collections::BTreeMap, collections::BTreeSet, rc::Rc, vec::Vec};

pub use alloy_primitives::U256;

pub mod constants;
pub mod errors;
pub mod types;
pub mod math;
pub mod events;
pub mod access_control;
pub mod token_ops;
pub mod irm;
pub mod oracle;
pub mod swap;
pub mod vault;

// Re-exports for convenience
pub use constants::*;
pub use errors::*;
pub use types::*;
pub use math::*;
pub use events::*;
pub use access_control::*;
pub use token_ops::*;
pub use irm::*;
pub use oracle::*;
pub use swap::*;
pub use vault::*;
