//! Access Control Module
//!
//! Two independent permission layers guard the ledger.
//!
//! ## Key Features
//!
//! - **Admin Gate**: A single owner controls allow-lists, fees and ownership transfer
//! - **Operator Authorization**: Every account can authorize operators to act on
//!   its positions (withdraw, borrow, withdraw collateral)
//! - **Implicit Self-Authorization**: An account is always authorized for itself

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::types::{Address, ZERO_ADDRESS};
use crate::{BTreeMap, IsolendError, IsolendResult};

// ============================================================================
// Admin Gate
// ============================================================================

/// Owner-only gate for configuration calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct AdminGate {
    /// Current owner
    pub owner: Address,
}

impl AdminGate {
    pub fn new(owner: Address) -> IsolendResult<Self> {
        if owner == ZERO_ADDRESS {
            return Err(IsolendError::ZeroAddress { param: "owner" });
        }
        Ok(Self { owner })
    }

    /// Check if address is the owner
    pub fn is_owner(&self, caller: &Address) -> bool {
        self.owner == *caller
    }

    /// Fail unless `caller` is the owner
    pub fn require_owner(&self, caller: &Address) -> IsolendResult<()> {
        if !self.is_owner(caller) {
            return Err(IsolendError::Unauthorized {
                caller: *caller,
                owner: self.owner,
            });
        }
        Ok(())
    }

    /// Hand ownership to `new_owner`. Owner only.
    pub fn transfer(&mut self, caller: &Address, new_owner: Address) -> IsolendResult<()> {
        self.require_owner(caller)?;
        if new_owner == self.owner {
            return Err(IsolendError::AlreadySet);
        }
        self.owner = new_owner;
        Ok(())
    }
}

// ============================================================================
// Operator Authorization
// ============================================================================

/// Per-owner operator grants
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct AuthorizationRegistry {
    /// (owner, operator) -> granted
    grants: BTreeMap<(Address, Address), bool>,
}

impl AuthorizationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record whether `operator` may act for `owner`. Repeating the current value is a no-op.
    pub fn set(&mut self, owner: Address, operator: Address, granted: bool) {
        if granted {
            self.grants.insert((owner, operator), true);
        } else {
            self.grants.remove(&(owner, operator));
        }
    }

    /// Explicit grant only, ignoring self-authorization
    pub fn is_granted(&self, owner: &Address, operator: &Address) -> bool {
        self.grants.get(&(*owner, *operator)).copied().unwrap_or(false)
    }

    /// Check if `caller` may act on positions of `owner`
    pub fn is_authorized(&self, owner: &Address, caller: &Address) -> bool {
        owner == caller || self.is_granted(owner, caller)
    }

    /// Fail unless `caller` may act on positions of `owner`
    pub fn require_authorized(&self, owner: &Address, caller: &Address) -> IsolendResult<()> {
        if !self.is_authorized(owner, caller) {
            return Err(IsolendError::Unauthorized {
                caller: *caller,
                owner: *owner,
            });
        }
        Ok(())
    }

    /// Number of active grants
    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}
