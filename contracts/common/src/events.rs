//! Protocol Events for isolend
//!
//! Every state-changing ledger operation appends one event. Events are
//! rolled back together with state when an operation fails, so the log only
//! ever describes committed effects.

use crate::Vec;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use crate::types::{Address, MarketId, MarketParams};

/// Event types for indexing and filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
#[borsh(use_discriminant = true)]
#[repr(u8)]
pub enum EventType {
    // Governance Events (0x01 - 0x1F)
    CreateMarket = 0x01,
    EnableIrm = 0x02,
    EnableLltv = 0x03,
    SetOwner = 0x04,
    SetFeeRecipient = 0x05,
    SetFee = 0x06,

    // Interest Events (0x20 - 0x2F)
    AccrueInterest = 0x20,

    // Supply Side Events (0x30 - 0x3F)
    Supply = 0x30,
    Withdraw = 0x31,

    // Borrow Side Events (0x40 - 0x5F)
    SupplyCollateral = 0x40,
    WithdrawCollateral = 0x41,
    Borrow = 0x42,
    Repay = 0x43,
    Liquidate = 0x44,

    // Access Events (0x60 - 0x6F)
    SetAuthorization = 0x60,
}

/// Protocol event with its payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub enum IsolendEvent {
    // ============ Governance ============
    /// A market was created
    CreateMarket {
        market_id: MarketId,
        params: MarketParams,
    },

    /// A rate model was added to the allow-list
    EnableIrm { irm: Address },

    /// An LLTV was added to the allow-list
    EnableLltv { lltv: u128 },

    /// Admin rights moved to a new owner
    SetOwner { new_owner: Address },

    /// Fee recipient changed
    SetFeeRecipient { new_fee_recipient: Address },

    /// Market fee changed
    SetFee { market_id: MarketId, fee: u128 },

    // ============ Interest ============
    /// Interest accrued on a market
    AccrueInterest {
        market_id: MarketId,
        /// Per-second borrow rate applied (WAD)
        borrow_rate: u128,
        interest: u128,
        fee_shares: u128,
    },

    // ============ Supply Side ============
    Supply {
        market_id: MarketId,
        caller: Address,
        on_behalf: Address,
        assets: u128,
        shares: u128,
    },

    Withdraw {
        market_id: MarketId,
        caller: Address,
        on_behalf: Address,
        receiver: Address,
        assets: u128,
        shares: u128,
    },

    // ============ Borrow Side ============
    SupplyCollateral {
        market_id: MarketId,
        caller: Address,
        on_behalf: Address,
        assets: u128,
    },

    WithdrawCollateral {
        market_id: MarketId,
        caller: Address,
        on_behalf: Address,
        receiver: Address,
        assets: u128,
    },

    Borrow {
        market_id: MarketId,
        caller: Address,
        on_behalf: Address,
        receiver: Address,
        assets: u128,
        shares: u128,
    },

    Repay {
        market_id: MarketId,
        caller: Address,
        on_behalf: Address,
        assets: u128,
        shares: u128,
    },

    /// A position was liquidated; nonzero bad debt was socialized to suppliers
    Liquidate {
        market_id: MarketId,
        caller: Address,
        borrower: Address,
        repaid_assets: u128,
        repaid_shares: u128,
        seized_assets: u128,
        bad_debt_assets: u128,
        bad_debt_shares: u128,
    },

    // ============ Access ============
    SetAuthorization {
        caller: Address,
        authorizer: Address,
        authorized: Address,
        is_authorized: bool,
    },
}

impl IsolendEvent {
    /// Get the event type for filtering
    pub fn event_type(&self) -> EventType {
        match self {
            Self::CreateMarket { .. } => EventType::CreateMarket,
            Self::EnableIrm { .. } => EventType::EnableIrm,
            Self::EnableLltv { .. } => EventType::EnableLltv,
            Self::SetOwner { .. } => EventType::SetOwner,
            Self::SetFeeRecipient { .. } => EventType::SetFeeRecipient,
            Self::SetFee { .. } => EventType::SetFee,
            Self::AccrueInterest { .. } => EventType::AccrueInterest,
            Self::Supply { .. } => EventType::Supply,
            Self::Withdraw { .. } => EventType::Withdraw,
            Self::SupplyCollateral { .. } => EventType::SupplyCollateral,
            Self::WithdrawCollateral { .. } => EventType::WithdrawCollateral,
            Self::Borrow { .. } => EventType::Borrow,
            Self::Repay { .. } => EventType::Repay,
            Self::Liquidate { .. } => EventType::Liquidate,
            Self::SetAuthorization { .. } => EventType::SetAuthorization,
        }
    }

    /// Market the event refers to, if any
    pub fn market_id(&self) -> Option<MarketId> {
        match self {
            Self::CreateMarket { market_id, .. }
            | Self::SetFee { market_id, .. }
            | Self::AccrueInterest { market_id, .. }
            | Self::Supply { market_id, .. }
            | Self::Withdraw { market_id, .. }
            | Self::SupplyCollateral { market_id, .. }
            | Self::WithdrawCollateral { market_id, .. }
            | Self::Borrow { market_id, .. }
            | Self::Repay { market_id, .. }
            | Self::Liquidate { market_id, .. } => Some(*market_id),
            Self::EnableIrm { .. }
            | Self::EnableLltv { .. }
            | Self::SetOwner { .. }
            | Self::SetFeeRecipient { .. }
            | Self::SetAuthorization { .. } => None,
        }
    }

    /// Serialize event to bytes for storage/transmission
    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).unwrap_or_default()
    }

    /// Deserialize event from bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        borsh::from_slice(bytes).ok()
    }
}

/// Append-only event log
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Vec<IsolendEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Emit an event (add to log)
    pub fn emit(&mut self, event: IsolendEvent) {
        self.events.push(event);
    }

    /// Get all events
    pub fn events(&self) -> &[IsolendEvent] {
        &self.events
    }

    /// Filter events by type
    pub fn filter_by_type(&self, event_type: EventType) -> Vec<&IsolendEvent> {
        self.events
            .iter()
            .filter(|e| e.event_type() == event_type)
            .collect()
    }

    /// Filter events by market
    pub fn filter_by_market(&self, market_id: &MarketId) -> Vec<&IsolendEvent> {
        self.events
            .iter()
            .filter(|e| e.market_id().as_ref() == Some(market_id))
            .collect()
    }

    /// Drop every event after the first `len`
    pub fn truncate(&mut self, len: usize) {
        self.events.truncate(len);
    }

    /// Most recent event
    pub fn last(&self) -> Option<&IsolendEvent> {
        self.events.last()
    }

    /// Check if any events were emitted
    pub fn has_events(&self) -> bool {
        !self.events.is_empty()
    }

    /// Get number of events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supply_event(market: u8) -> IsolendEvent {
        IsolendEvent::Supply {
            market_id: [market; 32],
            caller: [2u8; 20],
            on_behalf: [2u8; 20],
            assets: 500_000_000_000,
            shares: 500_000_000_000_000_000,
        }
    }

    #[test]
    fn test_event_type() {
        assert_eq!(supply_event(1).event_type(), EventType::Supply);
        assert_eq!(supply_event(1).market_id(), Some([1u8; 32]));
        assert_eq!(IsolendEvent::EnableLltv { lltv: 1 }.market_id(), None);
    }

    #[test]
    fn test_event_serialization() {
        let event = IsolendEvent::Liquidate {
            market_id: [7u8; 32],
            caller: [1u8; 20],
            borrower: [2u8; 20],
            repaid_assets: 400_000,
            repaid_shares: 400_000_000_000,
            seized_assets: 3,
            bad_debt_assets: 0,
            bad_debt_shares: 0,
        };

        let restored = IsolendEvent::from_bytes(&event.to_bytes()).unwrap();
        assert_eq!(event, restored);
    }

    #[test]
    fn test_event_log() {
        let mut log = EventLog::new();
        assert!(!log.has_events());

        log.emit(supply_event(1));
        log.emit(IsolendEvent::EnableIrm { irm: [9u8; 20] });
        log.emit(supply_event(2));

        assert_eq!(log.len(), 3);
        assert_eq!(log.filter_by_type(EventType::Supply).len(), 2);
        assert_eq!(log.filter_by_market(&[2u8; 32]).len(), 1);
        assert_eq!(log.last(), Some(&supply_event(2)));

        log.truncate(1);
        assert_eq!(log.len(), 1);
        assert_eq!(log.last(), Some(&supply_event(1)));
    }
}
