//! Token Operations Module
//!
//! Balances and allowances for every token the ledger and its collaborators
//! move. The bank lives inside the ledger state so a failed operation rolls
//! token movements back together with the accounting.
//!
//! ## Key Features
//!
//! - **Per-token Balances**: `(token, holder) -> amount`
//! - **Allowances**: `(token, owner, spender) -> amount`, `u128::MAX` never decreases
//! - **Pull Transfers**: `transfer_from` is how the ledger collects assets
//! - **Conservation**: Transfers never create or destroy units; only `mint` does
//! - **Journal**: While recording, every write keeps the value it replaced so
//!   a failed operation can be unwound without copying the bank

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::types::Address;
use crate::{BTreeMap, IsolendError, IsolendResult, Vec};

/// Allowance that is never decreased by pull transfers
pub const UNLIMITED_ALLOWANCE: u128 = u128::MAX;

/// Value replaced by one bank write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BankUndo {
    Balance((Address, Address), Option<u128>),
    Allowance((Address, Address, Address), Option<u128>),
    Supply(Address, Option<u128>),
}

/// Ledger of token balances and allowances
#[derive(Debug, Clone, Default, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct TokenBank {
    balances: BTreeMap<(Address, Address), u128>,
    allowances: BTreeMap<(Address, Address, Address), u128>,
    supplies: BTreeMap<Address, u128>,
    #[serde(skip)]
    #[borsh(skip)]
    journal: Vec<BankUndo>,
    #[serde(skip)]
    #[borsh(skip)]
    recording: bool,
}

impl PartialEq for TokenBank {
    fn eq(&self, other: &Self) -> bool {
        self.balances == other.balances && self.allowances == other.allowances && self.supplies == other.supplies
    }
}

impl Eq for TokenBank {}

impl TokenBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Balance of `holder` in `token`
    pub fn balance_of(&self, token: &Address, holder: &Address) -> u128 {
        self.balances.get(&(*token, *holder)).copied().unwrap_or(0)
    }

    /// Remaining allowance of `spender` over `owner`'s `token`
    pub fn allowance(&self, token: &Address, owner: &Address, spender: &Address) -> u128 {
        self.allowances.get(&(*token, *owner, *spender)).copied().unwrap_or(0)
    }

    /// Units of `token` ever minted
    pub fn total_supply(&self, token: &Address) -> u128 {
        self.supplies.get(token).copied().unwrap_or(0)
    }

    /// Create new units of `token` for `to`
    pub fn mint(&mut self, token: &Address, to: &Address, amount: u128) -> IsolendResult<()> {
        let supply = self.total_supply(token).checked_add(amount).ok_or(IsolendError::Overflow)?;
        let balance = self.balance_of(token, to).checked_add(amount).ok_or(IsolendError::Overflow)?;
        self.set_supply(*token, supply);
        self.set_balance((*token, *to), balance);
        Ok(())
    }

    /// Set `spender`'s allowance over `owner`'s `token`
    pub fn approve(&mut self, token: &Address, owner: &Address, spender: &Address, amount: u128) {
        self.set_allowance((*token, *owner, *spender), amount);
    }

    /// Move `amount` of `token` from `from` to `to`
    pub fn transfer(&mut self, token: &Address, from: &Address, to: &Address, amount: u128) -> IsolendResult<()> {
        if amount == 0 || from == to {
            return self.check_balance(token, from, amount);
        }

        let from_balance = self.balance_of(token, from);
        self.check_balance(token, from, amount)?;
        let to_balance = self.balance_of(token, to).checked_add(amount).ok_or(IsolendError::Overflow)?;

        self.set_balance((*token, *from), from_balance - amount);
        self.set_balance((*token, *to), to_balance);
        Ok(())
    }

    /// Move `amount` of `token` from `from` to `to` on behalf of `spender`.
    ///
    /// A holder moving its own funds needs no allowance.
    pub fn transfer_from(
        &mut self,
        token: &Address,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: u128,
    ) -> IsolendResult<()> {
        if spender != from {
            let allowed = self.allowance(token, from, spender);
            if allowed < amount {
                return Err(IsolendError::InsufficientAllowance {
                    token: *token,
                    available: allowed,
                    requested: amount,
                });
            }
            self.check_balance(token, from, amount)?;
            if allowed != UNLIMITED_ALLOWANCE {
                self.approve(token, from, spender, allowed - amount);
            }
        }
        self.transfer(token, from, to, amount)
    }

    // ============ Journal ============

    /// Start keeping undo records for every write
    pub fn start_recording(&mut self) {
        self.recording = true;
    }

    /// Drop all undo records and stop recording
    pub fn stop_recording(&mut self) {
        self.recording = false;
        self.journal.clear();
    }

    /// Position in the journal to roll back to
    pub fn mark(&self) -> usize {
        self.journal.len()
    }

    /// Undo every write recorded after `mark`, newest first
    pub fn rollback_to(&mut self, mark: usize) {
        while self.journal.len() > mark {
            let Some(undo) = self.journal.pop() else {
                break;
            };
            match undo {
                BankUndo::Balance(key, previous) => restore(&mut self.balances, key, previous),
                BankUndo::Allowance(key, previous) => restore(&mut self.allowances, key, previous),
                BankUndo::Supply(key, previous) => restore(&mut self.supplies, key, previous),
            }
        }
    }

    fn set_balance(&mut self, key: (Address, Address), amount: u128) {
        let previous = write(&mut self.balances, key, amount);
        if self.recording {
            self.journal.push(BankUndo::Balance(key, previous));
        }
    }

    fn set_allowance(&mut self, key: (Address, Address, Address), amount: u128) {
        let previous = write(&mut self.allowances, key, amount);
        if self.recording {
            self.journal.push(BankUndo::Allowance(key, previous));
        }
    }

    fn set_supply(&mut self, key: Address, amount: u128) {
        let previous = write(&mut self.supplies, key, amount);
        if self.recording {
            self.journal.push(BankUndo::Supply(key, previous));
        }
    }

    fn check_balance(&self, token: &Address, holder: &Address, amount: u128) -> IsolendResult<()> {
        let available = self.balance_of(token, holder);
        if available < amount {
            return Err(IsolendError::InsufficientBalance {
                token: *token,
                available,
                requested: amount,
            });
        }
        Ok(())
    }
}

/// Store `amount` under `key`, removing zero entries. Returns the old value.
fn write<K: Ord>(map: &mut BTreeMap<K, u128>, key: K, amount: u128) -> Option<u128> {
    if amount == 0 {
        map.remove(&key)
    } else {
        map.insert(key, amount)
    }
}

fn restore<K: Ord>(map: &mut BTreeMap<K, u128>, key: K, previous: Option<u128>) {
    match previous {
        Some(value) => {
            map.insert(key, value);
        }
        None => {
            map.remove(&key);
        }
    }
}
