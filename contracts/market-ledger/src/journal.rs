//! Write Journal
//!
//! Every ledger write made while an operation is running leaves an undo
//! record holding the value it replaced. A checkpoint is a set of positions
//! in the journal, the event log and the token bank's own journal; rolling
//! back replays the records written after it, newest first. The cost of a
//! rollback is proportional to what the failed operation wrote, not to the
//! size of the ledger.

use isolend_common::{AdminGate, Address, MarketId, MarketState, Position, Vec};

/// Value replaced by one ledger write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Undo {
    Owner(AdminGate),
    FeeRecipient(Address),
    /// Rate model added to the allow-list and the registry
    Irm(Address),
    Lltv(u128),
    Oracle(Address),
    Market(MarketId, Option<MarketState>),
    MarketParams(MarketId),
    Position((MarketId, Address), Option<Position>),
    Authorization {
        owner: Address,
        operator: Address,
        granted: bool,
    },
}

/// Where to unwind to if the operation fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Checkpoint {
    pub writes: usize,
    pub events: usize,
    pub tokens: usize,
}

/// Undo log, recording only while at least one checkpoint is open
#[derive(Debug, Default)]
pub(crate) struct Journal {
    entries: Vec<Undo>,
    depth: u32,
}

impl Journal {
    pub fn is_recording(&self) -> bool {
        self.depth > 0
    }

    pub fn record(&mut self, undo: Undo) {
        if self.is_recording() {
            self.entries.push(undo);
        }
    }

    /// Open a checkpoint, returning the journal position it starts at
    pub fn begin(&mut self) -> usize {
        self.depth += 1;
        self.entries.len()
    }

    /// Newest record written after `mark`
    pub fn pop_after(&mut self, mark: usize) -> Option<Undo> {
        if self.entries.len() > mark {
            self.entries.pop()
        } else {
            None
        }
    }

    /// Close a checkpoint. Returns true when the outermost one closed and
    /// the log was dropped.
    pub fn end(&mut self) -> bool {
        self.depth = self.depth.saturating_sub(1);
        if self.depth == 0 {
            self.entries.clear();
            return true;
        }
        false
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_only_inside_checkpoint() {
        let mut journal = Journal::default();
        journal.record(Undo::Lltv(1));
        assert_eq!(journal.len(), 0);

        let mark = journal.begin();
        journal.record(Undo::Lltv(2));
        journal.record(Undo::Lltv(3));
        assert_eq!(journal.pop_after(mark), Some(Undo::Lltv(3)));
        assert_eq!(journal.pop_after(mark), Some(Undo::Lltv(2)));
        assert_eq!(journal.pop_after(mark), None);
        assert!(journal.end());
        assert!(!journal.is_recording());
    }

    #[test]
    fn test_inner_commit_keeps_records_for_outer() {
        let mut journal = Journal::default();
        let outer = journal.begin();
        journal.record(Undo::Lltv(1));

        let inner = journal.begin();
        journal.record(Undo::Lltv(2));
        assert_eq!(inner, 1);
        assert!(!journal.end());
        assert_eq!(journal.len(), 2);

        assert_eq!(journal.pop_after(outer), Some(Undo::Lltv(2)));
        assert!(journal.end());
        assert_eq!(journal.len(), 0);
    }
}
