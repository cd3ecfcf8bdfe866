//! Log positions (spec §3, "Entry").

use std::fmt;

use serde::{Deserialize, Serialize};

/// `(ledgerId, entryId)`. Positions are totally ordered lexicographically:
/// first by ledger, then by entry within the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub ledger_id: u64,
    pub entry_id: u64,
}

impl Position {
    pub const fn new(ledger_id: u64, entry_id: u64) -> Self {
        Self { ledger_id, entry_id }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ledger_id, self.entry_id)
    }
}

/// Identifies either a whole non-batch entry or one sub-message inside a
/// batch entry. Used as the key for compaction's `latestByKey` map
/// (spec §4.7) and for dedup/replay bookkeeping at sub-message granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MessageId {
    Single(Position),
    Batch(Position, u32),
}

impl MessageId {
    pub fn position(&self) -> Position {
        match self {
            MessageId::Single(p) => *p,
            MessageId::Batch(p, _) => *p,
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Single(p) => write!(f, "{p}"),
            MessageId::Batch(p, i) => write!(f, "{p}#{i}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_order_lexicographically() {
        let a = Position::new(1, 9);
        let b = Position::new(2, 0);
        assert!(a < b);

        let c = Position::new(1, 10);
        assert!(a < c);
    }
}
