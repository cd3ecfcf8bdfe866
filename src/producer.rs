//! C2 — the publish pipeline (spec §4.2): checksum verification, dedup
//! admission, and append.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::dedup::{DedupDecision, MessageDeduplication};
use crate::error::DispatchError;
use crate::ledger::ManagedLedger;
use crate::model::{MessageId, MessageMetadata, Position};

/// Acknowledges a successful (or deduplicated) publish back to the
/// connection that sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub sequence_id: u64,
    pub message_id: MessageId,
}

/// One producer's publish pipeline against a topic's log and dedup state.
pub struct Producer {
    pub id: u64,
    pub name: String,
    ledger: Arc<dyn ManagedLedger>,
    dedup: Arc<MessageDeduplication>,
    closed: AtomicBool,
}

impl Producer {
    pub fn new(id: u64, name: impl Into<String>, ledger: Arc<dyn ManagedLedger>, dedup: Arc<MessageDeduplication>) -> Self {
        Self { id, name: name.into(), ledger, dedup, closed: AtomicBool::new(false) }
    }

    /// Verify the CRC32C checksum, run dedup admission, and — only on
    /// `Accept` — append to the log. A `Duplicate`/`InFlight` decision
    /// still returns a receipt (idempotent retry semantics) but with no
    /// second append.
    pub async fn publish(
        &self,
        sequence_id: u64,
        publish_time_millis: u64,
        checksum: u32,
        payload: Vec<u8>,
    ) -> Result<SendReceipt, DispatchError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DispatchError::TopicTerminatedError);
        }

        let computed = crc32c::crc32c(&payload);
        if computed != checksum {
            return Err(DispatchError::ChecksumError { producer: self.name.clone(), seq_id: sequence_id });
        }

        match self.dedup.should_accept(&self.name, sequence_id) {
            DedupDecision::Duplicate | DedupDecision::InFlight => {
                return Ok(SendReceipt { sequence_id, message_id: MessageId::Single(Position::new(0, 0)) });
            }
            DedupDecision::Accept => {}
        }

        self.dedup.record_pushed(&self.name, sequence_id);
        let metadata = MessageMetadata::new(self.name.clone(), sequence_id, publish_time_millis);
        let position = self
            .ledger
            .append(metadata, payload)
            .await
            .map_err(|e| DispatchError::PersistenceError(e.to_string()))?;

        if self.dedup.snapshot_due() {
            self.dedup.mark_persisted(&[self.name.clone()]);
        }

        Ok(SendReceipt { sequence_id, message_id: MessageId::Single(position) })
    }

    /// Graceful close: stop accepting new publishes. Pending publishes
    /// already in flight on this handle are unaffected — the publisher
    /// only holds one `&self` borrow at a time, so there are none.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
