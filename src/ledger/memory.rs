//! In-memory [`ManagedLedger`]/[`Cursor`] pair.
//!
//! Backs the demo binary and the test suite. A single process, single
//! `VecDeque` of entries shared by every cursor opened against it; durability
//! across a process restart is explicitly out of scope.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Notify;

use crate::model::{Entry, MessageMetadata, Position, SubMessage};

use super::{Cursor, LedgerError, ManagedLedger};

struct SharedLog {
    entries: RwLock<VecDeque<Entry>>,
    ledger_id: u64,
    next_entry_id: AtomicI64,
    terminated: AtomicBool,
    notify: Notify,
}

impl SharedLog {
    fn position_index(&self, position: Position) -> Option<usize> {
        let entries = self.entries.read();
        entries.iter().position(|e| e.position == position)
    }
}

/// Single-ledger, in-memory [`ManagedLedger`].
pub struct InMemoryLedger {
    log: Arc<SharedLog>,
}

impl InMemoryLedger {
    pub fn new(ledger_id: u64) -> Self {
        Self {
            log: Arc::new(SharedLog {
                entries: RwLock::new(VecDeque::new()),
                ledger_id,
                next_entry_id: AtomicI64::new(0),
                terminated: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Administratively terminate the log: no further appends are accepted.
    pub fn terminate(&self) {
        self.log.terminated.store(true, Ordering::SeqCst);
        self.log.notify.notify_waiters();
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new(0)
    }
}

#[async_trait]
impl ManagedLedger for InMemoryLedger {
    async fn append(&self, metadata: MessageMetadata, payload: Vec<u8>) -> Result<Position, LedgerError> {
        if self.log.terminated.load(Ordering::SeqCst) {
            return Err(LedgerError::TooManyRequests);
        }
        let entry_id = self.log.next_entry_id.fetch_add(1, Ordering::SeqCst) as u64;
        let position = Position::new(self.log.ledger_id, entry_id);
        let entry = Entry::single(position, metadata, payload);
        self.log.entries.write().push_back(entry);
        self.log.notify.notify_waiters();
        Ok(position)
    }

    async fn append_batch(&self, metadata: MessageMetadata, messages: Vec<SubMessage>) -> Result<Position, LedgerError> {
        if self.log.terminated.load(Ordering::SeqCst) {
            return Err(LedgerError::TooManyRequests);
        }
        let entry_id = self.log.next_entry_id.fetch_add(1, Ordering::SeqCst) as u64;
        let position = Position::new(self.log.ledger_id, entry_id);
        let entry = Entry::batch(position, metadata, messages);
        self.log.entries.write().push_back(entry);
        self.log.notify.notify_waiters();
        Ok(position)
    }

    async fn open_cursor(&self, _name: &str, position: Option<Position>) -> Result<Box<dyn Cursor>, LedgerError> {
        let read_from = position.unwrap_or(Position::new(self.log.ledger_id, 0));
        Ok(Box::new(InMemoryCursor {
            log: Arc::clone(&self.log),
            read_position: RwLock::new(read_from),
            mark_delete: RwLock::new(Position::new(self.log.ledger_id, read_from.entry_id.saturating_sub(1))),
            individually_acked: RwLock::new(VecDeque::new()),
            active: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            cancel: Notify::new(),
        }))
    }

    fn last_position(&self) -> Position {
        let entries = self.log.entries.read();
        match entries.back() {
            Some(e) => e.position,
            None => Position::new(self.log.ledger_id, (self.log.next_entry_id.load(Ordering::SeqCst) as u64).saturating_sub(1)),
        }
    }

    fn is_terminated(&self) -> bool {
        self.log.terminated.load(Ordering::SeqCst)
    }
}

/// A read pointer into [`InMemoryLedger`].
pub struct InMemoryCursor {
    log: Arc<SharedLog>,
    read_position: RwLock<Position>,
    mark_delete: RwLock<Position>,
    individually_acked: RwLock<VecDeque<Position>>,
    active: AtomicBool,
    closed: AtomicBool,
    cancel: Notify,
}

impl InMemoryCursor {
    fn ensure_open(&self) -> Result<(), LedgerError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(LedgerError::CursorAlreadyClosed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Cursor for InMemoryCursor {
    async fn async_read_entries_or_wait(&self, max_entries: u32) -> Result<Vec<Entry>, LedgerError> {
        self.ensure_open()?;
        loop {
            {
                let entries = self.log.entries.read();
                let from = *self.read_position.read();
                let batch: Vec<Entry> = entries
                    .iter()
                    .filter(|e| e.position > from)
                    .take(max_entries.max(1) as usize)
                    .cloned()
                    .collect();
                if !batch.is_empty() {
                    *self.read_position.write() = batch.last().unwrap().position;
                    return Ok(batch);
                }
                if self.log.terminated.load(Ordering::SeqCst) {
                    return Err(LedgerError::NoMoreEntriesToRead);
                }
            }
            tokio::select! {
                _ = self.log.notify.notified() => {}
                _ = self.cancel.notified() => return Ok(Vec::new()),
            }
        }
    }

    async fn async_replay_entries(&self, positions: &[Position]) -> Result<Vec<Entry>, LedgerError> {
        self.ensure_open()?;
        let entries = self.log.entries.read();
        let mut out = Vec::with_capacity(positions.len());
        for position in positions {
            match entries.iter().find(|e| e.position == *position) {
                Some(entry) => out.push(entry.clone()),
                None => return Err(LedgerError::InvalidReplayPosition),
            }
        }
        Ok(out)
    }

    async fn async_delete(&self, position: Position) -> Result<(), LedgerError> {
        self.ensure_open()?;
        if self.log.position_index(position).is_none() {
            return Err(LedgerError::InvalidReplayPosition);
        }
        self.individually_acked.write().push_back(position);
        Ok(())
    }

    async fn async_mark_delete(&self, position: Position) -> Result<(), LedgerError> {
        self.ensure_open()?;
        let mut mark_delete = self.mark_delete.write();
        if position > *mark_delete {
            *mark_delete = position;
        }
        self.individually_acked.write().retain(|p| *p > position);
        Ok(())
    }

    fn rewind(&self) {
        *self.read_position.write() = *self.mark_delete.read();
    }

    fn cancel_pending_read_request(&self) {
        self.cancel.notify_waiters();
    }

    fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    fn mark_delete_position(&self) -> Position {
        *self.mark_delete.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(seq: u64) -> MessageMetadata {
        MessageMetadata::new("p1", seq, 0)
    }

    #[tokio::test]
    async fn append_then_read_returns_in_order() {
        let ledger = InMemoryLedger::new(7);
        ledger.append(meta(1), vec![1]).await.unwrap();
        ledger.append(meta(2), vec![2]).await.unwrap();

        let cursor = ledger.open_cursor("sub", None).await.unwrap();
        let batch = cursor.async_read_entries_or_wait(10).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].metadata.sequence_id, 1);
        assert_eq!(batch[1].metadata.sequence_id, 2);
    }

    #[tokio::test]
    async fn mark_delete_advances_and_rewind_resets_read_position() {
        let ledger = InMemoryLedger::new(0);
        ledger.append(meta(1), vec![1]).await.unwrap();
        ledger.append(meta(2), vec![2]).await.unwrap();
        let cursor = ledger.open_cursor("sub", None).await.unwrap();

        let batch = cursor.async_read_entries_or_wait(10).await.unwrap();
        cursor.async_mark_delete(batch[0].position).await.unwrap();
        cursor.rewind();

        let replayed = cursor.async_read_entries_or_wait(10).await.unwrap();
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].position, batch[1].position);
    }

    #[tokio::test]
    async fn terminated_ledger_rejects_append_and_drains_readers() {
        let ledger = InMemoryLedger::new(0);
        ledger.append(meta(1), vec![1]).await.unwrap();
        let cursor = ledger.open_cursor("sub", None).await.unwrap();
        cursor.async_read_entries_or_wait(10).await.unwrap();

        ledger.terminate();
        assert!(matches!(ledger.append(meta(2), vec![2]).await, Err(LedgerError::TooManyRequests)));
        assert!(matches!(
            cursor.async_read_entries_or_wait(10).await,
            Err(LedgerError::NoMoreEntriesToRead)
        ));
    }
}
