//! C6 — the Replicated-Cursor dispatcher (spec §4.6).
//!
//! Reads entries off a local cursor and forwards them to a remote cluster
//! through a [`ReplicationSink`], bounding how far ahead of remote
//! acknowledgment it reads with `pendingMessages`. Entries already carrying
//! a `replicated_from` matching this cluster's own replication producer
//! prefix are dropped rather than forwarded, to prevent replication loops
//! between clusters.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::backoff::Backoff;
use crate::consumer::FlowControlConsumer;
use crate::error::DispatchError;
use crate::ledger::{Cursor, LedgerError};
use crate::model::{Entry, MessageId, REPLICATOR_PRODUCER_PREFIX};

use super::Dispatcher;

/// The remote side of replication: forwards one entry to the paired
/// cluster's topic. A real deployment backs this with a producer on a
/// connection to the remote broker.
#[async_trait]
pub trait ReplicationSink: Send + Sync {
    async fn forward(&self, entry: &Entry) -> Result<(), ReplicationError>;
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ReplicationError {
    /// Transient: the remote cluster is unreachable or shedding load.
    #[error("remote unavailable")]
    RemoteUnavailable,
    /// Non-retriable: the entry itself cannot be forwarded (e.g. it fails
    /// remote-side validation). Deleted locally rather than retried forever.
    #[error("poison entry: {0}")]
    Poison(String),
}

pub struct ReplicatedCursorDispatcher {
    cursor: Box<dyn Cursor>,
    sink: Box<dyn ReplicationSink>,
    queue_size: usize,
    in_flight: AtomicUsize,
    message_ttl: Option<Duration>,
    backoff: Mutex<Backoff>,
    fenced: AtomicBool,
}

impl ReplicatedCursorDispatcher {
    pub fn new(
        cursor: Box<dyn Cursor>,
        sink: Box<dyn ReplicationSink>,
        queue_size: usize,
        message_ttl: Option<Duration>,
        read_failure_backoff_initial: Duration,
        read_failure_backoff_max: Duration,
    ) -> Self {
        Self {
            cursor,
            sink,
            queue_size: queue_size.max(1),
            in_flight: AtomicUsize::new(0),
            message_ttl,
            backoff: Mutex::new(Backoff::new(read_failure_backoff_initial, read_failure_backoff_max)),
            fenced: AtomicBool::new(false),
        }
    }

    fn is_replication_loop(entry: &Entry) -> bool {
        entry.metadata.is_replicated() || entry.metadata.producer_name.starts_with(REPLICATOR_PRODUCER_PREFIX)
    }

    fn is_expired(&self, entry: &Entry, now_millis: u64) -> bool {
        match self.message_ttl {
            Some(ttl) => now_millis.saturating_sub(entry.metadata.publish_time_millis) > ttl.as_millis() as u64,
            None => false,
        }
    }

    fn has_queue_capacity(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) < self.queue_size
    }

    /// Perform at most one read-forward-ack cycle, bounded by `now_millis`
    /// for TTL filtering (passed in rather than read from the clock so
    /// expiry is deterministic under test). Returns the number of entries
    /// forwarded.
    pub async fn run_once(&self, now_millis: u64) -> Result<u32, DispatchError> {
        if self.fenced.load(Ordering::SeqCst) || !self.has_queue_capacity() {
            return Ok(0);
        }

        let entries = match self.cursor.async_read_entries_or_wait(1).await {
            Ok(entries) => {
                self.backoff.lock().reset();
                entries
            }
            Err(LedgerError::NoMoreEntriesToRead) => return Ok(0),
            Err(e) => {
                self.cursor.rewind();
                let _ = self.backoff.lock().next();
                return Err(DispatchError::Ledger(e));
            }
        };

        let mut forwarded = 0u32;
        for entry in entries {
            if Self::is_replication_loop(&entry) || self.is_expired(&entry, now_millis) {
                let _ = self.cursor.async_delete(entry.position).await;
                continue;
            }

            self.in_flight.fetch_add(1, Ordering::SeqCst);
            match self.sink.forward(&entry).await {
                Ok(()) => {
                    let _ = self.cursor.async_delete(entry.position).await;
                    forwarded += 1;
                }
                Err(ReplicationError::Poison(_)) => {
                    let _ = self.cursor.async_delete(entry.position).await;
                }
                Err(ReplicationError::RemoteUnavailable) => {
                    self.cursor.rewind();
                    self.in_flight.fetch_sub(1, Ordering::SeqCst);
                    let _ = self.backoff.lock().next();
                    break;
                }
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(forwarded)
    }

    pub fn fence(&self) {
        self.fenced.store(true, Ordering::SeqCst);
    }

    pub fn unfence(&self) {
        self.fenced.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl Dispatcher for ReplicatedCursorDispatcher {
    async fn add_consumer(&self, _consumer: std::sync::Arc<FlowControlConsumer>) -> Result<(), DispatchError> {
        Err(DispatchError::ConsumerBusy)
    }

    fn remove_consumer(&self, _consumer_id: u64) {}

    fn consumer_flow(&self, _consumer_id: u64, _permits: u32) {}

    async fn redeliver(&self, _consumer_id: u64, _message_ids: Vec<MessageId>) -> Result<(), DispatchError> {
        Ok(())
    }

    fn consumer_count(&self) -> usize {
        0
    }
}
