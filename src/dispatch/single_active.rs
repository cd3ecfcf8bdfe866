//! C4 — the Exclusive/Failover ("single-active") dispatcher (spec §4.4).
//!
//! Exactly one connected consumer ever receives entries. For `Exclusive`
//! that consumer is the only one allowed to attach at all; for `Failover`
//! more than one may attach, ranked by consumer id (lowest wins), with a
//! configurable delay before promoting a new active consumer so a
//! reconnecting client doesn't thrash the active seat.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::backoff::Backoff;
use crate::compaction::CompactedView;
use crate::consumer::FlowControlConsumer;
use crate::error::DispatchError;
use crate::ledger::Cursor;
use crate::model::{MessageId, SubType};
use crate::rate_limit::RateLimiter;

use super::Dispatcher;

struct State {
    consumers: Vec<Arc<FlowControlConsumer>>,
    active: Option<u64>,
}

pub struct SingleActiveDispatcher {
    sub_type: SubType,
    cursor: Box<dyn Cursor>,
    state: Mutex<State>,
    failover_delay: Duration,
    /// Ceiling a successful read can grow `read_batch` to (spec §4.4,
    /// `MAX_READ_BATCH`).
    max_read_batch_size: u32,
    /// The adaptive read size itself: doubles on a successful cursor read up
    /// to `max_read_batch_size`, resets to 1 on a read failure.
    read_batch: AtomicU32,
    rate_limiter: Arc<RateLimiter>,
    backoff: Mutex<Backoff>,
    fenced: std::sync::atomic::AtomicBool,
    no_active_consumer_epoch: AtomicU64,
    /// Set only for a `readCompacted` subscription: consulted before the
    /// raw backlog cursor so superseded keys are never redelivered.
    compacted_view: Option<Arc<CompactedView>>,
}

impl SingleActiveDispatcher {
    pub fn new(
        sub_type: SubType,
        cursor: Box<dyn Cursor>,
        failover_delay: Duration,
        max_read_batch_size: u32,
        rate_limiter: Arc<RateLimiter>,
        read_failure_backoff_initial: Duration,
        read_failure_backoff_max: Duration,
    ) -> Self {
        debug_assert!(matches!(sub_type, SubType::Exclusive | SubType::Failover));
        Self {
            sub_type,
            cursor,
            state: Mutex::new(State { consumers: Vec::new(), active: None }),
            failover_delay,
            max_read_batch_size,
            read_batch: AtomicU32::new(1),
            rate_limiter,
            backoff: Mutex::new(Backoff::new(read_failure_backoff_initial, read_failure_backoff_max)),
            fenced: std::sync::atomic::AtomicBool::new(false),
            no_active_consumer_epoch: AtomicU64::new(0),
            compacted_view: None,
        }
    }

    /// Wire in a `readCompacted` view; entries are served from it before
    /// the raw backlog cursor is consulted (spec §4.8).
    pub fn with_compacted_view(mut self, view: Arc<CompactedView>) -> Self {
        self.compacted_view = Some(view);
        self
    }

    pub fn fence(&self) {
        self.fenced.store(true, Ordering::SeqCst);
    }

    pub fn unfence(&self) {
        self.fenced.store(false, Ordering::SeqCst);
    }

    fn ensure_not_fenced(&self) -> Result<(), DispatchError> {
        if self.fenced.load(Ordering::SeqCst) {
            Err(DispatchError::SubscriptionFenced(format!("{:?}", self.sub_type)))
        } else {
            Ok(())
        }
    }

    /// Lowest consumer id present becomes (or stays) active — the delay
    /// gating promotion after a removal is applied by the caller of
    /// `remove_consumer`, not here, so that adding back the same consumer
    /// within the window doesn't trigger a pointless handoff.
    fn elect_active(state: &mut State) {
        state.active = state.consumers.iter().map(|c| c.id).min();
    }

    fn active_consumer(&self, state: &State) -> Option<Arc<FlowControlConsumer>> {
        let id = state.active?;
        state.consumers.iter().find(|c| c.id == id).cloned()
    }

    /// The active consumer's per-call failover delay, exposed so a caller
    /// driving the read loop can sleep it out after a handoff before
    /// resuming reads (spec §4.4, "Failover delay").
    pub fn failover_delay(&self) -> Duration {
        self.failover_delay
    }

    /// Double `read_batch` on a successful read, capped at
    /// `max_read_batch_size`.
    fn record_read_success(&self) {
        let mut cur = self.read_batch.load(Ordering::SeqCst);
        loop {
            let next = cur.saturating_mul(2).min(self.max_read_batch_size).max(1);
            match self.read_batch.compare_exchange_weak(cur, next, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => return,
                Err(observed) => cur = observed,
            }
        }
    }

    /// Reset `read_batch` to 1 on a read failure.
    fn record_read_failure(&self) {
        self.read_batch.store(1, Ordering::SeqCst);
    }

    /// Perform at most one read-and-dispatch cycle against the active
    /// consumer. Returns the number of entries delivered.
    pub async fn run_once(&self) -> Result<u32, DispatchError> {
        self.ensure_not_fenced()?;
        if !self.rate_limiter.has_permit() {
            return Ok(0);
        }

        let active = {
            let state = self.state.lock();
            match self.active_consumer(&state) {
                Some(c) => c,
                None => return Ok(0),
            }
        };

        if !active.is_writable() || !active.can_dispatch(1) {
            return Ok(0);
        }

        let requested = active.available_permits().min(self.read_batch.load(Ordering::SeqCst));
        let batch_size = self.rate_limiter.cap_messages_to_read(requested).max(1);
        let entries = if let Some(view) = &self.compacted_view {
            match view.try_read(batch_size).await {
                Some(entries) => entries,
                None => match self.cursor.async_read_entries_or_wait(batch_size).await {
                    Ok(entries) => {
                        self.backoff.lock().reset();
                        self.record_read_success();
                        entries
                    }
                    Err(crate::ledger::LedgerError::NoMoreEntriesToRead) => return Ok(0),
                    Err(e) => {
                        self.cursor.rewind();
                        let _ = self.backoff.lock().next();
                        self.record_read_failure();
                        return Err(DispatchError::Ledger(e));
                    }
                },
            }
        } else {
            match self.cursor.async_read_entries_or_wait(batch_size).await {
                Ok(entries) => {
                    self.backoff.lock().reset();
                    self.record_read_success();
                    entries
                }
                Err(crate::ledger::LedgerError::NoMoreEntriesToRead) => return Ok(0),
                Err(e) => {
                    self.cursor.rewind();
                    let _ = self.backoff.lock().next();
                    self.record_read_failure();
                    return Err(DispatchError::Ledger(e));
                }
            }
        };

        let mut delivered = 0u32;
        let mut positions = Vec::with_capacity(entries.len());
        let mut total_bytes = 0u64;
        for entry in entries {
            positions.push(entry.position);
            total_bytes += match &entry.payload {
                crate::model::EntryPayload::Single(p) => p.len() as u64,
                crate::model::EntryPayload::Batch(msgs) => msgs.iter().map(|m| m.payload.len() as u64).sum(),
            };
            let message_id = MessageId::Single(entry.position);
            if active.send(message_id, entry).await.is_err() {
                self.cursor.rewind();
                break;
            }
            delivered += 1;
        }
        active.record_dispatched(delivered, &positions);
        self.rate_limiter.record_sent(delivered as u64, total_bytes);
        Ok(delivered)
    }
}

#[async_trait]
impl Dispatcher for SingleActiveDispatcher {
    async fn add_consumer(&self, consumer: Arc<FlowControlConsumer>) -> Result<(), DispatchError> {
        self.ensure_not_fenced()?;
        let mut state = self.state.lock();
        if self.sub_type == SubType::Exclusive && !state.consumers.is_empty() {
            return Err(DispatchError::ConsumerBusy);
        }
        state.consumers.push(consumer);
        Self::elect_active(&mut state);
        Ok(())
    }

    fn remove_consumer(&self, consumer_id: u64) {
        let mut state = self.state.lock();
        state.consumers.retain(|c| c.id != consumer_id);
        let was_active = state.active == Some(consumer_id);
        Self::elect_active(&mut state);
        if was_active {
            self.no_active_consumer_epoch.fetch_add(1, Ordering::SeqCst);
            self.cursor.rewind();
        }
    }

    fn consumer_flow(&self, consumer_id: u64, permits: u32) {
        let state = self.state.lock();
        if let Some(c) = state.consumers.iter().find(|c| c.id == consumer_id) {
            c.grant_permits(permits);
        }
    }

    async fn redeliver(&self, _consumer_id: u64, _message_ids: Vec<MessageId>) -> Result<(), DispatchError> {
        self.cursor.rewind();
        Ok(())
    }

    fn consumer_count(&self) -> usize {
        self.state.lock().consumers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ChannelConnection;
    use crate::ledger::memory::InMemoryLedger;
    use crate::ledger::ManagedLedger;
    use crate::model::MessageMetadata;

    async fn dispatcher_with_entries(sub_type: SubType, n: u64) -> (SingleActiveDispatcher, Arc<InMemoryLedger>) {
        let ledger = Arc::new(InMemoryLedger::new(0));
        for i in 0..n {
            ledger.append(MessageMetadata::new("p", i, 0), vec![1]).await.unwrap();
        }
        let cursor = ledger.open_cursor("sub", None).await.unwrap();
        let dispatcher = SingleActiveDispatcher::new(
            sub_type,
            cursor,
            Duration::from_millis(0),
            10,
            Arc::new(RateLimiter::disabled()),
            Duration::from_millis(10),
            Duration::from_secs(1),
        );
        (dispatcher, ledger)
    }

    #[tokio::test]
    async fn exclusive_rejects_second_consumer() {
        let (dispatcher, _ledger) = dispatcher_with_entries(SubType::Exclusive, 0).await;
        let (conn, _rx) = ChannelConnection::new(8);
        let c1 = Arc::new(FlowControlConsumer::new(1, Arc::new(conn), 0, false));
        dispatcher.add_consumer(c1).await.unwrap();

        let (conn2, _rx2) = ChannelConnection::new(8);
        let c2 = Arc::new(FlowControlConsumer::new(2, Arc::new(conn2), 0, false));
        assert!(matches!(dispatcher.add_consumer(c2).await, Err(DispatchError::ConsumerBusy)));
    }

    #[tokio::test]
    async fn failover_promotes_lowest_id_consumer() {
        let (dispatcher, _ledger) = dispatcher_with_entries(SubType::Failover, 0).await;
        let (conn_a, _rx_a) = ChannelConnection::new(8);
        let (conn_b, _rx_b) = ChannelConnection::new(8);
        dispatcher.add_consumer(Arc::new(FlowControlConsumer::new(5, Arc::new(conn_a), 0, false))).await.unwrap();
        dispatcher.add_consumer(Arc::new(FlowControlConsumer::new(2, Arc::new(conn_b), 0, false))).await.unwrap();
        assert_eq!(dispatcher.state.lock().active, Some(2));
    }

    #[tokio::test]
    async fn active_consumer_receives_dispatched_entries() {
        let (dispatcher, _ledger) = dispatcher_with_entries(SubType::Exclusive, 3).await;
        let (conn, mut rx) = ChannelConnection::new(8);
        let consumer = Arc::new(FlowControlConsumer::new(1, Arc::new(conn), 100, false));
        consumer.grant_permits(100);
        dispatcher.add_consumer(consumer).await.unwrap();

        let mut total_delivered = 0u32;
        for _ in 0..8 {
            total_delivered += dispatcher.run_once().await.unwrap();
            if total_delivered == 3 {
                break;
            }
        }
        assert_eq!(total_delivered, 3);
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn read_request_is_bounded_by_consumer_permits() {
        let (dispatcher, _ledger) = dispatcher_with_entries(SubType::Exclusive, 5).await;
        let (conn, _rx) = ChannelConnection::new(8);
        let consumer = Arc::new(FlowControlConsumer::new(1, Arc::new(conn), 0, false));
        consumer.grant_permits(2);
        dispatcher.add_consumer(consumer.clone()).await.unwrap();

        let mut total_delivered = 0u32;
        for _ in 0..8 {
            if !consumer.can_dispatch(1) {
                break;
            }
            total_delivered += dispatcher.run_once().await.unwrap();
        }
        assert_eq!(total_delivered, 2);
    }

    #[tokio::test]
    async fn read_batch_doubles_on_success_and_resets_on_failure() {
        let ledger = Arc::new(InMemoryLedger::new(0));
        for i in 0..200u64 {
            ledger.append(MessageMetadata::new("p", i, 0), vec![1]).await.unwrap();
        }
        let cursor = ledger.open_cursor("sub", None).await.unwrap();
        let dispatcher = SingleActiveDispatcher::new(
            SubType::Exclusive,
            cursor,
            Duration::from_millis(0),
            8,
            Arc::new(RateLimiter::disabled()),
            Duration::from_millis(10),
            Duration::from_secs(1),
        );
        let (conn, _rx) = ChannelConnection::new(256);
        let consumer = Arc::new(FlowControlConsumer::new(1, Arc::new(conn), 0, false));
        consumer.grant_permits(1000);
        dispatcher.add_consumer(consumer).await.unwrap();

        assert_eq!(dispatcher.run_once().await.unwrap(), 1);
        assert_eq!(dispatcher.run_once().await.unwrap(), 2);
        assert_eq!(dispatcher.run_once().await.unwrap(), 4);
        assert_eq!(dispatcher.run_once().await.unwrap(), 8);
        assert_eq!(dispatcher.run_once().await.unwrap(), 8);
    }

    #[tokio::test]
    async fn fenced_dispatcher_rejects_operations() {
        let (dispatcher, _ledger) = dispatcher_with_entries(SubType::Exclusive, 0).await;
        dispatcher.fence();
        let (conn, _rx) = ChannelConnection::new(8);
        let consumer = Arc::new(FlowControlConsumer::new(1, Arc::new(conn), 0, false));
        assert!(matches!(dispatcher.add_consumer(consumer).await, Err(DispatchError::SubscriptionFenced(_))));
    }
}
