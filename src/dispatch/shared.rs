//! C5 — the Shared ("multi-consumer") dispatcher (spec §4.5).
//!
//! Entries are round-robined across every connected consumer with spare
//! permits, grouped into priority tiers: a consumer in a lower-numbered
//! tier is offered entries before any consumer in a higher tier is
//! considered, and round-robin only cycles within the tier currently being
//! served. Redelivery (explicit or on disconnect) goes through a shared
//! replay set rather than per-consumer state, since any remaining consumer
//! may pick up the redelivered entry.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::backoff::Backoff;
use crate::compaction::CompactedView;
use crate::consumer::FlowControlConsumer;
use crate::error::DispatchError;
use crate::ledger::Cursor;
use crate::model::{Entry, EntryPayload, MessageId, Position};
use crate::rate_limit::RateLimiter;

use super::Dispatcher;

struct Registration {
    consumer: Arc<FlowControlConsumer>,
    priority: u32,
}

struct State {
    /// Priority tier -> consumers in that tier, in round-robin order.
    tiers: BTreeMap<u32, VecDeque<Registration>>,
    /// Positions read off the cursor but not yet acked by anyone, kept so
    /// a disconnect or explicit `Redeliver` can hand them to someone else.
    replay_set: Vec<Position>,
}

pub struct SharedDispatcher {
    cursor: Box<dyn Cursor>,
    state: Mutex<State>,
    /// Ceiling a successful read can grow `read_batch` to (spec §4.5,
    /// `MAX_READ_BATCH`). Bounds how many entries are pulled off the cursor
    /// in one cycle — distinct from `max_round_robin_batch_size`, which
    /// bounds how many of those entries any single consumer can be handed.
    max_read_batch_size: u32,
    /// The adaptive read size: doubles on a successful cursor read up to
    /// `max_read_batch_size`, resets to 1 on a read failure.
    read_batch: AtomicU32,
    /// Fixed per-consumer chunk cap during round-robin distribution (spec
    /// §4.5, `MAX_RR_BATCH`).
    max_round_robin_batch_size: u32,
    max_unacked_per_subscription: u32,
    total_unacked: AtomicU32,
    /// Latched subscription-wide backpressure flag: set once `total_unacked`
    /// reaches `max_unacked_per_subscription`, cleared only once it falls
    /// below half that cap (spec §4.5 hysteresis).
    blocked_on_unacked: AtomicBool,
    rate_limiter: Arc<RateLimiter>,
    backoff: Mutex<Backoff>,
    fenced: AtomicBool,
    /// Set only for a `readCompacted` subscription; see
    /// [`crate::dispatch::single_active::SingleActiveDispatcher`]'s field
    /// of the same name.
    compacted_view: Option<Arc<CompactedView>>,
}

impl SharedDispatcher {
    pub fn new(
        cursor: Box<dyn Cursor>,
        max_read_batch_size: u32,
        max_round_robin_batch_size: u32,
        max_unacked_per_subscription: u32,
        rate_limiter: Arc<RateLimiter>,
        read_failure_backoff_initial: std::time::Duration,
        read_failure_backoff_max: std::time::Duration,
    ) -> Self {
        Self {
            cursor,
            state: Mutex::new(State { tiers: BTreeMap::new(), replay_set: Vec::new() }),
            max_read_batch_size,
            read_batch: AtomicU32::new(1),
            max_round_robin_batch_size,
            max_unacked_per_subscription,
            total_unacked: AtomicU32::new(0),
            blocked_on_unacked: AtomicBool::new(false),
            rate_limiter,
            backoff: Mutex::new(Backoff::new(read_failure_backoff_initial, read_failure_backoff_max)),
            fenced: AtomicBool::new(false),
            compacted_view: None,
        }
    }

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
            Err(DispatchError::SubscriptionFenced("shared".into()))
        } else {
            Ok(())
        }
    }

    pub fn add_consumer_with_priority(&self, consumer: Arc<FlowControlConsumer>, priority: u32) {
        self.state.lock().tiers.entry(priority).or_default().push_back(Registration { consumer, priority });
    }

    /// Round-robin pick of the next consumer with spare capacity, scanning
    /// only the lowest-numbered non-empty tier.
    fn next_candidate(state: &mut State) -> Option<Arc<FlowControlConsumer>> {
        for tier in state.tiers.values_mut() {
            let len = tier.len();
            for _ in 0..len {
                if let Some(reg) = tier.pop_front() {
                    let writable = reg.consumer.is_writable() && reg.consumer.can_dispatch(1);
                    tier.push_back(reg);
                    if writable {
                        return Some(tier.back().unwrap().consumer.clone());
                    }
                }
            }
        }
        None
    }

    /// The first tier (lowest priority number) holding at least one
    /// dispatchable consumer, along with the sum of those consumers'
    /// permits — the budget available to serve that tier this cycle.
    fn active_tier_permits(state: &State) -> Option<(u32, u32)> {
        for (&priority, tier) in state.tiers.iter() {
            let total: u32 = tier
                .iter()
                .filter(|r| r.consumer.is_writable() && r.consumer.can_dispatch(1))
                .map(|r| r.consumer.available_permits())
                .sum();
            if total > 0 {
                return Some((priority, total));
            }
        }
        None
    }

    fn below_subscription_cap(&self) -> bool {
        !self.blocked_on_unacked.load(Ordering::SeqCst)
    }

    /// Refresh the latched `blocked_on_unacked` flag from the current
    /// `total_unacked` count: sets it once the cap is reached, clears it
    /// only once the count falls below half the cap (spec §4.5).
    fn refresh_unacked_block_state(&self) {
        if self.max_unacked_per_subscription == 0 {
            return;
        }
        let count = self.total_unacked.load(Ordering::SeqCst);
        if count >= self.max_unacked_per_subscription {
            self.blocked_on_unacked.store(true, Ordering::SeqCst);
        } else if count < self.max_unacked_per_subscription / 2 {
            self.blocked_on_unacked.store(false, Ordering::SeqCst);
        }
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

    /// Perform at most one read-and-dispatch cycle: first drains the replay
    /// set against whichever consumer has capacity, then reads fresh
    /// entries off the cursor and distributes them round-robin across the
    /// active tier. Returns the number of entries delivered.
    pub async fn run_once(&self) -> Result<u32, DispatchError> {
        self.ensure_not_fenced()?;
        if !self.rate_limiter.has_permit() || !self.below_subscription_cap() {
            return Ok(0);
        }

        if let Some(delivered) = self.try_replay().await? {
            return Ok(delivered);
        }

        let (tier_key, total_permits) = {
            let state = self.state.lock();
            match Self::active_tier_permits(&state) {
                Some(found) => found,
                None => return Ok(0),
            }
        };

        let requested = total_permits.min(self.read_batch.load(Ordering::SeqCst));
        let batch_size = self.rate_limiter.cap_messages_to_read(requested).max(1);
        let entries = if let Some(view) = &self.compacted_view {
            match view.try_read(batch_size).await {
                Some(entries) => entries,
                None => self.read_from_backlog(batch_size).await?,
            }
        } else {
            self.read_from_backlog(batch_size).await?
        };

        let (delivered, total_bytes) = self.distribute_round_robin(tier_key, entries).await;
        self.total_unacked.fetch_add(delivered, Ordering::SeqCst);
        self.refresh_unacked_block_state();
        self.rate_limiter.record_sent(delivered as u64, total_bytes);
        Ok(delivered)
    }

    /// Hand `entries` out round-robin to the consumers of `tier_key`, each
    /// consumer's chunk bounded by `min(remaining, consumer.permits,
    /// MAX_RR_BATCH)`. Anything left over (tier drained of capacity before
    /// the batch was exhausted) is pushed to the replay set.
    async fn distribute_round_robin(&self, tier_key: u32, entries: Vec<Entry>) -> (u32, u64) {
        let mut remaining: VecDeque<Entry> = entries.into();
        let mut delivered = 0u32;
        let mut total_bytes = 0u64;

        'rounds: loop {
            if remaining.is_empty() {
                break;
            }
            let tier_len = self.state.lock().tiers.get(&tier_key).map(|t| t.len()).unwrap_or(0);
            if tier_len == 0 {
                break;
            }

            let mut progressed = false;
            for _ in 0..tier_len {
                if remaining.is_empty() {
                    break 'rounds;
                }
                let consumer = {
                    let mut state = self.state.lock();
                    let Some(tier) = state.tiers.get_mut(&tier_key) else { break 'rounds };
                    let Some(reg) = tier.pop_front() else { break 'rounds };
                    let consumer = Arc::clone(&reg.consumer);
                    tier.push_back(reg);
                    consumer
                };

                if !consumer.is_writable() || !consumer.can_dispatch(1) {
                    continue;
                }
                let chunk_len =
                    (remaining.len() as u32).min(consumer.available_permits()).min(self.max_round_robin_batch_size) as usize;
                if chunk_len == 0 {
                    continue;
                }
                progressed = true;

                let mut chunk_positions = Vec::with_capacity(chunk_len);
                for _ in 0..chunk_len {
                    let entry = remaining.pop_front().expect("chunk_len bounded by remaining.len()");
                    let position = entry.position;
                    total_bytes += match &entry.payload {
                        EntryPayload::Single(p) => p.len() as u64,
                        EntryPayload::Batch(msgs) => msgs.iter().map(|m| m.payload.len() as u64).sum(),
                    };
                    let message_id = MessageId::Single(position);
                    if consumer.send(message_id, entry).await.is_err() {
                        self.state.lock().replay_set.push(position);
                        continue;
                    }
                    chunk_positions.push(position);
                    delivered += 1;
                }
                if !chunk_positions.is_empty() {
                    consumer.record_dispatched(chunk_positions.len() as u32, &chunk_positions);
                }
            }
            if !progressed {
                break;
            }
        }

        if !remaining.is_empty() {
            self.state.lock().replay_set.extend(remaining.iter().map(|e| e.position));
        }

        (delivered, total_bytes)
    }

    async fn read_from_backlog(&self, batch_size: u32) -> Result<Vec<Entry>, DispatchError> {
        match self.cursor.async_read_entries_or_wait(batch_size).await {
            Ok(entries) => {
                self.backoff.lock().reset();
                self.record_read_success();
                Ok(entries)
            }
            Err(crate::ledger::LedgerError::NoMoreEntriesToRead) => Ok(Vec::new()),
            Err(e) => {
                let _ = self.backoff.lock().next();
                self.record_read_failure();
                Err(DispatchError::Ledger(e))
            }
        }
    }

    async fn try_replay(&self) -> Result<Option<u32>, DispatchError> {
        let (positions, consumer) = {
            let mut state = self.state.lock();
            if state.replay_set.is_empty() {
                return Ok(None);
            }
            let candidate = match Self::next_candidate(&mut state) {
                Some(c) => c,
                None => return Ok(None),
            };
            let take = (self.max_round_robin_batch_size as usize)
                .min(candidate.available_permits() as usize)
                .min(state.replay_set.len());
            let positions: Vec<Position> = state.replay_set.drain(..take).collect();
            (positions, candidate)
        };

        let entries = self.cursor.async_replay_entries(&positions).await?;
        let mut delivered = 0u32;
        let mut dispatched_positions = Vec::with_capacity(entries.len());
        for entry in entries {
            let position = entry.position;
            let message_id = MessageId::Single(position);
            if consumer.send(message_id, entry).await.is_err() {
                self.state.lock().replay_set.push(position);
                continue;
            }
            dispatched_positions.push(position);
            delivered += 1;
        }
        consumer.record_dispatched(delivered, &dispatched_positions);
        Ok(Some(delivered))
    }

    /// Acknowledge a position, freeing one slot in the subscription-wide
    /// unacked budget. If the acking consumer doesn't actually hold the
    /// position (a duplicate ack, or one issued against the wrong
    /// consumer), peer consumers of the same subscription are searched and
    /// the position is removed from whichever one owns it (spec §4.1). The
    /// subscription-wide counter is only decremented by however many
    /// entries were actually removed, never blindly.
    pub fn ack(&self, consumer_id: u64, message_id: MessageId, cumulative: bool) {
        let removed = {
            let state = self.state.lock();
            let mut removed = 0usize;
            if let Some(reg) = state.tiers.values().flatten().find(|r| r.consumer.id == consumer_id) {
                removed = reg.consumer.ack(message_id, cumulative);
            }
            if removed == 0 {
                for reg in state.tiers.values().flatten() {
                    if reg.consumer.id == consumer_id {
                        continue;
                    }
                    let peer_removed = reg.consumer.ack(message_id, cumulative);
                    if peer_removed > 0 {
                        removed = peer_removed;
                        break;
                    }
                }
            }
            removed
        };
        if removed > 0 {
            self.total_unacked.fetch_sub(removed as u32, Ordering::SeqCst);
            self.refresh_unacked_block_state();
        }
    }
}

#[async_trait]
impl Dispatcher for SharedDispatcher {
    async fn add_consumer(&self, consumer: Arc<FlowControlConsumer>) -> Result<(), DispatchError> {
        self.ensure_not_fenced()?;
        self.add_consumer_with_priority(consumer, 0);
        Ok(())
    }

    fn remove_consumer(&self, consumer_id: u64) {
        let mut state = self.state.lock();
        let mut reclaimed = Vec::new();
        for tier in state.tiers.values_mut() {
            if let Some(pos) = tier.iter().position(|r| r.consumer.id == consumer_id) {
                let reg = tier.remove(pos).unwrap();
                reclaimed.extend(reg.consumer.redeliverable());
            }
        }
        state.tiers.retain(|_, t| !t.is_empty());
        state.replay_set.extend(reclaimed);
    }

    fn consumer_flow(&self, consumer_id: u64, permits: u32) {
        let state = self.state.lock();
        for tier in state.tiers.values() {
            if let Some(reg) = tier.iter().find(|r| r.consumer.id == consumer_id) {
                reg.consumer.grant_permits(permits);
                return;
            }
        }
    }

    async fn redeliver(&self, consumer_id: u64, message_ids: Vec<MessageId>) -> Result<(), DispatchError> {
        let mut state = self.state.lock();
        if let Some(reg) = state.tiers.values().flatten().find(|r| r.consumer.id == consumer_id) {
            for id in &message_ids {
                reg.consumer.ack(*id, false);
            }
        }
        state.replay_set.extend(message_ids.iter().map(|m| m.position()));
        Ok(())
    }

    fn consumer_count(&self) -> usize {
        self.state.lock().tiers.values().map(|t| t.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ChannelConnection;
    use crate::ledger::memory::InMemoryLedger;
    use crate::ledger::ManagedLedger;
    use crate::model::MessageMetadata;
    use std::time::Duration;

    async fn dispatcher_with_entries(n: u64) -> (SharedDispatcher, Arc<InMemoryLedger>) {
        let ledger = Arc::new(InMemoryLedger::new(0));
        for i in 0..n {
            ledger.append(MessageMetadata::new("p", i, 0), vec![1]).await.unwrap();
        }
        let cursor = ledger.open_cursor("sub", None).await.unwrap();
        let dispatcher = SharedDispatcher::new(
            cursor,
            50,
            10,
            0,
            Arc::new(RateLimiter::disabled()),
            Duration::from_millis(10),
            Duration::from_secs(1),
        );
        (dispatcher, ledger)
    }

    fn drain_count(rx: &mut tokio::sync::mpsc::Receiver<crate::connection::OutboundFrame>) -> usize {
        let mut n = 0;
        while rx.try_recv().is_ok() {
            n += 1;
        }
        n
    }

    #[tokio::test]
    async fn round_robins_across_consumers_in_the_same_tier() {
        let (dispatcher, _ledger) = dispatcher_with_entries(2).await;
        let (conn_a, mut rx_a) = ChannelConnection::new(8);
        let (conn_b, mut rx_b) = ChannelConnection::new(8);
        let a = Arc::new(FlowControlConsumer::new(1, Arc::new(conn_a), 100, true));
        let b = Arc::new(FlowControlConsumer::new(2, Arc::new(conn_b), 100, true));
        a.grant_permits(100);
        b.grant_permits(100);
        dispatcher.add_consumer(a).await.unwrap();
        dispatcher.add_consumer(b).await.unwrap();

        let mut total_delivered = 0u32;
        for _ in 0..8 {
            total_delivered += dispatcher.run_once().await.unwrap();
            if total_delivered == 2 {
                break;
            }
        }
        assert_eq!(total_delivered, 2);
        assert_eq!(drain_count(&mut rx_a), 1);
        assert_eq!(drain_count(&mut rx_b), 1);
    }

    #[tokio::test]
    async fn distribution_is_bounded_by_each_consumers_own_permits() {
        // Spec scenario: C1 has 3 permits, C2 has 1; 4 entries in the
        // backlog should land 3 on C1 and 1 on C2, never driving either
        // consumer's permit count negative. `readBatch` ramps up from 1, so
        // this takes a few cycles rather than a single `run_once` call.
        let (dispatcher, _ledger) = dispatcher_with_entries(4).await;
        let (conn_a, mut rx_a) = ChannelConnection::new(8);
        let (conn_b, mut rx_b) = ChannelConnection::new(8);
        let c1 = Arc::new(FlowControlConsumer::new(1, Arc::new(conn_a), 100, true));
        let c2 = Arc::new(FlowControlConsumer::new(2, Arc::new(conn_b), 100, true));
        c1.grant_permits(3);
        c2.grant_permits(1);
        dispatcher.add_consumer(c1.clone()).await.unwrap();
        dispatcher.add_consumer(c2.clone()).await.unwrap();

        let mut total_delivered = 0u32;
        for _ in 0..8 {
            total_delivered += dispatcher.run_once().await.unwrap();
            if total_delivered == 4 {
                break;
            }
        }
        assert_eq!(total_delivered, 4);
        assert_eq!(drain_count(&mut rx_a), 3);
        assert_eq!(drain_count(&mut rx_b), 1);
        assert!(!c1.can_dispatch(1));
        assert!(!c2.can_dispatch(1));
    }

    #[tokio::test]
    async fn a_zero_permit_consumer_is_skipped_without_blocking_others() {
        let (dispatcher, _ledger) = dispatcher_with_entries(1).await;
        let (conn_a, _rx_a) = ChannelConnection::new(8);
        let (conn_b, mut rx_b) = ChannelConnection::new(8);
        let starved = Arc::new(FlowControlConsumer::new(1, Arc::new(conn_a), 100, true));
        let fed = Arc::new(FlowControlConsumer::new(2, Arc::new(conn_b), 100, true));
        fed.grant_permits(10);
        dispatcher.add_consumer(starved).await.unwrap();
        dispatcher.add_consumer(fed).await.unwrap();

        let delivered = dispatcher.run_once().await.unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(drain_count(&mut rx_b), 1);
    }

    #[tokio::test]
    async fn lower_priority_tier_served_first() {
        let (dispatcher, _ledger) = dispatcher_with_entries(1).await;
        let (conn_low, _rx_low) = ChannelConnection::new(8);
        let (conn_high, mut rx_high) = ChannelConnection::new(8);
        let low_priority = Arc::new(FlowControlConsumer::new(1, Arc::new(conn_low), 100, true));
        let high_priority = Arc::new(FlowControlConsumer::new(2, Arc::new(conn_high), 100, true));
        low_priority.grant_permits(100);
        high_priority.grant_permits(100);
        dispatcher.add_consumer_with_priority(high_priority, 1);
        dispatcher.add_consumer_with_priority(low_priority, 0);

        dispatcher.run_once().await.unwrap();
        assert!(rx_high.try_recv().is_err());
    }

    #[tokio::test]
    async fn removing_a_consumer_requeues_its_unacked_entries_for_replay() {
        let (dispatcher, _ledger) = dispatcher_with_entries(1).await;
        let (conn, _rx) = ChannelConnection::new(8);
        let consumer = Arc::new(FlowControlConsumer::new(1, Arc::new(conn), 100, true));
        consumer.grant_permits(100);
        dispatcher.add_consumer(consumer).await.unwrap();
        dispatcher.run_once().await.unwrap();

        dispatcher.remove_consumer(1);
        assert_eq!(dispatcher.state.lock().replay_set.len(), 1);
    }

    #[tokio::test]
    async fn read_batch_doubles_on_success_and_resets_on_failure() {
        let ledger = Arc::new(InMemoryLedger::new(0));
        for i in 0..200u64 {
            ledger.append(MessageMetadata::new("p", i, 0), vec![1]).await.unwrap();
        }
        let cursor = ledger.open_cursor("sub", None).await.unwrap();
        let dispatcher = SharedDispatcher::new(
            cursor,
            8,
            20,
            0,
            Arc::new(RateLimiter::disabled()),
            Duration::from_millis(10),
            Duration::from_secs(1),
        );
        let (conn, _rx) = ChannelConnection::new(256);
        let consumer = Arc::new(FlowControlConsumer::new(1, Arc::new(conn), 0, true));
        consumer.grant_permits(1000);
        dispatcher.add_consumer(consumer).await.unwrap();

        assert_eq!(dispatcher.run_once().await.unwrap(), 1);
        assert_eq!(dispatcher.run_once().await.unwrap(), 2);
        assert_eq!(dispatcher.run_once().await.unwrap(), 4);
        assert_eq!(dispatcher.run_once().await.unwrap(), 8);
        assert_eq!(dispatcher.run_once().await.unwrap(), 8);
    }

    #[tokio::test]
    async fn unacked_backpressure_has_half_cap_hysteresis() {
        let ledger = Arc::new(InMemoryLedger::new(0));
        for i in 0..4u64 {
            ledger.append(MessageMetadata::new("p", i, 0), vec![1]).await.unwrap();
        }
        let cursor = ledger.open_cursor("sub", None).await.unwrap();
        let dispatcher = SharedDispatcher::new(
            cursor,
            50,
            10,
            4,
            Arc::new(RateLimiter::disabled()),
            Duration::from_millis(10),
            Duration::from_secs(1),
        );
        let (conn, _rx) = ChannelConnection::new(8);
        let consumer = Arc::new(FlowControlConsumer::new(1, Arc::new(conn), 0, true));
        consumer.grant_permits(4);
        dispatcher.add_consumer(consumer.clone()).await.unwrap();

        let mut total_delivered = 0u32;
        for _ in 0..8 {
            total_delivered += dispatcher.run_once().await.unwrap();
            if total_delivered == 4 {
                break;
            }
        }
        assert_eq!(total_delivered, 4);
        assert!(!dispatcher.below_subscription_cap(), "reaching the cap should latch blocked_on_unacked");

        dispatcher.ack(1, MessageId::Single(Position::new(0, 0)), false);
        assert!(!dispatcher.below_subscription_cap(), "3/4 unacked is still above half the cap");

        dispatcher.ack(1, MessageId::Single(Position::new(0, 1)), false);
        assert!(dispatcher.below_subscription_cap(), "2/4 unacked is below half the cap and should unblock");
    }

    #[tokio::test]
    async fn ack_falls_back_to_the_peer_consumer_that_actually_owns_the_position() {
        let (dispatcher, _ledger) = dispatcher_with_entries(2).await;
        let (conn_a, _rx_a) = ChannelConnection::new(8);
        let (conn_b, _rx_b) = ChannelConnection::new(8);
        let a = Arc::new(FlowControlConsumer::new(1, Arc::new(conn_a), 100, true));
        let b = Arc::new(FlowControlConsumer::new(2, Arc::new(conn_b), 100, true));
        a.grant_permits(1);
        b.grant_permits(1);
        dispatcher.add_consumer(a.clone()).await.unwrap();
        dispatcher.add_consumer(b.clone()).await.unwrap();
        while b.redeliverable().is_empty() {
            dispatcher.run_once().await.unwrap();
        }

        let b_position = b.redeliverable()[0];
        assert!(!a.redeliverable().contains(&b_position));

        // Ack b's position against a's consumer id: a has no such position,
        // so the dispatcher must find it on b instead.
        dispatcher.ack(1, MessageId::Single(b_position), false);
        assert!(b.redeliverable().is_empty());
        assert_eq!(dispatcher.total_unacked.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn duplicate_ack_does_not_underflow_total_unacked() {
        let (dispatcher, _ledger) = dispatcher_with_entries(1).await;
        let (conn, _rx) = ChannelConnection::new(8);
        let consumer = Arc::new(FlowControlConsumer::new(1, Arc::new(conn), 100, true));
        consumer.grant_permits(1);
        dispatcher.add_consumer(consumer.clone()).await.unwrap();
        dispatcher.run_once().await.unwrap();

        let position = consumer.redeliverable()[0];
        dispatcher.ack(1, MessageId::Single(position), false);
        assert_eq!(dispatcher.total_unacked.load(Ordering::SeqCst), 0);

        // Repeating the same ack must not underflow the counter.
        dispatcher.ack(1, MessageId::Single(position), false);
        assert_eq!(dispatcher.total_unacked.load(Ordering::SeqCst), 0);
    }
}
