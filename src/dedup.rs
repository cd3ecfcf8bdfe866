//! C3 — producer-side idempotent deduplication (spec §4.3).
//!
//! Tracks, per producer name, the highest sequence id pushed to the log and
//! the highest one durably persisted (periodic snapshot). A publish is
//! admitted only once its sequence id moves strictly past what's already
//! been seen; a retry of an already-persisted (producer, seq) pair is acked
//! without a second append.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

/// Lifecycle of the dedup subsystem for one topic (spec §4.3, "State
/// machine"). Recovery replays the `__dedup` cursor to rebuild
/// `highest_persisted` before admission can begin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupState {
    Disabled,
    Recovering,
    Enabled,
    Removing,
    Failed,
}

/// The outcome of admission-checking one `(producer, sequenceId)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupDecision {
    /// Strictly newer than anything seen from this producer: append it.
    Accept,
    /// At or below the highest durably persisted sequence id: a retry of
    /// an already-committed publish. Ack without appending again.
    Duplicate,
    /// Above `highest_persisted` but at or below `highest_pushed`: a retry
    /// of a publish whose append is still in flight. Ack without
    /// re-appending; the original append will (or already did) complete.
    InFlight,
}

struct ProducerState {
    highest_pushed: u64,
    highest_persisted: u64,
    last_active: Instant,
}

/// Per-topic dedup state machine and admission check.
pub struct MessageDeduplication {
    state: Mutex<DedupState>,
    producers: DashMap<String, ProducerState>,
    snapshot_interval: u32,
    since_snapshot: Mutex<u32>,
    producer_inactivity_timeout: Duration,
}

impl MessageDeduplication {
    pub fn new(enabled: bool, snapshot_interval: u32, producer_inactivity_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(if enabled { DedupState::Recovering } else { DedupState::Disabled }),
            producers: DashMap::new(),
            snapshot_interval: snapshot_interval.max(1),
            since_snapshot: Mutex::new(0),
            producer_inactivity_timeout,
        }
    }

    pub fn state(&self) -> DedupState {
        *self.state.lock()
    }

    /// Replay of the `__dedup` cursor's last snapshot completed; seed
    /// `highest_persisted`/`highest_pushed` from it and start admitting.
    pub fn complete_recovery(&self, snapshot: HashMap<String, u64>) {
        let now = Instant::now();
        for (producer, seq) in snapshot {
            self.producers.insert(producer, ProducerState { highest_pushed: seq, highest_persisted: seq, last_active: now });
        }
        *self.state.lock() = DedupState::Enabled;
    }

    pub fn fail_recovery(&self) {
        *self.state.lock() = DedupState::Failed;
    }

    /// Administrative disable: stop admitting new publishes through dedup,
    /// then drop all tracked producer state.
    pub fn disable(&self) {
        *self.state.lock() = DedupState::Removing;
        self.producers.clear();
        *self.state.lock() = DedupState::Disabled;
    }

    /// Admission check for one publish. Only meaningful once `Enabled`;
    /// callers in any other state should treat dedup as a no-op and accept.
    pub fn should_accept(&self, producer: &str, sequence_id: u64) -> DedupDecision {
        if *self.state.lock() != DedupState::Enabled {
            return DedupDecision::Accept;
        }
        match self.producers.get(producer) {
            None => DedupDecision::Accept,
            Some(entry) if sequence_id <= entry.highest_persisted => DedupDecision::Duplicate,
            Some(entry) if sequence_id <= entry.highest_pushed => DedupDecision::InFlight,
            Some(_) => DedupDecision::Accept,
        }
    }

    /// Record that `sequence_id` was just pushed to the log (append
    /// initiated, not necessarily durable yet).
    pub fn record_pushed(&self, producer: &str, sequence_id: u64) {
        let mut entry = self.producers.entry(producer.to_string()).or_insert_with(|| ProducerState {
            highest_pushed: 0,
            highest_persisted: 0,
            last_active: Instant::now(),
        });
        entry.highest_pushed = entry.highest_pushed.max(sequence_id);
        entry.last_active = Instant::now();
    }

    /// Whether a snapshot of `highest_pushed` to the `__dedup` cursor is
    /// due, and if so, marks the counter consumed. Called after each
    /// successful append (spec §4.3, "Snapshot cadence").
    pub fn snapshot_due(&self) -> bool {
        let mut count = self.since_snapshot.lock();
        *count += 1;
        if *count >= self.snapshot_interval {
            *count = 0;
            true
        } else {
            false
        }
    }

    /// A snapshot just committed: advance `highest_persisted` to match
    /// `highest_pushed` for every producer captured in it.
    pub fn mark_persisted(&self, producers: &[String]) {
        for name in producers {
            if let Some(mut entry) = self.producers.get_mut(name) {
                entry.highest_persisted = entry.highest_pushed;
            }
        }
    }

    /// Drop bookkeeping for producers idle past the inactivity timeout,
    /// bounding the map's growth for topics with many short-lived
    /// producers (spec §4.3, "Producer GC").
    pub fn gc_inactive_producers(&self) {
        let now = Instant::now();
        self.producers.retain(|_, state| now.duration_since(state.last_active) < self.producer_inactivity_timeout);
    }

    pub fn current_snapshot(&self) -> HashMap<String, u64> {
        self.producers.iter().map(|e| (e.key().clone(), e.value().highest_pushed)).collect()
    }
}
