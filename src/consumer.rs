//! C1 — per-consumer flow control (spec §4.1).
//!
//! A [`FlowControlConsumer`] tracks the permit budget a connected client has
//! granted (`Flow` frames), the unacked-message count backing
//! `maxUnackedMessagesPerConsumer`, and — for Shared subscriptions only — the
//! set of positions dispatched-but-not-yet-acked a dispatcher needs for
//! redelivery. Exclusive/Failover consumers leave `pending_acks` `None`: the
//! cursor's own mark-delete position is enough to redeliver everything
//! undelivered after a failover.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::connection::{Connection, ConnectionError, OutboundFrame};
use crate::model::{Entry, MessageId, Position};

struct FlowState {
    /// Permits granted by the client and not yet spent on a dispatch.
    /// Never negative — see `grant_permits`/`record_dispatched`.
    permits: i64,
    /// Flow frames received while `blocked` was true, applied once the
    /// consumer unblocks (spec §4.1, "Flow accounting while blocked").
    permits_received_while_blocked: u32,
    blocked: bool,
    /// `Some` only for a Shared-subscription consumer: positions dispatched
    /// to this consumer that have not yet been acked, needed to answer a
    /// per-consumer `Redeliver`.
    pending_acks: Option<HashSet<Position>>,
}

/// One connected consumer's flow-control and ack-tracking state.
pub struct FlowControlConsumer {
    pub id: u64,
    pub connection: Arc<dyn Connection>,
    state: Mutex<FlowState>,
    max_unacked: u32,
}

impl FlowControlConsumer {
    /// `tracks_pending_acks` should be `true` only for a Shared-subscription
    /// consumer (spec §4.1 vs §4.5).
    pub fn new(id: u64, connection: Arc<dyn Connection>, max_unacked: u32, tracks_pending_acks: bool) -> Self {
        Self {
            id,
            connection,
            state: Mutex::new(FlowState {
                permits: 0,
                permits_received_while_blocked: 0,
                blocked: false,
                pending_acks: tracks_pending_acks.then(HashSet::new),
            }),
            max_unacked,
        }
    }

    /// Apply a client `Flow` frame. While blocked on the unacked-messages
    /// cap, the grant is banked rather than applied immediately, so a
    /// generous client can't starve flow accounting once it unblocks.
    pub fn grant_permits(&self, permits: u32) {
        let mut state = self.state.lock();
        if state.blocked {
            state.permits_received_while_blocked += permits;
        } else {
            state.permits += permits as i64;
        }
    }

    /// Whether this consumer currently has budget to receive `n` more
    /// messages: unblocked and holding at least `n` permits.
    pub fn can_dispatch(&self, n: u32) -> bool {
        let state = self.state.lock();
        !state.blocked && state.permits >= n as i64
    }

    /// Permits currently held, for bounding a dispatcher's read/distribute
    /// size to what this consumer can actually take (spec §4.4/§4.5:
    /// `min(consumer.permits, readBatch)`, `MAX_RR_BATCH`). Zero while
    /// blocked, since a blocked consumer has no usable budget regardless of
    /// what `messagePermits` holds.
    pub fn available_permits(&self) -> u32 {
        let state = self.state.lock();
        if state.blocked {
            0
        } else {
            state.permits.max(0) as u32
        }
    }

    /// Record that `n` messages at `positions` were just handed to this
    /// consumer: debits permits, grows the unacked count, and — once
    /// `maxUnackedMessagesPerConsumer` is reached — blocks further
    /// dispatch until acks bring the count back to half that cap.
    pub fn record_dispatched(&self, n: u32, positions: &[Position]) {
        let mut state = self.state.lock();
        state.permits -= n as i64;
        debug_assert!(state.permits >= 0, "messagePermits must never go negative");
        if let Some(pending) = state.pending_acks.as_mut() {
            pending.extend(positions.iter().copied());
        }
        if self.max_unacked > 0 && self.unacked_count(&state) >= self.max_unacked {
            self.block(&mut state);
        }
    }

    fn unacked_count(&self, state: &FlowState) -> u32 {
        state.pending_acks.as_ref().map(|p| p.len() as u32).unwrap_or(0)
    }

    fn block(&self, state: &mut FlowState) {
        state.blocked = true;
    }

    /// Unblock once the unacked count falls to half the cap (spec §4.1,
    /// "unblock at half"), folding in any flow grants banked while blocked.
    fn maybe_unblock(&self, state: &mut FlowState) {
        if !state.blocked {
            return;
        }
        let half = self.max_unacked / 2;
        if self.max_unacked == 0 || self.unacked_count(state) <= half {
            state.blocked = false;
            state.permits += std::mem::take(&mut state.permits_received_while_blocked) as i64;
        }
    }

    /// Ack one or, cumulatively, all positions at or before `message_id`.
    /// Only removes from this consumer's own `pending_acks` bookkeeping —
    /// the subscription's cursor is mark-deleted by the caller. Returns how
    /// many positions were actually removed, so a dispatcher-level unacked
    /// counter can be kept exact instead of decrementing blindly on a miss.
    pub fn ack(&self, message_id: MessageId, cumulative: bool) -> usize {
        let mut state = self.state.lock();
        let removed = if let Some(pending) = state.pending_acks.as_mut() {
            if cumulative {
                let before = pending.len();
                pending.retain(|p| *p > message_id.position());
                before - pending.len()
            } else if pending.remove(&message_id.position()) {
                1
            } else {
                0
            }
        } else {
            0
        };
        self.maybe_unblock(&mut state);
        removed
    }

    /// Positions previously dispatched to this consumer and still unacked —
    /// the Shared dispatcher's redelivery set on explicit `Redeliver` or on
    /// disconnect (spec §4.5).
    pub fn redeliverable(&self) -> Vec<Position> {
        self.state.lock().pending_acks.as_ref().map(|p| p.iter().copied().collect()).unwrap_or_default()
    }

    pub async fn send(&self, message_id: MessageId, entry: Entry) -> Result<(), ConnectionError> {
        self.connection.write(OutboundFrame::Message { message_id, entry }).await
    }

    pub fn is_writable(&self) -> bool {
        self.connection.is_writable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ChannelConnection;

    fn consumer(max_unacked: u32, shared: bool) -> FlowControlConsumer {
        let (conn, _rx) = ChannelConnection::new(64);
        FlowControlConsumer::new(1, Arc::new(conn), max_unacked, shared)
    }

    #[test]
    fn grants_accumulate_and_gate_dispatch() {
        let c = consumer(100, false);
        assert!(!c.can_dispatch(1));
        c.grant_permits(5);
        assert!(c.can_dispatch(5));
        assert!(!c.can_dispatch(6));
    }

    #[test]
    fn blocks_at_cap_and_unblocks_at_half() {
        let c = consumer(4, true);
        c.grant_permits(10);
        let positions: Vec<Position> = (0..4).map(|i| Position::new(0, i)).collect();
        c.record_dispatched(4, &positions);
        assert!(!c.can_dispatch(1));

        c.ack(MessageId::Single(positions[0]), false);
        c.ack(MessageId::Single(positions[1]), false);
        assert!(c.can_dispatch(1));
    }

    #[test]
    fn flow_received_while_blocked_is_banked_until_unblock() {
        let c = consumer(2, true);
        c.grant_permits(10);
        let positions: Vec<Position> = (0..2).map(|i| Position::new(0, i)).collect();
        c.record_dispatched(2, &positions);
        assert!(!c.can_dispatch(1));

        c.grant_permits(3);
        assert!(!c.can_dispatch(1));

        c.ack(MessageId::Single(positions[0]), false);
        assert!(c.can_dispatch(1));
    }

    #[test]
    fn cumulative_ack_clears_everything_up_to_and_including() {
        let c = consumer(10, true);
        c.grant_permits(3);
        let positions: Vec<Position> = (0..3).map(|i| Position::new(0, i)).collect();
        c.record_dispatched(3, &positions);
        c.ack(MessageId::Single(positions[1]), true);
        assert_eq!(c.redeliverable(), vec![positions[2]]);
    }
}
