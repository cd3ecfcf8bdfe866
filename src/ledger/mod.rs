//! The managed-log collaborator contract (spec §6.1).
//!
//! `ManagedLedger` and `Cursor` are the append-only log and per-subscription
//! read pointer this crate dispatches against. Both are modeled as traits —
//! a real deployment backs them with a replicated log; tests and the demo
//! binary use the in-memory implementation in [`memory`].

pub mod memory;

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{Entry, MessageMetadata, Position};

/// Errors a managed-log collaborator may surface (spec §6.1, §7).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The log is shedding load; callers should back off and retry.
    #[error("too many requests")]
    TooManyRequests,

    /// A read or replay found nothing at or past the requested position.
    #[error("no more entries to read")]
    NoMoreEntriesToRead,

    /// `async_replay_entries` was asked to replay a position that has
    /// already been mark-deleted or that does not exist.
    #[error("invalid replay position")]
    InvalidReplayPosition,

    /// The cursor was closed (subscription deleted) while an operation
    /// against it was in flight.
    #[error("cursor already closed")]
    CursorAlreadyClosed,
}

/// A read can return a batch of entries up to a bound, or wait for more to
/// be published if none are available yet — mirrored by the two
/// `async_read_entries*` methods below rather than a single blocking call.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The append-only, shared log backing one topic.
#[async_trait]
pub trait ManagedLedger: Send + Sync {
    /// Durably append one entry, returning its assigned position. Ordering
    /// across concurrent callers is the ledger's to decide; callers only
    /// rely on the returned position being strictly greater than any
    /// previously returned one.
    async fn append(&self, metadata: MessageMetadata, payload: Vec<u8>) -> Result<Position, LedgerError>;

    /// Durably append one batch entry (client-side message batching),
    /// returning its assigned position. `metadata.num_messages_in_batch`
    /// must equal `messages.len()`.
    async fn append_batch(&self, metadata: MessageMetadata, messages: Vec<crate::model::SubMessage>) -> Result<Position, LedgerError>;

    /// Open (or reopen) a named, durable cursor at `position`, or at the
    /// start of the log if `position` is `None` (new subscription).
    async fn open_cursor(&self, name: &str, position: Option<Position>) -> Result<Box<dyn Cursor>, LedgerError>;

    /// The position one past the newest appended entry — the read target a
    /// caught-up dispatcher is waiting to cross (spec §4.4, §4.6).
    fn last_position(&self) -> Position;

    /// Whether the log has been administratively terminated: no further
    /// appends will be accepted, and readers should drain and stop.
    fn is_terminated(&self) -> bool;
}

/// A named, durable read pointer into one [`ManagedLedger`].
///
/// All async methods here are suspension points: implementations must not
/// hold any lock across the `.await`, and callers (the dispatchers in
/// [`crate::dispatch`]) release their own subscription-state lock before
/// calling into one of these.
#[async_trait]
pub trait Cursor: Send + Sync {
    /// Read up to `max_entries` starting just after the cursor's read
    /// position, waiting if none are available yet rather than returning
    /// an empty batch. Returns `NoMoreEntriesToRead` only when the ledger
    /// is terminated and fully drained.
    async fn async_read_entries_or_wait(&self, max_entries: u32) -> Result<Vec<Entry>, LedgerError>;

    /// Replay specific, previously-read-but-not-acked positions (the Shared
    /// dispatcher's redelivery path, spec §4.5). Does not advance the
    /// cursor's own read position.
    async fn async_replay_entries(&self, positions: &[Position]) -> Result<Vec<Entry>, LedgerError>;

    /// Individual ack: mark one position deleted without necessarily
    /// advancing the durable mark-delete position (may be held behind an
    /// earlier unacked entry).
    async fn async_delete(&self, position: Position) -> Result<(), LedgerError>;

    /// Cumulative ack: advance the durable mark-delete position to
    /// `position`, implicitly acking everything at or before it.
    async fn async_mark_delete(&self, position: Position) -> Result<(), LedgerError>;

    /// Reset the read position back to just after the last mark-deleted
    /// entry, discarding any further-ahead in-flight reads. Used on
    /// failover handoff and after a non-retriable read error.
    fn rewind(&self);

    /// Cancel a pending `async_read_entries_or_wait` call that is blocked
    /// waiting for new entries, so the dispatcher can issue a differently
    /// sized read (e.g. after a permit or rate-limit change).
    fn cancel_pending_read_request(&self);

    /// Hint that this cursor's subscription currently has no connected
    /// consumer, allowing backlog-quota/eviction policy to treat it as
    /// inactive. Informational only; purely additive to the read path.
    fn set_active(&self, active: bool);

    /// The cursor's durable mark-delete position.
    fn mark_delete_position(&self) -> Position;
}
