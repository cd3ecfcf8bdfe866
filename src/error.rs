//! Crate-wide error taxonomy (spec §7).
//!
//! Built with `thiserror`, following the teacher's `data::error::DataError`
//! convention of a single enum that wraps lower-level, component-local
//! errors with `#[from]` so call sites can use `?` end to end.

use thiserror::Error;

use crate::ledger::LedgerError;

/// Errors surfaced across the publish, dispatch, and ack paths.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// CRC32C mismatch on a published payload; the message is never persisted.
    #[error("checksum mismatch for producer {producer}, seq {seq_id}")]
    ChecksumError { producer: String, seq_id: u64 },

    /// Transient failure from the managed log; the publisher should retry
    /// with the same `(producerName, seqId)` — dedup (C3) makes that safe.
    #[error("persistence error: {0}")]
    PersistenceError(String),

    /// The topic's log has been permanently terminated.
    #[error("topic terminated")]
    TopicTerminatedError,

    /// A second consumer tried to attach to an Exclusive subscription.
    #[error("subscription is exclusive and already has a consumer")]
    ConsumerBusy,

    /// The topic is being unloaded; subscribe/publish should be retried
    /// against the new owner.
    #[error("service unit not ready")]
    ServiceUnitNotReady,

    /// An administrator has fenced the subscription: no new appends or acks.
    #[error("subscription {0} is fenced")]
    SubscriptionFenced(String),

    /// Backlog-bounded consumer/topic limits from namespace policy (§6.5).
    #[error("topic consumer limit reached ({limit})")]
    TooManyConsumersOnTopic { limit: u32 },
    #[error("subscription consumer limit reached ({limit})")]
    TooManyConsumersOnSubscription { limit: u32 },

    /// Wraps a collaborator-surfaced error from the managed log (§6.1).
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Wire-layout decode failure (§6.3), surfaced by the compactor's
    /// poison-entry policy and the replicator's deserialization path.
    #[error("malformed entry payload: {0}")]
    Codec(String),
}

impl DispatchError {
    /// Whether the caller should retry with bounded exponential backoff
    /// (spec §7, "Local recovery").
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DispatchError::PersistenceError(_)
                | DispatchError::Ledger(LedgerError::TooManyRequests)
        )
    }
}
