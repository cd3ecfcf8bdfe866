//! Message metadata (spec §3, "Message Metadata").

use serde::{Deserialize, Serialize};

/// Prefix used by a replicator producer's name, so dedup admission (C3) can
/// recognize a replicated publish and key off the original producer instead.
pub const REPLICATOR_PRODUCER_PREFIX: &str = "pulsar.repl.";

/// Per-entry metadata, shared by single messages and whole batch entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    pub producer_name: String,
    pub sequence_id: u64,
    pub publish_time_millis: u64,
    pub num_messages_in_batch: u32,
    pub replicate_to: Option<Vec<String>>,
    pub replicated_from: Option<String>,
    pub partition_key: Option<String>,
    /// When replaying a replicated publish, the embedded original identity
    /// dedup admission should key off instead of `producer_name`/`sequence_id`.
    pub original_producer_name: Option<String>,
    pub original_sequence_id: Option<u64>,
}

impl MessageMetadata {
    pub fn new(producer_name: impl Into<String>, sequence_id: u64, publish_time_millis: u64) -> Self {
        Self {
            producer_name: producer_name.into(),
            sequence_id,
            publish_time_millis,
            num_messages_in_batch: 1,
            replicate_to: None,
            replicated_from: None,
            partition_key: None,
            original_producer_name: None,
            original_sequence_id: None,
        }
    }

    pub fn is_replicated(&self) -> bool {
        self.replicated_from.is_some() || self.producer_name.starts_with(REPLICATOR_PRODUCER_PREFIX)
    }

    /// The `(producer, sequence)` pair dedup admission should use: the
    /// embedded original identity for a replicated publish, else the
    /// metadata's own fields (spec §4.3, "Admission").
    pub fn dedup_identity(&self) -> (&str, u64) {
        match (&self.original_producer_name, self.original_sequence_id) {
            (Some(producer), Some(seq)) => (producer.as_str(), seq),
            _ => (self.producer_name.as_str(), self.sequence_id),
        }
    }
}

/// Per-sub-message metadata inside a batch entry.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SubMessageMetadata {
    pub partition_key: Option<String>,
    pub compacted_out: bool,
}
