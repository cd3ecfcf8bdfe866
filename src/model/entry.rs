//! Positioned log entries (spec §3, "Entry" / "Batch Entry").

use super::metadata::{MessageMetadata, SubMessageMetadata};
use super::position::Position;

/// One sub-message inside a batch entry.
#[derive(Debug, Clone, PartialEq)]
pub struct SubMessage {
    pub metadata: SubMessageMetadata,
    pub payload: Vec<u8>,
}

/// Either a single message or a batch of sub-messages sharing one entry.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryPayload {
    Single(Vec<u8>),
    Batch(Vec<SubMessage>),
}

/// A message (or batch of messages) positioned on the log.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub position: Position,
    pub metadata: MessageMetadata,
    pub payload: EntryPayload,
}

impl Entry {
    pub fn single(position: Position, metadata: MessageMetadata, payload: Vec<u8>) -> Self {
        debug_assert_eq!(metadata.num_messages_in_batch, 1);
        Self { position, metadata, payload: EntryPayload::Single(payload) }
    }

    pub fn batch(position: Position, metadata: MessageMetadata, messages: Vec<SubMessage>) -> Self {
        debug_assert_eq!(metadata.num_messages_in_batch as usize, messages.len());
        Self { position, metadata, payload: EntryPayload::Batch(messages) }
    }

    /// Number of logical messages carried by this entry — the unit flow
    /// control (C1) and permits are counted in.
    pub fn batch_size(&self) -> u32 {
        self.metadata.num_messages_in_batch.max(1)
    }

    pub fn is_batch(&self) -> bool {
        matches!(self.payload, EntryPayload::Batch(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_size_reflects_metadata() {
        let mut meta = MessageMetadata::new("p1", 1, 0);
        meta.num_messages_in_batch = 3;
        let entry = Entry::batch(
            Position::new(1, 1),
            meta,
            vec![
                SubMessage { metadata: Default::default(), payload: vec![1] },
                SubMessage { metadata: Default::default(), payload: vec![2] },
                SubMessage { metadata: Default::default(), payload: vec![3] },
            ],
        );
        assert_eq!(entry.batch_size(), 3);
        assert!(entry.is_batch());
    }
}
