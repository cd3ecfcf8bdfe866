//! Core data model: positions, metadata, entries, and topic identity
//! (spec §3).

mod entry;
mod metadata;
mod position;
mod topic;

pub use entry::{Entry, EntryPayload, SubMessage};
pub use metadata::{MessageMetadata, SubMessageMetadata, REPLICATOR_PRODUCER_PREFIX};
pub use position::{MessageId, Position};
pub use topic::{SubType, TopicName};
