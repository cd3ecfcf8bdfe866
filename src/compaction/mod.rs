//! Topic compaction (spec §4.7, §4.8): the two-phase [`Compactor`] and the
//! [`CompactorSubscription`]/[`CompactedView`] pair that let a
//! `readCompacted` consumer see the compacted view instead of the raw
//! backlog up to the compaction horizon.

pub mod compactor;
pub mod subscription;

pub use compactor::{CompactionResult, Compactor};
pub use subscription::{CompactedView, CompactorSubscription};
