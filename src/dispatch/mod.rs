//! Dispatchers (spec §4.4–§4.6): the component that decides, for one
//! subscription, which connected consumer(s) receive the next entries read
//! off the cursor.
//!
//! Each concrete dispatcher exposes a test-friendly `run_once`, which
//! performs at most one read-and-dispatch cycle and returns how many
//! entries it delivered. A long-running broker drives this in a loop with
//! [`crate::backoff::Backoff`] between retriable failures; [`run_once`]
//! itself never sleeps, which keeps it deterministic under test.

pub mod replicator;
pub mod shared;
pub mod single_active;

use std::sync::Arc;

use async_trait::async_trait;

use crate::consumer::FlowControlConsumer;
use crate::error::DispatchError;
use crate::model::MessageId;

pub use replicator::ReplicatedCursorDispatcher;
pub use shared::SharedDispatcher;
pub use single_active::SingleActiveDispatcher;

/// Operations every dispatcher kind supports, regardless of its internal
/// fan-out strategy.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn add_consumer(&self, consumer: Arc<FlowControlConsumer>) -> Result<(), DispatchError>;
    fn remove_consumer(&self, consumer_id: u64);
    fn consumer_flow(&self, consumer_id: u64, permits: u32);
    async fn redeliver(&self, consumer_id: u64, message_ids: Vec<MessageId>) -> Result<(), DispatchError>;
    fn consumer_count(&self) -> usize;
}

/// One subscription's dispatcher, tagged by the dispatch strategy its
/// `SubType` selects (spec §3, §4.4–§4.6).
pub enum DispatcherKind {
    SingleActive(SingleActiveDispatcher),
    Shared(SharedDispatcher),
    Replicator(ReplicatedCursorDispatcher),
}

#[async_trait]
impl Dispatcher for DispatcherKind {
    async fn add_consumer(&self, consumer: Arc<FlowControlConsumer>) -> Result<(), DispatchError> {
        match self {
            DispatcherKind::SingleActive(d) => d.add_consumer(consumer).await,
            DispatcherKind::Shared(d) => d.add_consumer(consumer).await,
            DispatcherKind::Replicator(d) => d.add_consumer(consumer).await,
        }
    }

    fn remove_consumer(&self, consumer_id: u64) {
        match self {
            DispatcherKind::SingleActive(d) => d.remove_consumer(consumer_id),
            DispatcherKind::Shared(d) => d.remove_consumer(consumer_id),
            DispatcherKind::Replicator(d) => d.remove_consumer(consumer_id),
        }
    }

    fn consumer_flow(&self, consumer_id: u64, permits: u32) {
        match self {
            DispatcherKind::SingleActive(d) => d.consumer_flow(consumer_id, permits),
            DispatcherKind::Shared(d) => d.consumer_flow(consumer_id, permits),
            DispatcherKind::Replicator(d) => d.consumer_flow(consumer_id, permits),
        }
    }

    async fn redeliver(&self, consumer_id: u64, message_ids: Vec<MessageId>) -> Result<(), DispatchError> {
        match self {
            DispatcherKind::SingleActive(d) => d.redeliver(consumer_id, message_ids).await,
            DispatcherKind::Shared(d) => d.redeliver(consumer_id, message_ids).await,
            DispatcherKind::Replicator(d) => d.redeliver(consumer_id, message_ids).await,
        }
    }

    fn consumer_count(&self) -> usize {
        match self {
            DispatcherKind::SingleActive(d) => d.consumer_count(),
            DispatcherKind::Shared(d) => d.consumer_count(),
            DispatcherKind::Replicator(d) => d.consumer_count(),
        }
    }
}
