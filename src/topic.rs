//! Topic and subscription composition: wires the managed ledger, dedup,
//! producers, and per-subscription dispatchers from every other module into
//! the unit a broker actually operates on (spec §3).

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::compaction::{CompactedView, CompactorSubscription};
use crate::config::BrokerConfig;
use crate::dedup::MessageDeduplication;
use crate::dispatch::{Dispatcher, DispatcherKind};
use crate::error::DispatchError;
use crate::ledger::ManagedLedger;
use crate::model::{SubType, TopicName};
use crate::producer::Producer;
use crate::rate_limit::RateLimiter;

/// One named subscription on a topic: its fixed dispatch semantics, its
/// dispatcher, and the fence flag administrators use to freeze it in place
/// (spec §4.4–§4.6, "SubscriptionFenced").
pub struct Subscription {
    pub name: String,
    pub sub_type: SubType,
    pub dispatcher: DispatcherKind,
}

impl Subscription {
    pub fn new(name: impl Into<String>, sub_type: SubType, dispatcher: DispatcherKind) -> Self {
        Self { name: name.into(), sub_type, dispatcher }
    }
}

/// A topic: its log, producers, subscriptions, and the ambient services
/// (dedup, rate limiting, compaction) shared across them.
pub struct Topic {
    pub name: TopicName,
    ledger: Arc<dyn ManagedLedger>,
    dedup: Arc<MessageDeduplication>,
    producers: DashMap<u64, Arc<Producer>>,
    subscriptions: DashMap<String, Arc<Subscription>>,
    rate_limiter: Arc<RateLimiter>,
    compacted_view: Arc<CompactedView>,
    compactor: CompactorSubscription,
    config: BrokerConfig,
}

impl Topic {
    pub fn new(name: TopicName, ledger: Arc<dyn ManagedLedger>, config: BrokerConfig) -> Self {
        let dedup = Arc::new(MessageDeduplication::new(
            config.dedup_enabled,
            config.snapshot_interval,
            config.producer_inactivity_timeout,
        ));
        let rate_limiter = Arc::new(RateLimiter::new(config.dispatch_rate_msg, config.dispatch_rate_byte));
        Self {
            name,
            ledger,
            dedup,
            producers: DashMap::new(),
            subscriptions: DashMap::new(),
            rate_limiter,
            compacted_view: Arc::new(CompactedView::new()),
            compactor: CompactorSubscription::new(
                crate::constants::DEFAULT_COMPACTION_PHASE_TWO_MAX_PENDING,
                config.max_read_batch_size,
            ),
            config,
        }
    }

    pub fn ledger(&self) -> &Arc<dyn ManagedLedger> {
        &self.ledger
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn compacted_view(&self) -> &Arc<CompactedView> {
        &self.compacted_view
    }

    /// Create (or fetch) a producer handle for `producer_name`, enrolling
    /// it in this topic's dedup state.
    pub fn get_or_create_producer(&self, producer_id: u64, producer_name: &str) -> Arc<Producer> {
        if let Some(existing) = self.producers.get(&producer_id) {
            return Arc::clone(&existing);
        }
        let producer = Arc::new(Producer::new(producer_id, producer_name, Arc::clone(&self.ledger), Arc::clone(&self.dedup)));
        self.producers.insert(producer_id, Arc::clone(&producer));
        producer
    }

    pub fn remove_producer(&self, producer_id: u64) {
        if let Some((_, producer)) = self.producers.remove(&producer_id) {
            producer.close();
        }
    }

    pub fn register_subscription(&self, subscription: Subscription) -> Arc<Subscription> {
        let subscription = Arc::new(subscription);
        self.subscriptions.insert(subscription.name.clone(), Arc::clone(&subscription));
        subscription
    }

    pub fn subscription(&self, name: &str) -> Option<Arc<Subscription>> {
        self.subscriptions.get(name).map(|s| Arc::clone(&s))
    }

    fn total_consumer_count(&self) -> u32 {
        self.subscriptions.iter().map(|s| s.dispatcher.consumer_count() as u32).sum()
    }

    /// Enforce `maxConsumersPerTopic`/`maxConsumersPerSubscription` (spec
    /// §6.5) before delegating to the subscription's dispatcher.
    pub async fn add_consumer(&self, subscription_name: &str, consumer: Arc<crate::consumer::FlowControlConsumer>) -> Result<(), DispatchError> {
        let subscription = self.subscription(subscription_name).ok_or(DispatchError::ServiceUnitNotReady)?;

        if self.config.max_consumers_per_topic > 0 && self.total_consumer_count() >= self.config.max_consumers_per_topic {
            warn!(topic = %self.name, limit = self.config.max_consumers_per_topic, "rejecting consumer: topic limit reached");
            return Err(DispatchError::TooManyConsumersOnTopic { limit: self.config.max_consumers_per_topic });
        }
        if self.config.max_consumers_per_subscription > 0
            && subscription.dispatcher.consumer_count() as u32 >= self.config.max_consumers_per_subscription
        {
            warn!(
                topic = %self.name,
                subscription = subscription_name,
                limit = self.config.max_consumers_per_subscription,
                "rejecting consumer: subscription limit reached"
            );
            return Err(DispatchError::TooManyConsumersOnSubscription { limit: self.config.max_consumers_per_subscription });
        }

        debug!(topic = %self.name, subscription = subscription_name, consumer_id = consumer.id, "consumer attached");
        subscription.dispatcher.add_consumer(consumer).await
    }

    /// Run one compaction pass, swapping the newly built ledger into the
    /// `readCompacted` view on success (spec §4.7, §4.8).
    pub async fn compact(&self, fresh_sink: Arc<dyn ManagedLedger>) -> Result<crate::compaction::CompactionResult, DispatchError> {
        let result = self.compactor.run(self.ledger.as_ref(), fresh_sink, &self.compacted_view).await?;
        debug!(
            topic = %self.name,
            retained = result.entries_retained,
            scanned = result.entries_scanned,
            "compaction run completed"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerConfig;
    use crate::connection::ChannelConnection;
    use crate::consumer::FlowControlConsumer;
    use crate::dispatch::SingleActiveDispatcher;
    use crate::ledger::memory::InMemoryLedger;
    use std::time::Duration;

    fn topic_with_limits(max_per_topic: u32, max_per_sub: u32) -> Topic {
        let mut config = BrokerConfig::default();
        config.max_consumers_per_topic = max_per_topic;
        config.max_consumers_per_subscription = max_per_sub;
        let ledger = Arc::new(InMemoryLedger::new(0));
        Topic::new(TopicName::new("t", "ns", "topic", true), ledger, config)
    }

    async fn register_exclusive_sub(topic: &Topic, name: &str) {
        let cursor = topic.ledger().open_cursor(name, None).await.unwrap();
        let dispatcher = SingleActiveDispatcher::new(
            SubType::Exclusive,
            cursor,
            Duration::from_millis(0),
            10,
            Arc::clone(topic.rate_limiter()),
            Duration::from_millis(10),
            Duration::from_secs(1),
        );
        topic.register_subscription(Subscription::new(name, SubType::Exclusive, DispatcherKind::SingleActive(dispatcher)));
    }

    #[tokio::test]
    async fn enforces_max_consumers_per_subscription() {
        let topic = topic_with_limits(100, 1);
        register_exclusive_sub(&topic, "sub").await;

        let (conn, _rx) = ChannelConnection::new(8);
        let c1 = Arc::new(FlowControlConsumer::new(1, Arc::new(conn), 0, false));
        topic.add_consumer("sub", c1).await.unwrap();

        let (conn2, _rx2) = ChannelConnection::new(8);
        let c2 = Arc::new(FlowControlConsumer::new(2, Arc::new(conn2), 0, false));
        let result = topic.add_consumer("sub", c2).await;
        assert!(matches!(result, Err(DispatchError::TooManyConsumersOnSubscription { .. })));
    }

    #[tokio::test]
    async fn producers_are_reused_by_id() {
        let topic = topic_with_limits(0, 0);
        let p1 = topic.get_or_create_producer(1, "p1");
        let p2 = topic.get_or_create_producer(1, "p1");
        assert!(Arc::ptr_eq(&p1, &p2));
    }
}
