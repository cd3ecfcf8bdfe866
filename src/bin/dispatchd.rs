use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use dispatch_core::cli::{Cli, Commands};
use dispatch_core::config::BrokerConfig;
use dispatch_core::connection::ChannelConnection;
use dispatch_core::consumer::FlowControlConsumer;
use dispatch_core::dispatch::{Dispatcher, DispatcherKind, SingleActiveDispatcher};
use dispatch_core::ledger::memory::InMemoryLedger;
use dispatch_core::ledger::ManagedLedger;
use dispatch_core::model::{MessageMetadata, SubType, TopicName};
use dispatch_core::rate_limit::RateLimiter;
use dispatch_core::topic::{Subscription, Topic};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log);

    match cli.command {
        Commands::Run { messages } => run_demo(messages).await,
    }
}

fn init_logging(filter: &str) {
    tracing_subscriber::fmt().with_target(false).with_thread_ids(false).with_ansi(true).compact().with_env_filter(filter.to_string()).init();
}

async fn run_demo(message_count: u64) {
    let config = BrokerConfig::default();
    let name = TopicName::new("public", "default", "demo-topic", true);
    let ledger = Arc::new(InMemoryLedger::new(0));
    let topic = Topic::new(name, Arc::clone(&ledger) as Arc<dyn ManagedLedger>, config.clone());

    let producer = topic.get_or_create_producer(1, "demo-producer");
    for seq in 0..message_count {
        let payload = format!("message-{seq}").into_bytes();
        let checksum = crc32c::crc32c(&payload);
        match producer.publish(seq, seq, checksum, payload).await {
            Ok(receipt) => tracing::info!(sequence_id = receipt.sequence_id, message_id = %receipt.message_id, "published"),
            Err(e) => tracing::warn!(error = %e, "publish failed"),
        }
    }

    let cursor = ledger.open_cursor("demo-sub", None).await.expect("opening a cursor on a fresh ledger cannot fail");
    let dispatcher = SingleActiveDispatcher::new(
        SubType::Exclusive,
        cursor,
        Duration::from_millis(config.active_consumer_failover_delay_ms),
        config.max_read_batch_size,
        Arc::new(RateLimiter::new(config.dispatch_rate_msg, config.dispatch_rate_byte)),
        Duration::from_millis(config.read_failure_backoff_initial_ms),
        Duration::from_millis(config.read_failure_backoff_max_ms),
    );
    let subscription = topic.register_subscription(Subscription::new("demo-sub", SubType::Exclusive, DispatcherKind::SingleActive(dispatcher)));

    let (connection, mut outbound) = ChannelConnection::new(64);
    let consumer = Arc::new(FlowControlConsumer::new(1, Arc::new(connection), config.max_unacked_per_consumer, false));
    consumer.grant_permits(message_count as u32);
    subscription.dispatcher.add_consumer(consumer).await.expect("exclusive subscription has no prior consumer");

    let delivered = match &subscription.dispatcher {
        DispatcherKind::SingleActive(d) => d.run_once().await.expect("demo dispatch cycle"),
        _ => unreachable!(),
    };
    tracing::info!(delivered, "dispatch cycle complete");

    while let Ok(frame) = outbound.try_recv() {
        tracing::info!(?frame, "delivered to consumer");
    }
}
