//! Named defaults and environment variable keys for [`crate::config::BrokerConfig`].
//!
//! Mirrors the teacher's `core::constants` module: every tunable gets a
//! `DEFAULT_*` constant and, where it can be overridden from the process
//! environment, an `ENV_*` constant naming the variable.

// =============================================================================
// Application identity
// =============================================================================

pub const APP_NAME: &str = "dispatchd";

/// Environment variable for the tracing filter directive.
pub const ENV_LOG: &str = "DISPATCH_LOG";

// =============================================================================
// Flow control (C1) / dispatcher-level backpressure (C5)
// =============================================================================

/// `maxUnackedPerConsumer`: 0 disables per-consumer blocking.
pub const DEFAULT_MAX_UNACKED_PER_CONSUMER: u32 = 0;
pub const ENV_MAX_UNACKED_PER_CONSUMER: &str = "DISPATCH_MAX_UNACKED_PER_CONSUMER";

/// `maxUnackedPerSubscription`: 0 disables dispatcher-level blocking.
pub const DEFAULT_MAX_UNACKED_PER_SUBSCRIPTION: u32 = 0;
pub const ENV_MAX_UNACKED_PER_SUBSCRIPTION: &str = "DISPATCH_MAX_UNACKED_PER_SUBSCRIPTION";

// =============================================================================
// Dedup (C3)
// =============================================================================

pub const DEFAULT_SNAPSHOT_INTERVAL: u32 = 1000;
pub const ENV_SNAPSHOT_INTERVAL: &str = "DISPATCH_SNAPSHOT_INTERVAL";

pub const DEFAULT_MAX_PRODUCERS_IN_SNAPSHOT: usize = 10_000;
pub const ENV_MAX_PRODUCERS_IN_SNAPSHOT: &str = "DISPATCH_MAX_PRODUCERS_IN_SNAPSHOT";

/// `producerInactivityTimeout`, seconds.
pub const DEFAULT_PRODUCER_INACTIVITY_TIMEOUT_SECS: u64 = 6 * 3600;
pub const ENV_PRODUCER_INACTIVITY_TIMEOUT_SECS: &str = "DISPATCH_PRODUCER_INACTIVITY_TIMEOUT_SECS";

pub const DEFAULT_DEDUP_ENABLED: bool = false;
pub const ENV_DEDUP_ENABLED: &str = "DISPATCH_DEDUP_ENABLED";

// =============================================================================
// Single-active dispatcher (C4)
// =============================================================================

pub const DEFAULT_ACTIVE_CONSUMER_FAILOVER_DELAY_MS: u64 = 1000;
pub const ENV_ACTIVE_CONSUMER_FAILOVER_DELAY_MS: &str = "DISPATCH_FAILOVER_DELAY_MS";

// =============================================================================
// Read batching, shared across C4/C5/C6
// =============================================================================

pub const DEFAULT_MAX_READ_BATCH_SIZE: u32 = 100;
pub const ENV_MAX_READ_BATCH_SIZE: &str = "DISPATCH_MAX_READ_BATCH_SIZE";

pub const DEFAULT_MAX_ROUND_ROBIN_BATCH_SIZE: u32 = 20;
pub const ENV_MAX_ROUND_ROBIN_BATCH_SIZE: &str = "DISPATCH_MAX_ROUND_ROBIN_BATCH_SIZE";

// =============================================================================
// Backoff (C9)
// =============================================================================

pub const DEFAULT_READ_FAILURE_BACKOFF_INITIAL_MS: u64 = 1000;
pub const ENV_READ_FAILURE_BACKOFF_INITIAL_MS: &str = "DISPATCH_BACKOFF_INITIAL_MS";

pub const DEFAULT_READ_FAILURE_BACKOFF_MAX_MS: u64 = 60_000;
pub const ENV_READ_FAILURE_BACKOFF_MAX_MS: &str = "DISPATCH_BACKOFF_MAX_MS";

/// Reschedule delay used by the shared dispatcher when the message-rate
/// limiter has no permit left (spec §4.5, "Rate limiting").
pub const MESSAGE_RATE_BACKOFF_MS: u64 = 50;

// =============================================================================
// Rate limiting (C9)
// =============================================================================

/// 0 disables the message-rate dimension of the limiter.
pub const DEFAULT_DISPATCH_RATE_MSG: u64 = 0;
pub const ENV_DISPATCH_RATE_MSG: &str = "DISPATCH_RATE_MSG";

pub const DEFAULT_DISPATCH_RATE_BYTE: u64 = 0;
pub const ENV_DISPATCH_RATE_BYTE: &str = "DISPATCH_RATE_BYTE";

pub const DEFAULT_THROTTLE_ON_NON_BACKLOG: bool = false;
pub const ENV_THROTTLE_ON_NON_BACKLOG: &str = "DISPATCH_THROTTLE_ON_NON_BACKLOG";

// =============================================================================
// Replicator (C6)
// =============================================================================

pub const DEFAULT_REPLICATOR_QUEUE_SIZE: usize = 1000;
pub const ENV_REPLICATOR_QUEUE_SIZE: &str = "DISPATCH_REPLICATOR_QUEUE_SIZE";

pub const DEFAULT_REPLICATOR_QUEUE_THRESHOLD_PCT: f64 = 0.9;
pub const ENV_REPLICATOR_QUEUE_THRESHOLD_PCT: &str = "DISPATCH_REPLICATOR_QUEUE_THRESHOLD_PCT";

// =============================================================================
// Namespace policy
// =============================================================================

/// 0 disables the per-topic consumer limit.
pub const DEFAULT_MAX_CONSUMERS_PER_TOPIC: u32 = 0;
pub const ENV_MAX_CONSUMERS_PER_TOPIC: &str = "DISPATCH_MAX_CONSUMERS_PER_TOPIC";

pub const DEFAULT_MAX_CONSUMERS_PER_SUBSCRIPTION: u32 = 0;
pub const ENV_MAX_CONSUMERS_PER_SUBSCRIPTION: &str = "DISPATCH_MAX_CONSUMERS_PER_SUBSCRIPTION";

// =============================================================================
// Compaction (C7)
// =============================================================================

/// Bound on outstanding appends to the fresh ledger during phase 2.
pub const DEFAULT_COMPACTION_PHASE_TWO_MAX_PENDING: usize = 500;

/// Reserved subscription name for the compactor's cursor (C8).
pub const COMPACTOR_SUBSCRIPTION_NAME: &str = "__compaction";

/// Reserved subscription name for the dedup cursor (C3).
pub const DEDUP_CURSOR_NAME: &str = "__dedup";

/// Cursor property key the compactor subscription stores its pointer under.
pub const COMPACTED_TOPIC_LEDGER_PROPERTY: &str = "CompactedTopicLedger";
