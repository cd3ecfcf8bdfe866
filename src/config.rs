//! Broker-wide and per-namespace tunables (spec §6.5).
//!
//! Follows the teacher's `core::config` convention: a `Default` impl that
//! reads environment variables with parse fallbacks, `serde` round-tripping
//! for a JSON config file, and `Clone` so each topic can hold a resolved
//! copy merged with any namespace-level override.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::*;

/// Broker-wide defaults for every tunable named in spec §6.5.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BrokerConfig {
    pub max_unacked_per_consumer: u32,
    pub max_unacked_per_subscription: u32,

    pub snapshot_interval: u32,
    pub max_producers_in_snapshot: usize,
    pub producer_inactivity_timeout: Duration,

    pub active_consumer_failover_delay_ms: u64,

    pub max_read_batch_size: u32,
    pub max_round_robin_batch_size: u32,

    pub read_failure_backoff_initial_ms: u64,
    pub read_failure_backoff_max_ms: u64,

    pub dispatch_rate_msg: u64,
    pub dispatch_rate_byte: u64,
    pub throttle_on_non_backlog: bool,

    pub replicator_queue_size: usize,
    pub replicator_queue_threshold_pct: f64,

    pub max_consumers_per_topic: u32,
    pub max_consumers_per_subscription: u32,

    pub read_compacted: bool,

    /// Whether producer-side dedup (C3) is enabled for this broker/namespace.
    pub dedup_enabled: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_unacked_per_consumer: env_u32(
                ENV_MAX_UNACKED_PER_CONSUMER,
                DEFAULT_MAX_UNACKED_PER_CONSUMER,
            ),
            max_unacked_per_subscription: env_u32(
                ENV_MAX_UNACKED_PER_SUBSCRIPTION,
                DEFAULT_MAX_UNACKED_PER_SUBSCRIPTION,
            ),
            snapshot_interval: env_u32(ENV_SNAPSHOT_INTERVAL, DEFAULT_SNAPSHOT_INTERVAL),
            max_producers_in_snapshot: env_usize(
                ENV_MAX_PRODUCERS_IN_SNAPSHOT,
                DEFAULT_MAX_PRODUCERS_IN_SNAPSHOT,
            ),
            producer_inactivity_timeout: Duration::from_secs(env_u64(
                ENV_PRODUCER_INACTIVITY_TIMEOUT_SECS,
                DEFAULT_PRODUCER_INACTIVITY_TIMEOUT_SECS,
            )),
            active_consumer_failover_delay_ms: env_u64(
                ENV_ACTIVE_CONSUMER_FAILOVER_DELAY_MS,
                DEFAULT_ACTIVE_CONSUMER_FAILOVER_DELAY_MS,
            ),
            max_read_batch_size: env_u32(ENV_MAX_READ_BATCH_SIZE, DEFAULT_MAX_READ_BATCH_SIZE),
            max_round_robin_batch_size: env_u32(
                ENV_MAX_ROUND_ROBIN_BATCH_SIZE,
                DEFAULT_MAX_ROUND_ROBIN_BATCH_SIZE,
            ),
            read_failure_backoff_initial_ms: env_u64(
                ENV_READ_FAILURE_BACKOFF_INITIAL_MS,
                DEFAULT_READ_FAILURE_BACKOFF_INITIAL_MS,
            ),
            read_failure_backoff_max_ms: env_u64(
                ENV_READ_FAILURE_BACKOFF_MAX_MS,
                DEFAULT_READ_FAILURE_BACKOFF_MAX_MS,
            ),
            dispatch_rate_msg: env_u64(ENV_DISPATCH_RATE_MSG, DEFAULT_DISPATCH_RATE_MSG),
            dispatch_rate_byte: env_u64(ENV_DISPATCH_RATE_BYTE, DEFAULT_DISPATCH_RATE_BYTE),
            throttle_on_non_backlog: env_bool(
                ENV_THROTTLE_ON_NON_BACKLOG,
                DEFAULT_THROTTLE_ON_NON_BACKLOG,
            ),
            replicator_queue_size: env_usize(
                ENV_REPLICATOR_QUEUE_SIZE,
                DEFAULT_REPLICATOR_QUEUE_SIZE,
            ),
            replicator_queue_threshold_pct: env_f64(
                ENV_REPLICATOR_QUEUE_THRESHOLD_PCT,
                DEFAULT_REPLICATOR_QUEUE_THRESHOLD_PCT,
            ),
            max_consumers_per_topic: env_u32(
                ENV_MAX_CONSUMERS_PER_TOPIC,
                DEFAULT_MAX_CONSUMERS_PER_TOPIC,
            ),
            max_consumers_per_subscription: env_u32(
                ENV_MAX_CONSUMERS_PER_SUBSCRIPTION,
                DEFAULT_MAX_CONSUMERS_PER_SUBSCRIPTION,
            ),
            read_compacted: false,
            dedup_enabled: env_bool(ENV_DEDUP_ENABLED, DEFAULT_DEDUP_ENABLED),
        }
    }
}

impl BrokerConfig {
    /// Merge a namespace-level override on top of these broker defaults.
    /// Only fields set in `policies` replace the broker value — mirrors
    /// dedup's "namespace override, else broker default" rule (C3).
    pub fn with_namespace_override(&self, policies: &TopicPolicies) -> Self {
        let mut merged = self.clone();
        if let Some(v) = policies.max_unacked_per_consumer {
            merged.max_unacked_per_consumer = v;
        }
        if let Some(v) = policies.max_unacked_per_subscription {
            merged.max_unacked_per_subscription = v;
        }
        if let Some(v) = policies.dedup_enabled {
            merged.dedup_enabled = v;
        }
        if let Some(v) = policies.max_consumers_per_topic {
            merged.max_consumers_per_topic = v;
        }
        if let Some(v) = policies.max_consumers_per_subscription {
            merged.max_consumers_per_subscription = v;
        }
        merged
    }
}

/// Sparse namespace-level override of [`BrokerConfig`]. `None` fields fall
/// through to the broker default.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct TopicPolicies {
    pub max_unacked_per_consumer: Option<u32>,
    pub max_unacked_per_subscription: Option<u32>,
    pub dedup_enabled: Option<bool>,
    pub max_consumers_per_topic: Option<u32>,
    pub max_consumers_per_subscription: Option<u32>,
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_constants() {
        let cfg = BrokerConfig::default();
        assert_eq!(cfg.max_read_batch_size, DEFAULT_MAX_READ_BATCH_SIZE);
        assert_eq!(cfg.max_round_robin_batch_size, DEFAULT_MAX_ROUND_ROBIN_BATCH_SIZE);
        assert_eq!(cfg.replicator_queue_threshold_pct, DEFAULT_REPLICATOR_QUEUE_THRESHOLD_PCT);
    }

    #[test]
    fn namespace_override_only_touches_set_fields() {
        let base = BrokerConfig::default();
        let policies = TopicPolicies {
            max_unacked_per_consumer: Some(50),
            ..Default::default()
        };
        let merged = base.with_namespace_override(&policies);
        assert_eq!(merged.max_unacked_per_consumer, 50);
        assert_eq!(merged.max_read_batch_size, base.max_read_batch_size);
    }
}
