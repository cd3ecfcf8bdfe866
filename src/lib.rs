//! Broker-side topic dispatch core: the part of a Pulsar-style broker that
//! decides, for one topic, how published messages are admitted (C2/C3),
//! tracked (C1), fanned out to subscribed consumers (C4/C5/C6), compacted
//! (C7/C8), and rate-limited (C9).
//!
//! This crate models its two external collaborators — the managed log
//! ([`ledger`]) and the per-client connection ([`connection`]) — as traits,
//! backed here by in-memory implementations suitable for tests and the
//! [`dispatchd`](../bin/dispatchd.rs) demo binary. A production deployment
//! substitutes real implementations of both without touching the dispatch
//! logic itself.

pub mod backoff;
pub mod cli;
pub mod compaction;
pub mod config;
pub mod connection;
pub mod consumer;
pub mod constants;
pub mod dedup;
pub mod dispatch;
pub mod error;
pub mod ledger;
pub mod model;
pub mod producer;
pub mod rate_limit;
pub mod topic;
pub mod wire;

pub use error::DispatchError;
pub use topic::{Subscription, Topic};
