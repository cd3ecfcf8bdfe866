//! Per-topic token-bucket rate limiter (C9).
//!
//! Two independent dimensions — messages/s and bytes/s — each a classic
//! token bucket with a one-second burst capacity, refilled lazily on
//! access rather than by a background tick. A rate of `0` disables that
//! dimension entirely (unlimited), matching the `0 disables` convention
//! used throughout spec §6.5.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// A single token-bucket dimension. `None` rate means unlimited.
#[derive(Debug)]
struct Bucket {
    rate_per_sec: f64,
    capacity: f64,
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(rate_per_sec: u64) -> Option<Self> {
        if rate_per_sec == 0 {
            return None;
        }
        let rate_per_sec = rate_per_sec as f64;
        Some(Self {
            rate_per_sec,
            capacity: rate_per_sec,
            tokens: rate_per_sec,
            last_refill: Instant::now(),
        })
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    fn available(&mut self) -> u64 {
        self.refill();
        self.tokens.floor().max(0.0) as u64
    }

    /// Deduct `n` tokens, never going below zero. Returns whether the
    /// bucket actually had `n` tokens available before the deduction.
    fn consume(&mut self, n: u64) -> bool {
        self.refill();
        let had_enough = self.tokens >= n as f64;
        self.tokens = (self.tokens - n as f64).max(0.0);
        had_enough
    }
}

/// Token-bucket rate limiter shared by one topic's dispatcher(s).
pub struct RateLimiter {
    msg: Mutex<Option<Bucket>>,
    byte: Mutex<Option<Bucket>>,
}

impl RateLimiter {
    pub fn new(msg_rate_per_sec: u64, byte_rate_per_sec: u64) -> Self {
        Self {
            msg: Mutex::new(Bucket::new(msg_rate_per_sec)),
            byte: Mutex::new(Bucket::new(byte_rate_per_sec)),
        }
    }

    pub fn disabled() -> Self {
        Self::new(0, 0)
    }

    /// Whether any message-rate permit is currently available. Disabled
    /// dimensions always report a permit.
    pub fn has_permit(&self) -> bool {
        match self.msg.lock().as_mut() {
            Some(bucket) => bucket.available() > 0,
            None => true,
        }
    }

    /// Cap a requested read batch size by the message-rate permit
    /// currently available. Disabled dimension leaves `requested` untouched.
    pub fn cap_messages_to_read(&self, requested: u32) -> u32 {
        match self.msg.lock().as_mut() {
            Some(bucket) => requested.min(bucket.available().min(u32::MAX as u64) as u32),
            None => requested,
        }
    }

    /// Record that `msgs` messages totalling `bytes` were sent, debiting
    /// both dimensions. Always called after the send, regardless of
    /// whether a permit was actually available (can't un-send a message).
    pub fn record_sent(&self, msgs: u64, bytes: u64) {
        if let Some(bucket) = self.msg.lock().as_mut() {
            bucket.consume(msgs);
        }
        if let Some(bucket) = self.byte.lock().as_mut() {
            bucket.consume(bytes);
        }
    }
}

/// Reschedule delay used when [`RateLimiter::has_permit`] is false
/// (spec §4.5).
pub const MESSAGE_RATE_BACKOFF: Duration =
    Duration::from_millis(crate::constants::MESSAGE_RATE_BACKOFF_MS);
