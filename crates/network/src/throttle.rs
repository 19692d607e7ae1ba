// crates/network/src/throttle.rs
//! Token bucket for bandwidth budgeting

use std::time::{Duration, Instant};

/// Bucket holding up to one second of bandwidth budget, refilled continuously
#[derive(Debug)]
pub(crate) struct TokenBucket {
    capacity: u64,
    tokens: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub(crate) fn new(bytes_per_second: u64) -> Self {
        Self {
            capacity: bytes_per_second,
            tokens: bytes_per_second as f64,
            refill_rate: bytes_per_second as f64,
            last_refill: Instant::now(),
        }
    }

    pub(crate) fn capacity(&self) -> u64 {
        self.capacity
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();

        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity as f64);
        self.last_refill = now;
    }

    /// Takes `bytes` from the bucket, or returns how long until they are available
    pub(crate) fn consume(&mut self, bytes: u64) -> Result<(), Duration> {
        self.refill();

        if self.tokens >= bytes as f64 {
            self.tokens -= bytes as f64;
            Ok(())
        } else if self.refill_rate <= 0.0 {
            Err(Duration::MAX)
        } else {
            let tokens_needed = bytes as f64 - self.tokens;
            Err(Duration::from_secs_f64(tokens_needed / self.refill_rate))
        }
    }

    /// Bytes consumed and not yet replenished
    pub(crate) fn usage(&mut self) -> f64 {
        self.refill();
        (self.capacity as f64 - self.tokens).max(0.0)
    }

    pub(crate) fn update_rate(&mut self, bytes_per_second: u64) {
        self.refill();
        self.capacity = bytes_per_second;
        self.refill_rate = bytes_per_second as f64;
        self.tokens = self.tokens.min(self.capacity as f64);
    }
}
