//! src/session/rate_limit.rs
//!
//! Per-session token bucket rate limiter. A fixed number of points refill
//! over a rolling window; exceeding it drops the offending envelope without
//! closing the session, per §4.3.

use crate::domain::now_ms;

pub struct TokenBucket {
    capacity: u32,
    window_ms: u64,
    tokens: f64,
    last_refill_ms: u64,
}

impl TokenBucket {
    pub fn new(capacity: u32, window_ms: u64) -> Self {
        Self {
            capacity,
            window_ms,
            tokens: capacity as f64,
            last_refill_ms: now_ms(),
        }
    }

    fn refill(&mut self) {
        let now = now_ms();
        let elapsed = now.saturating_sub(self.last_refill_ms);
        if elapsed == 0 {
            return;
        }
        let refill_rate = self.capacity as f64 / self.window_ms as f64;
        self.tokens = (self.tokens + elapsed as f64 * refill_rate).min(self.capacity as f64);
        self.last_refill_ms = now;
    }

    /// Attempts to consume one point. Returns `true` if allowed.
    pub fn try_consume(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
