//! Watermark backpressure with a throttled drain
//!
//! Owned by the writer thread of a channel. Queued bytes above the high
//! watermark make the channel unwritable; it stays unwritable until the queue
//! drops below the low watermark. While unwritable, the bytes released to the
//! socket are capped by a token bucket refilled at the throttle rate.

use std::time::Instant;

use log::debug;

use crate::channel::SharedCell;

/// Token bucket; capacity is one second of rate.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    rate: f64,
    tokens: f64,
    last: Instant,
}

impl RateLimiter {
    /// Starts empty.
    pub fn new(rate: usize, now: Instant) -> Self {
        Self {
            rate: rate as f64,
            tokens: 0.0,
            last: now,
        }
    }

    /// Empties the bucket and restarts the refill clock.
    pub fn reset(&mut self, now: Instant) {
        self.tokens = 0.0;
        self.last = now;
    }

    pub fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.rate);
        self.last = now;
    }

    /// Takes up to `want` tokens and returns how many were granted.
    pub fn take(&mut self, want: usize, now: Instant) -> usize {
        self.refill(now);
        let granted = (self.tokens.floor() as usize).min(want);
        self.tokens -= granted as f64;
        granted
    }
}

#[derive(Debug)]
pub struct Backpressure {
    high: usize,
    low: usize,
    writable: bool,
    limiter: RateLimiter,
}

impl Backpressure {
    pub fn new(high: usize, low: usize, rate: usize, now: Instant) -> Self {
        Self {
            high,
            low,
            writable: true,
            limiter: RateLimiter::new(rate, now),
        }
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Publishes `queued` and returns the new writability when it flipped.
    pub fn update(&mut self, queued: usize, shared: &SharedCell, now: Instant) -> Option<bool> {
        shared.set_queued(queued);
        let flipped = if self.writable && queued > self.high {
            self.writable = false;
            self.limiter.reset(now);
            true
        } else if !self.writable && queued < self.low {
            self.writable = true;
            true
        } else {
            false
        };
        if !flipped {
            return None;
        }
        debug!("queued {} bytes, writable={}", queued, self.writable);
        shared.set_writable(self.writable);
        Some(self.writable)
    }

    /// Bytes of a `want`-byte write that may go to the socket now.
    pub fn allowance(&mut self, want: usize, now: Instant) -> usize {
        if self.writable {
            want
        } else {
            self.limiter.take(want, now)
        }
    }

    /// Returns tokens granted by [`allowance`](Self::allowance) that the
    /// socket did not accept.
    pub fn refund(&mut self, unused: usize) {
        if !self.writable {
            self.limiter.tokens = (self.limiter.tokens + unused as f64).min(self.limiter.rate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_watermark_hysteresis() {
        let shared = SharedCell::new();
        let now = Instant::now();
        let mut bp = Backpressure::new(100, 50, 10, now);

        assert_eq!(bp.update(100, &shared, now), None);
        assert_eq!(bp.update(101, &shared, now), Some(false));
        assert!(!shared.is_writable());
        assert_eq!(shared.queued(), 101);

        // between the watermarks nothing changes
        assert_eq!(bp.update(75, &shared, now), None);
        assert_eq!(bp.update(50, &shared, now), None);
        assert_eq!(bp.update(49, &shared, now), Some(true));
        assert!(shared.is_writable());
        assert_eq!(bp.allowance(1_000_000, now), 1_000_000);
    }

    #[test]
    fn test_throttled_drain_respects_rate() {
        let shared = SharedCell::new();
        let start = Instant::now();
        let rate = 1000;
        let mut bp = Backpressure::new(10_000, 5_000, rate, start);
        let mut queued = 20_000;
        assert_eq!(bp.update(queued, &shared, start), Some(false));

        // a writer tick every 10ms for three seconds
        let mut flushed = 0;
        for tick in 1..=300u64 {
            let now = start + Duration::from_millis(tick * 10);
            let n = bp.allowance(queued, now);
            flushed += n;
            queued -= n;
            bp.update(queued, &shared, now);
            let elapsed = (tick * 10) as f64 / 1000.0;
            assert!(flushed as f64 <= elapsed * rate as f64 + 1.0, "tick {tick}: {flushed}");
        }
        assert!(flushed >= 2900, "{flushed}");
        assert!(!bp.is_writable());
    }

    #[test]
    fn test_bucket_capacity_is_one_second() {
        let start = Instant::now();
        let mut limiter = RateLimiter::new(500, start);
        assert_eq!(limiter.take(100, start), 0);
        let later = start + Duration::from_secs(10);
        assert_eq!(limiter.take(10_000, later), 500);
        assert_eq!(limiter.take(10_000, later), 0);
    }

    #[test]
    fn test_refund_only_while_throttled() {
        let shared = SharedCell::new();
        let start = Instant::now();
        let mut bp = Backpressure::new(10, 5, 100, start);
        bp.update(20, &shared, start);
        let t = start + Duration::from_millis(500);
        assert_eq!(bp.allowance(20, t), 20);
        bp.refund(15);
        assert_eq!(bp.allowance(100, t), 45);
    }
}
