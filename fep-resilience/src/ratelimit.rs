//! Per-route rate limiters (spec §4.6 "Rate limiter").

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use fep_config::{RateLimiterAlgorithm, RateLimiterConfig};

/// Raised when an acquire is rejected; the contract never offers a
/// blocking wait (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimited;

impl std::fmt::Display for RateLimited {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rate limit exceeded")
    }
}

impl std::error::Error for RateLimited {}

pub trait RateLimiter: Send + Sync {
    /// Non-blocking acquire; `true` if permitted.
    fn try_acquire(&self) -> bool;
}

pub fn build(config: &RateLimiterConfig) -> Arc<dyn RateLimiter> {
    match config.algorithm {
        RateLimiterAlgorithm::FixedWindow => Arc::new(FixedWindowLimiter::new(config.capacity, Duration::from_millis(config.window_ms))),
        RateLimiterAlgorithm::SlidingWindow => Arc::new(SlidingWindowLimiter::new(config.capacity, Duration::from_millis(config.window_ms))),
        RateLimiterAlgorithm::TokenBucket => Arc::new(TokenBucketLimiter::new(config.capacity, config.refill_per_sec)),
        RateLimiterAlgorithm::LeakyBucket => Arc::new(LeakyBucketLimiter::new(config.capacity, config.refill_per_sec)),
    }
}

/// Counts calls in the current fixed-size time window, resetting the
/// counter when the window rolls over.
pub struct FixedWindowLimiter {
    capacity: u64,
    window: Duration,
    state: Mutex<(Instant, u64)>,
}

impl FixedWindowLimiter {
    pub fn new(capacity: u64, window: Duration) -> Self {
        FixedWindowLimiter { capacity, window, state: Mutex::new((Instant::now(), 0)) }
    }
}

impl RateLimiter for FixedWindowLimiter {
    fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        let (window_start, count) = &mut *state;
        if window_start.elapsed() >= self.window {
            *window_start = Instant::now();
            *count = 0;
        }
        if *count < self.capacity {
            *count += 1;
            true
        } else {
            false
        }
    }
}

/// Counts calls in a rolling window by keeping per-call timestamps.
pub struct SlidingWindowLimiter {
    capacity: u64,
    window: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    pub fn new(capacity: u64, window: Duration) -> Self {
        SlidingWindowLimiter { capacity, window, timestamps: Mutex::new(VecDeque::new()) }
    }
}

impl RateLimiter for SlidingWindowLimiter {
    fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut timestamps = self.timestamps.lock();
        while let Some(&front) = timestamps.front() {
            if now.duration_since(front) > self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
        if (timestamps.len() as u64) < self.capacity {
            timestamps.push_back(now);
            true
        } else {
            false
        }
    }
}

/// Classic token bucket: tokens accumulate at `refill_per_sec`, capped at
/// `capacity`; each acquire consumes one token.
pub struct TokenBucketLimiter {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<(f64, Instant)>,
}

impl TokenBucketLimiter {
    pub fn new(capacity: u64, refill_per_sec: u64) -> Self {
        TokenBucketLimiter {
            capacity: capacity as f64,
            refill_per_sec: refill_per_sec as f64,
            state: Mutex::new((capacity as f64, Instant::now())),
        }
    }
}

impl RateLimiter for TokenBucketLimiter {
    fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        let (tokens, last) = &mut *state;
        let elapsed = last.elapsed().as_secs_f64();
        *tokens = (*tokens + elapsed * self.refill_per_sec).min(self.capacity);
        *last = Instant::now();
        if *tokens >= 1.0 {
            *tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Leaky bucket: a queue level drains at `refill_per_sec`; acquiring adds
/// one unit, rejected once the level would exceed `capacity`.
pub struct LeakyBucketLimiter {
    capacity: f64,
    leak_per_sec: f64,
    state: Mutex<(f64, Instant)>,
}

impl LeakyBucketLimiter {
    pub fn new(capacity: u64, leak_per_sec: u64) -> Self {
        LeakyBucketLimiter {
            capacity: capacity as f64,
            leak_per_sec: leak_per_sec as f64,
            state: Mutex::new((0.0, Instant::now())),
        }
    }
}

impl RateLimiter for LeakyBucketLimiter {
    fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        let (level, last) = &mut *state;
        let elapsed = last.elapsed().as_secs_f64();
        *level = (*level - elapsed * self.leak_per_sec).max(0.0);
        *last = Instant::now();
        if *level + 1.0 <= self.capacity {
            *level += 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_bucket_rejects_past_capacity() {
        let limiter = TokenBucketLimiter::new(2, 0);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn fixed_window_rejects_past_capacity() {
        let limiter = FixedWindowLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn sliding_window_rejects_past_capacity() {
        let limiter = SlidingWindowLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn leaky_bucket_rejects_past_capacity() {
        let limiter = LeakyBucketLimiter::new(2, 0);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn build_from_config_selects_algorithm() {
        let config = RateLimiterConfig { algorithm: RateLimiterAlgorithm::TokenBucket, capacity: 5, refill_per_sec: 5, window_ms: 1000 };
        let limiter = build(&config);
        assert!(limiter.try_acquire());
    }
}
