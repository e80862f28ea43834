//! Token-bucket rate limiter with continuous refill.
//!
//! Grounded on `heretix/ratelimit.py`'s `RateLimiter`: rather than refilling
//! on a fixed tick, the bucket computes elapsed time since the last
//! withdrawal on every `acquire` call and tops up proportionally, so burst
//! capacity is exact regardless of how often the limiter is polled.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::time::sleep;

/// Raised by [`RateLimiter::acquire_with_timeout`] when no token becomes
/// available before the caller's deadline elapses.
#[derive(Debug, thiserror::Error)]
#[error("rate limit acquire timed out after {0:?}")]
pub struct RateLimitTimeout(pub Duration);

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// A shared, async-safe token bucket. Clone-free: wrap in an `Arc` to share
/// across tasks, mirroring how the Python reference shares one limiter
/// instance across worker threads behind a lock.
pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<Bucket>,
}

impl RateLimiter {
    /// `requests_per_minute` sets both the bucket capacity and the refill
    /// rate: a full bucket can burst up to one minute's worth of requests,
    /// then drains at the steady-state rate.
    pub fn new(requests_per_minute: u32) -> Self {
        let capacity = requests_per_minute.max(1) as f64;
        Self {
            capacity,
            refill_per_sec: capacity / 60.0,
            state: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill_locked(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
            bucket.last_refill = now;
        }
    }

    /// Returns `true` and withdraws a token if one is immediately
    /// available, without blocking.
    pub fn try_acquire(&self) -> bool {
        let mut bucket = self.state.lock().expect("rate limiter mutex poisoned");
        self.refill_locked(&mut bucket);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Waits until a token is available, then withdraws it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.state.lock().expect("rate limiter mutex poisoned");
                self.refill_locked(&mut bucket);
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    None
                } else {
                    let deficit = 1.0 - bucket.tokens;
                    Some(Duration::from_secs_f64(deficit / self.refill_per_sec))
                }
            };
            match wait {
                None => return,
                Some(duration) => sleep(duration.max(Duration::from_millis(1))).await,
            }
        }
    }

    /// Waits until a token is available, then withdraws it, failing with
    /// [`RateLimitTimeout`] if `deadline` elapses first instead of blocking
    /// forever.
    pub async fn acquire_with_timeout(&self, deadline: Duration) -> Result<(), RateLimitTimeout> {
        tokio::time::timeout(deadline, self.acquire())
            .await
            .map_err(|_| RateLimitTimeout(deadline))
    }

    /// Tokens currently available, for diagnostics/health endpoints.
    pub fn available(&self) -> f64 {
        let mut bucket = self.state.lock().expect("rate limiter mutex poisoned");
        self.refill_locked(&mut bucket);
        bucket.tokens
    }
}
