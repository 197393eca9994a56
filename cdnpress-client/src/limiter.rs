//! Token-bucket pacing of request starts.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Paces request starts across all workers to a configured rate.
///
/// A rate of `0` disables pacing entirely.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Option<Mutex<TokenBucket>>,
}

impl RateLimiter {
    /// Creates a limiter allowing `rate` request starts per second and bursts of up to `burst`.
    pub fn new(rate: u32, burst: u32) -> Self {
        let bucket = (rate > 0).then(|| Mutex::new(TokenBucket::new(rate, burst)));
        Self { bucket }
    }

    /// Waits until the caller may start a request.
    ///
    /// Every caller reserves its token immediately, so concurrent waiters are spaced out evenly
    /// instead of racing for the next refill.
    pub async fn wait(&self) {
        let Some(ref bucket) = self.bucket else {
            return;
        };

        // NB: We intentionally unwrap and crash if the mutex is poisoned.
        let delay = bucket.lock().unwrap().reserve(Instant::now());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// A token bucket rate limiter.
///
/// Tokens refill at a constant rate up to capacity. Each request consumes one token. Reservations
/// may drive the balance negative; the deficit is the time a caller has to wait.
///
/// This implementation is not thread-safe on its own. Wrap in a `Mutex` for concurrent access.
#[derive(Debug)]
struct TokenBucket {
    refill_rate: f64,
    capacity: f64,
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    /// Creates a new, full token bucket.
    ///
    /// - `rate`: tokens refilled per second
    /// - `burst`: bucket capacity, at least one token
    fn new(rate: u32, burst: u32) -> Self {
        let capacity = burst.max(1) as f64;
        Self {
            refill_rate: rate as f64,
            capacity,
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_update = now;
    }

    /// Takes one token, returning how long the caller has to wait before it becomes available.
    fn reserve(&mut self, now: Instant) -> Duration {
        self.refill(now);
        self.tokens -= 1.0;
        if self.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-self.tokens / self.refill_rate)
        }
    }
}
