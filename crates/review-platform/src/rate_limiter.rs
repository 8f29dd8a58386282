//! Token-bucket rate limiter for outbound remote-platform calls.
//!
//! Not part of the teacher's own stack (`dashflow` has no transport-level
//! limiter crate in its dependency set), so this is hand-rolled rather than
//! pulled in from a crate the teacher doesn't already use — see DESIGN.md.
//! 5 req/s, burst 10, per §5.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{Error, Result};

struct State {
    tokens: f64,
    last_refill: Instant,
}

/// Blocks the caller until a token is available, or until `deadline`
/// elapses from the call (§5: "blocks until a token is available or the
/// per-call context deadline fires").
pub struct RateLimiter {
    state: Arc<Mutex<State>>,
    rate_per_sec: f64,
    burst: f64,
}

impl RateLimiter {
    #[must_use]
    pub fn new(rate_per_sec: f64, burst: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(State { tokens: f64::from(burst), last_refill: Instant::now() })),
            rate_per_sec,
            burst: f64::from(burst),
        }
    }

    /// Acquires a single token, refilling proportionally to elapsed time.
    pub async fn acquire(&self, deadline: Duration) -> Result<()> {
        let start = Instant::now();
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.rate_per_sec).min(self.burst);
                state.last_refill = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    let deficit = 1.0 - state.tokens;
                    Some(Duration::from_secs_f64(deficit / self.rate_per_sec))
                }
            };

            match wait {
                None => return Ok(()),
                Some(wait) => {
                    if start.elapsed() + wait > deadline {
                        return Err(Error::RateLimitTimeout);
                    }
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}

impl Clone for RateLimiter {
    fn clone(&self) -> Self {
        Self { state: Arc::clone(&self.state), rate_per_sec: self.rate_per_sec, burst: self.burst }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_is_consumed_immediately() {
        let limiter = RateLimiter::new(5.0, 10);
        for _ in 0..10 {
            limiter.acquire(Duration::from_millis(50)).await.expect("burst token available");
        }
    }

    #[tokio::test]
    async fn exhausted_bucket_waits_for_refill() {
        let limiter = RateLimiter::new(5.0, 1);
        limiter.acquire(Duration::from_millis(50)).await.expect("first token available");
        let start = Instant::now();
        limiter.acquire(Duration::from_millis(500)).await.expect("token refills within deadline");
        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn deadline_exceeded_returns_error() {
        let limiter = RateLimiter::new(1.0, 1);
        limiter.acquire(Duration::from_millis(10)).await.expect("first token available");
        let result = limiter.acquire(Duration::from_millis(10)).await;
        assert!(matches!(result, Err(Error::RateLimitTimeout)));
    }
}
