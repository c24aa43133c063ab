//! Per-dependency rate limiting: a token bucket refilled at the configured
//! per-minute rate, plus adaptive backoff driven by upstream 429/5xx
//! responses. The bucket is deliberately shallow (one token) so a burst of
//! concurrent callers cannot exceed the per-minute rate in any 60s window;
//! all accounting is serialized through one mutex.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use pressline_common::PipelineError;

/// Base delay for exponential backoff after an upstream failure.
pub const BACKOFF_BASE: Duration = Duration::from_secs(2);

struct LimiterState {
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
    consecutive_failures: u32,
    backoff_until: Option<Instant>,
}

pub struct RateLimiter {
    name: String,
    max_backoff: Duration,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    /// A limiter refilling `qpm` tokens per minute, backoff capped at
    /// `max_backoff`.
    pub fn per_minute(name: &str, qpm: u32, max_backoff: Duration) -> Self {
        Self {
            name: name.to_string(),
            max_backoff,
            state: Mutex::new(LimiterState {
                tokens: 1.0,
                refill_per_sec: f64::from(qpm.max(1)) / 60.0,
                last_refill: Instant::now(),
                consecutive_failures: 0,
                backoff_until: None,
            }),
        }
    }

    /// Wait for a token, bounded by `deadline`. Errors with `RateLimited`
    /// when the deadline would be exceeded, so callers fail fast instead of
    /// queueing unboundedly.
    pub async fn acquire(&self, deadline: Duration) -> Result<(), PipelineError> {
        let started = Instant::now();
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                refill(&mut state);

                if let Some(until) = state.backoff_until {
                    let now = Instant::now();
                    if until > now {
                        Some(until - now)
                    } else {
                        state.backoff_until = None;
                        None
                    }
                } else {
                    None
                }
                .or_else(|| {
                    if state.tokens >= 1.0 {
                        state.tokens -= 1.0;
                        None
                    } else {
                        let deficit = 1.0 - state.tokens;
                        // Floor the wait so float rounding can't spin the loop.
                        Some(
                            Duration::from_secs_f64(deficit / state.refill_per_sec)
                                .max(Duration::from_millis(1)),
                        )
                    }
                })
            };

            let Some(wait) = wait else {
                return Ok(());
            };

            if started.elapsed() + wait > deadline {
                return Err(PipelineError::rate_limited(
                    format!("{}: token wait exceeds deadline", self.name),
                    Some(wait),
                ));
            }
            debug!(limiter = %self.name, wait_ms = wait.as_millis() as u64, "throttling");
            tokio::time::sleep(wait).await;
        }
    }

    /// Record an upstream success; resets the backoff ladder.
    pub async fn on_success(&self) {
        let mut state = self.state.lock().await;
        state.consecutive_failures = 0;
        state.backoff_until = None;
    }

    /// Record an upstream 429/5xx. Honors `Retry-After` when provided, else
    /// applies `min(max_backoff, base * 2^failures)`.
    pub async fn on_failure(&self, retry_after: Option<Duration>) {
        let mut state = self.state.lock().await;
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        let delay = retry_after.unwrap_or_else(|| {
            let exp = BACKOFF_BASE
                .saturating_mul(2u32.saturating_pow(state.consecutive_failures.saturating_sub(1)));
            exp.min(self.max_backoff)
        });
        let delay = delay.min(self.max_backoff);
        state.backoff_until = Some(Instant::now() + delay);
        warn!(
            limiter = %self.name,
            failures = state.consecutive_failures,
            delay_secs = delay.as_secs(),
            "upstream failure, backing off"
        );
    }
}

fn refill(state: &mut LimiterState) {
    let now = Instant::now();
    let elapsed = now.duration_since(state.last_refill).as_secs_f64();
    state.last_refill = now;
    // Capacity one: bursts cannot front-run the per-minute rate.
    state.tokens = (state.tokens + elapsed * state.refill_per_sec).min(1.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn spaces_requests_at_the_configured_rate() {
        let limiter = RateLimiter::per_minute("test", 60, Duration::from_secs(300));
        let start = Instant::now();
        for _ in 0..4 {
            limiter.acquire(Duration::from_secs(60)).await.unwrap();
        }
        // 60 qpm = one token per second; first is free, three more wait.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(3), "elapsed: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(5), "elapsed: {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_bounds_the_wait() {
        let limiter = RateLimiter::per_minute("test", 1, Duration::from_secs(300));
        limiter.acquire(Duration::from_secs(120)).await.unwrap();
        let err = limiter.acquire(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, PipelineError::RateLimited { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_and_resets_on_success() {
        let limiter = RateLimiter::per_minute("test", 6000, Duration::from_secs(300));

        limiter.on_failure(None).await;
        let start = Instant::now();
        limiter.acquire(Duration::from_secs(60)).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));

        limiter.on_failure(None).await;
        let start = Instant::now();
        limiter.acquire(Duration::from_secs(60)).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(4));

        limiter.on_success().await;
        limiter.on_failure(None).await;
        let start = Instant::now();
        limiter.acquire(Duration::from_secs(60)).await.unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_overrides_exponential_delay() {
        let limiter = RateLimiter::per_minute("test", 6000, Duration::from_secs(300));
        limiter.on_failure(Some(Duration::from_secs(7))).await;
        let start = Instant::now();
        limiter.acquire(Duration::from_secs(60)).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_is_capped() {
        let limiter = RateLimiter::per_minute("test", 6000, Duration::from_secs(10));
        for _ in 0..20 {
            limiter.on_failure(None).await;
        }
        let start = Instant::now();
        limiter.acquire(Duration::from_secs(60)).await.unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(10) && elapsed < Duration::from_secs(12));
    }
}
