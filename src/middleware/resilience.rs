// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! `WithResilience`: wrap a `RequestResponse` with three independently
//! configured gates, evaluated in order on every call — rate limiter,
//! circuit breaker, retry. Cancellation aborts immediately at the nearest
//! suspension point (the sleep between retries).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::clock::{system_clock, Clock};
use crate::error::{Error, Result, Transience};
use crate::provider::{Provider, RequestResponse};

// ---------------------------------------------------------------------
// Rate limiter
// ---------------------------------------------------------------------

/// A gate that admits or rejects a call without blocking.
pub trait RateLimiter: Send + Sync {
    /// Attempt to acquire one permit. `false` means exhausted.
    fn try_acquire(&self) -> bool;
}

struct TokenBucketState {
    tokens: f64,
    last_refill: std::time::Instant,
}

/// Token-bucket limiter: `capacity` tokens, refilled continuously at
/// `refill_per_sec`.
pub struct TokenBucketLimiter {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<TokenBucketState>,
    clock: Arc<dyn Clock>,
}

impl TokenBucketLimiter {
    pub fn new(capacity: u64, refill_per_sec: f64, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            capacity: capacity as f64,
            refill_per_sec,
            state: Mutex::new(TokenBucketState {
                tokens: capacity as f64,
                last_refill: now,
            }),
            clock,
        }
    }
}

impl RateLimiter for TokenBucketLimiter {
    fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        let now = self.clock.now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

struct FixedWindowState {
    count: u64,
    window_start: std::time::Instant,
}

/// Fixed-window limiter: at most `limit` calls admitted per `window`.
pub struct FixedWindowLimiter {
    limit: u64,
    window: Duration,
    state: Mutex<FixedWindowState>,
    clock: Arc<dyn Clock>,
}

impl FixedWindowLimiter {
    pub fn new(limit: u64, window: Duration, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            limit,
            window,
            state: Mutex::new(FixedWindowState {
                count: 0,
                window_start: now,
            }),
            clock,
        }
    }
}

impl RateLimiter for FixedWindowLimiter {
    fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        let now = self.clock.now();
        if now.duration_since(state.window_start) >= self.window {
            state.window_start = now;
            state.count = 0;
        }
        if state.count < self.limit {
            state.count += 1;
            true
        } else {
            false
        }
    }
}

// ---------------------------------------------------------------------
// Circuit breaker
// ---------------------------------------------------------------------

#[derive(Clone, Copy)]
enum BreakerState {
    Closed,
    Open { opened_at: std::time::Instant },
    HalfOpen,
}

struct BreakerInner {
    state: BreakerState,
    failures: u32,
    window_start: std::time::Instant,
}

/// Closed → passes every call. After `failure_threshold` failures within
/// `window`, trips to Open for `cooldown`. The first call after cooldown
/// becomes a HalfOpen probe: success closes the breaker, failure reopens
/// it. Concurrent calls while HalfOpen are rejected (only one probe at a
/// time).
pub struct CircuitBreaker {
    failure_threshold: u32,
    window: Duration,
    cooldown: Duration,
    inner: Mutex<BreakerInner>,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(
        failure_threshold: u32,
        window: Duration,
        cooldown: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now();
        Self {
            failure_threshold,
            window,
            cooldown,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failures: 0,
                window_start: now,
            }),
            clock,
        }
    }

    fn before_call(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let now = self.clock.now();
        match inner.state {
            BreakerState::Closed => {
                if now.duration_since(inner.window_start) > self.window {
                    inner.window_start = now;
                    inner.failures = 0;
                }
                Ok(())
            }
            BreakerState::Open { opened_at } => {
                if now.duration_since(opened_at) >= self.cooldown {
                    inner.state = BreakerState::HalfOpen;
                    Ok(())
                } else {
                    Err(Error::CircuitOpen)
                }
            }
            BreakerState::HalfOpen => Err(Error::CircuitOpen),
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.state = BreakerState::Closed;
        inner.failures = 0;
        inner.window_start = self.clock.now();
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open {
                    opened_at: self.clock.now(),
                };
            }
            BreakerState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.failure_threshold {
                    inner.state = BreakerState::Open {
                        opened_at: self.clock.now(),
                    };
                }
            }
            BreakerState::Open { .. } => {}
        }
    }
}

// ---------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------

/// Delay schedule between retry attempts.
#[derive(Clone, Copy)]
pub enum BackoffPolicy {
    Constant(Duration),
    Exponential {
        base: Duration,
        max: Duration,
        multiplier: f64,
    },
}

impl BackoffPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        match *self {
            BackoffPolicy::Constant(d) => d,
            BackoffPolicy::Exponential {
                base,
                max,
                multiplier,
            } => {
                let scaled = base.as_secs_f64() * multiplier.powi(attempt as i32);
                Duration::from_secs_f64(scaled.min(max.as_secs_f64()))
            }
        }
    }
}

/// Randomization applied to a computed backoff delay.
#[derive(Clone, Copy)]
pub enum Jitter {
    None,
    /// Uniform random in `[0, computed)`.
    Full,
}

/// Classifies an error as retryable. Defaults to
/// [`crate::error::Error::default_transience`].
pub type RetryClassifier = Arc<dyn Fn(&Error) -> Transience + Send + Sync>;

/// Retry configuration: up to `max_attempts` total tries.
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    pub jitter: Jitter,
    pub classifier: RetryClassifier,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: BackoffPolicy) -> Self {
        Self {
            max_attempts,
            backoff,
            jitter: Jitter::None,
            classifier: Arc::new(|e: &Error| e.default_transience()),
        }
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_classifier(mut self, classifier: RetryClassifier) -> Self {
        self.classifier = classifier;
        self
    }
}

// ---------------------------------------------------------------------
// WithResilience
// ---------------------------------------------------------------------

/// Composes the three gates around a base [`RequestResponse`], evaluated
/// in order on every call: rate limiter, circuit breaker, retry. Each retry
/// re-enters the breaker.
pub struct WithResilience<I, O> {
    base: Arc<dyn RequestResponse<I, O>>,
    rate_limiter: Option<Arc<dyn RateLimiter>>,
    breaker: Option<Arc<CircuitBreaker>>,
    retry: Option<RetryPolicy>,
    clock: Arc<dyn Clock>,
}

impl<I, O> WithResilience<I, O> {
    pub fn new(base: Arc<dyn RequestResponse<I, O>>) -> Self {
        Self {
            base,
            rate_limiter: None,
            breaker: None,
            retry: None,
            clock: system_clock(),
        }
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait]
impl<I: Send + Sync + 'static, O: Send + 'static> Provider for WithResilience<I, O> {
    fn name(&self) -> &str {
        self.base.name()
    }

    async fn is_available(&self, cancel: &CancellationToken) -> bool {
        self.base.is_available(cancel).await
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[async_trait]
impl<I: Clone + Send + Sync + 'static, O: Send + 'static> RequestResponse<I, O>
    for WithResilience<I, O>
{
    async fn execute(&self, cancel: &CancellationToken, input: I) -> Result<O> {
        if let Some(limiter) = &self.rate_limiter {
            if !limiter.try_acquire() {
                return Err(Error::RateLimited);
            }
        }

        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if let Some(breaker) = &self.breaker {
                breaker.before_call()?;
            }
            let result = self.base.execute(cancel, input.clone()).await;
            if let Some(breaker) = &self.breaker {
                match &result {
                    Ok(_) => breaker.record_success(),
                    Err(_) => breaker.record_failure(),
                }
            }

            match result {
                Ok(v) => return Ok(v),
                Err(e) => {
                    if e.is_cancelled() {
                        return Err(e);
                    }
                    let Some(retry) = &self.retry else {
                        return Err(e);
                    };
                    if (retry.classifier)(&e) != Transience::Transient {
                        return Err(e);
                    }
                    attempt += 1;
                    if attempt >= retry.max_attempts {
                        return Err(e);
                    }
                    let mut delay = retry.backoff.delay(attempt - 1);
                    if matches!(retry.jitter, Jitter::Full) {
                        let frac: f64 = rand::random();
                        delay = Duration::from_secs_f64(delay.as_secs_f64() * frac);
                    }
                    self.clock.sleep(cancel, delay).await?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyThenOk {
        calls: AtomicU32,
        succeed_on: u32,
    }

    #[async_trait]
    impl Provider for FlakyThenOk {
        fn name(&self) -> &str {
            "flaky"
        }
        async fn is_available(&self, _cancel: &CancellationToken) -> bool {
            true
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    #[async_trait]
    impl RequestResponse<i32, i32> for FlakyThenOk {
        async fn execute(&self, _cancel: &CancellationToken, input: i32) -> Result<i32> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < self.succeed_on {
                Err(Error::Timeout)
            } else {
                Ok(input)
            }
        }
    }

    #[tokio::test]
    async fn rate_limiter_rejects_once_exhausted() {
        let cancel = CancellationToken::new();
        let clock = FakeClock::new();
        let limiter: Arc<dyn RateLimiter> =
            Arc::new(TokenBucketLimiter::new(1, 0.0, clock.clone()));
        let base: Arc<dyn RequestResponse<i32, i32>> = Arc::new(FlakyThenOk {
            calls: AtomicU32::new(0),
            succeed_on: 1,
        });
        let wrapped = WithResilience::new(base).with_rate_limiter(limiter);
        assert!(wrapped.execute(&cancel, 1).await.is_ok());
        let err = wrapped.execute(&cancel, 1).await.unwrap_err();
        assert!(matches!(err, Error::RateLimited));
    }

    #[tokio::test]
    async fn retry_recovers_from_transient_failures() {
        let cancel = CancellationToken::new();
        let clock = FakeClock::new();
        let base: Arc<dyn RequestResponse<i32, i32>> = Arc::new(FlakyThenOk {
            calls: AtomicU32::new(0),
            succeed_on: 3,
        });
        let retry = RetryPolicy::new(5, BackoffPolicy::Constant(Duration::from_millis(1)));
        let wrapped = WithResilience::new(base)
            .with_retry(retry)
            .with_clock(clock);
        let out = wrapped.execute(&cancel, 42).await.unwrap();
        assert_eq!(out, 42);
    }

    #[tokio::test]
    async fn retry_gives_up_on_permanent_errors() {
        struct AlwaysPermanent;
        #[async_trait]
        impl Provider for AlwaysPermanent {
            fn name(&self) -> &str {
                "permanent"
            }
            async fn is_available(&self, _cancel: &CancellationToken) -> bool {
                true
            }
            fn as_any(&self) -> &dyn std::any::Any {
                self
            }
        }
        #[async_trait]
        impl RequestResponse<i32, i32> for AlwaysPermanent {
            async fn execute(&self, _cancel: &CancellationToken, _input: i32) -> Result<i32> {
                Err(Error::NotRegistered("x".into()))
            }
        }
        let cancel = CancellationToken::new();
        let base: Arc<dyn RequestResponse<i32, i32>> = Arc::new(AlwaysPermanent);
        let retry = RetryPolicy::new(5, BackoffPolicy::Constant(Duration::from_millis(1)));
        let wrapped = WithResilience::new(base).with_retry(retry);
        let err = wrapped.execute(&cancel, 1).await.unwrap_err();
        assert!(matches!(err, Error::NotRegistered(_)));
    }

    #[tokio::test]
    async fn circuit_breaker_opens_after_threshold_and_rejects() {
        let cancel = CancellationToken::new();
        let clock = FakeClock::new();
        struct AlwaysFails;
        #[async_trait]
        impl Provider for AlwaysFails {
            fn name(&self) -> &str {
                "fails"
            }
            async fn is_available(&self, _cancel: &CancellationToken) -> bool {
                true
            }
            fn as_any(&self) -> &dyn std::any::Any {
                self
            }
        }
        #[async_trait]
        impl RequestResponse<i32, i32> for AlwaysFails {
            async fn execute(&self, _cancel: &CancellationToken, _input: i32) -> Result<i32> {
                Err(Error::Timeout)
            }
        }
        let base: Arc<dyn RequestResponse<i32, i32>> = Arc::new(AlwaysFails);
        let breaker = Arc::new(CircuitBreaker::new(
            2,
            Duration::from_secs(60),
            Duration::from_secs(60),
            clock.clone(),
        ));
        let wrapped = WithResilience::new(base).with_circuit_breaker(breaker);
        assert!(matches!(
            wrapped.execute(&cancel, 1).await.unwrap_err(),
            Error::Timeout
        ));
        assert!(matches!(
            wrapped.execute(&cancel, 1).await.unwrap_err(),
            Error::Timeout
        ));
        // Threshold reached; breaker is now open and rejects before calling base.
        assert!(matches!(
            wrapped.execute(&cancel, 1).await.unwrap_err(),
            Error::CircuitOpen
        ));
    }
}
