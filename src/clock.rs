// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Monotonic clock abstraction.
//!
//! Every time-aware piece of `flowcore` — [`crate::session`]'s schedule
//! filter, and the windowing/throttling/batching/debounce operators in
//! [`crate::operators`] — reads time through a [`Clock`] instead of calling
//! `Instant::now()` directly, so tests can inject a [`FakeClock`] and assert
//! exact boundary behavior instead of racing real wall-clock sleeps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// A source of monotonic time and cooperative sleep.
#[async_trait::async_trait]
pub trait Clock: Send + Sync {
    /// Current monotonic instant.
    fn now(&self) -> Instant;

    /// Sleep for `d`, honoring `cancel`. Returns [`Error::Cancelled`] if the
    /// token fires before `d` elapses.
    async fn sleep(&self, cancel: &CancellationToken, d: Duration) -> Result<()>;
}

/// Real-time clock backed by `tokio::time`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait::async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, cancel: &CancellationToken, d: Duration) -> Result<()> {
        tokio::select! {
            _ = tokio::time::sleep(d) => Ok(()),
            _ = cancel.cancelled() => Err(Error::Cancelled),
        }
    }
}

/// Default clock handle, shared via `Arc` wherever a `Clock` is needed.
pub fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

/// A manually-advanced clock for deterministic tests.
///
/// `now()` is a fixed base instant plus an offset advanced by
/// [`FakeClock::advance`]; `sleep` resolves immediately once the requested
/// duration has been "consumed" by a prior advance, so tests drive time
/// synchronously rather than waiting on real timers.
pub struct FakeClock {
    base: Instant,
    offset_ms: AtomicU64,
}

impl FakeClock {
    /// Construct a fake clock pinned at the moment of creation.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            base: Instant::now(),
            offset_ms: AtomicU64::new(0),
        })
    }

    /// Advance the clock by `d`. Does not itself wake any sleepers; callers
    /// combine this with [`Clock::sleep`] only when they also control the
    /// sleep duration (typically by constructing `d == 0` sleeps in tests,
    /// or by calling `advance` from a second task).
    pub fn advance(&self, d: Duration) {
        self.offset_ms
            .fetch_add(d.as_millis() as u64, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.base + Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }

    async fn sleep(&self, cancel: &CancellationToken, _d: Duration) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        // Fake sleeps resolve on the next yield; tests advance the clock
        // themselves before or after awaiting this future.
        tokio::task::yield_now().await;
        Ok(())
    }
}
