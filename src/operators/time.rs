// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Time-aware operators: `Throttle`, `Batch`, `Debounce`, `TumblingWindow`,
//! `SlidingWindow`.
//!
//! Every operator here reads time through a [`Clock`] rather than calling
//! `Instant::now()`/`tokio::time::sleep` directly, per the crate-wide rule
//! that time-aware code is testable with a fake clock (§9 of the design
//! notes). Each defaults to [`crate::clock::system_clock`] when built via
//! the `Pipeline` methods; use the `_with_clock` variants to inject a
//! [`crate::clock::FakeClock`] in tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::iterator::{BoxIterator, PullIterator};
use super::Pipeline;
use crate::clock::{system_clock, Clock};
use crate::error::{Error, Result};

// ---------------------------------------------------------------------
// Throttle
// ---------------------------------------------------------------------

struct ThrottleIterator<T> {
    inner: BoxIterator<T>,
    interval: Duration,
    clock: Arc<dyn Clock>,
    last_emit: Option<Instant>,
}

#[async_trait]
impl<T: Send> PullIterator<T> for ThrottleIterator<T> {
    async fn next(&mut self, cancel: &CancellationToken) -> Result<Option<T>> {
        loop {
            match self.inner.next(cancel).await? {
                Some(v) => {
                    let now = self.clock.now();
                    let ready = match self.last_emit {
                        None => true,
                        Some(last) => now.duration_since(last) >= self.interval,
                    };
                    if ready {
                        self.last_emit = Some(now);
                        return Ok(Some(v));
                    }
                    // dropped: arrived within `interval` of the last emission
                }
                None => return Ok(None),
            }
        }
    }
    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}

impl<T: Send + 'static> Pipeline<T> {
    /// Drop values arriving within `interval` of the last emission.
    pub fn throttle(self, interval: Duration) -> Pipeline<T> {
        self.throttle_with_clock(interval, system_clock())
    }

    /// [`Pipeline::throttle`] with an injected [`Clock`].
    pub fn throttle_with_clock(self, interval: Duration, clock: Arc<dyn Clock>) -> Pipeline<T> {
        Pipeline::from_iterator(move || {
            Box::new(ThrottleIterator {
                inner: self.build(),
                interval,
                clock: clock.clone(),
                last_emit: None,
            })
        })
    }
}

// ---------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------

struct BatchIterator<T> {
    inner: BoxIterator<T>,
    size: usize,
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

#[async_trait]
impl<T: Send> PullIterator<Vec<T>> for BatchIterator<T> {
    async fn next(&mut self, cancel: &CancellationToken) -> Result<Option<Vec<T>>> {
        let mut batch = Vec::new();
        let mut deadline: Option<Instant> = None;
        loop {
            if self.size > 0 && batch.len() >= self.size {
                return Ok(Some(batch));
            }
            match deadline {
                Some(dl) => {
                    let remaining = dl.saturating_duration_since(self.clock.now());
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                        res = self.inner.next(cancel) => {
                            match res? {
                                Some(v) => batch.push(v),
                                None => return Ok(if batch.is_empty() { None } else { Some(batch) }),
                            }
                        }
                        _ = self.clock.sleep(cancel, remaining) => {
                            return Ok(Some(batch));
                        }
                    }
                }
                None => match self.inner.next(cancel).await? {
                    Some(v) => {
                        batch.push(v);
                        deadline = Some(self.clock.now() + self.timeout);
                    }
                    None => return Ok(None),
                },
            }
        }
    }
    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}

impl<T: Send + 'static> Pipeline<T> {
    /// Emit a `Vec<T>` once `size` items accumulate or `timeout` elapses
    /// since the first item of the batch; exhaustion flushes a partial
    /// batch. `size == 0` disables the size trigger (time-only batching).
    pub fn batch(self, size: usize, timeout: Duration) -> Pipeline<Vec<T>> {
        self.batch_with_clock(size, timeout, system_clock())
    }

    /// [`Pipeline::batch`] with an injected [`Clock`].
    pub fn batch_with_clock(
        self,
        size: usize,
        timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Pipeline<Vec<T>> {
        Pipeline::from_iterator(move || {
            Box::new(BatchIterator {
                inner: self.build(),
                size,
                timeout,
                clock: clock.clone(),
            })
        })
    }
}

// ---------------------------------------------------------------------
// Debounce
// ---------------------------------------------------------------------

struct DebounceIterator<T> {
    inner: BoxIterator<T>,
    quiet: Duration,
    clock: Arc<dyn Clock>,
    pending: Option<T>,
    exhausted: bool,
}

#[async_trait]
impl<T: Send> PullIterator<T> for DebounceIterator<T> {
    async fn next(&mut self, cancel: &CancellationToken) -> Result<Option<T>> {
        loop {
            if self.exhausted {
                return Ok(self.pending.take());
            }
            if self.pending.is_none() {
                match self.inner.next(cancel).await? {
                    Some(v) => self.pending = Some(v),
                    None => {
                        self.exhausted = true;
                        return Ok(self.pending.take());
                    }
                }
                continue;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                res = self.inner.next(cancel) => {
                    match res? {
                        Some(v) => { self.pending = Some(v); }
                        None => {
                            self.exhausted = true;
                            return Ok(self.pending.take());
                        }
                    }
                }
                _ = self.clock.sleep(cancel, self.quiet) => {
                    return Ok(self.pending.take());
                }
            }
        }
    }
    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}

impl<T: Send + 'static> Pipeline<T> {
    /// Emit only the latest value once `quiet` elapses with no further
    /// arrivals.
    pub fn debounce(self, quiet: Duration) -> Pipeline<T> {
        self.debounce_with_clock(quiet, system_clock())
    }

    /// [`Pipeline::debounce`] with an injected [`Clock`].
    pub fn debounce_with_clock(self, quiet: Duration, clock: Arc<dyn Clock>) -> Pipeline<T> {
        Pipeline::from_iterator(move || {
            Box::new(DebounceIterator {
                inner: self.build(),
                quiet,
                clock: clock.clone(),
                pending: None,
                exhausted: false,
            })
        })
    }
}

// ---------------------------------------------------------------------
// TumblingWindow
// ---------------------------------------------------------------------

struct TumblingWindowIterator<T> {
    inner: BoxIterator<T>,
    duration: Duration,
    clock: Arc<dyn Clock>,
}

#[async_trait]
impl<T: Send> PullIterator<Vec<T>> for TumblingWindowIterator<T> {
    async fn next(&mut self, cancel: &CancellationToken) -> Result<Option<Vec<T>>> {
        let mut window = Vec::new();
        let mut deadline: Option<Instant> = None;
        loop {
            match deadline {
                Some(dl) => {
                    let remaining = dl.saturating_duration_since(self.clock.now());
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                        res = self.inner.next(cancel) => {
                            match res? {
                                Some(v) => window.push(v),
                                None => return Ok(if window.is_empty() { None } else { Some(window) }),
                            }
                        }
                        _ = self.clock.sleep(cancel, remaining) => {
                            return Ok(Some(window));
                        }
                    }
                }
                None => match self.inner.next(cancel).await? {
                    Some(v) => {
                        window.push(v);
                        deadline = Some(self.clock.now() + self.duration);
                    }
                    None => return Ok(None),
                },
            }
        }
    }
    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}

impl<T: Send + 'static> Pipeline<T> {
    /// Non-overlapping fixed-duration windows, each starting on the first
    /// item observed after the previous window closed.
    pub fn tumbling_window(self, duration: Duration) -> Pipeline<Vec<T>> {
        self.tumbling_window_with_clock(duration, system_clock())
    }

    /// [`Pipeline::tumbling_window`] with an injected [`Clock`].
    pub fn tumbling_window_with_clock(
        self,
        duration: Duration,
        clock: Arc<dyn Clock>,
    ) -> Pipeline<Vec<T>> {
        Pipeline::from_iterator(move || {
            Box::new(TumblingWindowIterator {
                inner: self.build(),
                duration,
                clock: clock.clone(),
            })
        })
    }
}

// ---------------------------------------------------------------------
// SlidingWindow
// ---------------------------------------------------------------------

type TimeFn<T> = Arc<dyn Fn(&T) -> Instant + Send + Sync>;

struct SlidingWindowIterator<T> {
    inner: BoxIterator<T>,
    time_fn: TimeFn<T>,
    size: Duration,
    slide: Duration,
    buffer: VecDeque<T>,
    window_start: Option<Instant>,
    exhausted: bool,
}

#[async_trait]
impl<T> PullIterator<Vec<T>> for SlidingWindowIterator<T>
where
    T: Clone + Send,
{
    async fn next(&mut self, cancel: &CancellationToken) -> Result<Option<Vec<T>>> {
        loop {
            if let Some(start) = self.window_start {
                let end = start + self.size;
                let ready = self.exhausted
                    || self
                        .buffer
                        .back()
                        .map(|last| (self.time_fn)(last) >= end)
                        .unwrap_or(false);
                if ready {
                    let window: Vec<T> = self
                        .buffer
                        .iter()
                        .filter(|item| {
                            let t = (self.time_fn)(item);
                            t >= start && t < end
                        })
                        .cloned()
                        .collect();
                    let new_start = start + self.slide;
                    self.buffer.retain(|item| (self.time_fn)(item) >= new_start);
                    if self.exhausted && self.buffer.is_empty() {
                        self.window_start = None;
                    } else {
                        self.window_start = Some(new_start);
                    }
                    if !window.is_empty() {
                        return Ok(Some(window));
                    }
                    if self.exhausted && self.buffer.is_empty() {
                        return Ok(None);
                    }
                    continue;
                }
            }
            if self.exhausted {
                return Ok(None);
            }
            match self.inner.next(cancel).await? {
                Some(v) => {
                    if self.window_start.is_none() {
                        self.window_start = Some((self.time_fn)(&v));
                    }
                    self.buffer.push_back(v);
                }
                None => self.exhausted = true,
            }
        }
    }
    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}

impl<T: Clone + Send + 'static> Pipeline<T> {
    /// Event-time windows of duration `size`, advancing by `slide`.
    /// `time_fn` extracts each item's event time; the source is assumed to
    /// arrive in non-decreasing event-time order.
    pub fn sliding_window(
        self,
        time_fn: impl Fn(&T) -> Instant + Send + Sync + 'static,
        size: Duration,
        slide: Duration,
    ) -> Pipeline<Vec<T>> {
        let time_fn: TimeFn<T> = Arc::new(time_fn);
        Pipeline::from_iterator(move || {
            Box::new(SlidingWindowIterator {
                inner: self.build(),
                time_fn: time_fn.clone(),
                size,
                slide,
                buffer: VecDeque::new(),
                window_start: None,
                exhausted: false,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;

    #[tokio::test]
    async fn throttle_drops_within_interval() {
        let clock = FakeClock::new();
        let cancel = CancellationToken::new();
        let pipeline = Pipeline::from_slice(vec![1, 2, 3])
            .throttle_with_clock(Duration::from_secs(1), clock.clone());
        // All three arrive at the same fake-clock instant, so only the
        // first should be emitted.
        let out = pipeline.collect(&cancel).await.unwrap();
        assert_eq!(out, vec![1]);
    }

    #[tokio::test]
    async fn batch_flushes_partial_on_exhaustion() {
        let cancel = CancellationToken::new();
        let out = Pipeline::from_slice(vec![1, 2, 3])
            .batch(10, Duration::from_secs(60))
            .collect(&cancel)
            .await
            .unwrap();
        assert_eq!(out, vec![vec![1, 2, 3]]);
    }

    #[tokio::test]
    async fn batch_flushes_at_size() {
        let cancel = CancellationToken::new();
        let out = Pipeline::from_slice(vec![1, 2, 3, 4])
            .batch(2, Duration::from_secs(60))
            .collect(&cancel)
            .await
            .unwrap();
        assert_eq!(out, vec![vec![1, 2], vec![3, 4]]);
    }

    #[tokio::test]
    async fn tumbling_window_flushes_partial_on_exhaustion() {
        let cancel = CancellationToken::new();
        let out = Pipeline::from_slice(vec!['a', 'b'])
            .tumbling_window(Duration::from_secs(60))
            .collect(&cancel)
            .await
            .unwrap();
        assert_eq!(out, vec![vec!['a', 'b']]);
    }
}
