// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! The pull-based `next`/`close` iterator interface pipelines are built on.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Pull-based stream interface. `next` returns `Ok(None)` on exhaustion —
/// the Rust rendering of the spec's `(value, hasValue, error)` triple.
///
/// `close` is idempotent and must be called by every terminal and every
/// composing operator that owns this iterator; composing operators
/// propagate `close` to whatever they wrap.
#[async_trait]
pub trait PullIterator<T>: Send {
    /// Produce the next value, or `Ok(None)` on exhaustion.
    async fn next(&mut self, cancel: &CancellationToken) -> Result<Option<T>>;

    /// Release any resources. Idempotent; safe to call more than once.
    async fn close(&mut self) -> Result<()>;
}

/// A boxed, owned [`PullIterator`].
pub type BoxIterator<T> = Box<dyn PullIterator<T>>;

/// Iterator over a `Vec`, used by `FromSlice` and as the common leaf for
/// in-memory test fixtures.
pub struct VecIterator<T> {
    items: std::vec::IntoIter<T>,
    closed: bool,
}

impl<T: Send + 'static> VecIterator<T> {
    /// Wrap `items` as a pull iterator.
    pub fn new(items: Vec<T>) -> BoxIterator<T> {
        Box::new(Self {
            items: items.into_iter(),
            closed: false,
        })
    }
}

#[async_trait]
impl<T: Send + 'static> PullIterator<T> for VecIterator<T> {
    async fn next(&mut self, _cancel: &CancellationToken) -> Result<Option<T>> {
        if self.closed {
            return Ok(None);
        }
        Ok(self.items.next())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// Iterator driven by a closure, used by `FromFunc`. The closure returns
/// `Ok(None)` to signal exhaustion, matching [`PullIterator::next`].
pub struct FuncIterator<F> {
    f: F,
    closed: bool,
}

impl<F, T> FuncIterator<F>
where
    F: FnMut() -> Result<Option<T>> + Send + 'static,
    T: Send + 'static,
{
    /// Wrap `f` as a pull iterator.
    pub fn new(f: F) -> BoxIterator<T> {
        Box::new(Self { f, closed: false })
    }
}

#[async_trait]
impl<F, T> PullIterator<T> for FuncIterator<F>
where
    F: FnMut() -> Result<Option<T>> + Send,
    T: Send + 'static,
{
    async fn next(&mut self, _cancel: &CancellationToken) -> Result<Option<T>> {
        if self.closed {
            return Ok(None);
        }
        match (self.f)()? {
            Some(v) => Ok(Some(v)),
            None => {
                self.closed = true;
                Ok(None)
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
