// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Terminal operators: `Collect`, `ForEach`, `Drain`/[`Runnable`].
//!
//! Nothing upstream of a terminal runs until one of these is invoked —
//! laziness is structural, not a documented convention.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::Pipeline;
use crate::error::Result;

/// A sink a [`Pipeline`] can be drained into via [`Pipeline::drain`].
#[async_trait]
pub trait DrainSink<T>: Send + Sync {
    /// Accept one value.
    async fn accept(&self, cancel: &CancellationToken, value: T) -> Result<()>;
}

#[async_trait]
impl<T, F> DrainSink<T> for F
where
    T: Send + 'static,
    F: Fn(T) -> Result<()> + Send + Sync,
{
    async fn accept(&self, _cancel: &CancellationToken, value: T) -> Result<()> {
        self(value)
    }
}

/// A fully-composed chain ready to execute, produced by
/// [`Pipeline::drain`].
pub struct Runnable<T> {
    pipeline: Pipeline<T>,
    sink: std::sync::Arc<dyn DrainSink<T>>,
}

impl<T: Send + 'static> Runnable<T> {
    /// Run the chain to completion: pull every value and feed it to the
    /// sink. A sink error, a cancellation, or an upstream error all abort
    /// the pull and propagate; the source iterator is always closed.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<()> {
        let mut it = self.pipeline.build();
        let result = async {
            loop {
                if cancel.is_cancelled() {
                    return Err(crate::error::Error::Cancelled);
                }
                match it.next(cancel).await? {
                    Some(v) => self.sink.accept(cancel, v).await?,
                    None => return Ok(()),
                }
            }
        }
        .await;
        it.close().await?;
        result
    }
}

impl<T: Send + 'static> Pipeline<T> {
    /// Collect every value into a `Vec`, preserving source order.
    pub async fn collect(&self, cancel: &CancellationToken) -> Result<Vec<T>> {
        let mut it = self.build();
        let mut out = Vec::new();
        let result = async {
            loop {
                if cancel.is_cancelled() {
                    return Err(crate::error::Error::Cancelled);
                }
                match it.next(cancel).await? {
                    Some(v) => out.push(v),
                    None => return Ok(()),
                }
            }
        }
        .await;
        it.close().await?;
        result?;
        Ok(out)
    }

    /// Invoke `f` for every value as it is pulled. Equivalent to
    /// `drain(f).run(cancel)` but without constructing a [`Runnable`].
    pub async fn for_each(
        &self,
        cancel: &CancellationToken,
        mut f: impl FnMut(T) -> Result<()> + Send,
    ) -> Result<()> {
        let mut it = self.build();
        let result = async {
            loop {
                if cancel.is_cancelled() {
                    return Err(crate::error::Error::Cancelled);
                }
                match it.next(cancel).await? {
                    Some(v) => f(v)?,
                    None => return Ok(()),
                }
            }
        }
        .await;
        it.close().await?;
        result
    }

    /// Compose this pipeline with a sink into a [`Runnable`]. Nothing runs
    /// until [`Runnable::run`] is called.
    pub fn drain(self, sink: impl DrainSink<T> + 'static) -> Runnable<T> {
        Runnable {
            pipeline: self,
            sink: std::sync::Arc::new(sink),
        }
    }
}
