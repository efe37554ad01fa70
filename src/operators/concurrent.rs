// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Concurrent operators: `FanOut`, `Buffer`, `Parallel`, `Merge`.
//!
//! Each of these spawns managed tasks whose lifetime is tied to the
//! [`CancellationToken`] passed into the first `next()` call — construction
//! itself (building the `Pipeline`) never spawns anything, preserving
//! laziness. `Merge` and `Parallel` do not preserve source order; `FanOut`
//! preserves both the declaration order of its functions within a slice and
//! the source order across items, since it processes one input at a time.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;

use super::iterator::{BoxIterator, PullIterator};
use super::Pipeline;
use crate::error::{Error, Result};

type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send>>;

// ---------------------------------------------------------------------
// FanOut
// ---------------------------------------------------------------------

struct FanOutIterator<T, O> {
    inner: BoxIterator<T>,
    fns: Vec<Arc<dyn Fn(T) -> BoxFuture<O> + Send + Sync>>,
}

#[async_trait]
impl<T, O> PullIterator<Vec<O>> for FanOutIterator<T, O>
where
    T: Clone + Send + 'static,
    O: Send + 'static,
{
    async fn next(&mut self, cancel: &CancellationToken) -> Result<Option<Vec<O>>> {
        let input = match self.inner.next(cancel).await? {
            Some(v) => v,
            None => return Ok(None),
        };
        let futures = self.fns.iter().map(|f| f(input.clone()));
        let results = join_all(futures).await;
        let mut out = Vec::with_capacity(results.len());
        for r in results {
            out.push(r?);
        }
        Ok(Some(out))
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}

impl<T: Clone + Send + 'static> Pipeline<T> {
    /// For each input, run every function in `fns` concurrently and emit
    /// their results as a slice in declaration order. Any function error
    /// aborts the stream.
    pub fn fan_out<O: Send + 'static>(
        self,
        fns: Vec<Arc<dyn Fn(T) -> BoxFuture<O> + Send + Sync>>,
    ) -> Pipeline<Vec<O>> {
        Pipeline::from_iterator(move || {
            Box::new(FanOutIterator {
                inner: self.build(),
                fns: fns.clone(),
            })
        })
    }
}

// ---------------------------------------------------------------------
// Buffer
// ---------------------------------------------------------------------

struct BufferIterator<T: Send + 'static> {
    source: Option<BoxIterator<T>>,
    capacity: usize,
    rx: Option<mpsc::Receiver<Result<T>>>,
    producer: Option<tokio::task::JoinHandle<()>>,
}

impl<T: Send + 'static> BufferIterator<T> {
    fn ensure_started(&mut self, cancel: CancellationToken) {
        if self.rx.is_some() {
            return;
        }
        let mut inner = self.source.take().expect("buffer source taken once");
        let (tx, rx) = mpsc::channel(self.capacity.max(1));
        let producer_cancel = cancel;
        let handle = tokio::spawn(async move {
            loop {
                if producer_cancel.is_cancelled() {
                    break;
                }
                match inner.next(&producer_cancel).await {
                    Ok(Some(v)) => {
                        if tx.send(Ok(v)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                }
            }
            let _ = inner.close().await;
        });
        self.rx = Some(rx);
        self.producer = Some(handle);
    }
}

#[async_trait]
impl<T: Send + 'static> PullIterator<T> for BufferIterator<T> {
    async fn next(&mut self, cancel: &CancellationToken) -> Result<Option<T>> {
        self.ensure_started(cancel.clone());
        let rx = self.rx.as_mut().expect("started above");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            msg = rx.recv() => match msg {
                Some(Ok(v)) => Ok(Some(v)),
                Some(Err(e)) => Err(e),
                None => Ok(None),
            },
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(handle) = self.producer.take() {
            handle.abort();
        }
        self.rx = None;
        Ok(())
    }
}

impl<T: Send + 'static> Pipeline<T> {
    /// Decouple producer from consumer through a channel of capacity
    /// `max(n, 1)`. A background task drives the upstream chain;
    /// cancellation stops both sides.
    pub fn buffer(self, n: usize) -> Pipeline<T> {
        Pipeline::from_iterator(move || {
            Box::new(BufferIterator {
                source: Some(self.build()),
                capacity: n,
                rx: None,
                producer: None,
            })
        })
    }
}

// ---------------------------------------------------------------------
// Parallel
// ---------------------------------------------------------------------

struct ParallelIterator<T: Send + 'static, U: Send + 'static> {
    source: Option<BoxIterator<T>>,
    workers: usize,
    f: Arc<dyn Fn(T) -> BoxFuture<U> + Send + Sync>,
    rx: Option<mpsc::Receiver<Result<U>>>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl<T: Send + 'static, U: Send + 'static> ParallelIterator<T, U> {
    fn ensure_started(&mut self, cancel: CancellationToken) {
        if self.rx.is_some() {
            return;
        }
        let inner = self.source.take().expect("parallel source taken once");
        let worker_count = self.workers.max(1);

        let (in_tx, in_rx) = mpsc::channel::<T>(worker_count * 2);
        let in_rx = Arc::new(AsyncMutex::new(in_rx));
        let (out_tx, out_rx) = mpsc::channel::<Result<U>>(worker_count * 2);
        let pool_cancel = CancellationToken::new();

        // Dispatcher: pulls from the source, feeds the worker pool.
        {
            let mut inner = inner;
            let dispatch_cancel = cancel.clone();
            let pool_cancel = pool_cancel.clone();
            self.tasks.push(tokio::spawn(async move {
                loop {
                    if dispatch_cancel.is_cancelled() || pool_cancel.is_cancelled() {
                        break;
                    }
                    match inner.next(&dispatch_cancel).await {
                        Ok(Some(v)) => {
                            if in_tx.send(v).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(_) => break,
                    }
                }
                let _ = inner.close().await;
            }));
        }

        // Workers: compete for items off the shared input channel.
        for _ in 0..worker_count {
            let in_rx = in_rx.clone();
            let out_tx = out_tx.clone();
            let f = self.f.clone();
            let worker_cancel = cancel.clone();
            let pool_cancel = pool_cancel.clone();
            self.tasks.push(tokio::spawn(async move {
                loop {
                    if worker_cancel.is_cancelled() || pool_cancel.is_cancelled() {
                        break;
                    }
                    let item = {
                        let mut guard = in_rx.lock().await;
                        guard.recv().await
                    };
                    match item {
                        Some(v) => match f(v).await {
                            Ok(out) => {
                                if out_tx.send(Ok(out)).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                pool_cancel.cancel();
                                let _ = out_tx.send(Err(e)).await;
                                break;
                            }
                        },
                        None => break,
                    }
                }
            }));
        }

        self.rx = Some(out_rx);
    }
}

#[async_trait]
impl<T: Send + 'static, U: Send + 'static> PullIterator<U> for ParallelIterator<T, U> {
    async fn next(&mut self, cancel: &CancellationToken) -> Result<Option<U>> {
        self.ensure_started(cancel.clone());
        let rx = self.rx.as_mut().expect("started above");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            msg = rx.recv() => match msg {
                Some(Ok(v)) => Ok(Some(v)),
                Some(Err(e)) => Err(e),
                None => Ok(None),
            },
        }
    }

    async fn close(&mut self) -> Result<()> {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.rx = None;
        Ok(())
    }
}

impl<T: Send + 'static> Pipeline<T> {
    /// Run `f` over a worker pool of `n`. Order is not preserved; any
    /// worker error cancels the whole pool.
    pub fn parallel<U: Send + 'static>(
        self,
        n: usize,
        f: impl Fn(T) -> BoxFuture<U> + Send + Sync + 'static,
    ) -> Pipeline<U> {
        let f = Arc::new(f);
        Pipeline::from_iterator(move || {
            Box::new(ParallelIterator {
                source: Some(self.build()),
                workers: n,
                f: f.clone(),
                rx: None,
                tasks: Vec::new(),
            })
        })
    }
}

// ---------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------

struct MergeIterator<T: Send + 'static> {
    sources: Option<Vec<BoxIterator<T>>>,
    rx: Option<mpsc::Receiver<Result<T>>>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl<T: Send + 'static> MergeIterator<T> {
    fn ensure_started(&mut self, cancel: CancellationToken) {
        if self.rx.is_some() {
            return;
        }
        let sources = self.sources.take().expect("merge sources taken once");
        let (tx, rx) = mpsc::channel(sources.len().max(1) * 2);
        for mut src in sources {
            let tx = tx.clone();
            let cancel = cancel.clone();
            self.tasks.push(tokio::spawn(async move {
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    match src.next(&cancel).await {
                        Ok(Some(v)) => {
                            if tx.send(Ok(v)).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            break;
                        }
                    }
                }
                let _ = src.close().await;
            }));
        }
        self.rx = Some(rx);
    }
}

#[async_trait]
impl<T: Send + 'static> PullIterator<T> for MergeIterator<T> {
    async fn next(&mut self, cancel: &CancellationToken) -> Result<Option<T>> {
        self.ensure_started(cancel.clone());
        let rx = self.rx.as_mut().expect("started above");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            msg = rx.recv() => match msg {
                Some(Ok(v)) => Ok(Some(v)),
                Some(Err(e)) => Err(e),
                None => Ok(None),
            },
        }
    }

    async fn close(&mut self) -> Result<()> {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.rx = None;
        Ok(())
    }
}

impl<T: Send + 'static> Pipeline<T> {
    /// Concurrent fan-in of `pipelines`. Order is not preserved.
    pub fn merge(pipelines: Vec<Pipeline<T>>) -> Pipeline<T> {
        Pipeline::from_iterator(move || {
            let sources = pipelines.iter().map(|p| p.build()).collect();
            Box::new(MergeIterator {
                sources: Some(sources),
                rx: None,
                tasks: Vec::new(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fan_out_preserves_declaration_order() {
        let cancel = CancellationToken::new();
        let fns: Vec<Arc<dyn Fn(i32) -> BoxFuture<i32> + Send + Sync>> = vec![
            Arc::new(|x: i32| Box::pin(async move { Ok(x + 1) }) as BoxFuture<i32>),
            Arc::new(|x: i32| Box::pin(async move { Ok(x * 10) }) as BoxFuture<i32>),
        ];
        let out = Pipeline::from_slice(vec![1, 2])
            .fan_out(fns)
            .collect(&cancel)
            .await
            .unwrap();
        assert_eq!(out, vec![vec![2, 10], vec![3, 20]]);
    }

    #[tokio::test]
    async fn buffer_preserves_all_values() {
        let cancel = CancellationToken::new();
        let out = Pipeline::from_slice(vec![1, 2, 3, 4])
            .buffer(2)
            .collect(&cancel)
            .await
            .unwrap();
        assert_eq!(out, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn parallel_processes_every_item() {
        let cancel = CancellationToken::new();
        let mut out = Pipeline::from_slice(vec![1, 2, 3, 4, 5])
            .parallel(3, |x: i32| Box::pin(async move { Ok(x * 2) }) as BoxFuture<i32>)
            .collect(&cancel)
            .await
            .unwrap();
        out.sort_unstable();
        assert_eq!(out, vec![2, 4, 6, 8, 10]);
    }

    #[tokio::test]
    async fn merge_yields_every_value_from_every_source() {
        let cancel = CancellationToken::new();
        let mut out = Pipeline::merge(vec![
            Pipeline::from_slice(vec![1, 2]),
            Pipeline::from_slice(vec![3, 4]),
        ])
        .collect(&cancel)
        .await
        .unwrap();
        out.sort_unstable();
        assert_eq!(out, vec![1, 2, 3, 4]);
    }
}
