// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Sequential, order-preserving operators: `Map`, `Filter`, `FlatMap`,
//! `Tap`, `TapEach`, `Reduce`, `Concat`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::iterator::{BoxIterator, PullIterator};
use super::Pipeline;
use crate::error::Result;

struct MapIterator<T, U, F> {
    inner: BoxIterator<T>,
    f: F,
    _marker: std::marker::PhantomData<fn(T) -> U>,
}

#[async_trait]
impl<T, U, F> PullIterator<U> for MapIterator<T, U, F>
where
    T: Send,
    U: Send,
    F: Fn(T) -> Result<U> + Send,
{
    async fn next(&mut self, cancel: &CancellationToken) -> Result<Option<U>> {
        match self.inner.next(cancel).await? {
            Some(v) => Ok(Some((self.f)(v)?)),
            None => Ok(None),
        }
    }
    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}

struct FilterIterator<T, F> {
    inner: BoxIterator<T>,
    pred: F,
}

#[async_trait]
impl<T, F> PullIterator<T> for FilterIterator<T, F>
where
    T: Send,
    F: Fn(&T) -> Result<bool> + Send,
{
    async fn next(&mut self, cancel: &CancellationToken) -> Result<Option<T>> {
        loop {
            match self.inner.next(cancel).await? {
                Some(v) => {
                    if (self.pred)(&v)? {
                        return Ok(Some(v));
                    }
                }
                None => return Ok(None),
            }
        }
    }
    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}

struct FlatMapIterator<T, U, F> {
    inner: BoxIterator<T>,
    f: F,
    current: Option<BoxIterator<U>>,
}

#[async_trait]
impl<T, U, F> PullIterator<U> for FlatMapIterator<T, U, F>
where
    T: Send,
    U: Send,
    F: Fn(T) -> Result<BoxIterator<U>> + Send,
{
    async fn next(&mut self, cancel: &CancellationToken) -> Result<Option<U>> {
        loop {
            if let Some(cur) = self.current.as_mut() {
                if let Some(v) = cur.next(cancel).await? {
                    return Ok(Some(v));
                }
                // Inner iterator exhausted: close it before moving on.
                cur.close().await?;
                self.current = None;
            }
            match self.inner.next(cancel).await? {
                Some(v) => {
                    self.current = Some((self.f)(v)?);
                }
                None => return Ok(None),
            }
        }
    }
    async fn close(&mut self) -> Result<()> {
        if let Some(mut cur) = self.current.take() {
            cur.close().await?;
        }
        self.inner.close().await
    }
}

struct TapIterator<T, F> {
    inner: BoxIterator<T>,
    f: F,
}

#[async_trait]
impl<T, F> PullIterator<T> for TapIterator<T, F>
where
    T: Send,
    F: Fn(&T) -> Result<()> + Send,
{
    async fn next(&mut self, cancel: &CancellationToken) -> Result<Option<T>> {
        match self.inner.next(cancel).await? {
            Some(v) => {
                (self.f)(&v)?;
                Ok(Some(v))
            }
            None => Ok(None),
        }
    }
    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}

type TapEachFn<T> = Arc<dyn Fn(&T) -> Result<()> + Send + Sync>;

struct TapEachIterator<T> {
    inner: BoxIterator<Vec<T>>,
    fns: Vec<TapEachFn<T>>,
}

#[async_trait]
impl<T: Send> PullIterator<Vec<T>> for TapEachIterator<T> {
    async fn next(&mut self, cancel: &CancellationToken) -> Result<Option<Vec<T>>> {
        match self.inner.next(cancel).await? {
            Some(slice) => {
                for (i, item) in slice.iter().enumerate() {
                    if let Some(f) = self.fns.get(i) {
                        f(item)?;
                    }
                    // Extra slots past `fns.len()` are ignored; extra
                    // `fns` past `slice.len()` simply never run this tick.
                }
                Ok(Some(slice))
            }
            None => Ok(None),
        }
    }
    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}

struct ReduceIterator<T, A, F> {
    inner: BoxIterator<T>,
    acc: Option<A>,
    f: F,
    done: bool,
}

#[async_trait]
impl<T, A, F> PullIterator<A> for ReduceIterator<T, A, F>
where
    T: Send,
    A: Send + Clone,
    F: Fn(A, T) -> Result<A> + Send,
{
    async fn next(&mut self, cancel: &CancellationToken) -> Result<Option<A>> {
        if self.done {
            return Ok(None);
        }
        loop {
            match self.inner.next(cancel).await? {
                Some(v) => {
                    let acc = self.acc.take().expect("reduce accumulator always present");
                    self.acc = Some((self.f)(acc, v)?);
                }
                None => {
                    self.done = true;
                    return Ok(self.acc.take());
                }
            }
        }
    }
    async fn close(&mut self) -> Result<()> {
        self.done = true;
        self.inner.close().await
    }
}

struct ConcatIterator<T> {
    remaining: std::collections::VecDeque<BoxIterator<T>>,
    current: Option<BoxIterator<T>>,
}

#[async_trait]
impl<T: Send> PullIterator<T> for ConcatIterator<T> {
    async fn next(&mut self, cancel: &CancellationToken) -> Result<Option<T>> {
        loop {
            if self.current.is_none() {
                self.current = self.remaining.pop_front();
            }
            match self.current.as_mut() {
                None => return Ok(None),
                Some(cur) => match cur.next(cancel).await? {
                    Some(v) => return Ok(Some(v)),
                    None => {
                        cur.close().await?;
                        self.current = None;
                    }
                },
            }
        }
    }
    async fn close(&mut self) -> Result<()> {
        if let Some(mut cur) = self.current.take() {
            cur.close().await?;
        }
        while let Some(mut next) = self.remaining.pop_front() {
            next.close().await?;
        }
        Ok(())
    }
}

impl<T: Send + 'static> Pipeline<T> {
    /// 1→1 transform. `f` returning `Err` aborts the stream.
    pub fn map<U: Send + 'static>(
        self,
        f: impl Fn(T) -> Result<U> + Send + Sync + 'static,
    ) -> Pipeline<U> {
        let f = Arc::new(f);
        Pipeline::from_iterator(move || {
            let f = f.clone();
            Box::new(MapIterator {
                inner: self.build(),
                f: move |v: T| f(v),
                _marker: std::marker::PhantomData,
            })
        })
    }

    /// Drop items where `pred` is false.
    pub fn filter(self, pred: impl Fn(&T) -> Result<bool> + Send + Sync + 'static) -> Pipeline<T> {
        let pred = Arc::new(pred);
        Pipeline::from_iterator(move || {
            let pred = pred.clone();
            Box::new(FilterIterator {
                inner: self.build(),
                pred: move |v: &T| pred(v),
            })
        })
    }

    /// 1→iterator; concatenates inner iterators, closing each as it drains.
    pub fn flat_map<U: Send + 'static>(
        self,
        f: impl Fn(T) -> Result<BoxIterator<U>> + Send + Sync + 'static,
    ) -> Pipeline<U> {
        let f = Arc::new(f);
        Pipeline::from_iterator(move || {
            let f = f.clone();
            Box::new(FlatMapIterator {
                inner: self.build(),
                f: move |v: T| f(v),
                current: None,
            })
        })
    }

    /// Side effect, value unchanged. A tap error aborts the stream.
    pub fn tap(self, f: impl Fn(&T) -> Result<()> + Send + Sync + 'static) -> Pipeline<T> {
        let f = Arc::new(f);
        Pipeline::from_iterator(move || {
            let f = f.clone();
            Box::new(TapIterator {
                inner: self.build(),
                f: move |v: &T| f(v),
            })
        })
    }

    /// Reduce the source to exactly one accumulator value, emitted after
    /// source exhaustion.
    pub fn reduce<A: Send + Clone + 'static>(
        self,
        init: A,
        f: impl Fn(A, T) -> Result<A> + Send + Sync + 'static,
    ) -> Pipeline<A> {
        let f = Arc::new(f);
        Pipeline::from_iterator(move || {
            let f = f.clone();
            let init = init.clone();
            Box::new(ReduceIterator {
                inner: self.build(),
                acc: Some(init),
                f: move |a: A, v: T| f(a, v),
                done: false,
            })
        })
    }

    /// Concatenate `pipelines` serially, preserving order.
    pub fn concat(pipelines: Vec<Pipeline<T>>) -> Pipeline<T> {
        Pipeline::from_iterator(move || {
            let remaining: std::collections::VecDeque<BoxIterator<T>> =
                pipelines.iter().map(|p| p.build()).collect();
            Box::new(ConcatIterator {
                remaining,
                current: None,
            })
        })
    }
}

impl<T: Send + 'static> Pipeline<Vec<T>> {
    /// Apply `fns[i]` to `slice[i]`; extra slots on either side are
    /// ignored. The slice passes through unchanged.
    pub fn tap_each(self, fns: Vec<TapEachFn<T>>) -> Pipeline<Vec<T>> {
        Pipeline::from_iterator(move || {
            Box::new(TapEachIterator {
                inner: self.build(),
                fns: fns.clone(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::Pipeline;

    fn cancel() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test]
    async fn map_transforms_elementwise() {
        let c = cancel();
        let out = Pipeline::from_slice(vec![1, 2, 3])
            .map(|x| Ok(x * 2))
            .collect(&c)
            .await
            .unwrap();
        assert_eq!(out, vec![2, 4, 6]);
    }

    #[tokio::test]
    async fn filter_drops_false() {
        let c = cancel();
        let out = Pipeline::from_slice(vec![1, 2, 3, 4])
            .filter(|x| Ok(x % 2 == 0))
            .collect(&c)
            .await
            .unwrap();
        assert_eq!(out, vec![2, 4]);
    }

    #[tokio::test]
    async fn flat_map_concatenates_inner_iterators() {
        let c = cancel();
        let out = Pipeline::from_slice(vec![1, 2])
            .flat_map(|x| Ok(super::super::iterator::VecIterator::new(vec![x, x * 10])))
            .collect(&c)
            .await
            .unwrap();
        assert_eq!(out, vec![1, 10, 2, 20]);
    }

    #[tokio::test]
    async fn reduce_with_identity_returns_init() {
        let c = cancel();
        let out = Pipeline::from_slice(Vec::<i32>::new())
            .reduce(0, |a, _: i32| Ok(a))
            .collect(&c)
            .await
            .unwrap();
        assert_eq!(out, vec![0]);
    }

    #[tokio::test]
    async fn reduce_sums() {
        let c = cancel();
        let out = Pipeline::from_slice(vec![1, 2, 3, 4])
            .reduce(0, |a, x| Ok(a + x))
            .collect(&c)
            .await
            .unwrap();
        assert_eq!(out, vec![10]);
    }

    #[tokio::test]
    async fn concat_preserves_order() {
        let c = cancel();
        let out = Pipeline::concat(vec![
            Pipeline::from_slice(vec![1, 2]),
            Pipeline::from_slice(vec![3, 4]),
        ])
        .collect(&c)
        .await
        .unwrap();
        assert_eq!(out, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn tap_observes_values_unchanged() {
        let c = cancel();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let out = Pipeline::from_slice(vec![1, 2, 3])
            .tap(move |x| {
                seen2.lock().push(*x);
                Ok(())
            })
            .collect(&c)
            .await
            .unwrap();
        assert_eq!(out, vec![1, 2, 3]);
        assert_eq!(*seen.lock(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn construction_does_not_touch_the_source() {
        let touched = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let touched2 = touched.clone();
        let _pipeline = Pipeline::from_func(move || {
            let touched = touched2.clone();
            let mut done = false;
            move || {
                touched.store(true, std::sync::atomic::Ordering::SeqCst);
                if done {
                    Ok(None)
                } else {
                    done = true;
                    Ok(Some(1))
                }
            }
        })
        .map(|x: i32| Ok(x + 1))
        .filter(|_| Ok(true));
        assert!(!touched.load(std::sync::atomic::Ordering::SeqCst));
    }
}
