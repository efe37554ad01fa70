// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! `Stateful[I,O,C]`: materialize a per-call context from a
//! [`ContextStore`], present it to the underlying logic, and persist it on
//! success. Concurrency per key is serialized; concurrent distinct keys are
//! independent.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use crate::clock::{system_clock, Clock};
use crate::error::Result;
use crate::provider::{Provider, RequestResponse};

/// Per-key context storage with TTL. A missing key is not an error — it
/// yields `None`.
#[async_trait]
pub trait ContextStore<C>: Send + Sync {
    async fn load(&self, cancel: &CancellationToken, key: &str) -> Result<Option<C>>;
    async fn save(
        &self,
        cancel: &CancellationToken,
        key: &str,
        value: C,
        ttl: Option<Duration>,
    ) -> Result<()>;
    async fn delete(&self, cancel: &CancellationToken, key: &str) -> Result<()>;
}

struct Entry<C> {
    value: C,
    expires_at: Option<std::time::Instant>,
}

/// An in-memory [`ContextStore`] backed by a `DashMap`, suitable for tests
/// and single-process deployments.
pub struct InMemoryContextStore<C> {
    entries: DashMap<String, Entry<C>>,
    clock: Arc<dyn Clock>,
}

impl<C> InMemoryContextStore<C> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            clock: system_clock(),
        }
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }
}

impl<C> Default for InMemoryContextStore<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<C: Clone + Send + Sync + 'static> ContextStore<C> for InMemoryContextStore<C> {
    async fn load(&self, _cancel: &CancellationToken, key: &str) -> Result<Option<C>> {
        let Some(entry) = self.entries.get(key) else {
            return Ok(None);
        };
        if let Some(expires_at) = entry.expires_at {
            if self.clock.now() >= expires_at {
                drop(entry);
                self.entries.remove(key);
                return Ok(None);
            }
        }
        Ok(Some(entry.value.clone()))
    }

    async fn save(
        &self,
        _cancel: &CancellationToken,
        key: &str,
        value: C,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let expires_at = ttl.map(|d| self.clock.now() + d);
        self.entries
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, _cancel: &CancellationToken, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// The underlying call a [`Stateful`] wrapper presents a materialized
/// context to. Returns the output alongside the context to persist.
#[async_trait]
pub trait StatefulLogic<I, O, C>: Send + Sync {
    async fn call(&self, cancel: &CancellationToken, input: I, context: C) -> Result<(O, C)>;
}

/// Wraps [`StatefulLogic`] as a `RequestResponse<I, O>`, loading and saving
/// context by a key derived from the input.
pub struct Stateful<I, O, C> {
    name: String,
    store: Arc<dyn ContextStore<C>>,
    key_of: Arc<dyn Fn(&I) -> String + Send + Sync>,
    default_context: Arc<dyn Fn() -> C + Send + Sync>,
    ttl: Option<Duration>,
    logic: Arc<dyn StatefulLogic<I, O, C>>,
    locks: DashMap<String, Arc<AsyncMutex<()>>>,
}

impl<I, O, C> Stateful<I, O, C> {
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn ContextStore<C>>,
        key_of: impl Fn(&I) -> String + Send + Sync + 'static,
        default_context: impl Fn() -> C + Send + Sync + 'static,
        ttl: Option<Duration>,
        logic: Arc<dyn StatefulLogic<I, O, C>>,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            key_of: Arc::new(key_of),
            default_context: Arc::new(default_context),
            ttl,
            logic,
            locks: DashMap::new(),
        }
    }

    /// Per-key lock so concurrent calls against the same key serialize
    /// while distinct keys proceed independently.
    fn lock_for(&self, key: &str) -> Arc<AsyncMutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

#[async_trait]
impl<I: Send + Sync + 'static, O: Send + 'static, C: Send + Sync + 'static> Provider
    for Stateful<I, O, C>
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_available(&self, _cancel: &CancellationToken) -> bool {
        true
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[async_trait]
impl<I: Send + Sync + 'static, O: Send + 'static, C: Send + Sync + 'static> RequestResponse<I, O>
    for Stateful<I, O, C>
{
    async fn execute(&self, cancel: &CancellationToken, input: I) -> Result<O> {
        let key = (self.key_of)(&input);
        let key_lock = self.lock_for(&key);
        let _guard = key_lock.lock().await;

        let context = match self.store.load(cancel, &key).await? {
            Some(c) => c,
            None => (self.default_context)(),
        };
        let (output, new_context) = self.logic.call(cancel, input, context).await?;
        self.store.save(cancel, &key, new_context, self.ttl).await?;
        Ok(output)
    }
}
