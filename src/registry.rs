// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Registry & Manager: named factory/instance storage, lifecycle
//! propagation, and provider selection.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::provider::Provider;

/// A concurrent-safe name → factory/instance registry. The first
/// successful registration (either kind) becomes the default.
pub struct Registry<T: ?Sized> {
    factories: DashMap<String, Arc<dyn Fn() -> Arc<T> + Send + Sync>>,
    instances: DashMap<String, Arc<T>>,
    default: Mutex<Option<String>>,
}

impl<T: ?Sized> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> Registry<T> {
    pub fn new() -> Self {
        Self {
            factories: DashMap::new(),
            instances: DashMap::new(),
            default: Mutex::new(None),
        }
    }

    fn claim_default_if_first(&self, name: &str) {
        let mut default = self.default.lock();
        if default.is_none() {
            *default = Some(name.to_string());
        }
    }

    /// Register a pre-built instance under `name`.
    pub fn register_instance(&self, name: impl Into<String>, instance: Arc<T>) {
        let name = name.into();
        self.instances.insert(name.clone(), instance);
        self.claim_default_if_first(&name);
    }

    /// Register a factory under `name`; [`Registry::get`] calls it fresh on
    /// every lookup that doesn't hit a registered instance of the same
    /// name.
    pub fn register_factory(
        &self,
        name: impl Into<String>,
        factory: impl Fn() -> Arc<T> + Send + Sync + 'static,
    ) {
        let name = name.into();
        self.factories.insert(name.clone(), Arc::new(factory));
        self.claim_default_if_first(&name);
    }

    /// Look up `name`, preferring a registered instance over a factory.
    pub fn get(&self, name: &str) -> Option<Arc<T>> {
        if let Some(instance) = self.instances.get(name) {
            return Some(instance.clone());
        }
        self.factories.get(name).map(|f| f())
    }

    /// Like [`Registry::get`] but fails with [`Error::NotRegistered`].
    pub fn must_get(&self, name: &str) -> Result<Arc<T>> {
        self.get(name)
            .ok_or_else(|| Error::NotRegistered(name.to_string()))
    }

    /// Change the default name. Fails if `name` is registered under neither
    /// map.
    pub fn set_default(&self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if !self.instances.contains_key(&name) && !self.factories.contains_key(&name) {
            return Err(Error::NotRegistered(name));
        }
        *self.default.lock() = Some(name);
        Ok(())
    }

    /// The provider registered as default, if any.
    pub fn default_instance(&self) -> Option<Arc<T>> {
        let name = self.default.lock().clone()?;
        self.get(&name)
    }

    /// All registered names, instance and factory, deduplicated and sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .instances
            .iter()
            .map(|e| e.key().clone())
            .chain(self.factories.iter().map(|e| e.key().clone()))
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

/// Optional capability: a provider that needs async setup before use.
#[async_trait]
pub trait Initializable: Send + Sync {
    async fn init(&self) -> Result<()>;
}

/// Optional capability: a provider that needs async teardown.
#[async_trait]
pub trait Closeable: Send + Sync {
    async fn close(&self) -> Result<()>;
}

/// Wraps a [`Registry`] with lifecycle propagation: `start`/`stop` probe
/// each registered instance via [`Provider::as_initializable`]/
/// [`Provider::as_closeable`] rather than requiring every provider to
/// implement both capabilities.
pub struct Manager<T: Provider + ?Sized> {
    pub registry: Registry<T>,
}

impl<T: Provider + ?Sized> Default for Manager<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Provider + ?Sized> Manager<T> {
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
        }
    }

    /// Call `init` on every registered instance that implements
    /// [`Initializable`]. Providers that don't are skipped, not an error.
    pub async fn start(&self) -> Result<()> {
        for name in self.registry.names() {
            if let Some(provider) = self.registry.get(&name) {
                if let Some(initializable) = provider.as_initializable() {
                    initializable.init().await?;
                }
            }
        }
        Ok(())
    }

    /// Call `close` on every registered instance that implements
    /// [`Closeable`].
    pub async fn stop(&self) -> Result<()> {
        for name in self.registry.names() {
            if let Some(provider) = self.registry.get(&name) {
                if let Some(closeable) = provider.as_closeable() {
                    closeable.close().await?;
                }
            }
        }
        Ok(())
    }
}

/// Chooses one available provider from a pool.
#[async_trait]
pub trait Selector<T: Provider + ?Sized>: Send + Sync {
    async fn select(&self, cancel: &CancellationToken, pool: &[Arc<T>]) -> Result<Arc<T>>;
}

/// Returns the first provider in declaration order for which
/// `is_available` returns `true`.
pub struct FirstHealthy;

#[async_trait]
impl<T: Provider + ?Sized> Selector<T> for FirstHealthy {
    async fn select(&self, cancel: &CancellationToken, pool: &[Arc<T>]) -> Result<Arc<T>> {
        for provider in pool {
            if provider.is_available(cancel).await {
                return Ok(provider.clone());
            }
        }
        Err(Error::Unavailable("no healthy provider in pool".into()))
    }
}

/// Cycles through the pool, skipping unavailable providers, advancing the
/// cursor on every call regardless of outcome.
pub struct RoundRobin {
    cursor: std::sync::atomic::AtomicUsize,
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundRobin {
    pub fn new() -> Self {
        Self {
            cursor: std::sync::atomic::AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl<T: Provider + ?Sized> Selector<T> for RoundRobin {
    async fn select(&self, cancel: &CancellationToken, pool: &[Arc<T>]) -> Result<Arc<T>> {
        if pool.is_empty() {
            return Err(Error::Unavailable("empty pool".into()));
        }
        let len = pool.len();
        for _ in 0..len {
            let idx = self
                .cursor
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
                % len;
            let candidate = &pool[idx];
            if candidate.is_available(cancel).await {
                return Ok(candidate.clone());
            }
        }
        Err(Error::Unavailable("no healthy provider in pool".into()))
    }
}

/// Picks among available providers with probability proportional to a
/// caller-supplied weight. Falls back to [`FirstHealthy`] semantics if no
/// weighted candidate is available.
pub struct Weighted {
    weights: Vec<u32>,
}

impl Weighted {
    pub fn new(weights: Vec<u32>) -> Self {
        Self { weights }
    }
}

#[async_trait]
impl<T: Provider + ?Sized> Selector<T> for Weighted {
    async fn select(&self, cancel: &CancellationToken, pool: &[Arc<T>]) -> Result<Arc<T>> {
        use rand::Rng;
        let mut available: Vec<(usize, &Arc<T>)> = Vec::new();
        for (idx, provider) in pool.iter().enumerate() {
            if provider.is_available(cancel).await {
                available.push((idx, provider));
            }
        }
        if available.is_empty() {
            return Err(Error::Unavailable("no healthy provider in pool".into()));
        }
        let total: u32 = available
            .iter()
            .map(|(idx, _)| self.weights.get(*idx).copied().unwrap_or(1))
            .sum();
        if total == 0 {
            return Ok(available[0].1.clone());
        }
        let mut pick = rand::thread_rng().gen_range(0..total);
        for (idx, provider) in &available {
            let w = self.weights.get(*idx).copied().unwrap_or(1);
            if pick < w {
                return Ok((*provider).clone());
            }
            pick -= w;
        }
        Ok(available[0].1.clone())
    }
}
