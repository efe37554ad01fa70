// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # State & Ports
//!
//! [`State`] is a thread-safe heterogeneous key→value store. Nodes in a
//! [`crate::graph::Graph`] read and write it as the primary data channel
//! between dependency levels; the engine never passes values directly
//! between `Run` bodies.
//!
//! Values are opaque (`Box<dyn Any + Send + Sync>`) at the storage layer.
//! Typed access goes through a [`Port<T>`]: a `(key, expected type)` pair.
//! Reading through a port fails closed — [`Error::MissingKey`] if the key
//! is absent, [`Error::TypeMismatch`] if the stored value is not a `T`.
//! Writing never fails; it overwrites unconditionally.
//!
//! ## Example
//!
//! ```
//! use flowcore::state::{read, write, Port, State};
//!
//! const COUNT: Port<i64> = Port::new("count");
//!
//! let state = State::new();
//! write(&state, COUNT, 42);
//! assert_eq!(read(&state, COUNT).unwrap(), 42);
//! ```

use std::any::{type_name, Any};
use std::marker::PhantomData;
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{Error, Result};

/// A `(key, expected type)` pair giving typed access to a [`State`] map.
///
/// Ports are cheap, `Copy` values meant to be declared once (as `const`s)
/// near the nodes that use them.
#[derive(Debug)]
pub struct Port<T> {
    key: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Port<T> {
    /// Declare a port over `key`.
    pub const fn new(key: &'static str) -> Self {
        Self {
            key,
            _marker: PhantomData,
        }
    }

    /// The underlying state key.
    pub const fn key(&self) -> &'static str {
        self.key
    }
}

impl<T> Clone for Port<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Port<T> {}

/// Concurrent-safe heterogeneous key→value store.
///
/// Reads may overlap; writes are serialized with readers internally by
/// [`DashMap`]'s per-shard locking. `State` exclusively owns its map —
/// nothing outside `flowcore` holds a reference into its storage, only
/// `Arc<State>` handles to the container itself.
#[derive(Clone, Default)]
pub struct State {
    inner: Arc<DashMap<String, Entry>>,
}

/// Internal storage cell: the boxed value plus the static name of its
/// concrete type, kept so a failed [`Port`] read can report what was
/// actually found instead of `"<unknown>"`.
struct Entry {
    value: Box<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl State {
    /// Construct an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw get: returns a clone of the value if present and of type `T`.
    ///
    /// Unlike [`read`], this never distinguishes "absent" from "wrong
    /// type" — both produce `None`. Prefer `read`/[`Port`] in node bodies;
    /// this exists for callers that only need a presence check or already
    /// track expected types out of band.
    pub fn get<T: Clone + 'static>(&self, key: &str) -> Option<T> {
        self.inner
            .get(key)
            .and_then(|entry| entry.value.downcast_ref::<T>().cloned())
    }

    /// Whether any value (of any type) is stored under `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    /// Raw set: overwrite unconditionally. Never fails.
    pub fn set<T: Send + Sync + 'static>(&self, key: impl Into<String>, value: T) {
        self.inner.insert(
            key.into(),
            Entry {
                value: Box::new(value),
                type_name: type_name::<T>(),
            },
        );
    }

    /// Remove and return the value at `key`, if present and of type `T`.
    pub fn remove<T: 'static>(&self, key: &str) -> Option<T> {
        self.inner
            .remove(key)
            .and_then(|(_, entry)| entry.value.downcast::<T>().ok())
            .map(|b| *b)
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the state holds no keys.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Read `port` from `state`.
///
/// Fails with [`Error::MissingKey`] if the key is absent, or
/// [`Error::TypeMismatch`] if a value is present but not a `T`.
pub fn read<T: Clone + 'static>(state: &State, port: Port<T>) -> Result<T> {
    match state.inner.get(port.key) {
        None => Err(Error::MissingKey {
            key: port.key.to_string(),
            expected: type_name::<T>(),
        }),
        Some(entry) => {
            entry
                .value
                .downcast_ref::<T>()
                .cloned()
                .ok_or(Error::TypeMismatch {
                    key: port.key.to_string(),
                    expected: type_name::<T>(),
                    found: entry.type_name,
                })
        }
    }
}

/// Write `value` through `port` into `state`. Never fails.
pub fn write<T: Send + Sync + 'static>(state: &State, port: Port<T>, value: T) {
    state.set(port.key, value);
}
