// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # Pipeline Operators (pull-based)
//!
//! A [`Pipeline<T>`] is a lazy factory: constructing it — `Map`, `Filter`,
//! `FlatMap`, and friends — never touches the source. Work only happens
//! when a terminal (`collect`, `for_each`, `drain`) drives the built
//! [`PullIterator`] to exhaustion. Every operator below returns a new
//! `Pipeline`, so chains read left to right:
//!
//! ```
//! use flowcore::operators::Pipeline;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let cancel = CancellationToken::new();
//! let out = Pipeline::from_slice(vec![1, 2, 3, 4, 5])
//!     .map(|x| Ok(x * 2))
//!     .filter(|x| Ok(x % 4 == 0))
//!     .collect(&cancel)
//!     .await
//!     .unwrap();
//! assert_eq!(out, vec![4, 8]);
//! # }
//! ```

pub mod basic;
pub mod concurrent;
pub mod iterator;
pub mod terminal;
pub mod time;

use std::sync::Arc;

use crate::error::Result;
use iterator::{BoxIterator, FuncIterator, VecIterator};

/// A lazy, rebuildable factory for a [`BoxIterator<T>`].
///
/// `Pipeline` is cheap to clone (an `Arc` around the factory closure) so a
/// chain can be built once and driven by more than one terminal.
pub struct Pipeline<T> {
    factory: Arc<dyn Fn() -> BoxIterator<T> + Send + Sync>,
}

impl<T> Clone for Pipeline<T> {
    fn clone(&self) -> Self {
        Self {
            factory: self.factory.clone(),
        }
    }
}

impl<T: Send + 'static> Pipeline<T> {
    /// Wrap an iterator-producing factory directly.
    pub fn from_iterator(factory: impl Fn() -> BoxIterator<T> + Send + Sync + 'static) -> Self {
        Self {
            factory: Arc::new(factory),
        }
    }

    /// Build a fresh iterator for this chain. Terminals call this; it is
    /// the only place construction "runs" the chain.
    pub fn build(&self) -> BoxIterator<T> {
        (self.factory)()
    }

    /// Source: replay a fixed, finite sequence of values.
    pub fn from_slice(items: Vec<T>) -> Self
    where
        T: Clone,
    {
        Self::from_iterator(move || VecIterator::new(items.clone()))
    }

    /// Source: drive a closure until it returns `Ok(None)`.
    pub fn from_func<F>(make: impl Fn() -> F + Send + Sync + 'static) -> Self
    where
        F: FnMut() -> Result<Option<T>> + Send + 'static,
    {
        Self::from_iterator(move || FuncIterator::new(make()))
    }
}

// Operator methods are implemented across basic.rs, concurrent.rs, and
// time.rs as `impl<T> Pipeline<T>` blocks, kept in separate files per
// operator family for readability; they all extend this same type.

pub use terminal::{DrainSink, Runnable};

/// Convenience re-export so call sites don't need `operators::iterator`.
pub use iterator::PullIterator as Iterator;
