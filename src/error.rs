// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Crate-wide error taxonomy.
//!
//! `flowcore` uses a single [`Error`] enum for every subsystem rather than a
//! per-module error type. This mirrors the taxonomy in the design
//! specification: state access, graph construction, pipeline resolution,
//! registry lookup, middleware gating, and node/iterator failures are all
//! distinct *kinds*, not distinct *types*, so callers match on `Error`
//! variants rather than downcasting across crate boundaries.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Whether an error should be retried by [`crate::middleware::resilience`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transience {
    /// The caller may retry; the failure is expected to be transient.
    Transient,
    /// Retrying will not help; surface the error immediately.
    Permanent,
}

/// The full error taxonomy for `flowcore`.
#[derive(Debug, Error)]
pub enum Error {
    /// A [`crate::state::Port`] read found no value for its key.
    #[error("missing key {key:?} (expected {expected})")]
    MissingKey {
        /// The state key that was read.
        key: String,
        /// The type name the port expected.
        expected: &'static str,
    },

    /// A [`crate::state::Port`] read found a value of the wrong type.
    #[error("type mismatch for key {key:?}: expected {expected}, found {found}")]
    TypeMismatch {
        /// The state key that was read.
        key: String,
        /// The type name the port expected.
        expected: &'static str,
        /// The type name actually stored.
        found: &'static str,
    },

    /// An edge referenced a node name absent from the graph.
    #[error("unknown node {0:?} referenced by an edge")]
    UnknownNode(String),

    /// [`crate::graph::build_levels`] detected a cycle.
    #[error("graph contains a cycle")]
    Cycle,

    /// Pipeline resolution revisited a pipeline already on its include stack.
    #[error("circular include detected at pipeline {0:?}")]
    CircularInclude(String),

    /// A node definition's `component` key has no registry entry.
    #[error("component {0:?} not found in registry")]
    ComponentNotFound(String),

    /// [`crate::registry::Registry::must_get`] found no such name.
    #[error("{0:?} is not registered")]
    NotRegistered(String),

    /// The caller's context/cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,

    /// A provider's `is_available` check returned false and no fallback
    /// selector policy applied.
    #[error("provider {0:?} is unavailable")]
    Unavailable(String),

    /// The rate limiter gate in [`crate::middleware::resilience`] rejected
    /// the call.
    #[error("rate limited")]
    RateLimited,

    /// The circuit breaker gate in [`crate::middleware::resilience`] is
    /// open.
    #[error("circuit open")]
    CircuitOpen,

    /// A call exceeded its allotted time budget.
    #[error("operation timed out")]
    Timeout,

    /// A node's `Run` body returned an application-level error. Recorded in
    /// the owning [`crate::engine::NodeResult`]; never fatal to the engine.
    #[error("node error: {0}")]
    NodeError(String),

    /// A pipeline operator failed; aborts the pull chain.
    #[error("iterator error: {0}")]
    IteratorError(String),

    /// A YAML pipeline document failed to parse.
    #[error("pipeline parse error: {0}")]
    ParseError(String),

    /// Catch-all for errors crossing from external collaborators (I/O,
    /// provider-specific failures) that do not fit a taxonomy row above.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Default transience classification used when no
    /// [`crate::middleware::resilience::RetryClassifier`] is supplied.
    ///
    /// `RateLimited`, `CircuitOpen`, and `Timeout` are transient; everything
    /// else is treated as permanent.
    pub fn default_transience(&self) -> Transience {
        match self {
            Error::RateLimited | Error::CircuitOpen | Error::Timeout => Transience::Transient,
            _ => Transience::Permanent,
        }
    }

    /// True if this error represents cooperative cancellation. Cancellation
    /// is always honored over other error handling (§7).
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
