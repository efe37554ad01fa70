// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # Middleware
//!
//! Wrappers that compose around a [`crate::provider::RequestResponse`]
//! without changing its shape: [`chain`] stitches an ordered list of
//! transforms around a base provider, [`adapt::Adapt`] bridges mismatched
//! input/output types, [`resilience::WithResilience`] adds rate
//! limiting/circuit breaking/retry, and [`stateful::Stateful`] injects a
//! per-key context loaded from a [`stateful::ContextStore`].

pub mod adapt;
pub mod chain;
pub mod resilience;
pub mod stateful;

pub use adapt::Adapt;
pub use chain::{chain, Transform};
pub use resilience::WithResilience;
pub use stateful::Stateful;
