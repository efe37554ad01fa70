// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! `Chain`: compose an ordered list of provider-wrapping transforms around
//! a base [`RequestResponse`].

use std::sync::Arc;

use crate::provider::RequestResponse;

/// A function that wraps an inner provider in an outer one of the same
/// shape. [`resilience::WithResilience`](super::resilience::WithResilience),
/// [`stateful::Stateful`](super::stateful::Stateful), and any
/// application-defined logging/auth wrapper are all valid transforms.
pub type Transform<I, O> =
    Arc<dyn Fn(Arc<dyn RequestResponse<I, O>>) -> Arc<dyn RequestResponse<I, O>> + Send + Sync>;

/// Compose `transforms` around `base`. A request flows through
/// `transforms[0]`, then `transforms[1]`, ..., then `base`; the response
/// flows back out in reverse, matching how each transform wraps the next.
pub fn chain<I, O>(
    base: Arc<dyn RequestResponse<I, O>>,
    transforms: &[Transform<I, O>],
) -> Arc<dyn RequestResponse<I, O>> {
    transforms.iter().rev().fold(base, |inner, wrap| wrap(inner))
}
