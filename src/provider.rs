// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # Provider Algebra
//!
//! A [`Provider`] is the minimal identity + availability contract every
//! task in `flowcore` shares. Four shapes build on it:
//!
//! - [`RequestResponse`] — one input produces one output.
//! - [`Stream`] — one input produces a lazy [`PullIterator`] of outputs.
//! - [`Sink`] — accepts input, produces no output.
//! - [`Duplex`] — opens a bidirectional stream.
//!
//! Providers are registered by name in a [`crate::registry::Registry`],
//! optionally wrapped in [`crate::middleware`], and bridged into
//! [`crate::graph::Node`] bodies to become the unit of work the
//! [`crate::engine`] schedules.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::operators::iterator::BoxIterator;

/// Minimum contract every provider shape implements.
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    /// Stable, human-readable identity used for registry lookup, logging,
    /// and selector decisions.
    fn name(&self) -> &str;

    /// Whether the provider can currently accept work. Selectors consult
    /// this before dispatching; a provider that is always available may
    /// simply return `true`.
    async fn is_available(&self, cancel: &CancellationToken) -> bool;

    /// Exposes the concrete type via `Any`, for callers that need to
    /// downcast to a provider's concrete implementation.
    fn as_any(&self) -> &dyn std::any::Any;

    /// Opts into [`crate::registry::Initializable`] for
    /// [`crate::registry::Manager::start`]. `None` by default; a provider
    /// needing async setup overrides this to return `Some(self)`.
    fn as_initializable(&self) -> Option<&dyn crate::registry::Initializable> {
        None
    }

    /// Opts into [`crate::registry::Closeable`] for
    /// [`crate::registry::Manager::stop`]. `None` by default.
    fn as_closeable(&self) -> Option<&dyn crate::registry::Closeable> {
        None
    }
}

/// A provider that turns one `I` into one `O`.
#[async_trait]
pub trait RequestResponse<I, O>: Provider {
    /// Execute the call. `cancel` fires if the caller's context is
    /// cancelled; implementations should honor it at suspension points.
    async fn execute(&self, cancel: &CancellationToken, input: I) -> Result<O>;
}

/// A provider that turns one `I` into a lazy stream of `O`.
#[async_trait]
pub trait StreamProvider<I, O: Send + 'static>: Provider {
    /// Begin streaming. The returned iterator is lazy: no work happens
    /// until it is driven by `next`.
    async fn execute(&self, cancel: &CancellationToken, input: I) -> Result<BoxIterator<O>>;
}

/// A provider that accepts values without producing a response.
#[async_trait]
pub trait Sink<I>: Provider {
    /// Send one value. Errors surface to the caller; there is no implicit
    /// retry at this layer (wrap with [`crate::middleware::resilience`] for
    /// that).
    async fn send(&self, cancel: &CancellationToken, input: I) -> Result<()>;
}

/// A bidirectional stream opened by a [`Duplex`] provider.
#[async_trait]
pub trait DuplexStream<I, O>: Send {
    /// Send one value on the stream.
    async fn send(&mut self, cancel: &CancellationToken, input: I) -> Result<()>;
    /// Receive one value, or `None` on graceful stream end.
    async fn recv(&mut self, cancel: &CancellationToken) -> Result<Option<O>>;
    /// Close both halves. Idempotent.
    async fn close(&mut self) -> Result<()>;
}

/// A provider that opens a [`DuplexStream`].
#[async_trait]
pub trait Duplex<I, O>: Provider {
    /// The concrete duplex stream type this provider opens.
    type Stream: DuplexStream<I, O>;

    /// Open a new bidirectional session.
    async fn open(&self, cancel: &CancellationToken) -> Result<Self::Stream>;
}

/// Helper: run an async future with a timeout, mapping elapsed time out to
/// [`crate::error::Error::Timeout`] and cancellation to
/// [`crate::error::Error::Cancelled`].
pub async fn with_timeout<F, T>(
    cancel: &CancellationToken,
    timeout: Duration,
    fut: F,
) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    tokio::select! {
        res = fut => res,
        _ = tokio::time::sleep(timeout) => Err(crate::error::Error::Timeout),
        _ = cancel.cancelled() => Err(crate::error::Error::Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct Echo {
        name: String,
        available: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Provider for Echo {
        fn name(&self) -> &str {
            &self.name
        }
        async fn is_available(&self, _cancel: &CancellationToken) -> bool {
            self.available.load(Ordering::SeqCst)
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    #[async_trait]
    impl RequestResponse<String, String> for Echo {
        async fn execute(&self, _cancel: &CancellationToken, input: String) -> Result<String> {
            Ok(input)
        }
    }

    #[tokio::test]
    async fn request_response_executes() {
        let echo = Echo {
            name: "echo".into(),
            available: Arc::new(AtomicBool::new(true)),
        };
        let cancel = CancellationToken::new();
        let out = echo.execute(&cancel, "hi".to_string()).await.unwrap();
        assert_eq!(out, "hi");
        assert!(echo.is_available(&cancel).await);
    }

    #[tokio::test]
    async fn timeout_fires_before_completion() {
        let cancel = CancellationToken::new();
        let result: Result<()> = with_timeout(&cancel, Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(crate::error::Error::Timeout)));
    }
}
