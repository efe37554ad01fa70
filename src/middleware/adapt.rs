// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! `Adapt[I,O ↔ BI,BO]`: bridge a provider of one input/output shape into
//! another via a pair of pure mapping functions. Errors from the wrapped
//! provider surface unchanged.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::provider::{Provider, RequestResponse};

/// Wraps a `RequestResponse<BI, BO>` as a `RequestResponse<I, O>`.
pub struct Adapt<BI, BO, I, O> {
    base: Arc<dyn RequestResponse<BI, BO>>,
    in_map: Arc<dyn Fn(I) -> BI + Send + Sync>,
    out_map: Arc<dyn Fn(BO) -> O + Send + Sync>,
}

impl<BI, BO, I, O> Adapt<BI, BO, I, O> {
    /// `in_map` converts the adapted input into the base provider's input;
    /// `out_map` converts the base provider's output back. Both are pure
    /// (infallible) per the provider algebra.
    pub fn new(
        base: Arc<dyn RequestResponse<BI, BO>>,
        in_map: impl Fn(I) -> BI + Send + Sync + 'static,
        out_map: impl Fn(BO) -> O + Send + Sync + 'static,
    ) -> Self {
        Self {
            base,
            in_map: Arc::new(in_map),
            out_map: Arc::new(out_map),
        }
    }
}

#[async_trait]
impl<BI: Send + 'static, BO: Send + 'static, I: Send + Sync + 'static, O: Send + 'static> Provider
    for Adapt<BI, BO, I, O>
{
    fn name(&self) -> &str {
        self.base.name()
    }

    async fn is_available(&self, cancel: &CancellationToken) -> bool {
        self.base.is_available(cancel).await
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[async_trait]
impl<BI: Send + 'static, BO: Send + 'static, I: Send + Sync + 'static, O: Send + 'static>
    RequestResponse<I, O> for Adapt<BI, BO, I, O>
{
    async fn execute(&self, cancel: &CancellationToken, input: I) -> Result<O> {
        let base_input = (self.in_map)(input);
        let base_output = self.base.execute(cancel, base_input).await?;
        Ok((self.out_map)(base_output))
    }
}
