// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # Tool Bridge
//!
//! Wraps an [`Engine`] + [`Graph`] pair as a single
//! [`RequestResponse<I, O>`] provider: each `execute` allocates a fresh
//! [`State`], writes the input into it, runs the graph to completion, and
//! reads the output back out. This is how whole pipelines compose as one
//! step in a larger graph.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::engine::Engine;
use crate::error::Result;
use crate::graph::Graph;
use crate::provider::{Provider, RequestResponse};
use crate::state::State;

/// Writes `input` into a fresh [`State`] before the bridged graph runs.
pub type InputWriter<I> = Box<dyn Fn(&State, I) -> Result<()> + Send + Sync>;

/// Reads the output back out of [`State`] after the bridged graph
/// completes. Returning `Err` surfaces as the bridge's `execute` error even
/// if every node in the graph completed.
pub type OutputReader<O> = Box<dyn Fn(&State) -> Result<O> + Send + Sync>;

/// A [`RequestResponse<I, O>`] backed by a whole [`Graph`].
pub struct ToolBridge<I, O> {
    name: String,
    engine: Engine,
    graph: Graph,
    input_writer: InputWriter<I>,
    output_reader: OutputReader<O>,
}

impl<I, O> ToolBridge<I, O> {
    pub fn new(
        name: impl Into<String>,
        engine: Engine,
        graph: Graph,
        input_writer: InputWriter<I>,
        output_reader: OutputReader<O>,
    ) -> Self {
        Self {
            name: name.into(),
            engine,
            graph,
            input_writer,
            output_reader,
        }
    }
}

#[async_trait]
impl<I: Send + Sync + 'static, O: Send + 'static> Provider for ToolBridge<I, O> {
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
impl<I: Send + Sync + 'static, O: Send + 'static> RequestResponse<I, O> for ToolBridge<I, O> {
    async fn execute(&self, cancel: &CancellationToken, input: I) -> Result<O> {
        let state = State::new();
        (self.input_writer)(&state, input)?;
        self.engine.execute_batch(cancel, &self.graph, &state).await?;
        (self.output_reader)(&state)
    }
}
