// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # flowcore
//!
//! A DAG execution engine, pull-based pipeline operators, and a provider
//! composition framework for building orchestration tools on top of.
//!
//! ## Key Concepts
//!
//! - [`state`] — a thread-safe heterogeneous key→value store nodes use to
//!   exchange data.
//! - [`graph`] / [`engine`] — build a [`graph::Graph`] of [`graph::Node`]s,
//!   topologically level it, and run it with bounded per-level
//!   concurrency via [`engine::Engine`].
//! - [`provider`] / [`middleware`] — a polymorphic provider algebra
//!   (request/response, stream, sink, duplex) with composable middleware
//!   (chaining, type adaptation, rate limiting / circuit breaking / retry,
//!   per-key stateful context).
//! - [`registry`] — named provider storage, lifecycle propagation, and
//!   selection policies.
//! - [`pipeline`] — YAML pipeline documents, loaders, and the include
//!   resolver that turns a declarative pipeline into a [`graph::Graph`].
//! - [`session`] — per-run state plus schedule/condition gating for
//!   streaming pipelines.
//! - [`operators`] — a lazy, pull-based `Pipeline<T>` with the usual
//!   transform/fan-out/time-windowing operator set.
//! - [`bridge`] — wraps a whole graph as a single provider step.
//! - [`clock`] / [`observability`] — time and structured-event boundary
//!   traits external collaborators implement.
//!
//! ## Example
//!
//! ```
//! use flowcore::engine::{Engine, EngineConfig};
//! use flowcore::graph::{Graph, Node};
//! use flowcore::state::{read, write, Port, State};
//! use tokio_util::sync::CancellationToken;
//!
//! const COUNT: Port<i64> = Port::new("count");
//!
//! struct Increment;
//!
//! #[async_trait::async_trait]
//! impl Node for Increment {
//!     fn name(&self) -> &str {
//!         "increment"
//!     }
//!     async fn run(
//!         &self,
//!         _cancel: &CancellationToken,
//!         state: &State,
//!     ) -> flowcore::error::Result<serde_json::Value> {
//!         let current = read(state, COUNT).unwrap_or(0);
//!         write(state, COUNT, current + 1);
//!         Ok(serde_json::json!(current + 1))
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut graph = Graph::new();
//! graph.add_node(std::sync::Arc::new(Increment));
//!
//! let state = State::new();
//! let cancel = CancellationToken::new();
//! let engine = Engine::new(EngineConfig::default());
//! let result = engine.execute_batch(&cancel, &graph, &state).await.unwrap();
//! assert_eq!(result.node_results.len(), 1);
//! # }
//! ```

pub mod bridge;
pub mod clock;
pub mod engine;
pub mod error;
pub mod graph;
pub mod middleware;
pub mod observability;
pub mod operators;
pub mod pipeline;
pub mod provider;
pub mod registry;
pub mod session;
pub mod state;

pub use error::{Error, Result};
