// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # Execution Engine
//!
//! Two entry points share one core: [`Engine::execute_batch`] runs every
//! node, [`Engine::execute_streaming`] runs only nodes a [`ReadyFilter`]
//! approves, recording the rest as skipped. The engine is built once and
//! reused — each call allocates its own [`ExecutionResult`] accumulator,
//! mirroring the teacher's compiled-graph/invoke split.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::error::{Error, Result};
use crate::graph::{ExecutionResult, Graph, Node, NodeResult};
use crate::state::State;

/// `0` means unbounded (`|toRun|`); otherwise `min(max_parallel, |toRun|)`.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub max_parallel: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { max_parallel: 0 }
    }
}

/// A filter consulted at level entry for [`Engine::execute_streaming`]:
/// `true` admits the node into this level's `toRun` set, `false` records
/// it as skipped without running.
pub trait ReadyFilter: Send + Sync {
    fn is_ready(&self, name: &str, state: &State) -> bool;
}

/// Always admits every node — used by [`Engine::execute_batch`].
struct RunAll;

impl ReadyFilter for RunAll {
    fn is_ready(&self, _name: &str, _state: &State) -> bool {
        true
    }
}

/// Wraps a [`Node`], adding side effects (span, duration metric, log)
/// before/after invoking the inner node, preserving its name and error
/// surface.
#[async_trait]
pub trait NodeDecorator: Send + Sync {
    async fn decorate(
        &self,
        node: Arc<dyn Node>,
        cancel: &CancellationToken,
        state: &State,
    ) -> Result<serde_json::Value>;
}

/// Wraps node execution in a `tracing` span and logs completion/failure.
pub struct TracingDecorator;

#[async_trait]
impl NodeDecorator for TracingDecorator {
    async fn decorate(
        &self,
        node: Arc<dyn Node>,
        cancel: &CancellationToken,
        state: &State,
    ) -> Result<serde_json::Value> {
        let span = tracing::info_span!("node", name = node.name());
        async move {
            let start = Instant::now();
            let result = node.run(cancel, state).await;
            match &result {
                Ok(_) => tracing::debug!(elapsed = ?start.elapsed(), "node completed"),
                Err(e) => tracing::warn!(error = %e, elapsed = ?start.elapsed(), "node failed"),
            }
            result
        }
        .instrument(span)
        .await
    }
}

/// Minimal metrics sink a [`MetricsDecorator`] reports through; the crate
/// bundles no concrete backend (see [`crate::observability::Meter`]).
pub trait NodeMeter: Send + Sync {
    fn record_duration(&self, node: &str, succeeded: bool, duration: Duration);
}

/// Wraps node execution, reporting a duration/outcome pair through a
/// [`NodeMeter`] without the core depending on any metrics backend.
pub struct MetricsDecorator {
    pub meter: Arc<dyn NodeMeter>,
}

#[async_trait]
impl NodeDecorator for MetricsDecorator {
    async fn decorate(
        &self,
        node: Arc<dyn Node>,
        cancel: &CancellationToken,
        state: &State,
    ) -> Result<serde_json::Value> {
        let start = Instant::now();
        let result = node.run(cancel, state).await;
        self.meter
            .record_duration(node.name(), result.is_ok(), start.elapsed());
        result
    }
}

/// The DAG execution engine. Stateless across calls — construct once,
/// invoke [`Engine::execute_batch`]/[`Engine::execute_streaming`] many
/// times against different graphs and state.
pub struct Engine {
    config: EngineConfig,
    chain: Arc<dyn NodeDecorator>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            chain: Arc::new(InnermostCall),
        }
    }

    /// Decorators apply in registration order, outermost first: the first
    /// decorator registered sees the node run (and every later decorator)
    /// wrapped inside it.
    pub fn with_decorator(mut self, decorator: Arc<dyn NodeDecorator>) -> Self {
        self.chain = Arc::new(ComposedDecorator {
            outer: self.chain,
            inner: decorator,
        });
        self
    }

    /// Run every node in `graph`.
    pub async fn execute_batch(
        &self,
        cancel: &CancellationToken,
        graph: &Graph,
        state: &State,
    ) -> Result<ExecutionResult> {
        self.execute(cancel, graph, state, &RunAll).await
    }

    /// Run only nodes `filter` approves at level entry; the rest are
    /// recorded as skipped.
    pub async fn execute_streaming(
        &self,
        cancel: &CancellationToken,
        graph: &Graph,
        state: &State,
        filter: &dyn ReadyFilter,
    ) -> Result<ExecutionResult> {
        self.execute(cancel, graph, state, filter).await
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        graph: &Graph,
        state: &State,
        filter: &dyn ReadyFilter,
    ) -> Result<ExecutionResult> {
        let levels = crate::graph::build_levels(graph)?;
        let mut result = ExecutionResult::default();
        let overall_start = Instant::now();

        for level in levels {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let mut to_run = Vec::new();
            for name in &level {
                if filter.is_ready(name, state) {
                    to_run.push(name.clone());
                } else {
                    result
                        .node_results
                        .insert(name.clone(), NodeResult::skipped(name.clone()));
                }
            }

            if to_run.is_empty() {
                continue;
            }

            let permits = if self.config.max_parallel > 0 {
                self.config.max_parallel.min(to_run.len())
            } else {
                to_run.len()
            };
            let semaphore = Arc::new(Semaphore::new(permits));

            let mut set = tokio::task::JoinSet::new();
            for name in to_run {
                let node = graph
                    .node(&name)
                    .expect("toRun name came from this graph's levels")
                    .clone();
                let cancel = cancel.clone();
                let state = state.clone();
                let semaphore = semaphore.clone();
                let chain = self.chain.clone();
                set.spawn(async move {
                    let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
                    let node_name = node.name().to_string();
                    let start = Instant::now();
                    // Catch a panicking node inside the task itself, so the
                    // future always completes with the real node name
                    // attached — a `JoinError` on panic carries no node
                    // identity, only a task id.
                    let outcome = std::panic::AssertUnwindSafe(chain.decorate(node.clone(), &cancel, &state))
                        .catch_unwind()
                        .await;
                    let duration = start.elapsed();
                    match outcome {
                        Ok(Ok(output)) => NodeResult::completed(node_name, duration, output),
                        Ok(Err(e)) => NodeResult::failed(node_name, duration, e.to_string()),
                        Err(panic_payload) => NodeResult::failed(node_name, duration, panic_message(&panic_payload)),
                    }
                });
            }

            while let Some(joined) = set.join_next().await {
                // A panicking node is caught inside the task body above, so
                // `joined` only turns up `Err` here for a task that was
                // aborted out from under us — a `JoinError` carries no node
                // identity in that case, just its task id.
                let node_result = match joined {
                    Ok(node_result) => node_result,
                    Err(join_err) => NodeResult::failed(
                        format!("<task {} aborted>", join_err.id()),
                        Duration::ZERO,
                        join_err.to_string(),
                    ),
                };
                result.node_results.insert(node_result.name.clone(), node_result);
            }
        }

        result.total_duration = overall_start.elapsed();
        Ok(result)
    }
}

/// Extract a human-readable message from a caught panic payload, matching
/// the formatting `std`'s default panic hook uses for the common
/// `&str`/`String` payload shapes.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "node panicked".to_string()
    }
}

struct InnermostCall;

#[async_trait]
impl NodeDecorator for InnermostCall {
    async fn decorate(
        &self,
        node: Arc<dyn Node>,
        cancel: &CancellationToken,
        state: &State,
    ) -> Result<serde_json::Value> {
        node.run(cancel, state).await
    }
}

struct ComposedDecorator {
    outer: Arc<dyn NodeDecorator>,
    inner: Arc<dyn NodeDecorator>,
}

#[async_trait]
impl NodeDecorator for ComposedDecorator {
    async fn decorate(
        &self,
        node: Arc<dyn Node>,
        cancel: &CancellationToken,
        state: &State,
    ) -> Result<serde_json::Value> {
        // The outer decorator invokes `node` directly; to actually nest
        // `inner` between `outer` and the node body we run through a node
        // wrapper that redirects `run` to `inner`'s chain.
        self.outer
            .decorate(
                Arc::new(DelegatingNode {
                    name: node.name().to_string(),
                    inner: self.inner.clone(),
                    node,
                }),
                cancel,
                state,
            )
            .await
    }
}

struct DelegatingNode {
    name: String,
    inner: Arc<dyn NodeDecorator>,
    node: Arc<dyn Node>,
}

#[async_trait]
impl Node for DelegatingNode {
    fn name(&self) -> &str {
        &self.name
    }
    async fn run(&self, cancel: &CancellationToken, state: &State) -> Result<serde_json::Value> {
        self.inner.decorate(self.node.clone(), cancel, state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Edge;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo {
        name: &'static str,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Node for Echo {
        fn name(&self) -> &str {
            self.name
        }
        async fn run(&self, _cancel: &CancellationToken, _state: &State) -> Result<serde_json::Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::json!(self.name))
        }
    }

    struct Failing(&'static str);

    #[async_trait]
    impl Node for Failing {
        fn name(&self) -> &str {
            self.0
        }
        async fn run(&self, _cancel: &CancellationToken, _state: &State) -> Result<serde_json::Value> {
            Err(Error::NodeError("boom".into()))
        }
    }

    #[tokio::test]
    async fn linear_chain_runs_every_node() {
        let cancel = CancellationToken::new();
        let state = State::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut graph = Graph::new();
        graph.add_node(Arc::new(Echo { name: "a", calls: calls.clone() }));
        graph.add_node(Arc::new(Echo { name: "b", calls: calls.clone() }));
        graph.add_edge(Edge::new("a", "b"));

        let engine = Engine::new(EngineConfig::default());
        let result = engine.execute_batch(&cancel, &graph, &state).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(result.node_results.len(), 2);
    }

    #[tokio::test]
    async fn failed_node_is_recorded_not_fatal() {
        let cancel = CancellationToken::new();
        let state = State::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut graph = Graph::new();
        graph.add_node(Arc::new(Failing("bad")));
        graph.add_node(Arc::new(Echo { name: "good", calls: calls.clone() }));

        let engine = Engine::new(EngineConfig::default());
        let result = engine.execute_batch(&cancel, &graph, &state).await.unwrap();
        assert_eq!(result.node_results["bad"].status, crate::graph::NodeStatus::Failed);
        assert_eq!(result.node_results["good"].status, crate::graph::NodeStatus::Completed);
    }

    #[tokio::test]
    async fn streaming_mode_skips_nodes_the_filter_rejects() {
        struct OnlyA;
        impl ReadyFilter for OnlyA {
            fn is_ready(&self, name: &str, _state: &State) -> bool {
                name == "a"
            }
        }
        let cancel = CancellationToken::new();
        let state = State::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut graph = Graph::new();
        graph.add_node(Arc::new(Echo { name: "a", calls: calls.clone() }));
        graph.add_node(Arc::new(Echo { name: "b", calls: calls.clone() }));

        let engine = Engine::new(EngineConfig::default());
        let result = engine
            .execute_streaming(&cancel, &graph, &state, &OnlyA)
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.node_results["b"].status, crate::graph::NodeStatus::Skipped);
    }

    #[tokio::test]
    async fn max_parallel_bounds_concurrency() {
        let cancel = CancellationToken::new();
        let state = State::new();
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        struct Tracked {
            name: &'static str,
            concurrent: Arc<AtomicUsize>,
            max_seen: Arc<AtomicUsize>,
        }
        #[async_trait]
        impl Node for Tracked {
            fn name(&self) -> &str {
                self.name
            }
            async fn run(&self, _cancel: &CancellationToken, _state: &State) -> Result<serde_json::Value> {
                let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                self.concurrent.fetch_sub(1, Ordering::SeqCst);
                Ok(serde_json::Value::Null)
            }
        }

        let mut graph = Graph::new();
        for name in ["a", "b", "c", "d"] {
            graph.add_node(Arc::new(Tracked {
                name,
                concurrent: concurrent.clone(),
                max_seen: max_seen.clone(),
            }));
        }

        let engine = Engine::new(EngineConfig { max_parallel: 2 });
        engine.execute_batch(&cancel, &graph, &state).await.unwrap();
        assert!(max_seen.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn decorators_preserve_node_name_and_error_surface() {
        let order = Arc::new(Mutex::new(Vec::new()));
        struct RecordingDecorator(Arc<Mutex<Vec<String>>>);
        #[async_trait]
        impl NodeDecorator for RecordingDecorator {
            async fn decorate(
                &self,
                node: Arc<dyn Node>,
                cancel: &CancellationToken,
                state: &State,
            ) -> Result<serde_json::Value> {
                self.0.lock().push(format!("before:{}", node.name()));
                let out = node.run(cancel, state).await;
                self.0.lock().push(format!("after:{}", node.name()));
                out
            }
        }

        let cancel = CancellationToken::new();
        let state = State::new();
        let mut graph = Graph::new();
        graph.add_node(Arc::new(Failing("bad")));

        let engine = Engine::new(EngineConfig::default())
            .with_decorator(Arc::new(RecordingDecorator(order.clone())));
        let result = engine.execute_batch(&cancel, &graph, &state).await.unwrap();
        assert_eq!(result.node_results["bad"].status, crate::graph::NodeStatus::Failed);
        assert_eq!(*order.lock(), vec!["before:bad".to_string(), "after:bad".to_string()]);
    }

    #[tokio::test]
    async fn panicking_nodes_in_the_same_level_are_each_recorded_under_their_own_name() {
        struct Panicking(&'static str);
        #[async_trait]
        impl Node for Panicking {
            fn name(&self) -> &str {
                self.0
            }
            async fn run(&self, _cancel: &CancellationToken, _state: &State) -> Result<serde_json::Value> {
                panic!("boom from {}", self.0);
            }
        }

        let cancel = CancellationToken::new();
        let state = State::new();
        let mut graph = Graph::new();
        graph.add_node(Arc::new(Panicking("p1")));
        graph.add_node(Arc::new(Panicking("p2")));

        let engine = Engine::new(EngineConfig::default());
        let result = engine.execute_batch(&cancel, &graph, &state).await.unwrap();

        assert_eq!(result.node_results.len(), 2);
        for name in ["p1", "p2"] {
            let node_result = &result.node_results[name];
            assert_eq!(node_result.status, crate::graph::NodeStatus::Failed);
            assert_eq!(node_result.error.as_deref(), Some(format!("boom from {name}").as_str()));
        }
    }
}
