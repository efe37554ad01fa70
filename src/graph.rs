// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Graph data model and the `BuildLevels` scheduler (Kahn's algorithm).

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::state::State;

/// A unit of graph work: a name and a `Run` body. Name is unique within a
/// [`Graph`].
#[async_trait]
pub trait Node: Send + Sync {
    fn name(&self) -> &str;

    /// Execute against shared `state`. Side effects on `state` are the
    /// primary data channel between nodes; the returned value is recorded
    /// as the node's output in [`NodeResult`].
    async fn run(&self, cancel: &CancellationToken, state: &State) -> Result<serde_json::Value>;
}

/// `to` depends on `from`. Duplicates are allowed and idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Edge {
    pub from: String,
    pub to: String,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Constructed once, consumed by the engine, immutable during execution.
pub struct Graph {
    nodes: HashMap<String, std::sync::Arc<dyn Node>>,
    edges: Vec<Edge>,
}

impl Graph {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            edges: Vec::new(),
        }
    }

    pub fn add_node(&mut self, node: std::sync::Arc<dyn Node>) {
        self.nodes.insert(node.name().to_string(), node);
    }

    pub fn add_edge(&mut self, edge: Edge) {
        self.edges.push(edge);
    }

    pub fn node(&self, name: &str) -> Option<&std::sync::Arc<dyn Node>> {
        self.nodes.get(name)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &std::sync::Arc<dyn Node>> {
        self.nodes.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

/// An ordered sequence of sets of node names produced by topological
/// layering. `∪levels == Nodes` and levels partition `Nodes`.
pub type Level = Vec<String>;

/// Kahn's algorithm: compute the topological levels of `graph`.
///
/// 1. Compute in-degree of every node (0 if no in-edges).
/// 2. For each edge, fail [`Error::UnknownNode`] if either endpoint is
///    absent from the graph; otherwise increment the target's in-degree
///    and record the dependent.
/// 3. Seed the queue with every in-degree-0 node; that queue is level 0.
/// 4. Repeat: emit the current queue as the next level, decrement every
///    dependent's in-degree, enqueue any that drop to 0, halt when the
///    queue empties.
/// 5. If the number of emitted nodes is short of the total, the graph has
///    a cycle.
///
/// Ordering within a level is unspecified and not guaranteed stable across
/// runs; only the partition into levels is a guaranteed invariant.
pub fn build_levels(graph: &Graph) -> Result<Vec<Level>> {
    let mut in_degree: HashMap<&str, usize> = graph.nodes.keys().map(|n| (n.as_str(), 0)).collect();
    let mut dependents: HashMap<&str, Vec<&str>> =
        graph.nodes.keys().map(|n| (n.as_str(), Vec::new())).collect();

    for edge in &graph.edges {
        if !graph.nodes.contains_key(&edge.from) {
            return Err(Error::UnknownNode(edge.from.clone()));
        }
        if !graph.nodes.contains_key(&edge.to) {
            return Err(Error::UnknownNode(edge.to.clone()));
        }
        *in_degree.get_mut(edge.to.as_str()).unwrap() += 1;
        dependents.get_mut(edge.from.as_str()).unwrap().push(edge.to.as_str());
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(name, _)| *name)
        .collect();

    let mut levels = Vec::new();
    let mut visited: HashSet<&str> = HashSet::new();

    while !queue.is_empty() {
        let current_level: Vec<&str> = queue.drain(..).collect();
        for name in &current_level {
            visited.insert(name);
        }
        for name in &current_level {
            if let Some(deps) = dependents.get(name) {
                for dependent in deps {
                    let deg = in_degree.get_mut(dependent).unwrap();
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }
        levels.push(current_level.into_iter().map(str::to_string).collect());
    }

    if visited.len() != graph.node_count() {
        return Err(Error::Cycle);
    }

    Ok(levels)
}

/// `status=failed ⇒ error≠nil`; `status=skipped ⇒ output=nil, error=nil`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeStatus {
    Completed,
    Skipped,
    Failed,
}

/// The outcome of one node's execution within a [`crate::engine`] run.
#[derive(Debug, Clone)]
pub struct NodeResult {
    pub name: String,
    pub status: NodeStatus,
    pub duration: Duration,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl NodeResult {
    pub fn completed(name: impl Into<String>, duration: Duration, output: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            status: NodeStatus::Completed,
            duration,
            output: Some(output),
            error: None,
        }
    }

    pub fn skipped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: NodeStatus::Skipped,
            duration: Duration::ZERO,
            output: None,
            error: None,
        }
    }

    pub fn failed(name: impl Into<String>, duration: Duration, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: NodeStatus::Failed,
            duration,
            output: None,
            error: Some(error.into()),
        }
    }
}

/// Mapping name → [`NodeResult`] plus total wall-clock duration, built
/// incrementally by the engine and returned on completion or early abort.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    pub node_results: HashMap<String, NodeResult>,
    pub total_duration: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct NoOp(&'static str);

    #[async_trait]
    impl Node for NoOp {
        fn name(&self) -> &str {
            self.0
        }
        async fn run(&self, _cancel: &CancellationToken, _state: &State) -> Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
    }

    fn graph_with(nodes: &[&'static str], edges: &[(&'static str, &'static str)]) -> Graph {
        let mut g = Graph::new();
        for n in nodes {
            g.add_node(Arc::new(NoOp(n)));
        }
        for (from, to) in edges {
            g.add_edge(Edge::new(*from, *to));
        }
        g
    }

    #[test]
    fn linear_chain_produces_one_node_per_level() {
        let g = graph_with(&["a", "b", "c"], &[("a", "b"), ("b", "c")]);
        let levels = build_levels(&g).unwrap();
        assert_eq!(levels, vec![vec!["a"], vec!["b"], vec!["c"]]);
    }

    #[test]
    fn diamond_places_fan_in_after_both_branches() {
        let g = graph_with(
            &["a", "b", "c", "d"],
            &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")],
        );
        let levels = build_levels(&g).unwrap();
        assert_eq!(levels.len(), 3);
        assert_eq!(levels[0], vec!["a"]);
        let mut mid = levels[1].clone();
        mid.sort();
        assert_eq!(mid, vec!["b", "c"]);
        assert_eq!(levels[2], vec!["d"]);
    }

    #[test]
    fn independent_nodes_share_level_zero() {
        let g = graph_with(&["a", "b"], &[]);
        let levels = build_levels(&g).unwrap();
        assert_eq!(levels.len(), 1);
        let mut only = levels[0].clone();
        only.sort();
        assert_eq!(only, vec!["a", "b"]);
    }

    #[test]
    fn cycle_is_detected() {
        let g = graph_with(&["a", "b"], &[("a", "b"), ("b", "a")]);
        let err = build_levels(&g).unwrap_err();
        assert!(matches!(err, Error::Cycle));
    }

    #[test]
    fn unknown_edge_endpoint_is_rejected() {
        let g = graph_with(&["a"], &[("a", "ghost")]);
        let err = build_levels(&g).unwrap_err();
        assert!(matches!(err, Error::UnknownNode(ref n) if n == "ghost"));
    }

    #[test]
    fn duplicate_edges_are_idempotent() {
        let g = graph_with(&["a", "b"], &[("a", "b"), ("a", "b")]);
        let levels = build_levels(&g).unwrap();
        assert_eq!(levels, vec![vec!["a"], vec!["b"]]);
    }

    #[test]
    fn levels_partition_every_node_exactly_once() {
        let g = graph_with(
            &["a", "b", "c", "d", "e"],
            &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d"), ("d", "e")],
        );
        let levels = build_levels(&g).unwrap();
        let mut seen: Vec<&String> = levels.iter().flatten().collect();
        seen.sort();
        let mut expected: Vec<&str> = vec!["a", "b", "c", "d", "e"];
        expected.sort();
        assert_eq!(seen, expected);
    }
}
