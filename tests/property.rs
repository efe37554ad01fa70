// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Property-based tests for the scheduler and pipeline operators.

use std::sync::Arc;

use async_trait::async_trait;
use proptest::prelude::*;
use tokio_util::sync::CancellationToken;

use flowcore::error::{Error, Result};
use flowcore::graph::{build_levels, Edge, Graph, Node};
use flowcore::operators::Pipeline;
use flowcore::state::State;

struct NoOp(String);

#[async_trait]
impl Node for NoOp {
    fn name(&self) -> &str {
        &self.0
    }
    async fn run(&self, _cancel: &CancellationToken, _state: &State) -> Result<serde_json::Value> {
        Ok(serde_json::Value::Null)
    }
}

/// Build a random DAG over `n` nodes named "0".."n-1": an edge `i -> j`
/// only ever points from a lower index to a higher one, which guarantees
/// acyclicity regardless of which edges the strategy picks.
fn acyclic_graph(n: usize, edge_choices: &[bool]) -> Graph {
    let mut graph = Graph::new();
    for i in 0..n {
        graph.add_node(Arc::new(NoOp(i.to_string())));
    }
    let mut idx = 0;
    for i in 0..n {
        for j in (i + 1)..n {
            if edge_choices.get(idx).copied().unwrap_or(false) {
                graph.add_edge(Edge::new(i.to_string(), j.to_string()));
            }
            idx += 1;
        }
    }
    graph
}

proptest! {
    /// BuildLevels on any acyclic graph partitions the node set and respects
    /// topological order: no node appears before any of its predecessors.
    #[test]
    fn build_levels_partitions_and_respects_dependency_order(
        n in 1usize..8,
        edge_bits in prop::collection::vec(any::<bool>(), 0..28),
    ) {
        let graph = acyclic_graph(n, &edge_bits);
        let levels = build_levels(&graph).unwrap();

        let mut seen = std::collections::HashSet::new();
        let mut level_of = std::collections::HashMap::new();
        for (level_idx, level) in levels.iter().enumerate() {
            for name in level {
                prop_assert!(seen.insert(name.clone()), "node {} appears in more than one level", name);
                level_of.insert(name.clone(), level_idx);
            }
        }
        prop_assert_eq!(seen.len(), n);

        for edge in graph.edges() {
            let from_level = level_of[&edge.from];
            let to_level = level_of[&edge.to];
            prop_assert!(from_level < to_level);
        }
    }

    /// Map then collect equals the elementwise application of the mapping
    /// function to the source slice, for any finite i32 source and any pure
    /// arithmetic transform.
    #[test]
    fn pipeline_map_is_elementwise(xs in prop::collection::vec(any::<i32>(), 0..50)) {
        let expected: Vec<i64> = xs.iter().map(|x| (*x as i64) * 2 + 1).collect();
        let cancel = CancellationToken::new();
        let out = tokio_test_block_on(
            Pipeline::from_slice(xs)
                .map(|x| Ok((x as i64) * 2 + 1))
                .collect(&cancel),
        )
        .unwrap();
        prop_assert_eq!(out, expected);
    }
}

/// Small helper so the synchronous `proptest!` body can drive an async
/// pipeline without pulling in an extra dev-dependency.
fn tokio_test_block_on<F: std::future::Future>(fut: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("build current-thread runtime")
        .block_on(fut)
}

#[test]
fn cycle_graph_is_always_rejected() {
    let mut graph = Graph::new();
    graph.add_node(Arc::new(NoOp("a".to_string())));
    graph.add_node(Arc::new(NoOp("b".to_string())));
    graph.add_edge(Edge::new("a", "b"));
    graph.add_edge(Edge::new("b", "a"));
    assert!(matches!(build_levels(&graph).unwrap_err(), Error::Cycle));
}
