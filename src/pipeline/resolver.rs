// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! `ResolvePipeline`: depth-first include resolution into a [`Graph`],
//! with diamond dedup and cycle detection.

use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::graph::{Edge, Graph, Node};
use crate::registry::Registry;

use super::loader::PipelineLoader;
use super::yaml::PipelineDef;

/// A `component` key in a [`NodeDef`](super::yaml::NodeDef) resolves here:
/// a registry of ready-to-run [`Node`] implementations, keyed by name.
/// Providers that need to act as graph nodes go through
/// [`crate::bridge`]'s adapter before registration.
pub type ComponentRegistry = Registry<dyn Node>;

/// Depth-first resolve `pipeline`'s `includes` plus its own `nodes` into a
/// single [`Graph`], using `registry` to look up each node's `component`
/// and `loader` to fetch included pipeline documents by name.
pub async fn resolve_pipeline(
    pipeline: &PipelineDef,
    registry: &ComponentRegistry,
    loader: &dyn PipelineLoader,
) -> Result<Graph> {
    let mut graph = Graph::new();
    let mut stack = HashSet::new();
    let mut resolved = HashSet::new();
    resolve_into(pipeline, registry, loader, &mut graph, &mut stack, &mut resolved).await?;
    Ok(graph)
}

async fn resolve_into(
    pipeline: &PipelineDef,
    registry: &ComponentRegistry,
    loader: &dyn PipelineLoader,
    graph: &mut Graph,
    stack: &mut HashSet<String>,
    resolved: &mut HashSet<String>,
) -> Result<()> {
    if stack.contains(&pipeline.name) {
        return Err(Error::CircularInclude(pipeline.name.clone()));
    }
    stack.insert(pipeline.name.clone());

    for include in &pipeline.includes {
        if resolved.contains(include) {
            continue;
        }
        let included = loader.load(include).await?;
        // Use Box::pin to allow this async fn to recurse.
        Box::pin(resolve_into(&included, registry, loader, graph, stack, resolved)).await?;
    }

    for node_def in &pipeline.nodes {
        let node = registry
            .get(&node_def.component)
            .ok_or_else(|| Error::ComponentNotFound(node_def.component.clone()))?;
        if graph.node(node.name()).is_none() {
            graph.add_node(node.clone());
        }
        for dependency in &node_def.depends_on {
            graph.add_edge(Edge::new(dependency.clone(), node.name().to_string()));
        }
    }

    resolved.insert(pipeline.name.clone());
    stack.remove(&pipeline.name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::loader::MemoryPipelineLoader;
    use async_trait::async_trait;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    struct NoOp(&'static str);

    #[async_trait]
    impl Node for NoOp {
        fn name(&self) -> &str {
            self.0
        }
        async fn run(
            &self,
            _cancel: &CancellationToken,
            _state: &crate::state::State,
        ) -> Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
    }

    fn registry_with(names: &[&'static str]) -> ComponentRegistry {
        let registry = ComponentRegistry::new();
        for name in names {
            registry.register_instance(*name, Arc::new(NoOp(name)) as Arc<dyn Node>);
        }
        registry
    }

    #[tokio::test]
    async fn resolves_a_pipeline_with_no_includes() {
        let registry = registry_with(&["fetch", "transform"]);
        let mut loader = MemoryPipelineLoader::new();
        loader.insert(
            "main",
            "name: main\nnodes:\n  - component: fetch\n  - component: transform\n    depends_on: [fetch]\n",
        );
        let def = loader.load("main").await.unwrap();
        let graph = resolve_pipeline(&def, &registry, &loader).await.unwrap();
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edges().len(), 1);
    }

    #[tokio::test]
    async fn diamond_include_contributes_nodes_exactly_once() {
        let registry = registry_with(&["shared_step", "a_step", "b_step"]);
        let mut loader = MemoryPipelineLoader::new();
        loader.insert("shared", "name: shared\nnodes:\n  - component: shared_step\n");
        loader.insert(
            "a",
            "name: a\nincludes: [shared]\nnodes:\n  - component: a_step\n    depends_on: [shared_step]\n",
        );
        loader.insert(
            "b",
            "name: b\nincludes: [shared]\nnodes:\n  - component: b_step\n    depends_on: [shared_step]\n",
        );
        loader.insert("top", "name: top\nincludes: [a, b]\nnodes: []\n");
        let def = loader.load("top").await.unwrap();
        let graph = resolve_pipeline(&def, &registry, &loader).await.unwrap();
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edges().len(), 2);
    }

    #[tokio::test]
    async fn circular_include_is_detected() {
        let registry = registry_with(&[]);
        let mut loader = MemoryPipelineLoader::new();
        loader.insert("a", "name: a\nincludes: [b]\nnodes: []\n");
        loader.insert("b", "name: b\nincludes: [a]\nnodes: []\n");
        let def = loader.load("a").await.unwrap();
        let err = resolve_pipeline(&def, &registry, &loader).await.unwrap_err();
        assert!(matches!(err, Error::CircularInclude(_)));
    }

    #[tokio::test]
    async fn unregistered_component_is_rejected() {
        let registry = registry_with(&[]);
        let mut loader = MemoryPipelineLoader::new();
        loader.insert("main", "name: main\nnodes:\n  - component: ghost\n");
        let def = loader.load("main").await.unwrap();
        let err = resolve_pipeline(&def, &registry, &loader).await.unwrap_err();
        assert!(matches!(err, Error::ComponentNotFound(_)));
    }
}
