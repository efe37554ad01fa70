// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! YAML pipeline documents, their loaders, and the include resolver that
//! turns a named pipeline into a runnable [`crate::graph::Graph`].

pub mod loader;
pub mod resolver;
pub mod yaml;

pub use loader::{FsPipelineLoader, MemoryPipelineLoader, PipelineLoader};
pub use resolver::{resolve_pipeline, ComponentRegistry};
pub use yaml::{NodeDef, PipelineDef, PipelineMode, ScheduleDef};
