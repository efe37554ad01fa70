// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Pipeline document loading by name. [`FsPipelineLoader`] searches one or
//! more directories on disk; [`MemoryPipelineLoader`] serves in-memory
//! fixtures for tests.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use walkdir::WalkDir;

use crate::error::{Error, Result};

use super::yaml::PipelineDef;

/// Loads a [`PipelineDef`] by name. Implementations decide where "by name"
/// resolves to — a directory tree, a database, an in-memory map.
#[async_trait]
pub trait PipelineLoader: Send + Sync {
    async fn load(&self, name: &str) -> Result<PipelineDef>;
}

/// Searches `<dir>/<name>.{yaml,yml}` in each configured directory, then
/// falls back to a recursive `<dir>/**/<name>.{yaml,yml}` walk.
pub struct FsPipelineLoader {
    dirs: Vec<PathBuf>,
}

impl FsPipelineLoader {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    fn find(&self, name: &str) -> Option<PathBuf> {
        for dir in &self.dirs {
            for ext in ["yaml", "yml"] {
                let candidate = dir.join(format!("{name}.{ext}"));
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }
        for dir in &self.dirs {
            for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
                    continue;
                };
                if stem == name && (ext == "yaml" || ext == "yml") {
                    return Some(path.to_path_buf());
                }
            }
        }
        None
    }
}

#[async_trait]
impl PipelineLoader for FsPipelineLoader {
    async fn load(&self, name: &str) -> Result<PipelineDef> {
        let path = self
            .find(name)
            .ok_or_else(|| Error::ComponentNotFound(name.to_string()))?;
        let source = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| Error::Other(e.into()))?;
        PipelineDef::from_yaml(&source)
    }
}

/// An in-memory loader for tests and embedded fixtures.
#[derive(Default)]
pub struct MemoryPipelineLoader {
    documents: HashMap<String, String>,
}

impl MemoryPipelineLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, yaml: impl Into<String>) {
        self.documents.insert(name.into(), yaml.into());
    }
}

#[async_trait]
impl PipelineLoader for MemoryPipelineLoader {
    async fn load(&self, name: &str) -> Result<PipelineDef> {
        let source = self
            .documents
            .get(name)
            .ok_or_else(|| Error::ComponentNotFound(name.to_string()))?;
        PipelineDef::from_yaml(source)
    }
}
