// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! YAML shape of a declarative [`PipelineDef`] and its `Duration` suffix
//! parsing (`ns|us|ms|s|m|h`).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Execution mode a [`PipelineDef`] declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineMode {
    Batch,
    Streaming,
}

impl Default for PipelineMode {
    fn default() -> Self {
        Self::Batch
    }
}

/// `interval`/`min_buffer` as raw strings; parsed into [`Duration`] lazily by
/// [`ScheduleDef::parse`] since serde has no native duration-suffix format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleDef {
    pub interval: String,
    #[serde(default)]
    pub min_buffer: Option<String>,
}

impl ScheduleDef {
    /// Parse both fields into [`Duration`]s. A missing `min_buffer` is zero.
    pub fn parse(&self) -> Result<(Duration, Duration)> {
        let interval = parse_duration(&self.interval)?;
        let min_buffer = match &self.min_buffer {
            Some(s) => parse_duration(s)?,
            None => Duration::ZERO,
        };
        Ok((interval, min_buffer))
    }
}

/// One node entry in a [`PipelineDef`]'s `nodes` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDef {
    pub component: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub schedule: Option<ScheduleDef>,
    #[serde(default)]
    pub condition: Option<String>,
}

/// The top-level YAML shape: `name`, `mode`, `includes`, `nodes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDef {
    pub name: String,
    #[serde(default)]
    pub mode: PipelineMode,
    #[serde(default)]
    pub includes: Vec<String>,
    #[serde(default)]
    pub nodes: Vec<NodeDef>,
}

impl PipelineDef {
    /// Parse a YAML document. A missing `component` on any node is a parse
    /// error; a `component` absent from the registry is resolved later as
    /// [`Error::ComponentNotFound`].
    pub fn from_yaml(source: &str) -> Result<Self> {
        serde_yml::from_str(source).map_err(|e| Error::ParseError(e.to_string()))
    }
}

/// Parse a decimal number with a unit suffix (`ns`, `us`, `ms`, `s`, `m`,
/// `h`) into a [`Duration`]. Unknown keys elsewhere in the document are
/// ignored by serde's `#[serde(default)]` fields; this function is strict
/// about the suffix since a typo here is silent data loss otherwise.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let split_at = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .ok_or_else(|| Error::ParseError(format!("duration {s:?} has no unit suffix")))?;
    let (number, unit) = s.split_at(split_at);
    let value: f64 = number
        .parse()
        .map_err(|_| Error::ParseError(format!("invalid duration number {number:?}")))?;
    let nanos = match unit {
        "ns" => value,
        "us" => value * 1_000.0,
        "ms" => value * 1_000_000.0,
        "s" => value * 1_000_000_000.0,
        "m" => value * 60.0 * 1_000_000_000.0,
        "h" => value * 3_600.0 * 1_000_000_000.0,
        other => return Err(Error::ParseError(format!("unknown duration unit {other:?}"))),
    };
    Ok(Duration::from_nanos(nanos.round() as u64))
}
