//! On-disk definition schemas
//!
//! Two structured documents exist: the pipeline definition file
//! (`pipeline.yml`) and per-task definition files (`*.task.yml`). Task
//! definitions are strict; unknown fields are rejected so typos fail the
//! build instead of being silently dropped.

use crate::pipeline::{Column, Materialization};
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Schema of the pipeline definition file.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,

    pub schedule: String,

    #[serde(rename = "defaultParameters", default)]
    pub default_parameters: BTreeMap<String, String>,

    #[serde(rename = "defaultConnections", default)]
    pub default_connections: BTreeMap<String, String>,
}

/// Schema of a structured task definition file. Strict: unknown fields are
/// a build error.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskDefinition {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(rename = "type")]
    pub task_type: String,

    /// Path of the executable, relative to the definition's directory.
    #[serde(default)]
    pub run: Option<String>,

    #[serde(default)]
    pub depends: Vec<String>,

    #[serde(default)]
    pub parameters: BTreeMap<String, String>,

    #[serde(default)]
    pub connections: BTreeMap<String, String>,

    #[serde(default)]
    pub materialization: Materialization,

    #[serde(default)]
    pub columns: BTreeMap<String, Column>,
}

impl PipelineDefinition {
    /// Parse a pipeline definition document.
    pub fn from_yaml(path: &Path, content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| Error::Definition {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

impl TaskDefinition {
    /// Parse a structured task definition document.
    pub fn from_yaml(path: &Path, content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| Error::Definition {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}
