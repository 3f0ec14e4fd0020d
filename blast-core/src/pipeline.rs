//! Pipeline and asset data model
//!
//! A pipeline is a named DAG of assets (tasks). Assets reference each other
//! by name in `depends_on`; after a build the pipeline resolves those names
//! into symmetric upstream/downstream edges. Edges are stored as indices
//! into the pipeline's asset vector so the vector stays the single owner of
//! every asset.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

/// Asset types the engine knows how to execute.
pub const SUPPORTED_TASK_TYPES: &[&str] = &["bq.sql", "sf.sql", "python", "empty"];

/// Returns true if the given type string is in the supported enumeration.
pub fn is_supported_task_type(task_type: &str) -> bool {
    SUPPORTED_TASK_TYPES.contains(&task_type)
}

/// How an asset definition was expressed on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefinitionKind {
    /// A structured `task.yml` definition file.
    Yaml,

    /// Metadata embedded in comments of the executable file itself.
    Comment,
}

/// The file an asset definition was loaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionFile {
    pub name: String,
    pub path: PathBuf,
    pub kind: DefinitionKind,
}

/// The file an asset executes, with its content captured at load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutableFile {
    pub name: String,
    pub path: PathBuf,
    pub content: String,
}

/// What a SELECT-shaped query is materialized into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterializationType {
    #[default]
    None,
    View,
    Table,
}

/// How a table materialization is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterializationStrategy {
    #[default]
    None,

    /// Recreate the object from scratch on every run.
    #[serde(rename = "create+replace")]
    CreateReplace,

    /// Append the query output to the existing table.
    Append,

    /// Delete matching partitions, then insert the query output.
    #[serde(rename = "delete+insert")]
    DeleteInsert,
}

/// Materialization spec for an asset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Materialization {
    #[serde(rename = "type")]
    pub kind: MaterializationType,
    pub strategy: MaterializationStrategy,
    pub partition_by: Option<String>,
    pub cluster_by: Vec<String>,
    pub incremental_key: Option<String>,
}

/// A named assertion attached to a column, compiled into a test instance at
/// scheduling time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnTest {
    pub name: String,
}

/// A column of an asset's output, with its quality tests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Column {
    #[serde(rename = "type")]
    pub column_type: Option<String>,
    pub description: Option<String>,
    pub tests: Vec<ColumnTest>,
}

/// A single unit of work in a pipeline.
#[derive(Debug, Clone)]
pub struct Asset {
    /// Unique within the pipeline; alphanumeric plus `-`/`_`/`.`.
    pub name: String,

    /// Type string from the supported enumeration (plus `empty` no-ops).
    pub asset_type: String,

    pub description: Option<String>,

    pub executable_file: Option<ExecutableFile>,

    pub definition_file: DefinitionFile,

    pub parameters: BTreeMap<String, String>,

    /// Connection role → connection name.
    pub connections: BTreeMap<String, String>,

    /// Declarative edge list: names of upstream assets.
    pub depends_on: Vec<String>,

    pub materialization: Materialization,

    pub columns: BTreeMap<String, Column>,

    /// Indices of resolved upstream assets; populated by the builder.
    pub upstream: Vec<usize>,

    /// Indices of resolved downstream assets; populated by the builder.
    pub downstream: Vec<usize>,
}

impl Asset {
    /// Create an asset with the given name, type, and definition file.
    /// Everything else starts empty.
    pub fn new(
        name: impl Into<String>,
        asset_type: impl Into<String>,
        definition_file: DefinitionFile,
    ) -> Self {
        Self {
            name: name.into(),
            asset_type: asset_type.into(),
            description: None,
            executable_file: None,
            definition_file,
            parameters: BTreeMap::new(),
            connections: BTreeMap::new(),
            depends_on: Vec::new(),
            materialization: Materialization::default(),
            columns: BTreeMap::new(),
            upstream: Vec::new(),
            downstream: Vec::new(),
        }
    }

    /// True when definition and executable are the same file (comment form).
    pub fn is_comment_defined(&self) -> bool {
        self.definition_file.kind == DefinitionKind::Comment
    }
}

/// A named DAG of assets with shared defaults.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    pub name: String,

    /// Opaque schedule string; recorded but never fired by the core.
    pub schedule: Option<String>,

    /// Path of the pipeline definition file.
    pub definition_path: PathBuf,

    pub default_parameters: BTreeMap<String, String>,

    /// Connection role → connection name defaults.
    pub default_connections: BTreeMap<String, String>,

    pub assets: Vec<Asset>,

    name_index: HashMap<String, usize>,
    type_index: HashMap<String, Vec<usize>>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Append an asset. Name collisions are allowed here; they are reported
    /// by the linter's uniqueness rule, not at build time.
    pub fn add_asset(&mut self, asset: Asset) {
        let index = self.assets.len();
        self.name_index.entry(asset.name.clone()).or_insert(index);
        self.type_index
            .entry(asset.asset_type.clone())
            .or_default()
            .push(index);
        self.assets.push(asset);
    }

    pub fn asset_index(&self, name: &str) -> Option<usize> {
        self.name_index.get(name).copied()
    }

    pub fn asset_by_name(&self, name: &str) -> Option<&Asset> {
        self.asset_index(name).map(|i| &self.assets[i])
    }

    /// Indices of assets with the given type.
    pub fn assets_of_type(&self, asset_type: &str) -> &[usize] {
        self.type_index
            .get(asset_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Resolve `depends_on` names into symmetric upstream/downstream index
    /// edges. Names that do not resolve are skipped; the `dependency-exists`
    /// lint rule reports them.
    pub fn resolve_relations(&mut self) {
        for asset in &mut self.assets {
            asset.upstream.clear();
            asset.downstream.clear();
        }

        let mut edges = Vec::new();
        for (index, asset) in self.assets.iter().enumerate() {
            for dep in &asset.depends_on {
                if let Some(&up) = self.name_index.get(dep.as_str()) {
                    if up != index {
                        edges.push((up, index));
                    }
                }
            }
        }

        for (up, down) in edges {
            if !self.assets[down].upstream.contains(&up) {
                self.assets[down].upstream.push(up);
            }
            if !self.assets[up].downstream.contains(&down) {
                self.assets[up].downstream.push(down);
            }
        }
    }

    /// Rebuild the name and type indices from the asset vector.
    pub fn rebuild_indexes(&mut self) {
        self.name_index.clear();
        self.type_index.clear();
        for (index, asset) in self.assets.iter().enumerate() {
            self.name_index.entry(asset.name.clone()).or_insert(index);
            self.type_index
                .entry(asset.asset_type.clone())
                .or_default()
                .push(index);
        }
    }
}
