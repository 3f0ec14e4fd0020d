//! Pipeline builder
//!
//! The builder resolves a pipeline directory, decodes the pipeline
//! definition file, discovers task definitions under the configured task
//! directories (structured `task.yml` files or comment-embedded metadata),
//! and wires the resolved dependency edges.

use crate::comments;
use crate::definition::{PipelineDefinition, TaskDefinition};
use crate::pipeline::{Asset, DefinitionFile, DefinitionKind, ExecutableFile, Pipeline};
use crate::{Error, FileSystem, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Discovery configuration for the builder.
#[derive(Debug, Clone)]
pub struct BuilderConfig {
    /// File name of the pipeline definition within a pipeline root.
    pub pipeline_file_name: String,

    /// Directory names under the pipeline root that may contain tasks.
    pub task_dir_names: Vec<String>,

    /// File-name suffixes identifying structured task definitions.
    pub task_file_suffixes: Vec<String>,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            pipeline_file_name: "pipeline.yml".to_string(),
            task_dir_names: vec!["tasks".to_string(), "assets".to_string()],
            task_file_suffixes: vec!["task.yml".to_string(), "task.yaml".to_string()],
        }
    }
}

/// Assembles pipelines from on-disk definitions.
pub struct Builder<'a> {
    fs: &'a dyn FileSystem,
    config: BuilderConfig,
}

impl<'a> Builder<'a> {
    pub fn new(fs: &'a dyn FileSystem, config: BuilderConfig) -> Self {
        Self { fs, config }
    }

    /// Build a pipeline from its root directory or its definition file.
    #[tracing::instrument(name = "builder.build", skip(self), fields(path = %path.display()))]
    pub fn build(&self, path: &Path) -> Result<Pipeline> {
        let root = self.resolve_pipeline_root(path)?;
        let definition_path = root.join(&self.config.pipeline_file_name);

        let content = self.fs.read_to_string(&definition_path)?;
        let definition = PipelineDefinition::from_yaml(&definition_path, &content)?;

        let mut pipeline = Pipeline::new(definition.name);
        pipeline.schedule = Some(definition.schedule);
        pipeline.definition_path = definition_path;
        pipeline.default_parameters = definition.default_parameters;
        pipeline.default_connections = definition.default_connections;

        let files = self.collect_task_files(&root)?;
        let assets = self.load_assets(&files)?;

        debug!(
            pipeline = %pipeline.name,
            asset_count = assets.len(),
            "loaded assets"
        );

        for mut asset in assets {
            self.apply_defaults(&pipeline, &mut asset);
            pipeline.add_asset(asset);
        }

        pipeline.resolve_relations();
        Ok(pipeline)
    }

    /// Accepts either a pipeline directory or the definition file inside one.
    fn resolve_pipeline_root(&self, path: &Path) -> Result<PathBuf> {
        if !self.fs.exists(path) {
            return Err(Error::PathNotFound(path.to_path_buf()));
        }

        let absolute = std::path::absolute(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;

        if self.fs.is_dir(&absolute) {
            let definition = absolute.join(&self.config.pipeline_file_name);
            if !self.fs.is_file(&definition) {
                return Err(Error::PathNotFound(definition));
            }
            return Ok(absolute);
        }

        match absolute.parent() {
            Some(parent) => Ok(parent.to_path_buf()),
            None => Err(Error::PathNotFound(absolute)),
        }
    }

    /// Recursively collect file paths under every existing task directory.
    fn collect_task_files(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for dir_name in &self.config.task_dir_names {
            let dir = root.join(dir_name);
            if self.fs.is_dir(&dir) {
                self.walk(&dir, &mut files)?;
            }
        }
        // Deterministic load order regardless of directory iteration order.
        files.sort();
        Ok(files)
    }

    fn walk(&self, dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
        for entry in self.fs.read_dir(dir)? {
            if self.fs.is_dir(&entry) {
                self.walk(&entry, files)?;
            } else {
                files.push(entry);
            }
        }
        Ok(())
    }

    fn is_structured_definition(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        self.config
            .task_file_suffixes
            .iter()
            .any(|suffix| name.ends_with(suffix.as_str()))
    }

    fn load_assets(&self, files: &[PathBuf]) -> Result<Vec<Asset>> {
        // Directories that contain a structured definition own every file in
        // them; sub-paths there must not be re-registered via the comment
        // loader (the `run:` target would otherwise load twice).
        let owned_dirs: HashSet<PathBuf> = files
            .iter()
            .filter(|p| self.is_structured_definition(p))
            .filter_map(|p| p.parent().map(Path::to_path_buf))
            .collect();

        let mut assets = Vec::new();
        for path in files {
            if self.is_structured_definition(path) {
                assets.push(self.load_structured(path)?);
            } else {
                let in_owned_dir = path
                    .parent()
                    .map(|parent| owned_dirs.contains(parent))
                    .unwrap_or(false);
                if in_owned_dir {
                    debug!(path = %path.display(), "skipping file owned by a structured definition");
                    continue;
                }
                if let Some(asset) = comments::load_asset(self.fs, path)? {
                    assets.push(asset);
                }
            }
        }
        Ok(assets)
    }

    fn load_structured(&self, path: &Path) -> Result<Asset> {
        let content = self.fs.read_to_string(path)?;
        let definition = TaskDefinition::from_yaml(path, &content)?;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();

        let mut asset = Asset::new(
            definition.name,
            definition.task_type,
            DefinitionFile {
                name: file_name,
                path: path.to_path_buf(),
                kind: DefinitionKind::Yaml,
            },
        );
        asset.description = definition.description;
        asset.depends_on = definition.depends;
        asset.parameters = definition.parameters;
        asset.connections = definition.connections;
        asset.materialization = definition.materialization;
        asset.columns = definition.columns;

        if let Some(run) = definition.run {
            // `run:` is relative to the definition's directory.
            let exec_path = match path.parent() {
                Some(parent) => parent.join(&run),
                None => PathBuf::from(&run),
            };
            let exec_content = if self.fs.is_file(&exec_path) {
                self.fs.read_to_string(&exec_path)?
            } else {
                // Missing executables are a lint issue, not a build failure.
                String::new()
            };
            asset.executable_file = Some(ExecutableFile {
                name: exec_path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or_default()
                    .to_string(),
                path: exec_path,
                content: exec_content,
            });
        }

        Ok(asset)
    }

    /// Pipeline defaults apply wherever an asset does not override a key.
    fn apply_defaults(&self, pipeline: &Pipeline, asset: &mut Asset) {
        for (key, value) in &pipeline.default_parameters {
            asset
                .parameters
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        for (role, name) in &pipeline.default_connections {
            asset
                .connections
                .entry(role.clone())
                .or_insert_with(|| name.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::OsFileSystem;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn scaffold_pipeline(root: &Path) {
        write(
            root,
            "pipeline.yml",
            "name: revenue\nschedule: daily\ndefaultParameters:\n  env: prod\ndefaultConnections:\n  google_cloud_platform: gcp-main\n",
        );
    }

    fn builder_for(fs: &OsFileSystem) -> Builder<'_> {
        Builder::new(fs, BuilderConfig::default())
    }

    #[test]
    fn test_build_with_structured_and_comment_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        scaffold_pipeline(root);
        write(
            root,
            "tasks/summary/task.yml",
            "name: summary\ntype: bq.sql\nrun: summary.sql\ndepends:\n  - raw\n",
        );
        write(root, "tasks/summary/summary.sql", "SELECT 1;\n");
        write(
            root,
            "tasks/raw.sql",
            "-- @blast.name: raw\n-- @blast.type: bq.sql\nSELECT 2;\n",
        );

        let fs = OsFileSystem;
        let pipeline = builder_for(&fs).build(root).unwrap();

        assert_eq!(pipeline.name, "revenue");
        assert_eq!(pipeline.schedule.as_deref(), Some("daily"));
        assert_eq!(pipeline.assets.len(), 2);

        let summary = pipeline.asset_by_name("summary").unwrap();
        assert_eq!(summary.definition_file.kind, DefinitionKind::Yaml);
        let exec = summary.executable_file.as_ref().unwrap();
        assert!(exec.path.is_absolute());
        assert_eq!(exec.content, "SELECT 1;\n");

        let raw = pipeline.asset_by_name("raw").unwrap();
        assert_eq!(raw.definition_file.kind, DefinitionKind::Comment);

        // Dependency edges resolved symmetrically.
        let summary_idx = pipeline.asset_index("summary").unwrap();
        let raw_idx = pipeline.asset_index("raw").unwrap();
        assert_eq!(pipeline.assets[summary_idx].upstream, vec![raw_idx]);
        assert_eq!(pipeline.assets[raw_idx].downstream, vec![summary_idx]);
    }

    #[test]
    fn test_build_accepts_definition_file_path() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        scaffold_pipeline(root);

        let fs = OsFileSystem;
        let pipeline = builder_for(&fs).build(&root.join("pipeline.yml")).unwrap();
        assert_eq!(pipeline.name, "revenue");
    }

    #[test]
    fn test_build_missing_path_errors() {
        let fs = OsFileSystem;
        let err = builder_for(&fs)
            .build(Path::new("/nonexistent/pipeline/dir"))
            .unwrap_err();
        assert!(matches!(err, Error::PathNotFound(_)));
    }

    #[test]
    fn test_run_file_not_double_registered() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        scaffold_pipeline(root);
        write(
            root,
            "tasks/summary/task.yml",
            "name: summary\ntype: bq.sql\nrun: summary.sql\n",
        );
        // The run target itself carries comment metadata; it must not load
        // independently since its directory holds a structured definition.
        write(
            root,
            "tasks/summary/summary.sql",
            "-- @blast.name: summary\n-- @blast.type: bq.sql\nSELECT 1;\n",
        );

        let fs = OsFileSystem;
        let pipeline = builder_for(&fs).build(root).unwrap();
        assert_eq!(pipeline.assets.len(), 1);
        assert_eq!(
            pipeline.assets[0].definition_file.kind,
            DefinitionKind::Yaml
        );
    }

    #[test]
    fn test_defaults_merge_without_overriding() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        scaffold_pipeline(root);
        write(
            root,
            "tasks/t.sql",
            "-- @blast.name: t\n-- @blast.type: bq.sql\n-- @blast.parameters.env: dev\nSELECT 1;\n",
        );

        let fs = OsFileSystem;
        let pipeline = builder_for(&fs).build(root).unwrap();
        let asset = pipeline.asset_by_name("t").unwrap();

        // Asset-level value wins; defaults fill the gaps.
        assert_eq!(asset.parameters["env"], "dev");
        assert_eq!(asset.connections["google_cloud_platform"], "gcp-main");
    }

    #[test]
    fn test_malformed_structured_definition_fails_build() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        scaffold_pipeline(root);
        write(root, "tasks/bad/task.yml", "name: bad\ntype: bq.sql\nbogus: 1\n");

        let fs = OsFileSystem;
        let err = builder_for(&fs).build(root).unwrap_err();
        assert!(matches!(err, Error::Definition { .. }));
    }

    #[test]
    fn test_unrelated_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        scaffold_pipeline(root);
        write(root, "tasks/readme.txt", "not a task\n");
        write(root, "tasks/helper.sql", "SELECT 1;\n");

        let fs = OsFileSystem;
        let pipeline = builder_for(&fs).build(root).unwrap();
        assert!(pipeline.assets.is_empty());
    }
}
