//! Comment-embedded task definitions
//!
//! Executable files can carry their own task metadata in comment lines
//! prefixed with the `@blast.` sentinel, e.g.:
//!
//! ```sql
//! -- @blast.name: events.summary
//! -- @blast.type: bq.sql
//! -- @blast.depends: events.raw, dims.country
//! SELECT ...
//! ```
//!
//! The comment marker is keyed on the file extension; files with an unknown
//! extension are not candidates for this loader. For assets loaded this way
//! the definition file and the executable file are the same file.

use crate::pipeline::{
    Asset, DefinitionFile, DefinitionKind, ExecutableFile, MaterializationStrategy,
    MaterializationType,
};
use crate::{Error, FileSystem, Result};
use std::path::Path;
use tracing::debug;

/// Sentinel prefix identifying task metadata inside comments.
pub const CONFIG_MARKER: &str = "@blast.";

/// Comment marker for a file extension, if the extension is known.
pub fn comment_marker_for(path: &Path) -> Option<&'static str> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("sql") => Some("--"),
        Some("py") => Some("#"),
        _ => None,
    }
}

/// Loads an asset from metadata comments embedded in an executable file.
///
/// Returns `Ok(None)` when the file's extension has no comment marker or
/// the file carries no `@blast.` keys at all.
pub fn load_asset(fs: &dyn FileSystem, path: &Path) -> Result<Option<Asset>> {
    let marker = match comment_marker_for(path) {
        Some(marker) => marker,
        None => return Ok(None),
    };

    let content = fs.read_to_string(path)?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();

    let mut asset = Asset::new(
        String::new(),
        "empty",
        DefinitionFile {
            name: file_name.clone(),
            path: path.to_path_buf(),
            kind: DefinitionKind::Comment,
        },
    );
    let mut saw_any_key = false;

    for line in content.lines() {
        let trimmed = line.trim_start();
        let Some(comment) = trimmed.strip_prefix(marker) else {
            continue;
        };
        let comment = comment.trim_start();
        let Some(entry) = comment.strip_prefix(CONFIG_MARKER) else {
            continue;
        };
        let Some((key, value)) = entry.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();

        saw_any_key = true;
        apply_key(&mut asset, key, value, path)?;
    }

    if !saw_any_key {
        return Ok(None);
    }

    // Definition and executable are the same file in this form.
    asset.executable_file = Some(ExecutableFile {
        name: file_name,
        path: path.to_path_buf(),
        content,
    });

    Ok(Some(asset))
}

fn apply_key(asset: &mut Asset, key: &str, value: &str, path: &Path) -> Result<()> {
    match key {
        "name" => asset.name = value.to_string(),
        "description" => asset.description = Some(value.to_string()),
        "type" => asset.asset_type = value.to_string(),
        "depends" => {
            asset.depends_on = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        "materialization.type" => {
            asset.materialization.kind = parse_materialization_type(value, path)?;
        }
        "materialization.strategy" => {
            asset.materialization.strategy = parse_materialization_strategy(value, path)?;
        }
        "materialization.partition_by" => {
            asset.materialization.partition_by = Some(value.to_string());
        }
        "materialization.incremental_key" => {
            asset.materialization.incremental_key = Some(value.to_string());
        }
        "materialization.cluster_by" => {
            asset.materialization.cluster_by = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        _ => {
            if let Some(param) = key.strip_prefix("parameters.") {
                asset.parameters.insert(param.to_string(), value.to_string());
            } else if let Some(role) = key.strip_prefix("connections.") {
                asset.connections.insert(role.to_string(), value.to_string());
            } else {
                // Unknown keys are silently ignored; a future lint rule may
                // surface them.
                debug!(key, path = %path.display(), "ignoring unknown metadata key");
            }
        }
    }
    Ok(())
}

fn parse_materialization_type(value: &str, path: &Path) -> Result<MaterializationType> {
    match value {
        "none" => Ok(MaterializationType::None),
        "view" => Ok(MaterializationType::View),
        "table" => Ok(MaterializationType::Table),
        other => Err(Error::Definition {
            path: path.to_path_buf(),
            message: format!("unknown materialization type '{other}'"),
        }),
    }
}

fn parse_materialization_strategy(value: &str, path: &Path) -> Result<MaterializationStrategy> {
    match value {
        "none" => Ok(MaterializationStrategy::None),
        "create+replace" => Ok(MaterializationStrategy::CreateReplace),
        "append" => Ok(MaterializationStrategy::Append),
        "delete+insert" => Ok(MaterializationStrategy::DeleteInsert),
        other => Err(Error::Definition {
            path: path.to_path_buf(),
            message: format!("unknown materialization strategy '{other}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::OsFileSystem;
    use std::path::PathBuf;

    fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_sql_comment_asset() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "t1.sql",
            "-- @blast.name: t1\n-- @blast.type: bq.sql\n-- @blast.depends: a, b\nSELECT 1;\n",
        );

        let asset = load_asset(&OsFileSystem, &path).unwrap().unwrap();
        assert_eq!(asset.name, "t1");
        assert_eq!(asset.asset_type, "bq.sql");
        assert_eq!(asset.depends_on, vec!["a", "b"]);
        assert_eq!(asset.definition_file.kind, DefinitionKind::Comment);
        assert_eq!(asset.definition_file.path, path);
        let exec = asset.executable_file.as_ref().unwrap();
        assert_eq!(exec.path, path);
        assert!(exec.content.contains("SELECT 1"));
    }

    #[test]
    fn test_python_comment_asset() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "job.py",
            "# @blast.name: job\n# @blast.type: python\nprint('hi')\n",
        );

        let asset = load_asset(&OsFileSystem, &path).unwrap().unwrap();
        assert_eq!(asset.name, "job");
        assert_eq!(asset.asset_type, "python");
    }

    #[test]
    fn test_parameters_connections_and_materialization_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "t.sql",
            "-- @blast.name: t\n\
             -- @blast.type: bq.sql\n\
             -- @blast.parameters.lookback: 7\n\
             -- @blast.connections.google_cloud_platform: gcp-main\n\
             -- @blast.materialization.type: table\n\
             -- @blast.materialization.strategy: delete+insert\n\
             -- @blast.materialization.incremental_key: dt\n\
             -- @blast.materialization.cluster_by: a, b\n\
             SELECT 1;\n",
        );

        let asset = load_asset(&OsFileSystem, &path).unwrap().unwrap();
        assert_eq!(asset.parameters["lookback"], "7");
        assert_eq!(asset.connections["google_cloud_platform"], "gcp-main");
        assert_eq!(asset.materialization.kind, MaterializationType::Table);
        assert_eq!(
            asset.materialization.strategy,
            MaterializationStrategy::DeleteInsert
        );
        assert_eq!(asset.materialization.incremental_key.as_deref(), Some("dt"));
        assert_eq!(asset.materialization.cluster_by, vec!["a", "b"]);
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "t.sql",
            "-- @blast.name: t\n-- @blast.type: bq.sql\n-- @blast.owner: me\nSELECT 1;\n",
        );

        let asset = load_asset(&OsFileSystem, &path).unwrap().unwrap();
        assert_eq!(asset.name, "t");
    }

    #[test]
    fn test_unknown_extension_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "notes.txt", "@blast.name: nope\n");

        assert!(load_asset(&OsFileSystem, &path).unwrap().is_none());
    }

    #[test]
    fn test_file_without_markers_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "plain.sql", "SELECT 1;\n-- just a comment\n");

        assert!(load_asset(&OsFileSystem, &path).unwrap().is_none());
    }
}
