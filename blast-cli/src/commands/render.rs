//! Render command

use crate::commands::{find_asset_by_path, find_pipeline_root, LoggingQueryRunner};
use anyhow::Result;
use blast_core::{Builder, BuilderConfig, CachingFileSystem, FileSystem, OsFileSystem};
use blast_runtime::{InstanceKind, QueryOperator, TaskInstance};
use std::path::Path;
use std::sync::Arc;

/// Print the rendered and materialized statement for one asset, without
/// executing anything.
pub async fn execute(path: &Path) -> Result<()> {
    let config = BuilderConfig::default();
    let fs: Arc<dyn FileSystem> = Arc::new(CachingFileSystem::new(OsFileSystem));

    let root = find_pipeline_root(path, &config.pipeline_file_name)?;
    let builder = Builder::new(&*fs, config);
    let pipeline = Arc::new(builder.build(&root)?);
    let asset = find_asset_by_path(&pipeline, path)?;

    let operator = QueryOperator::new(fs, Arc::new(LoggingQueryRunner));
    let instance = TaskInstance {
        id: 0,
        pipeline,
        asset,
        kind: InstanceKind::Asset,
    };
    println!("{}", operator.render(&instance)?);
    Ok(())
}
