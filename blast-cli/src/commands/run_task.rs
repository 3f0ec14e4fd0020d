//! Run-task command

use crate::commands::{drive, find_asset_by_path, find_pipeline_root};
use anyhow::Result;
use blast_core::{Builder, BuilderConfig, CachingFileSystem, FileSystem, OsFileSystem};
use blast_runtime::{Scheduler, Status};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Execute a single task (and its column tests) inside its pipeline
/// context: every other instance is treated as already succeeded.
pub async fn execute(path: &Path, workers: usize) -> Result<bool> {
    let config = BuilderConfig::default();
    let fs: Arc<dyn FileSystem> = Arc::new(CachingFileSystem::new(OsFileSystem));

    let root = find_pipeline_root(path, &config.pipeline_file_name)?;
    let builder = Builder::new(&*fs, config);
    let pipeline = Arc::new(builder.build(&root)?);

    let asset_idx = find_asset_by_path(&pipeline, path)?;
    let asset = &pipeline.assets[asset_idx];
    info!(pipeline = %pipeline.name, task = %asset.name, "running single task");

    let (scheduler, work_rx) = Scheduler::new(pipeline.clone());
    scheduler.mark_all(Status::Succeeded);

    let target = pipeline.assets[asset_idx].name.clone();
    reset_instance(&scheduler, &target)?;
    for (column, spec) in &pipeline.assets[asset_idx].columns {
        for test in &spec.tests {
            reset_instance(&scheduler, &format!("{target}:{column}:{}", test.name))?;
        }
    }

    drive(scheduler, work_rx, fs, workers).await
}

fn reset_instance(scheduler: &Scheduler, name: &str) -> Result<()> {
    let id = scheduler
        .instance_by_name(name)
        .ok_or_else(|| anyhow::anyhow!("no task instance named '{name}'"))?;
    scheduler.mark_instance(id, Status::Pending, false);
    Ok(())
}
