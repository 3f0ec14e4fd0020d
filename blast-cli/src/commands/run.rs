//! Run command

use crate::commands::drive;
use anyhow::{Context, Result};
use blast_core::{Builder, BuilderConfig, CachingFileSystem, Config, FileSystem, OsFileSystem};
use blast_runtime::Scheduler;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Name of the optional connection-config file next to a pipeline.
const CONFIG_FILE_NAME: &str = ".blast.yml";

/// Execute a whole pipeline to completion. Returns whether every instance
/// succeeded.
pub async fn execute(path: &Path, workers: usize, environment: Option<&str>) -> Result<bool> {
    let fs: Arc<dyn FileSystem> = Arc::new(CachingFileSystem::new(OsFileSystem));
    let builder = Builder::new(&*fs, BuilderConfig::default());
    let pipeline = Arc::new(builder.build(path)?);

    load_connections(&*fs, path, environment)?;

    info!(
        pipeline = %pipeline.name,
        tasks = pipeline.assets.len(),
        workers,
        "starting run"
    );

    let (scheduler, work_rx) = Scheduler::new(pipeline);
    drive(scheduler, work_rx, fs, workers).await
}

/// Read the connection config next to the pipeline, when present. An
/// invalid config (including an unknown connection type) aborts the run.
fn load_connections(fs: &dyn FileSystem, path: &Path, environment: Option<&str>) -> Result<()> {
    let root = if path.is_dir() {
        path.to_path_buf()
    } else {
        path.parent().map(Path::to_path_buf).unwrap_or_default()
    };
    let config_path = root.join(CONFIG_FILE_NAME);
    if !fs.is_file(&config_path) {
        return Ok(());
    }

    let config = Config::load(fs, &config_path)
        .with_context(|| format!("loading '{}'", config_path.display()))?;
    let env = config.environment(environment)?;
    info!(
        connections = env.connections.len(),
        "loaded connection config"
    );
    Ok(())
}
