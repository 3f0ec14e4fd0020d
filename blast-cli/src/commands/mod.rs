//! Command implementations

pub mod render;
pub mod run;
pub mod run_task;
pub mod validate;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use blast_core::{FileSystem, Pipeline};
use blast_runtime::{
    Executor, NoOpOperator, OperatorMap, PythonOperator, QueryOperator, QueryRunner, Scheduler,
    Status, TaskInstance,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Stand-in backend: logs the statement it would submit. Warehouse clients
/// plug in here by replacing this runner per connection.
pub struct LoggingQueryRunner;

#[async_trait]
impl QueryRunner for LoggingQueryRunner {
    async fn run_query(
        &self,
        _ctx: &CancellationToken,
        query: &str,
    ) -> std::result::Result<(), String> {
        info!(%query, "executing statement");
        Ok(())
    }
}

/// The operator registry used by `run` and `run-task`.
pub fn operator_map(fs: Arc<dyn FileSystem>) -> OperatorMap {
    let query_operator = Arc::new(QueryOperator::new(fs, Arc::new(LoggingQueryRunner)));
    let mut map: OperatorMap = HashMap::new();
    map.insert("empty".to_string(), Arc::new(NoOpOperator));
    map.insert("python".to_string(), Arc::new(PythonOperator::default()));
    map.insert("bq.sql".to_string(), query_operator.clone());
    map.insert("sf.sql".to_string(), query_operator);
    map
}

/// Walk upward from a task path until a directory holding the pipeline
/// definition file is found.
pub fn find_pipeline_root(path: &Path, pipeline_file_name: &str) -> Result<PathBuf> {
    let start = std::path::absolute(path)
        .with_context(|| format!("cannot resolve path '{}'", path.display()))?;
    let mut dir = if start.is_dir() {
        Some(start.as_path())
    } else {
        start.parent()
    };
    while let Some(d) = dir {
        if d.join(pipeline_file_name).is_file() {
            return Ok(d.to_path_buf());
        }
        dir = d.parent();
    }
    Err(anyhow!(
        "no pipeline definition found above '{}'",
        start.display()
    ))
}

/// Locate the asset a file path refers to, by definition or executable.
pub fn find_asset_by_path(pipeline: &Pipeline, path: &Path) -> Result<usize> {
    let path = std::path::absolute(path)
        .with_context(|| format!("cannot resolve path '{}'", path.display()))?;
    pipeline
        .assets
        .iter()
        .position(|asset| {
            asset.definition_file.path == path
                || asset
                    .executable_file
                    .as_ref()
                    .is_some_and(|e| e.path == path)
        })
        .ok_or_else(|| anyhow!("no task in the pipeline is defined by '{}'", path.display()))
}

/// Run the scheduler/executor loop to completion. Returns whether every
/// instance succeeded.
pub async fn drive(
    scheduler: Scheduler,
    work_rx: mpsc::Receiver<TaskInstance>,
    fs: Arc<dyn FileSystem>,
    workers: usize,
) -> Result<bool> {
    // Only initialize operators whose type actually has pending work.
    let mut operators = operator_map(fs);
    operators.retain(|task_type, _| scheduler.will_run_task_of_type(task_type));

    let scheduler = Arc::new(scheduler);
    let ctx = CancellationToken::new();
    let executor = Executor::new(workers, operators);
    let handles = executor.start(
        ctx.clone(),
        work_rx,
        scheduler.results_sender(),
        scheduler.clone(),
    );

    let results = scheduler.run(ctx).await;
    for handle in handles {
        handle.await.context("worker task failed")?;
    }

    let statuses = scheduler.statuses();
    let succeeded = statuses.iter().filter(|s| **s == Status::Succeeded).count();
    let failed = statuses.iter().filter(|s| **s == Status::Failed).count();
    let upstream_failed = statuses
        .iter()
        .filter(|s| **s == Status::UpstreamFailed)
        .count();

    for result in &results {
        match &result.error {
            None => info!(task = %result.instance_name, "succeeded"),
            Some(error) => tracing::error!(task = %result.instance_name, %error, "failed"),
        }
    }
    info!(succeeded, failed, upstream_failed, "run finished");

    Ok(failed == 0 && upstream_failed == 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_find_pipeline_root_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("p/tasks/sub")).unwrap();
        fs::write(dir.path().join("p/pipeline.yml"), "name: p").unwrap();
        fs::write(dir.path().join("p/tasks/sub/t.sql"), "SELECT 1").unwrap();

        let root =
            find_pipeline_root(&dir.path().join("p/tasks/sub/t.sql"), "pipeline.yml").unwrap();
        assert_eq!(root, std::path::absolute(dir.path().join("p")).unwrap());
    }

    #[test]
    fn test_find_pipeline_root_fails_without_definition() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("loose")).unwrap();
        assert!(find_pipeline_root(&dir.path().join("loose"), "pipeline.yml").is_err());
    }
}
