//! Scheduler + executor end-to-end runs.

use async_trait::async_trait;
use blast_core::pipeline::{Asset, DefinitionFile, DefinitionKind};
use blast_core::Pipeline;
use blast_runtime::{
    Error, Executor, OperatorMap, Operator, Result, Scheduler, Status, TaskExecutionResult,
    TaskInstance,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Succeeds unless the instance name is in the failure list; records the
/// order in which instances started.
struct ScriptedOperator {
    fail: Vec<String>,
    started: Mutex<Vec<String>>,
}

#[async_trait]
impl Operator for ScriptedOperator {
    async fn run(&self, _ctx: &CancellationToken, instance: &TaskInstance) -> Result<()> {
        let name = instance.name();
        self.started.lock().unwrap().push(name.clone());
        if self.fail.contains(&name) {
            return Err(Error::Execution {
                task: name,
                message: "scripted failure".to_string(),
            });
        }
        Ok(())
    }
}

fn asset(name: &str, depends_on: &[&str]) -> Asset {
    let mut asset = Asset::new(
        name,
        "empty",
        DefinitionFile {
            name: format!("{name}.yml"),
            path: PathBuf::from(format!("/p/tasks/{name}.yml")),
            kind: DefinitionKind::Yaml,
        },
    );
    asset.depends_on = depends_on.iter().map(|s| s.to_string()).collect();
    asset
}

fn build_pipeline(assets: Vec<Asset>) -> Arc<Pipeline> {
    let mut pipeline = Pipeline::new("p");
    for a in assets {
        pipeline.add_asset(a);
    }
    pipeline.resolve_relations();
    Arc::new(pipeline)
}

async fn run_with(
    pipeline: Arc<Pipeline>,
    workers: usize,
    fail: &[&str],
) -> (Arc<Scheduler>, Arc<ScriptedOperator>, Vec<TaskExecutionResult>) {
    let operator = Arc::new(ScriptedOperator {
        fail: fail.iter().map(|s| s.to_string()).collect(),
        started: Mutex::new(Vec::new()),
    });
    let mut operators: OperatorMap = HashMap::new();
    operators.insert("empty".to_string(), operator.clone());

    let (scheduler, work_rx) = Scheduler::new(pipeline);
    let scheduler = Arc::new(scheduler);
    let executor = Executor::new(workers, operators);
    let ctx = CancellationToken::new();
    let handles = executor.start(
        ctx.clone(),
        work_rx,
        scheduler.results_sender(),
        scheduler.clone(),
    );

    let results = scheduler.run(ctx).await;
    for handle in handles {
        handle.await.unwrap();
    }
    (scheduler, operator, results)
}

#[tokio::test]
async fn test_linear_pipeline_runs_in_order() {
    let pipeline = build_pipeline(vec![asset("a", &[]), asset("b", &["a"]), asset("c", &["b"])]);
    let (scheduler, operator, results) = run_with(pipeline, 4, &[]).await;

    assert_eq!(results.len(), 3);
    assert!(scheduler.statuses().iter().all(|s| *s == Status::Succeeded));
    // A linear chain admits exactly one start order.
    assert_eq!(*operator.started.lock().unwrap(), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_diamond_with_failure() {
    let pipeline = build_pipeline(vec![
        asset("a", &[]),
        asset("b", &["a"]),
        asset("c", &["a"]),
        asset("d", &["b", "c"]),
    ]);
    let (scheduler, operator, results) = run_with(pipeline, 4, &["c"]).await;

    // One result per instance: a, b and c ran and reported, d's was
    // synthesized when c's failure absorbed it.
    assert_eq!(results.len(), 4);
    let d_result = results.iter().find(|r| r.instance_name == "d").unwrap();
    assert!(d_result.error.as_deref().unwrap().contains("upstream"));
    let started = operator.started.lock().unwrap();
    assert!(!started.contains(&"d".to_string()));

    let status = |name: &str| scheduler.status_of(scheduler.instance_by_name(name).unwrap());
    assert_eq!(status("a"), Status::Succeeded);
    assert_eq!(status("b"), Status::Succeeded);
    assert_eq!(status("c"), Status::Failed);
    assert_eq!(status("d"), Status::UpstreamFailed);
}

#[tokio::test]
async fn test_single_asset_single_dispatch() {
    let pipeline = build_pipeline(vec![asset("only", &[])]);
    let (scheduler, operator, results) = run_with(pipeline, 2, &[]).await;

    assert_eq!(results.len(), 1);
    assert_eq!(operator.started.lock().unwrap().len(), 1);
    assert!(scheduler.statuses().iter().all(Status::is_terminal));
}

#[tokio::test]
async fn test_every_instance_terminal_after_run() {
    let pipeline = build_pipeline(vec![
        asset("a", &[]),
        asset("b", &["a"]),
        asset("c", &["a"]),
        asset("d", &["b"]),
        asset("e", &["c", "d"]),
    ]);
    let (scheduler, _operator, results) = run_with(pipeline, 2, &["b"]).await;

    assert!(scheduler.statuses().iter().all(Status::is_terminal));
    // b failed, so d and e were absorbed without running; their results
    // carry the upstream error.
    assert_eq!(results.len(), 5);
    for name in ["d", "e"] {
        let result = results.iter().find(|r| r.instance_name == name).unwrap();
        assert!(result.error.as_deref().unwrap().contains("upstream"));
    }
    let status = |name: &str| scheduler.status_of(scheduler.instance_by_name(name).unwrap());
    assert_eq!(status("d"), Status::UpstreamFailed);
    assert_eq!(status("e"), Status::UpstreamFailed);
}

#[tokio::test]
async fn test_wide_pipeline_with_one_worker() {
    let assets: Vec<Asset> = (0..20).map(|i| asset(&format!("t{i}"), &[])).collect();
    let pipeline = build_pipeline(assets);
    let (scheduler, _operator, results) = run_with(pipeline, 1, &[]).await;

    assert_eq!(results.len(), 20);
    assert!(scheduler.statuses().iter().all(|s| *s == Status::Succeeded));
}
