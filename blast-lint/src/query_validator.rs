//! Backend query validation
//!
//! [`QueryValidatorRule`] dry-runs every query of every asset of a given
//! type against a backend validator. Assets are spread across a bounded
//! worker pool; within one asset the individual queries are validated in
//! parallel and their findings aggregated under a mutex before the asset
//! reports back to the dispatcher.

use crate::{Issue, Result, Rule};
use async_trait::async_trait;
use blast_core::{Extractor, Pipeline};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Backend capability: can a query be executed as written?
#[async_trait]
pub trait QueryValidator: Send + Sync {
    /// `Err` carries the backend's message for an invalid query.
    async fn validate(&self, query: &str) -> std::result::Result<(), String>;
}

/// One unit of work for the pool: an asset and its executable content.
struct AssetWork {
    asset_name: String,
    content: String,
}

/// Validates all queries of all assets of `asset_type` through `validator`.
pub struct QueryValidatorRule {
    rule_name: String,
    asset_type: String,
    worker_count: usize,
    validator: Arc<dyn QueryValidator>,
    extractor: Arc<Extractor>,
}

impl QueryValidatorRule {
    pub fn new(
        rule_name: impl Into<String>,
        asset_type: impl Into<String>,
        worker_count: usize,
        validator: Arc<dyn QueryValidator>,
        extractor: Arc<Extractor>,
    ) -> Self {
        Self {
            rule_name: rule_name.into(),
            asset_type: asset_type.into(),
            worker_count,
            validator,
            extractor,
        }
    }
}

#[async_trait]
impl Rule for QueryValidatorRule {
    fn name(&self) -> &str {
        &self.rule_name
    }

    #[tracing::instrument(name = "query_validator.validate", skip_all, fields(rule = %self.rule_name, pipeline = %pipeline.name))]
    async fn validate(&self, pipeline: &Pipeline) -> Result<Vec<Issue>> {
        if self.worker_count == 0 {
            debug!("no workers configured, skipping");
            return Ok(Vec::new());
        }

        // Work items own their content so the pool doesn't borrow the
        // pipeline across spawns.
        let work: Vec<AssetWork> = pipeline
            .assets_of_type(&self.asset_type)
            .iter()
            .filter_map(|&idx| {
                let asset = &pipeline.assets[idx];
                asset.executable_file.as_ref().map(|exec| AssetWork {
                    asset_name: asset.name.clone(),
                    content: exec.content.clone(),
                })
            })
            .collect();

        if work.is_empty() {
            return Ok(Vec::new());
        }
        let dispatched = work.len();

        let (work_tx, work_rx) = mpsc::channel::<AssetWork>(dispatched);
        let (result_tx, mut result_rx) = mpsc::channel::<Vec<Issue>>(dispatched);
        let work_rx = Arc::new(tokio::sync::Mutex::new(work_rx));

        for _ in 0..self.worker_count.min(dispatched) {
            let work_rx = work_rx.clone();
            let result_tx = result_tx.clone();
            let validator = self.validator.clone();
            let extractor = self.extractor.clone();
            tokio::spawn(async move {
                loop {
                    let item = { work_rx.lock().await.recv().await };
                    let Some(item) = item else { break };
                    let issues = validate_asset(&item, &validator, &extractor).await;
                    if result_tx.send(issues).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        for item in work {
            // The queue holds every item, so this never blocks.
            if work_tx.send(item).await.is_err() {
                break;
            }
        }
        drop(work_tx);

        // One result per dispatched asset.
        let mut issues = Vec::new();
        for _ in 0..dispatched {
            match result_rx.recv().await {
                Some(asset_issues) => issues.extend(asset_issues),
                None => {
                    warn!("validator pool closed before all assets reported");
                    break;
                }
            }
        }
        Ok(issues)
    }
}

/// Validate one asset: extract its queries and check each in parallel.
async fn validate_asset(
    work: &AssetWork,
    validator: &Arc<dyn QueryValidator>,
    extractor: &Arc<Extractor>,
) -> Vec<Issue> {
    let queries = match extractor.extract(&work.content) {
        Ok(queries) => queries,
        Err(e) => {
            return vec![Issue::for_task(
                &work.asset_name,
                format!("cannot extract queries: {e}"),
            )];
        }
    };

    let issues = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::with_capacity(queries.len());
    for query in queries {
        let validator = validator.clone();
        let issues = issues.clone();
        let asset_name = work.asset_name.clone();
        handles.push(tokio::spawn(async move {
            if let Err(message) = validator.validate(&query).await {
                let mut issues = issues.lock().expect("issue list poisoned");
                issues.push(Issue::for_task(
                    asset_name,
                    format!("invalid query: {message}"),
                ));
            }
        }));
    }
    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, asset = %work.asset_name, "query validation task failed");
        }
    }

    match Arc::try_unwrap(issues) {
        Ok(mutex) => mutex.into_inner().unwrap_or_default(),
        Err(arc) => arc.lock().expect("issue list poisoned").clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blast_core::pipeline::{Asset, DefinitionFile, DefinitionKind, ExecutableFile};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RejectContaining {
        needle: &'static str,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl QueryValidator for RejectContaining {
        async fn validate(&self, query: &str) -> std::result::Result<(), String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if query.contains(self.needle) {
                Err(format!("query references {}", self.needle))
            } else {
                Ok(())
            }
        }
    }

    fn sql_asset(name: &str, content: &str) -> Asset {
        let path = PathBuf::from(format!("/p/tasks/{name}.sql"));
        let mut asset = Asset::new(
            name,
            "bq.sql",
            DefinitionFile {
                name: format!("{name}.sql"),
                path: path.clone(),
                kind: DefinitionKind::Comment,
            },
        );
        asset.executable_file = Some(ExecutableFile {
            name: format!("{name}.sql"),
            path,
            content: content.to_string(),
        });
        asset
    }

    fn rule(worker_count: usize, validator: Arc<dyn QueryValidator>) -> QueryValidatorRule {
        QueryValidatorRule::new(
            "bigquery-validator",
            "bq.sql",
            worker_count,
            validator,
            Arc::new(Extractor::new()),
        )
    }

    fn pipeline_with(assets: Vec<Asset>) -> Pipeline {
        let mut pipeline = Pipeline::new("p");
        for asset in assets {
            pipeline.add_asset(asset);
        }
        pipeline.resolve_relations();
        pipeline
    }

    #[tokio::test]
    async fn test_issues_per_failing_query() {
        let validator = Arc::new(RejectContaining {
            needle: "forbidden",
            calls: AtomicUsize::new(0),
        });
        let pipeline = pipeline_with(vec![
            sql_asset("ok", "SELECT 1; SELECT 2;"),
            sql_asset("bad", "SELECT forbidden; SELECT 3; SELECT forbidden2;"),
        ]);

        let issues = rule(4, validator.clone()).validate(&pipeline).await.unwrap();

        assert_eq!(issues.len(), 2);
        assert!(issues.iter().all(|i| i.task_name.as_deref() == Some("bad")));
        // Every query of every asset was checked.
        assert_eq!(validator.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_zero_workers_skips() {
        let validator = Arc::new(RejectContaining {
            needle: "x",
            calls: AtomicUsize::new(0),
        });
        let pipeline = pipeline_with(vec![sql_asset("a", "SELECT x;")]);

        let issues = rule(0, validator.clone()).validate(&pipeline).await.unwrap();

        assert!(issues.is_empty());
        assert_eq!(validator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_more_assets_than_workers() {
        let validator = Arc::new(RejectContaining {
            needle: "nope",
            calls: AtomicUsize::new(0),
        });
        let assets: Vec<Asset> = (0..10)
            .map(|i| sql_asset(&format!("t{i}"), "SELECT nope;"))
            .collect();
        let pipeline = pipeline_with(assets);

        let issues = rule(2, validator).validate(&pipeline).await.unwrap();
        assert_eq!(issues.len(), 10);
    }

    #[tokio::test]
    async fn test_only_matching_type_is_validated() {
        let validator = Arc::new(RejectContaining {
            needle: "SELECT",
            calls: AtomicUsize::new(0),
        });
        let mut other = sql_asset("py-task", "SELECT 1;");
        other.asset_type = "python".to_string();
        let pipeline = pipeline_with(vec![other]);

        let issues = rule(2, validator.clone()).validate(&pipeline).await.unwrap();
        assert!(issues.is_empty());
        assert_eq!(validator.calls.load(Ordering::SeqCst), 0);
    }
}
