//! Validate command

use anyhow::Result;
use async_trait::async_trait;
use blast_core::{
    BuilderConfig, CachingFileSystem, Extractor, FileSystem, JinjaRenderer, OsFileSystem,
};
use blast_lint::{Linter, QueryValidator, QueryValidatorRule};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Accepts every query. Extraction and template errors still surface as
/// issues through the rule itself; backend dry-runs replace this when a
/// warehouse client is wired in.
struct AcceptAllValidator;

#[async_trait]
impl QueryValidator for AcceptAllValidator {
    async fn validate(&self, _query: &str) -> std::result::Result<(), String> {
        Ok(())
    }
}

/// Lint every pipeline under `root`. Returns whether validation passed.
pub async fn execute(root: &Path, workers: usize) -> Result<bool> {
    let fs: Arc<dyn FileSystem> = Arc::new(CachingFileSystem::new(OsFileSystem));
    let mut linter = Linter::with_default_rules(fs, BuilderConfig::default());
    for asset_type in ["bq.sql", "sf.sql"] {
        linter.add_rule(Box::new(renderable_query_rule(asset_type, workers)));
    }

    let report = linter.lint(root).await?;

    for pipeline in &report.pipelines {
        let count = pipeline.issue_count();
        if count == 0 {
            println!(
                "Pipeline '{}' ({}): ok",
                pipeline.pipeline_name,
                pipeline.root.display()
            );
            continue;
        }
        println!(
            "Pipeline '{}' ({}): {count} issue(s)",
            pipeline.pipeline_name,
            pipeline.root.display()
        );
        for rule in &pipeline.rule_issues {
            for issue in &rule.issues {
                match &issue.task_name {
                    Some(task) => println!("  [{}] {task}: {}", rule.rule, issue.description),
                    None => println!("  [{}] {}", rule.rule, issue.description),
                }
            }
        }
    }
    println!(
        "Checked {} pipeline(s), found {} issue(s)",
        report.pipelines.len(),
        report.issue_count()
    );

    Ok(!report.has_issues())
}

/// A query-validator rule that only checks queries render and extract;
/// a template syntax error in a SQL asset becomes a lint issue.
fn renderable_query_rule(asset_type: &str, workers: usize) -> QueryValidatorRule {
    let renderer = JinjaRenderer::new(BTreeMap::new());
    QueryValidatorRule::new(
        format!("renderable-query-{asset_type}"),
        asset_type,
        workers,
        Arc::new(AcceptAllValidator),
        Arc::new(Extractor::with_renderer(Box::new(renderer))),
    )
}
