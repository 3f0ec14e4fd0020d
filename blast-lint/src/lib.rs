//! # Blast Lint
//!
//! Static validation over built pipelines. The linter discovers pipeline
//! roots under a path, rejects nested pipelines, builds each pipeline, and
//! applies a list of rules, aggregating issues per rule per pipeline.
//!
//! Rule *errors* abort the lint run; rule *issues* accumulate and are
//! reported together.

pub mod finder;
pub mod query_validator;
pub mod rules;

use async_trait::async_trait;
use blast_core::{Builder, BuilderConfig, FileSystem, Pipeline};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub use query_validator::{QueryValidator, QueryValidatorRule};

/// Result type for lint operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for lint operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Nested pipelines are not allowed: '{inner}' is inside '{outer}'")]
    NestedPipelines { outer: PathBuf, inner: PathBuf },

    #[error("Build error: {0}")]
    Build(#[from] blast_core::Error),

    #[error("Rule '{rule}' failed: {message}")]
    Rule { rule: String, message: String },
}

/// A single finding: which asset, and what is wrong with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    /// Asset the issue is about; `None` for pipeline-level findings.
    pub task_name: Option<String>,
    pub description: String,
}

impl Issue {
    pub fn for_task(task_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            task_name: Some(task_name.into()),
            description: description.into(),
        }
    }

    pub fn for_pipeline(description: impl Into<String>) -> Self {
        Self {
            task_name: None,
            description: description.into(),
        }
    }
}

/// A lint rule: a name plus a validator over a built pipeline.
#[async_trait]
pub trait Rule: Send + Sync {
    fn name(&self) -> &str;

    async fn validate(&self, pipeline: &Pipeline) -> Result<Vec<Issue>>;
}

/// Issues produced by one rule for one pipeline.
#[derive(Debug, Clone)]
pub struct RuleIssues {
    pub rule: String,
    pub issues: Vec<Issue>,
}

/// All findings for one pipeline.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub pipeline_name: String,
    pub root: PathBuf,
    pub rule_issues: Vec<RuleIssues>,
}

impl PipelineReport {
    pub fn issue_count(&self) -> usize {
        self.rule_issues.iter().map(|r| r.issues.len()).sum()
    }
}

/// Findings across all pipelines under a root.
#[derive(Debug, Clone, Default)]
pub struct LintReport {
    pub pipelines: Vec<PipelineReport>,
}

impl LintReport {
    pub fn issue_count(&self) -> usize {
        self.pipelines.iter().map(|p| p.issue_count()).sum()
    }

    pub fn has_issues(&self) -> bool {
        self.issue_count() > 0
    }
}

/// Applies rules to every pipeline found under a path.
pub struct Linter {
    fs: Arc<dyn FileSystem>,
    builder_config: BuilderConfig,
    rules: Vec<Box<dyn Rule>>,
}

impl Linter {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        builder_config: BuilderConfig,
        rules: Vec<Box<dyn Rule>>,
    ) -> Self {
        Self {
            fs,
            builder_config,
            rules,
        }
    }

    /// Linter with the built-in rule set.
    pub fn with_default_rules(fs: Arc<dyn FileSystem>, builder_config: BuilderConfig) -> Self {
        let rules = rules::default_rules(fs.clone());
        Self::new(fs, builder_config, rules)
    }

    /// Append a rule (e.g. a backend-specific query validator).
    pub fn add_rule(&mut self, rule: Box<dyn Rule>) {
        self.rules.push(rule);
    }

    /// Lint every pipeline under `root`.
    #[tracing::instrument(name = "linter.lint", skip(self), fields(root = %root.display()))]
    pub async fn lint(&self, root: &Path) -> Result<LintReport> {
        let mut roots =
            finder::find_pipeline_roots(&*self.fs, root, &self.builder_config.pipeline_file_name)?;
        roots.sort();

        reject_nested(&roots)?;
        info!(pipeline_count = roots.len(), "linting pipelines");

        let builder = Builder::new(&*self.fs, self.builder_config.clone());
        let mut report = LintReport::default();

        for pipeline_root in &roots {
            let pipeline = builder.build(pipeline_root)?;
            debug!(pipeline = %pipeline.name, "built pipeline");

            let mut rule_issues = Vec::with_capacity(self.rules.len());
            for rule in &self.rules {
                let issues = rule.validate(&pipeline).await?;
                rule_issues.push(RuleIssues {
                    rule: rule.name().to_string(),
                    issues,
                });
            }

            report.pipelines.push(PipelineReport {
                pipeline_name: pipeline.name.clone(),
                root: pipeline_root.clone(),
                rule_issues,
            });
        }

        Ok(report)
    }
}

/// Nested pipelines would cause task double-ownership; refuse them.
/// Expects `roots` sorted lexicographically.
fn reject_nested(roots: &[PathBuf]) -> Result<()> {
    for (i, outer) in roots.iter().enumerate() {
        for inner in &roots[i + 1..] {
            if inner != outer && inner.starts_with(outer) {
                return Err(Error::NestedPipelines {
                    outer: outer.clone(),
                    inner: inner.clone(),
                });
            }
        }
    }
    Ok(())
}
