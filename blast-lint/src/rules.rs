//! Built-in lint rules
//!
//! Each rule is a small struct implementing [`Rule`]. Rules never abort on
//! findings; they return issues and leave the decision to the caller.

use crate::{Issue, Result, Rule};
use async_trait::async_trait;
use blast_core::pipeline::is_supported_task_type;
use blast_core::{FileSystem, Pipeline};
use cron::Schedule;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

/// Asset names: alphanumeric plus `-`, `_` and `.`.
static TASK_NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_.\-]+$").expect("invalid task name regex"));

/// Pipeline names are stricter: no dots.
static PIPELINE_NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_\-]+$").expect("invalid pipeline name regex"));

/// The rule set applied by default, in reporting order.
pub fn default_rules(fs: Arc<dyn FileSystem>) -> Vec<Box<dyn Rule>> {
    vec![
        Box::new(TaskNameValid),
        Box::new(TaskNameUnique),
        Box::new(DependencyExists),
        Box::new(ValidExecutableFile { fs }),
        Box::new(ValidPipelineSchedule),
        Box::new(ValidPipelineName),
        Box::new(ValidTaskType),
        Box::new(AcyclicPipeline),
    ]
}

pub struct TaskNameValid;

#[async_trait]
impl Rule for TaskNameValid {
    fn name(&self) -> &str {
        "task-name-valid"
    }

    async fn validate(&self, pipeline: &Pipeline) -> Result<Vec<Issue>> {
        let mut issues = Vec::new();
        for asset in &pipeline.assets {
            if asset.name.is_empty() {
                issues.push(Issue::for_pipeline(format!(
                    "a task defined in '{}' has no name",
                    asset.definition_file.path.display()
                )));
            } else if !TASK_NAME_PATTERN.is_match(&asset.name) {
                issues.push(Issue::for_task(
                    &asset.name,
                    format!(
                        "task name '{}' must consist of alphanumeric characters, '-', '_' or '.'",
                        asset.name
                    ),
                ));
            }
        }
        Ok(issues)
    }
}

pub struct TaskNameUnique;

#[async_trait]
impl Rule for TaskNameUnique {
    fn name(&self) -> &str {
        "task-name-unique"
    }

    async fn validate(&self, pipeline: &Pipeline) -> Result<Vec<Issue>> {
        let mut seen: HashMap<&str, usize> = HashMap::new();
        for asset in &pipeline.assets {
            *seen.entry(asset.name.as_str()).or_insert(0) += 1;
        }

        let mut issues = Vec::new();
        let mut reported: HashMap<&str, bool> = HashMap::new();
        for asset in &pipeline.assets {
            let count = seen[asset.name.as_str()];
            if count > 1 && !reported.contains_key(asset.name.as_str()) {
                reported.insert(asset.name.as_str(), true);
                issues.push(Issue::for_task(
                    &asset.name,
                    format!("task name '{}' is used by {count} tasks", asset.name),
                ));
            }
        }
        Ok(issues)
    }
}

pub struct DependencyExists;

#[async_trait]
impl Rule for DependencyExists {
    fn name(&self) -> &str {
        "dependency-exists"
    }

    async fn validate(&self, pipeline: &Pipeline) -> Result<Vec<Issue>> {
        let mut issues = Vec::new();
        for asset in &pipeline.assets {
            for dep in &asset.depends_on {
                if pipeline.asset_index(dep).is_none() {
                    issues.push(Issue::for_task(
                        &asset.name,
                        format!("dependency '{dep}' does not exist in the pipeline"),
                    ));
                }
            }
        }
        Ok(issues)
    }
}

pub struct ValidExecutableFile {
    pub fs: Arc<dyn FileSystem>,
}

#[async_trait]
impl Rule for ValidExecutableFile {
    fn name(&self) -> &str {
        "valid-executable-file"
    }

    async fn validate(&self, pipeline: &Pipeline) -> Result<Vec<Issue>> {
        let mut issues = Vec::new();
        for asset in &pipeline.assets {
            // The embedded-comment form is its own executable; the comment
            // loader has already read it.
            if asset.is_comment_defined() {
                continue;
            }
            let Some(executable) = &asset.executable_file else {
                continue;
            };
            let path = &executable.path;

            if !self.fs.exists(path) {
                issues.push(Issue::for_task(
                    &asset.name,
                    format!("executable file '{}' does not exist", path.display()),
                ));
                continue;
            }
            if self.fs.is_dir(path) {
                issues.push(Issue::for_task(
                    &asset.name,
                    format!("executable file '{}' is a directory", path.display()),
                ));
                continue;
            }
            match self.fs.file_size(path) {
                Ok(0) => issues.push(Issue::for_task(
                    &asset.name,
                    format!("executable file '{}' is empty", path.display()),
                )),
                Ok(_) => {}
                Err(e) => issues.push(Issue::for_task(
                    &asset.name,
                    format!("cannot stat executable file '{}': {e}", path.display()),
                )),
            }
            match self.fs.file_mode(path) {
                Ok(mode) if mode == 0o644 || mode == 0o755 => {}
                Ok(mode) => issues.push(Issue::for_task(
                    &asset.name,
                    format!(
                        "executable file '{}' has mode {mode:o}, expected 644 or 755",
                        path.display()
                    ),
                )),
                Err(e) => issues.push(Issue::for_task(
                    &asset.name,
                    format!("cannot stat executable file '{}': {e}", path.display()),
                )),
            }
        }
        Ok(issues)
    }
}

pub struct ValidPipelineSchedule;

#[async_trait]
impl Rule for ValidPipelineSchedule {
    fn name(&self) -> &str {
        "valid-pipeline-schedule"
    }

    async fn validate(&self, pipeline: &Pipeline) -> Result<Vec<Issue>> {
        let mut issues = Vec::new();
        if let Some(schedule) = &pipeline.schedule {
            if let Err(e) = parse_schedule(schedule) {
                issues.push(Issue::for_pipeline(format!(
                    "schedule '{schedule}' is not a valid cron expression: {e}"
                )));
            }
        }
        Ok(issues)
    }
}

/// Parse a schedule string as cron. Classic five-field expressions are
/// normalized to the seconds-first form the parser expects, and the common
/// interval shorthands are accepted with or without the `@`.
pub fn parse_schedule(schedule: &str) -> std::result::Result<Schedule, cron::error::Error> {
    let schedule = schedule.trim();
    let normalized = match schedule {
        "hourly" | "daily" | "weekly" | "monthly" | "yearly" => format!("@{schedule}"),
        s if s.split_whitespace().count() == 5 => format!("0 {s}"),
        s => s.to_string(),
    };
    Schedule::from_str(&normalized)
}

pub struct ValidPipelineName;

#[async_trait]
impl Rule for ValidPipelineName {
    fn name(&self) -> &str {
        "valid-pipeline-name"
    }

    async fn validate(&self, pipeline: &Pipeline) -> Result<Vec<Issue>> {
        let mut issues = Vec::new();
        if pipeline.name.is_empty() {
            issues.push(Issue::for_pipeline("pipeline name must not be empty"));
        } else if !PIPELINE_NAME_PATTERN.is_match(&pipeline.name) {
            issues.push(Issue::for_pipeline(format!(
                "pipeline name '{}' must consist of alphanumeric characters, '-' or '_'",
                pipeline.name
            )));
        }
        Ok(issues)
    }
}

pub struct ValidTaskType;

#[async_trait]
impl Rule for ValidTaskType {
    fn name(&self) -> &str {
        "valid-task-type"
    }

    async fn validate(&self, pipeline: &Pipeline) -> Result<Vec<Issue>> {
        let mut issues = Vec::new();
        for asset in &pipeline.assets {
            if !is_supported_task_type(&asset.asset_type) {
                issues.push(Issue::for_task(
                    &asset.name,
                    format!("task type '{}' is not supported", asset.asset_type),
                ));
            }
        }
        Ok(issues)
    }
}

pub struct AcyclicPipeline;

#[async_trait]
impl Rule for AcyclicPipeline {
    fn name(&self) -> &str {
        "acyclic-pipeline"
    }

    async fn validate(&self, pipeline: &Pipeline) -> Result<Vec<Issue>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        fn visit(
            pipeline: &Pipeline,
            node: usize,
            colors: &mut [Color],
            issues: &mut Vec<Issue>,
        ) {
            colors[node] = Color::Gray;
            for &up in &pipeline.assets[node].upstream {
                match colors[up] {
                    Color::White => visit(pipeline, up, colors, issues),
                    Color::Gray => issues.push(Issue::for_task(
                        &pipeline.assets[node].name,
                        format!(
                            "dependency cycle detected through '{}' and '{}'",
                            pipeline.assets[node].name, pipeline.assets[up].name
                        ),
                    )),
                    Color::Black => {}
                }
            }
            colors[node] = Color::Black;
        }

        let mut issues = Vec::new();
        let mut colors = vec![Color::White; pipeline.assets.len()];
        for node in 0..pipeline.assets.len() {
            if colors[node] == Color::White {
                visit(pipeline, node, &mut colors, &mut issues);
            }
        }
        Ok(issues)
    }
}
