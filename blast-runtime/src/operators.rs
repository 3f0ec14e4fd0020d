//! Typed operators
//!
//! An operator realizes one task type. The executor resolves operators by
//! `Asset.Type`, so backends register here by type string and the core
//! never links them directly.

use crate::instance::{InstanceKind, TaskInstance};
use crate::{Error, Result};
use async_trait::async_trait;
use blast_core::{materialize, Extractor, FileSystem, JinjaRenderer};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Valid dotted Python module paths; rules out path traversal and shell
/// metacharacters before anything reaches a command line.
static MODULE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*(\.[a-zA-Z_][a-zA-Z0-9_]*)*$")
        .expect("invalid module regex")
});

/// Runs one task instance. `Ok(())` means success; errors mark the
/// instance Failed and propagate through the graph.
#[async_trait]
pub trait Operator: Send + Sync {
    async fn run(&self, ctx: &CancellationToken, instance: &TaskInstance) -> Result<()>;
}

/// For task types whose semantics are realized elsewhere.
pub struct NoOpOperator;

#[async_trait]
impl Operator for NoOpOperator {
    async fn run(&self, _ctx: &CancellationToken, instance: &TaskInstance) -> Result<()> {
        debug!(instance = %instance.name(), "no-op");
        Ok(())
    }
}

/// Backend capability: submit a finished statement for execution.
#[async_trait]
pub trait QueryRunner: Send + Sync {
    async fn run_query(
        &self,
        ctx: &CancellationToken,
        query: &str,
    ) -> std::result::Result<(), String>;
}

/// Extract, render, materialize, submit.
///
/// Asset instances run the materialized query; column-test instances run a
/// generated check query against the already-materialized asset. Rendering
/// uses the asset's merged parameter map as the template context.
pub struct QueryOperator {
    fs: Arc<dyn FileSystem>,
    runner: Arc<dyn QueryRunner>,
}

impl QueryOperator {
    pub fn new(fs: Arc<dyn FileSystem>, runner: Arc<dyn QueryRunner>) -> Self {
        Self { fs, runner }
    }

    /// The statement this instance would submit, without submitting it.
    /// Also backs the `render` command.
    pub fn render(&self, instance: &TaskInstance) -> Result<String> {
        let asset = instance.asset();
        match &instance.kind {
            InstanceKind::Asset => {
                let executable = asset.executable_file.as_ref().ok_or_else(|| {
                    Error::Execution {
                        task: instance.name(),
                        message: "asset has no executable file".to_string(),
                    }
                })?;
                // Prefer the content loaded at build time; fall back to disk.
                let content = if executable.content.is_empty() {
                    self.fs.read_to_string(&executable.path)?
                } else {
                    executable.content.clone()
                };
                let renderer = JinjaRenderer::new(asset.parameters.clone());
                let extractor = Extractor::with_renderer(Box::new(renderer));
                let queries = extractor.extract(&content)?;
                let query = match queries.as_slice() {
                    [single] => single,
                    [] => {
                        return Err(Error::Execution {
                            task: instance.name(),
                            message: "executable file contains no query".to_string(),
                        })
                    }
                    many => {
                        return Err(Error::Execution {
                            task: instance.name(),
                            message: format!(
                                "expected a single query, found {}",
                                many.len()
                            ),
                        })
                    }
                };
                Ok(materialize(asset, query)?)
            }
            InstanceKind::ColumnTest { column, test } => {
                build_test_query(&asset.name, column, test).ok_or_else(|| Error::Execution {
                    task: instance.name(),
                    message: format!("unknown column test '{test}'"),
                })
            }
        }
    }
}

#[async_trait]
impl Operator for QueryOperator {
    async fn run(&self, ctx: &CancellationToken, instance: &TaskInstance) -> Result<()> {
        let statement = self.render(instance)?;
        debug!(instance = %instance.name(), "submitting query");
        self.runner
            .run_query(ctx, &statement)
            .await
            .map_err(|message| Error::Execution {
                task: instance.name(),
                message,
            })
    }
}

/// Check queries per test name. A failing check is one that returns rows.
fn build_test_query(asset_name: &str, column: &str, test: &str) -> Option<String> {
    let query = match test {
        "not_null" => format!(
            "SELECT count(*) as fails FROM `{asset_name}` WHERE `{column}` IS NULL HAVING count(*) > 0"
        ),
        "unique" => format!(
            "SELECT `{column}`, count(*) as fails FROM `{asset_name}` GROUP BY `{column}` HAVING count(*) > 1"
        ),
        "positive" => format!(
            "SELECT count(*) as fails FROM `{asset_name}` WHERE `{column}` <= 0 HAVING count(*) > 0"
        ),
        _ => return None,
    };
    Some(query)
}

/// Runs a python asset as a subprocess: locate the repository root, derive
/// the dotted module path from the file location, and `python -m` it with
/// the repo root as working directory.
pub struct PythonOperator {
    python_bin: PathBuf,
    /// A directory containing one of these names is treated as the
    /// repository root.
    root_markers: Vec<String>,
}

impl Default for PythonOperator {
    fn default() -> Self {
        Self {
            python_bin: PathBuf::from("python3"),
            root_markers: vec![
                ".git".to_string(),
                "pipeline.yml".to_string(),
                "requirements.txt".to_string(),
            ],
        }
    }
}

impl PythonOperator {
    pub fn new(python_bin: PathBuf, root_markers: Vec<String>) -> Self {
        Self {
            python_bin,
            root_markers,
        }
    }

    fn find_repo_root(&self, fs: &dyn FileSystem, start: &Path) -> Option<PathBuf> {
        let mut dir = start.parent()?;
        loop {
            if self
                .root_markers
                .iter()
                .any(|marker| fs.exists(&dir.join(marker)))
            {
                return Some(dir.to_path_buf());
            }
            dir = dir.parent()?;
        }
    }
}

/// Dotted module path for a `.py` file relative to the repository root.
fn module_path(root: &Path, file: &Path) -> Result<String> {
    let relative = file.strip_prefix(root).map_err(|_| Error::Execution {
        task: file.display().to_string(),
        message: format!(
            "file is not under the repository root '{}'",
            root.display()
        ),
    })?;
    let without_ext = relative.with_extension("");
    let module = without_ext
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(".");
    if !MODULE_PATTERN.is_match(&module) {
        return Err(Error::Execution {
            task: file.display().to_string(),
            message: format!("'{module}' is not a valid python module path"),
        });
    }
    Ok(module)
}

#[async_trait]
impl Operator for PythonOperator {
    async fn run(&self, ctx: &CancellationToken, instance: &TaskInstance) -> Result<()> {
        let asset = instance.asset();
        let executable = asset.executable_file.as_ref().ok_or_else(|| Error::Execution {
            task: instance.name(),
            message: "python asset has no executable file".to_string(),
        })?;

        let fs = blast_core::OsFileSystem;
        let root = self
            .find_repo_root(&fs, &executable.path)
            .ok_or_else(|| Error::Execution {
                task: instance.name(),
                message: format!(
                    "cannot locate a repository root above '{}'",
                    executable.path.display()
                ),
            })?;
        let module = module_path(&root, &executable.path)?;

        debug!(instance = %instance.name(), %module, root = %root.display(), "spawning python");
        let mut child = tokio::process::Command::new(&self.python_bin)
            .arg("-m")
            .arg(&module)
            .current_dir(&root)
            .env("BLAST_TASK_NAME", &asset.name)
            .env("BLAST_PIPELINE_NAME", &instance.pipeline.name)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Execution {
                task: instance.name(),
                message: format!(
                    "failed to spawn '{}': {e}",
                    self.python_bin.display()
                ),
            })?;

        // Drain both pipes off to the side so a chatty child cannot block
        // on a full pipe before exiting.
        let stdout_task = child.stdout.take().map(drain_pipe);
        let stderr_task = child.stderr.take().map(drain_pipe);

        // `wait` borrows the child, so the cancellation arm can still kill
        // it after the select resolves.
        let status = tokio::select! {
            _ = ctx.cancelled() => None,
            status = child.wait() => Some(status),
        };
        let Some(status) = status else {
            let _ = child.start_kill();
            return Err(Error::Execution {
                task: instance.name(),
                message: "cancelled".to_string(),
            });
        };
        let status = status.map_err(|e| Error::Execution {
            task: instance.name(),
            message: format!("failed to wait for python process: {e}"),
        })?;

        let stdout = drained_output(stdout_task).await;
        if !stdout.is_empty() {
            debug!(instance = %instance.name(), %stdout, "python stdout");
        }
        if status.success() {
            Ok(())
        } else {
            let stderr = drained_output(stderr_task).await;
            Err(Error::Execution {
                task: instance.name(),
                message: format!(
                    "python module '{module}' exited with {status}: {}",
                    stderr.trim()
                ),
            })
        }
    }
}

fn drain_pipe<R>(mut pipe: R) -> tokio::task::JoinHandle<String>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buffer = String::new();
        let _ = pipe.read_to_string(&mut buffer).await;
        buffer
    })
}

async fn drained_output(task: Option<tokio::task::JoinHandle<String>>) -> String {
    match task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    }
}
