//! Task instances
//!
//! A task instance is the runtime envelope around an asset (or one of its
//! column tests). Instances reference their asset by index into the shared
//! pipeline, so cloning one is cheap and the graph has a single owner.

use blast_core::pipeline::Asset;
use blast_core::Pipeline;
use std::fmt;
use std::sync::Arc;

/// Lifecycle of a task instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Pending,
    Queued,
    Running,
    Succeeded,
    Failed,
    UpstreamFailed,
}

impl Status {
    /// Terminal statuses count toward quiescence and are never overwritten
    /// by scheduling.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Status::Succeeded | Status::Failed | Status::UpstreamFailed
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Pending => "pending",
            Status::Queued => "queued",
            Status::Running => "running",
            Status::Succeeded => "succeeded",
            Status::Failed => "failed",
            Status::UpstreamFailed => "upstream_failed",
        };
        f.write_str(s)
    }
}

/// What an instance represents: the asset itself, or one of its column tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceKind {
    Asset,
    ColumnTest { column: String, test: String },
}

/// Runtime envelope around one unit of work.
#[derive(Debug, Clone)]
pub struct TaskInstance {
    /// Stable index into the scheduler's instance table.
    pub id: usize,
    pub pipeline: Arc<Pipeline>,
    /// Index of the backing asset in `pipeline.assets`.
    pub asset: usize,
    pub kind: InstanceKind,
}

impl TaskInstance {
    pub fn asset(&self) -> &Asset {
        &self.pipeline.assets[self.asset]
    }

    /// Unique name within the run; column tests are namespaced under their
    /// asset.
    pub fn name(&self) -> String {
        match &self.kind {
            InstanceKind::Asset => self.asset().name.clone(),
            InstanceKind::ColumnTest { column, test } => {
                format!("{}:{column}:{test}", self.asset().name)
            }
        }
    }

    /// The operator-dispatch type of this instance.
    pub fn task_type(&self) -> &str {
        &self.asset().asset_type
    }

    pub fn is_column_test(&self) -> bool {
        matches!(self.kind, InstanceKind::ColumnTest { .. })
    }
}

/// What a worker reports back after running an instance.
#[derive(Debug, Clone)]
pub struct TaskExecutionResult {
    pub instance_id: usize,
    pub instance_name: String,
    /// `None` means success.
    pub error: Option<String>,
}

impl TaskExecutionResult {
    pub fn success(instance: &TaskInstance) -> Self {
        Self {
            instance_id: instance.id,
            instance_name: instance.name(),
            error: None,
        }
    }

    pub fn failure(instance: &TaskInstance, error: impl Into<String>) -> Self {
        Self {
            instance_id: instance.id,
            instance_name: instance.name(),
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
