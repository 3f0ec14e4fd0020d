//! Worker-pool executor
//!
//! N workers share the scheduler's work queue through a mutex-guarded
//! receiver. Each worker hands the instance to the sequential executor,
//! which resolves the typed operator, and reports the outcome on the
//! results channel. The pool drains when the work queue closes.

use crate::instance::{TaskExecutionResult, TaskInstance};
use crate::operators::Operator;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Operators keyed by task type.
pub type OperatorMap = HashMap<String, Arc<dyn Operator>>;

/// Observes worker-side lifecycle transitions. The scheduler implements
/// this to move an instance from `Queued` to `Running` the moment a worker
/// picks it up.
pub trait StatusListener: Send + Sync {
    fn on_running(&self, instance: &TaskInstance);
}

/// Runs one instance at a time by dispatching to the operator registered
/// for its type.
pub struct Sequential {
    operators: OperatorMap,
}

impl Sequential {
    pub fn new(operators: OperatorMap) -> Self {
        Self { operators }
    }

    pub async fn run(&self, ctx: &CancellationToken, instance: &TaskInstance) -> Result<()> {
        let operator = self
            .operators
            .get(instance.task_type())
            .ok_or_else(|| Error::UnknownTaskType(instance.task_type().to_string()))?;
        operator.run(ctx, instance).await
    }
}

pub struct Executor {
    worker_count: usize,
    sequential: Arc<Sequential>,
}

impl Executor {
    pub fn new(worker_count: usize, operators: OperatorMap) -> Self {
        Self {
            worker_count,
            sequential: Arc::new(Sequential::new(operators)),
        }
    }

    /// Start the pool. Returns the worker handles; they finish once the
    /// work queue closes.
    pub fn start(
        &self,
        ctx: CancellationToken,
        work_rx: mpsc::Receiver<TaskInstance>,
        results_tx: mpsc::Sender<TaskExecutionResult>,
        listener: Arc<dyn StatusListener>,
    ) -> Vec<JoinHandle<()>> {
        let work_rx = Arc::new(tokio::sync::Mutex::new(work_rx));
        (0..self.worker_count.max(1))
            .map(|worker| {
                let work_rx = work_rx.clone();
                let results_tx = results_tx.clone();
                let sequential = self.sequential.clone();
                let listener = listener.clone();
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    loop {
                        let instance = { work_rx.lock().await.recv().await };
                        let Some(instance) = instance else { break };
                        debug!(worker, instance = %instance.name(), "running");
                        listener.on_running(&instance);

                        let result = match sequential.run(&ctx, &instance).await {
                            Ok(()) => TaskExecutionResult::success(&instance),
                            Err(e) => TaskExecutionResult::failure(&instance, e.to_string()),
                        };
                        if results_tx.send(result).await.is_err() {
                            warn!(worker, "results channel closed, stopping");
                            break;
                        }
                    }
                })
            })
            .collect()
    }
}
