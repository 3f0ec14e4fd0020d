//! Dependency-driven scheduler
//!
//! The scheduler owns one instance per asset plus one per (column, test)
//! pair, tracks their statuses behind a single mutex, and emits ready
//! instances through a bounded work queue. Workers report completions on a
//! results channel; each report drives one `tick`, which marks state,
//! propagates upstream failure, and either dispatches the newly ready set
//! or closes the queue on quiescence.
//!
//! Channel sends happen after the state lock is released; instances are
//! marked `Queued` under the lock first, so no instance is ever emitted
//! twice.

use crate::executor::StatusListener;
use crate::instance::{InstanceKind, Status, TaskExecutionResult, TaskInstance};
use blast_core::Pipeline;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Bound of the work queue. When full, `tick` blocks on publish, which
/// throttles dispatch to worker capacity.
pub const WORK_QUEUE_CAPACITY: usize = 100;

struct SchedulerState {
    statuses: Vec<Status>,
    /// Dropped to close the work queue.
    work_tx: Option<mpsc::Sender<TaskInstance>>,
    /// Results synthesized for instances absorbed as `UpstreamFailed`,
    /// drained by `run` so the final result set covers every terminal
    /// instance, dispatched or not.
    propagated: Vec<TaskExecutionResult>,
}

/// What a `tick` decided, computed under the lock and acted on outside it.
struct TickOutcome {
    dispatch: Vec<TaskInstance>,
    sender: Option<mpsc::Sender<TaskInstance>>,
    finished: bool,
}

pub struct Scheduler {
    instances: Vec<TaskInstance>,
    upstream: Vec<Vec<usize>>,
    downstream: Vec<Vec<usize>>,
    name_index: HashMap<String, usize>,
    state: Mutex<SchedulerState>,
    results_tx: mpsc::Sender<TaskExecutionResult>,
    results_rx: Mutex<Option<mpsc::Receiver<TaskExecutionResult>>>,
}

impl Scheduler {
    /// Build the instance table from a pipeline and hand back the work
    /// queue receiver for the executor.
    pub fn new(pipeline: Arc<Pipeline>) -> (Self, mpsc::Receiver<TaskInstance>) {
        let mut instances = Vec::new();

        // One instance per asset, in pipeline order.
        let mut asset_instance = vec![0usize; pipeline.assets.len()];
        for (asset_idx, _) in pipeline.assets.iter().enumerate() {
            asset_instance[asset_idx] = instances.len();
            instances.push(TaskInstance {
                id: instances.len(),
                pipeline: pipeline.clone(),
                asset: asset_idx,
                kind: InstanceKind::Asset,
            });
        }

        // One instance per (column, test), downstream of its asset.
        for (asset_idx, asset) in pipeline.assets.iter().enumerate() {
            for (column_name, column) in &asset.columns {
                for test in &column.tests {
                    instances.push(TaskInstance {
                        id: instances.len(),
                        pipeline: pipeline.clone(),
                        asset: asset_idx,
                        kind: InstanceKind::ColumnTest {
                            column: column_name.clone(),
                            test: test.name.clone(),
                        },
                    });
                }
            }
        }

        let mut upstream = vec![Vec::new(); instances.len()];
        let mut downstream = vec![Vec::new(); instances.len()];
        for instance in &instances {
            match &instance.kind {
                // Asset instances mirror the asset graph.
                InstanceKind::Asset => {
                    for &up_asset in &pipeline.assets[instance.asset].upstream {
                        upstream[instance.id].push(asset_instance[up_asset]);
                        downstream[asset_instance[up_asset]].push(instance.id);
                    }
                }
                // Column tests run after their asset, so an asset failure
                // cascades into them as well.
                InstanceKind::ColumnTest { .. } => {
                    let owner = asset_instance[instance.asset];
                    upstream[instance.id].push(owner);
                    downstream[owner].push(instance.id);
                }
            }
        }

        let name_index = instances
            .iter()
            .map(|i| (i.name(), i.id))
            .collect::<HashMap<_, _>>();

        let (work_tx, work_rx) = mpsc::channel(WORK_QUEUE_CAPACITY);
        let (results_tx, results_rx) = mpsc::channel(WORK_QUEUE_CAPACITY);

        let scheduler = Self {
            state: Mutex::new(SchedulerState {
                statuses: vec![Status::Pending; instances.len()],
                work_tx: Some(work_tx),
                propagated: Vec::new(),
            }),
            instances,
            upstream,
            downstream,
            name_index,
            results_tx,
            results_rx: Mutex::new(Some(results_rx)),
        };
        (scheduler, work_rx)
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn instance_by_name(&self, name: &str) -> Option<usize> {
        self.name_index.get(name).copied()
    }

    /// Sender half of the results channel, for the executor.
    pub fn results_sender(&self) -> mpsc::Sender<TaskExecutionResult> {
        self.results_tx.clone()
    }

    /// Snapshot of every instance status.
    pub fn statuses(&self) -> Vec<Status> {
        self.state.lock().expect("scheduler state poisoned").statuses.clone()
    }

    pub fn status_of(&self, id: usize) -> Status {
        self.state.lock().expect("scheduler state poisoned").statuses[id]
    }

    /// Whether any non-terminal instance has the given task type. Used to
    /// decide whether a backend needs initializing at all.
    pub fn will_run_task_of_type(&self, task_type: &str) -> bool {
        let state = self.state.lock().expect("scheduler state poisoned");
        self.instances
            .iter()
            .any(|i| !state.statuses[i.id].is_terminal() && i.task_type() == task_type)
    }

    /// Set every instance to `status`.
    pub fn mark_all(&self, status: Status) {
        let mut state = self.state.lock().expect("scheduler state poisoned");
        for slot in state.statuses.iter_mut() {
            *slot = status;
        }
    }

    /// Set one instance's status; with `propagate`, also set every
    /// non-terminal transitive dependent.
    pub fn mark_instance(&self, id: usize, status: Status, propagate: bool) {
        let mut state = self.state.lock().expect("scheduler state poisoned");
        state.statuses[id] = status;
        if propagate {
            self.mark_downstream(&mut state, id, status);
        }
    }

    fn mark_downstream(
        &self,
        state: &mut SchedulerState,
        from: usize,
        status: Status,
    ) -> Vec<usize> {
        let mut marked = Vec::new();
        let mut stack: Vec<usize> = self.downstream[from].clone();
        while let Some(id) = stack.pop() {
            if state.statuses[id].is_terminal() {
                continue;
            }
            state.statuses[id] = status;
            marked.push(id);
            stack.extend(self.downstream[id].iter().copied());
        }
        marked
    }

    /// Drain the results synthesized for absorbed instances since the last
    /// call.
    pub fn take_propagated_results(&self) -> Vec<TaskExecutionResult> {
        let mut state = self.state.lock().expect("scheduler state poisoned");
        std::mem::take(&mut state.propagated)
    }

    /// Drive the run to completion. Returns one result per terminal
    /// instance: worker-reported completions plus synthesized results for
    /// instances absorbed as `UpstreamFailed`.
    #[tracing::instrument(name = "scheduler.run", skip_all)]
    pub async fn run(&self, ctx: CancellationToken) -> Vec<TaskExecutionResult> {
        let mut results_rx = match self
            .results_rx
            .lock()
            .expect("scheduler state poisoned")
            .take()
        {
            Some(rx) => rx,
            None => {
                warn!("scheduler already ran");
                return Vec::new();
            }
        };

        let mut collected = Vec::new();

        // Kickstart: populate the initial ready set (no upstreams).
        if self.tick(None).await {
            return collected;
        }

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    info!("cancelled, closing work queue");
                    self.close_work_queue();
                    break;
                }
                maybe = results_rx.recv() => {
                    match maybe {
                        Some(result) => {
                            collected.push(result.clone());
                            let finished = self.tick(Some(&result)).await;
                            collected.extend(self.take_propagated_results());
                            if finished {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
        collected
    }

    /// Advance state once. Returns `true` when every instance is terminal
    /// and the work queue has been closed. `None` is the kickstart
    /// sentinel: no instance is marked, only the ready set is dispatched.
    pub async fn tick(&self, result: Option<&TaskExecutionResult>) -> bool {
        let outcome = {
            let mut state = self.state.lock().expect("scheduler state poisoned");

            if let Some(result) = result {
                state.statuses[result.instance_id] = Status::Succeeded;
                if let Some(error) = &result.error {
                    debug!(instance = %result.instance_name, %error, "instance failed");
                    state.statuses[result.instance_id] = Status::Failed;
                    let absorbed =
                        self.mark_downstream(&mut state, result.instance_id, Status::UpstreamFailed);
                    // Absorbed instances never reach a worker, so their
                    // results are synthesized here.
                    for id in absorbed {
                        state.propagated.push(TaskExecutionResult {
                            instance_id: id,
                            instance_name: self.instances[id].name(),
                            error: Some(format!(
                                "upstream task '{}' failed",
                                result.instance_name
                            )),
                        });
                    }
                }
            }

            if state.statuses.iter().all(Status::is_terminal) {
                state.work_tx = None;
                TickOutcome {
                    dispatch: Vec::new(),
                    sender: None,
                    finished: true,
                }
            } else {
                let mut dispatch = Vec::new();
                for instance in &self.instances {
                    if state.statuses[instance.id] != Status::Pending {
                        continue;
                    }
                    let ready = self.upstream[instance.id]
                        .iter()
                        .all(|&up| state.statuses[up].is_terminal());
                    if ready {
                        state.statuses[instance.id] = Status::Queued;
                        dispatch.push(instance.clone());
                    }
                }
                TickOutcome {
                    dispatch,
                    sender: state.work_tx.clone(),
                    finished: false,
                }
            }
        };

        if let Some(sender) = outcome.sender {
            for instance in outcome.dispatch {
                debug!(instance = %instance.name(), "dispatching");
                // Blocks when the queue is full; that is the backpressure.
                if sender.send(instance).await.is_err() {
                    warn!("work queue closed while dispatching");
                    break;
                }
            }
        }
        outcome.finished
    }

    fn close_work_queue(&self) {
        let mut state = self.state.lock().expect("scheduler state poisoned");
        state.work_tx = None;
    }
}

impl StatusListener for Scheduler {
    /// A worker picked the instance off the queue. Only a `Queued`
    /// instance moves to `Running`; a late pickup never demotes a
    /// terminal status.
    fn on_running(&self, instance: &TaskInstance) {
        let mut state = self.state.lock().expect("scheduler state poisoned");
        if state.statuses[instance.id] == Status::Queued {
            state.statuses[instance.id] = Status::Running;
        }
    }
}
