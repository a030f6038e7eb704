//! Top-level driver for orchestrated operations
//!
//! [`TaskOrchestrator::run`] takes one [`Operation`] through its whole life:
//!
//! 1. Load the persisted universe and check the operation's preconditions.
//!    A rejected request never takes the lock.
//! 2. Acquire the universe lease.
//! 3. Build the operation's fixed group sequence ([`plan`]).
//! 4. Run the groups in order, checking for cancellation before each one.
//!    The first failing group stops the run.
//! 5. Fold the operation's result into the working copy and commit it with
//!    compare-and-swap on the locked version.
//! 6. Release the lease. This happens on every path, including failures.
//!
//! A run that fails or is cancelled after taking the lease still saves the
//! node states its completed work produced, with `paused` untouched and
//! `update_succeeded` cleared, so the persisted record matches the machines.
//! The same states are recorded on the task.

mod context;
pub mod plan;
mod registry;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::lock::{LockHolder, LockTable, UniverseLease};
use crate::model::{Operation, OperationType, Universe};
use crate::task::Executor;
use crate::validation::{verify_resize_params, verify_tls_toggle};
use crate::Error;

pub use context::{Context, ContextBuilder};
pub use registry::{TaskInfo, TaskRegistry, TaskStatus, DEFAULT_RETAINED_TASKS};

/// Per-run options
#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    /// Use this task id instead of a fresh one
    pub task_id: Option<Uuid>,
    /// Abort at the next group boundary once cancelled
    pub cancel: Option<CancellationToken>,
}

/// Runs operations against universes
pub struct TaskOrchestrator {
    ctx: Arc<Context>,
    locks: Arc<LockTable>,
    tasks: Arc<TaskRegistry>,
}

impl TaskOrchestrator {
    /// Create an orchestrator with its own lock table
    pub fn new(ctx: Arc<Context>) -> Self {
        Self::with_lock_table(ctx, LockTable::new())
    }

    /// Create an orchestrator sharing an existing lock table
    pub fn with_lock_table(ctx: Arc<Context>, locks: Arc<LockTable>) -> Self {
        Self {
            ctx,
            locks,
            tasks: Arc::new(TaskRegistry::new()),
        }
    }

    /// The lock table guarding universes
    pub fn locks(&self) -> &Arc<LockTable> {
        &self.locks
    }

    /// Task progress records
    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    /// Run an operation to completion
    pub async fn run(&self, operation: Operation) -> Result<TaskInfo, Error> {
        self.run_with(operation, RunOptions::default()).await
    }

    /// Run an operation with explicit options
    ///
    /// Returns the finished task record on success. On failure the task
    /// record (see [`TaskOrchestrator::tasks`]) holds the status, the
    /// failing group and the node states left behind.
    pub async fn run_with(
        &self,
        operation: Operation,
        opts: RunOptions,
    ) -> Result<TaskInfo, Error> {
        let task_id = opts.task_id.unwrap_or_else(Uuid::new_v4);
        let op_type = operation.operation_type();
        let universe = operation.universe_uuid();
        self.tasks.create(task_id, op_type, universe);

        info!(task = %task_id, operation = %op_type, universe = %universe, "starting operation");

        match self.execute(task_id, &operation, opts.cancel.as_ref()).await {
            Ok(version) => {
                info!(
                    task = %task_id,
                    operation = %op_type,
                    universe = %universe,
                    version,
                    "operation succeeded"
                );
                if let Operation::Resume(params) = &operation {
                    if let Err(e) = self
                        .ctx
                        .telemetry
                        .mark_source_active(params.customer_uuid, universe)
                        .await
                    {
                        warn!(universe = %universe, error = %e, "failed to mark universe active");
                    }
                }
                self.tasks
                    .succeed(task_id, version)
                    .ok_or_else(|| Error::persistence(format!("task {task_id} disappeared")))
            }
            Err(e) => {
                let status = match e {
                    Error::Aborted { .. } => TaskStatus::Aborted,
                    _ => TaskStatus::Failure,
                };
                error!(
                    task = %task_id,
                    operation = %op_type,
                    universe = %universe,
                    error = %e,
                    "operation failed"
                );
                self.tasks.fail(task_id, status, &e.to_string());
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        task_id: Uuid,
        operation: &Operation,
        cancel: Option<&CancellationToken>,
    ) -> Result<u64, Error> {
        let ctx = &self.ctx;
        let universe_uuid = operation.universe_uuid();
        let op_type = operation.operation_type();

        let current = ctx.store.load(universe_uuid).await?;
        self.preflight(operation, &current)?;

        let mut lease = self
            .locks
            .acquire(
                ctx.store.as_ref(),
                universe_uuid,
                operation.expected_version(),
                LockHolder::new(task_id, op_type),
            )
            .await?;

        let key_rotations = match operation {
            Operation::Resume(_) => ctx.keys.num_key_rotations(universe_uuid).await?,
            _ => 0,
        };
        let groups = plan::build(operation, lease.universe(), key_rotations);
        self.tasks.start(task_id, groups.len());

        let executor = Executor {
            nodes: ctx.nodes.as_ref(),
            keys: ctx.keys.as_ref(),
            artifacts: ctx.artifacts.as_ref(),
            health: &ctx.config.health_check,
            retry: &ctx.retry,
            operation: op_type,
        };

        for group in &groups {
            if cancel.is_some_and(|c| c.is_cancelled()) {
                info!(task = %task_id, group = %group.name, "operation cancelled");
                let aborted = Error::Aborted {
                    group: group.name.clone(),
                };
                return Err(self.keep_partial(task_id, &mut lease, aborted).await);
            }

            self.tasks.group_started(task_id, &group.name);
            if let Err(e) = executor.run_group(group, lease.universe_mut()).await {
                return Err(self.keep_partial(task_id, &mut lease, e).await);
            }
            self.tasks.group_completed(task_id);
        }

        apply_result(operation, lease.universe_mut());
        let version = lease.commit(ctx.store.as_ref()).await.map_err(|e| {
            Error::persistence(format!(
                "failed to commit universe {universe_uuid} after {op_type}: {e}"
            ))
        })?;
        lease.release();
        Ok(version)
    }

    /// Save the node states a stopped run left behind and hand back `cause`
    ///
    /// A failed save is logged; the caller still sees the error that stopped
    /// the run.
    async fn keep_partial(
        &self,
        task_id: Uuid,
        lease: &mut UniverseLease,
        cause: Error,
    ) -> Error {
        self.tasks.record_nodes(task_id, lease.universe());
        lease.universe_mut().details.update_succeeded = false;
        match lease.commit(self.ctx.store.as_ref()).await {
            Ok(version) => {
                info!(task = %task_id, version, "saved node states of stopped operation");
                self.tasks.record_committed(task_id, version);
            }
            Err(e) => error!(
                task = %task_id,
                error = %e,
                "failed to save node states of stopped operation"
            ),
        }
        cause
    }

    fn preflight(&self, operation: &Operation, current: &Universe) -> Result<(), Error> {
        let paused = |op: OperationType| {
            if current.details.paused {
                Err(Error::validation(format!(
                    "Cannot run {op} on paused universe {}",
                    current.name
                )))
            } else {
                Ok(())
            }
        };
        match operation {
            Operation::Resume(_) => Ok(()),
            Operation::ResizeNode(params) => {
                paused(OperationType::ResizeNode)?;
                verify_resize_params(
                    current,
                    params,
                    self.ctx.config.allow_unsupported_instances,
                    self.ctx.catalog.as_ref(),
                )
            }
            Operation::TlsToggle(params) => {
                paused(OperationType::TlsToggle)?;
                verify_tls_toggle(params, current, self.ctx.certificates.as_ref())
            }
        }
    }
}

/// Fold a successful operation's outcome into the working copy
fn apply_result(operation: &Operation, universe: &mut Universe) {
    match operation {
        Operation::Resume(_) => universe.details.paused = false,
        Operation::ResizeNode(params) => {
            for requested in &params.base.clusters {
                let Some(cluster) = universe.cluster_mut(requested.uuid) else {
                    continue;
                };
                let intent = &mut cluster.user_intent;
                intent.instance_type = requested.user_intent.instance_type.clone();
                if let Some(size) = requested.user_intent.volume_size() {
                    let device = intent.device_info.get_or_insert_with(Default::default);
                    device.volume_size = Some(size);
                }
            }
        }
        Operation::TlsToggle(params) => {
            let (root_ca, client_root_ca) = plan::resolved_cas(universe, params);
            for cluster in &mut universe.details.clusters {
                let intent = &mut cluster.user_intent;
                intent.enable_node_to_node_encrypt = params.enable_node_to_node_encrypt;
                intent.enable_client_to_node_encrypt = params.enable_client_to_node_encrypt;
            }
            let details = &mut universe.details;
            details.root_ca = root_ca;
            details.client_root_ca = client_root_ca;
            if let Some(same) = params.root_and_client_root_ca_same {
                details.root_and_client_root_ca_same = same;
            }
        }
    }
}
