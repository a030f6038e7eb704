//! Progress records for orchestrated tasks

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

use crate::model::{NodeState, OperationType, Universe};

/// Lifecycle of one task run
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
pub enum TaskStatus {
    /// Registered, preconditions not yet checked
    Created,
    /// Holding the lock and running groups
    Running,
    /// All groups ran and the universe was committed
    Success,
    /// Rejected or failed; see `error`
    Failure,
    /// Cancelled at a group boundary
    Aborted,
}

impl TaskStatus {
    /// Returns true once the task can no longer change
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Aborted)
    }
}

/// Snapshot of a task's progress
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    /// Task id
    pub id: Uuid,
    /// Operation being run
    pub operation: OperationType,
    /// Target universe
    pub universe: Uuid,
    /// Current status
    pub status: TaskStatus,
    /// Number of groups in the plan
    pub groups_total: usize,
    /// Number of groups that completed
    pub groups_completed: usize,
    /// Group running now, or the one that failed
    pub current_group: Option<String>,
    /// Failure message
    pub error: Option<String>,
    /// Node states a failed or aborted run left behind
    pub node_states: BTreeMap<String, NodeState>,
    /// When the task was registered
    pub created_at: DateTime<Utc>,
    /// When the task finished
    pub finished_at: Option<DateTime<Utc>>,
    /// Version saved by the run, including the partial save of a stopped run
    pub committed_version: Option<u64>,
}

/// Finished task records kept by default
pub const DEFAULT_RETAINED_TASKS: usize = 1_000;

/// Task records keyed by id
///
/// Running tasks are always kept. Once more than `retained` tasks have
/// finished, the oldest finished records are dropped.
#[derive(Debug)]
pub struct TaskRegistry {
    tasks: DashMap<Uuid, TaskInfo>,
    finished: Mutex<VecDeque<Uuid>>,
    retained: usize,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETAINED_TASKS)
    }
}

impl TaskRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty registry keeping at most `retained` finished tasks
    pub fn with_retention(retained: usize) -> Self {
        Self {
            tasks: DashMap::new(),
            finished: Mutex::new(VecDeque::new()),
            retained: retained.max(1),
        }
    }

    /// Number of records currently held
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true if no records are held
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Register a new task in `Created` state
    pub fn create(&self, id: Uuid, operation: OperationType, universe: Uuid) -> TaskInfo {
        let info = TaskInfo {
            id,
            operation,
            universe,
            status: TaskStatus::Created,
            groups_total: 0,
            groups_completed: 0,
            current_group: None,
            error: None,
            node_states: BTreeMap::new(),
            created_at: Utc::now(),
            finished_at: None,
            committed_version: None,
        };
        self.tasks.insert(id, info.clone());
        info
    }

    /// Snapshot of a task
    pub fn get(&self, id: Uuid) -> Option<TaskInfo> {
        self.tasks.get(&id).map(|t| t.clone())
    }

    /// All tasks for a universe, oldest first
    pub fn for_universe(&self, universe: Uuid) -> Vec<TaskInfo> {
        let mut tasks: Vec<_> = self
            .tasks
            .iter()
            .filter(|t| t.universe == universe)
            .map(|t| t.clone())
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    pub(crate) fn start(&self, id: Uuid, groups_total: usize) {
        self.update(id, |t| {
            t.status = TaskStatus::Running;
            t.groups_total = groups_total;
        });
    }

    pub(crate) fn group_started(&self, id: Uuid, group: &str) {
        self.update(id, |t| t.current_group = Some(group.to_string()));
    }

    pub(crate) fn group_completed(&self, id: Uuid) {
        self.update(id, |t| t.groups_completed += 1);
    }

    pub(crate) fn record_nodes(&self, id: Uuid, universe: &Universe) {
        let states: BTreeMap<String, NodeState> = universe
            .details
            .nodes
            .iter()
            .map(|n| (n.node_name.clone(), n.state))
            .collect();
        self.update(id, |t| t.node_states = states);
    }

    pub(crate) fn succeed(&self, id: Uuid, version: u64) -> Option<TaskInfo> {
        let info = self.update(id, |t| {
            t.status = TaskStatus::Success;
            t.current_group = None;
            t.committed_version = Some(version);
            t.finished_at = Some(Utc::now());
        });
        self.finished(id);
        info
    }

    pub(crate) fn fail(&self, id: Uuid, status: TaskStatus, error: &str) {
        self.update(id, |t| {
            t.status = status;
            t.error = Some(error.to_string());
            t.finished_at = Some(Utc::now());
        });
        self.finished(id);
    }

    pub(crate) fn record_committed(&self, id: Uuid, version: u64) {
        self.update(id, |t| t.committed_version = Some(version));
    }

    /// Queue a finished task and evict the oldest beyond the retention limit
    fn finished(&self, id: Uuid) {
        let mut order = self
            .finished
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        order.push_back(id);
        while order.len() > self.retained {
            if let Some(evicted) = order.pop_front() {
                self.tasks.remove(&evicted);
            }
        }
    }

    fn update(&self, id: Uuid, f: impl FnOnce(&mut TaskInfo)) -> Option<TaskInfo> {
        self.tasks.get_mut(&id).map(|mut t| {
            f(t.value_mut());
            t.clone()
        })
    }
}
