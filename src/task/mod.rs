//! Sub-task groups and their execution
//!
//! A [`SubTaskGroup`] is one phase of an operation: a named batch of
//! sub-tasks that run concurrently and complete together. The executor
//! never returns from a group until every sub-task in it has finished,
//! successful or not, so a later group always observes the full effect of
//! the earlier ones.
//!
//! Sub-tasks do not mutate the universe while they run. Each one reports the
//! effects it achieved, and the executor applies them to the working copy
//! once the whole group has settled. Effects of sub-tasks that succeeded are
//! kept even when a sibling failed.

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backend::{ArtifactRegenerator, EncryptionKeyService, NodeAction, NodeBackend};
use crate::config::HealthCheckConfig;
use crate::model::{NodeState, OperationType, ServerType, Universe};
use crate::retry::{retry_with_backoff, wait_until, RetryConfig};
use crate::Error;

/// Coarse classification of a group, reported alongside its name
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
pub enum SubTaskGroupType {
    /// Bringing paused machines back
    ResumingUniverse,
    /// Starting database processes
    StartingNodeProcesses,
    /// Stopping database processes
    StoppingNodeProcesses,
    /// Changing instance type or disk size
    ResizingNode,
    /// Rewriting TLS configuration
    ToggleTls,
    /// Waiting for processes to report healthy
    WaitingForServers,
    /// Universe-wide configuration and bookkeeping
    ConfigureUniverse,
}

/// One atomic step inside a group
#[derive(Clone, Debug, Serialize, PartialEq)]
pub enum SubTask {
    /// Run actions against one node, in order
    Node {
        /// Target node name
        node: String,
        /// Actions, executed sequentially
        actions: Vec<NodeAction>,
    },
    /// Wait until `server` reports healthy on every listed node
    WaitForServers {
        /// Node names
        nodes: Vec<String>,
        /// Process to probe
        server: ServerType,
    },
    /// Activate the latest encryption-at-rest keys
    ActivateUniverseKeys,
    /// Move nodes to a lifecycle state
    SetNodeState {
        /// Node names
        nodes: Vec<String>,
        /// Target state
        state: NodeState,
    },
    /// Regenerate alert definitions
    UpdateAlertDefinitions,
    /// Regenerate monitoring targets
    UpdateMonitoringTargets,
    /// Record that the operation's work completed
    MarkUpdateSuccess,
}

impl SubTask {
    /// Single-node sub-task
    pub fn node(node: impl Into<String>, actions: Vec<NodeAction>) -> Self {
        Self::Node {
            node: node.into(),
            actions,
        }
    }
}

/// A named, barrier-synchronized batch of sub-tasks
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct SubTaskGroup {
    /// Name reported in progress and errors
    pub name: String,
    /// Classification
    pub group_type: SubTaskGroupType,
    /// Sub-tasks run concurrently
    pub subtasks: Vec<SubTask>,
}

impl SubTaskGroup {
    /// Create an empty group
    pub fn new(name: impl Into<String>, group_type: SubTaskGroupType) -> Self {
        Self {
            name: name.into(),
            group_type,
            subtasks: Vec::new(),
        }
    }

    /// Append a sub-task
    pub fn with(mut self, subtask: SubTask) -> Self {
        self.subtasks.push(subtask);
        self
    }

    /// Returns true if the group has nothing to run
    pub fn is_empty(&self) -> bool {
        self.subtasks.is_empty()
    }
}

/// A change a finished sub-task makes to the working copy
#[derive(Debug)]
enum Effect {
    Action { node: String, action: NodeAction },
    SetState { nodes: Vec<String>, state: NodeState },
    UpdateSucceeded,
}

/// Effects achieved, and the error that stopped the sub-task if any
type Outcome = (Vec<Effect>, Option<Error>);

fn reason(e: &Error) -> String {
    match e {
        Error::SubTask { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

/// Runs groups against a working copy using the orchestrator's collaborators
pub struct Executor<'a> {
    /// Node execution backend
    pub nodes: &'a dyn NodeBackend,
    /// Encryption key service
    pub keys: &'a dyn EncryptionKeyService,
    /// Alert and monitoring regeneration
    pub artifacts: &'a dyn ArtifactRegenerator,
    /// Bounded wait for health barriers
    pub health: &'a HealthCheckConfig,
    /// Retry policy for idempotent regeneration calls
    pub retry: &'a RetryConfig,
    /// Operation whose node path bounds state changes
    pub operation: OperationType,
}

impl Executor<'_> {
    /// Run every sub-task of `group`, wait for all of them, then apply effects
    ///
    /// Returns the first failure, wrapped with the group's name.
    pub async fn run_group(
        &self,
        group: &SubTaskGroup,
        universe: &mut Universe,
    ) -> Result<(), Error> {
        info!(
            group = %group.name,
            group_type = ?group.group_type,
            subtasks = group.subtasks.len(),
            "running subtask group"
        );

        let outcomes: Vec<Outcome> = {
            let snapshot: &Universe = universe;
            join_all(group.subtasks.iter().map(|t| self.run_subtask(t, snapshot))).await
        };

        let mut first_error: Option<Error> = None;
        for (effects, error) in outcomes {
            for effect in effects {
                if let Err(e) = self.apply(effect, universe) {
                    first_error.get_or_insert(e);
                }
            }
            if let Some(e) = error {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => {
                warn!(group = %group.name, error = %e, "subtask group failed");
                Err(Error::subtask(&group.name, reason(&e)))
            }
            None => {
                debug!(group = %group.name, "subtask group completed");
                Ok(())
            }
        }
    }

    async fn run_subtask(&self, subtask: &SubTask, universe: &Universe) -> Outcome {
        match subtask {
            SubTask::Node { node, actions } => self.run_node(node, actions, universe).await,
            SubTask::WaitForServers { nodes, server } => {
                (Vec::new(), self.wait_for_servers(nodes, *server, universe).await.err())
            }
            SubTask::ActivateUniverseKeys => (
                Vec::new(),
                self.keys.activate_latest_keys(universe.universe_uuid).await.err(),
            ),
            SubTask::SetNodeState { nodes, state } => (
                vec![Effect::SetState {
                    nodes: nodes.clone(),
                    state: *state,
                }],
                None,
            ),
            SubTask::UpdateAlertDefinitions => {
                let result = retry_with_backoff(self.retry, "regenerate-alert-definitions", || {
                    self.artifacts.regenerate_alert_definitions(universe)
                })
                .await;
                (Vec::new(), result.err())
            }
            SubTask::UpdateMonitoringTargets => {
                let result = retry_with_backoff(self.retry, "regenerate-monitoring-targets", || {
                    self.artifacts.regenerate_monitoring_targets(universe)
                })
                .await;
                (Vec::new(), result.err())
            }
            SubTask::MarkUpdateSuccess => (vec![Effect::UpdateSucceeded], None),
        }
    }

    async fn run_node(&self, name: &str, actions: &[NodeAction], universe: &Universe) -> Outcome {
        let Some(node) = universe.node(name) else {
            return (
                Vec::new(),
                Some(Error::subtask(name, format!("node {name} not found in universe"))),
            );
        };

        let mut effects = Vec::with_capacity(actions.len());
        for action in actions {
            debug!(node = %name, action = %action, "executing node action");
            if let Err(e) = self.nodes.execute(node, action).await {
                let error = Error::subtask(
                    action.to_string(),
                    format!("{action} on {name} failed: {}", reason(&e)),
                );
                return (effects, Some(error));
            }
            effects.push(Effect::Action {
                node: name.to_string(),
                action: action.clone(),
            });
        }
        (effects, None)
    }

    async fn wait_for_servers(
        &self,
        names: &[String],
        server: ServerType,
        universe: &Universe,
    ) -> Result<(), Error> {
        let waits = names.iter().map(|name| async move {
            let node = universe
                .node(name)
                .ok_or_else(|| Error::subtask(name, format!("node {name} not found in universe")))?;
            let what = format!("{server} on {name}");
            wait_until(self.health, &what, || self.nodes.is_server_healthy(node, server)).await
        });
        join_all(waits).await.into_iter().collect()
    }

    fn apply(&self, effect: Effect, universe: &mut Universe) -> Result<(), Error> {
        match effect {
            Effect::Action { node, action } => {
                let details = universe.node_mut(&node).ok_or_else(|| {
                    Error::subtask(&node, format!("node {node} not found in universe"))
                })?;
                match action {
                    NodeAction::ResumeServer | NodeAction::StartServer(_) => {
                        if details.state == NodeState::Stopped && details.has_server_role() {
                            details.transition(self.operation, NodeState::Starting)?;
                        }
                    }
                    NodeAction::StopServer(_) => {
                        if details.state == NodeState::Live {
                            details.transition(self.operation, NodeState::Stopped)?;
                        }
                    }
                    NodeAction::ChangeInstanceType(code) => details.instance_type = Some(code),
                    NodeAction::ResizeVolume(size) => details.volume_size = Some(size),
                    NodeAction::CollectServerInfo | NodeAction::ConfigureTls(_) => {}
                }
            }
            Effect::SetState { nodes, state } => {
                for name in nodes {
                    let details = universe.node_mut(&name).ok_or_else(|| {
                        Error::subtask(&name, format!("node {name} not found in universe"))
                    })?;
                    details.transition(self.operation, state)?;
                }
            }
            Effect::UpdateSucceeded => universe.details.update_succeeded = true,
        }
        Ok(())
    }
}
