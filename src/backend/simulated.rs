//! In-process collaborator implementations
//!
//! [`SimulatedNodeBackend`] keeps a table of which processes are running on
//! which node and answers health checks from it. Failures can be injected per
//! node and action name, which is how the failure-path tests exercise the
//! orchestrator.

use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use tracing::{debug, info};
use uuid::Uuid;

use super::{ActivityTelemetry, ArtifactRegenerator, EncryptionKeyService, NodeAction, NodeBackend};
use crate::model::{NodeDetails, NodeState, ServerType, Universe};
use crate::Error;

/// Node backend that only tracks process state in memory
#[derive(Debug, Default)]
pub struct SimulatedNodeBackend {
    running: DashSet<(String, ServerType)>,
    failures: DashMap<(String, String), String>,
    unhealthy: DashSet<(String, ServerType)>,
    log: Mutex<Vec<(String, NodeAction)>>,
}

impl SimulatedNodeBackend {
    /// Create a backend with no running processes
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend whose processes mirror the universe's node states
    ///
    /// Live nodes run the processes their role flags name; every other
    /// state runs nothing.
    pub fn from_universe(universe: &Universe) -> Self {
        let backend = Self::new();
        for node in universe
            .details
            .nodes
            .iter()
            .filter(|n| n.state == NodeState::Live)
        {
            if node.is_master {
                backend
                    .running
                    .insert((node.node_name.clone(), ServerType::Master));
            }
            if node.is_tserver {
                backend
                    .running
                    .insert((node.node_name.clone(), ServerType::Tserver));
            }
        }
        backend
    }

    /// Make `action` fail on `node` with `message`
    ///
    /// `action` is matched against the action's display name, e.g.
    /// `start-tserver` or `resize-volume(500GB)`.
    pub fn fail_on(&self, node: &str, action: &str, message: &str) {
        self.failures
            .insert((node.to_string(), action.to_string()), message.to_string());
    }

    /// Keep reporting `server` on `node` as unhealthy
    pub fn never_healthy(&self, node: &str, server: ServerType) {
        self.unhealthy.insert((node.to_string(), server));
    }

    /// Returns true if `server` is running on `node`
    pub fn is_running(&self, node: &str, server: ServerType) -> bool {
        self.running.contains(&(node.to_string(), server))
    }

    /// Every action executed so far, in completion order
    pub fn executed(&self) -> Vec<(String, NodeAction)> {
        self.log
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl NodeBackend for SimulatedNodeBackend {
    async fn execute(&self, node: &NodeDetails, action: &NodeAction) -> Result<(), Error> {
        let name = node.node_name.clone();
        if let Some(message) = self.failures.get(&(name.clone(), action.to_string())) {
            return Err(Error::subtask(action.to_string(), message.clone()));
        }

        match action {
            NodeAction::StartServer(server) => {
                self.running.insert((name.clone(), *server));
            }
            NodeAction::StopServer(server) => {
                self.running.remove(&(name.clone(), *server));
            }
            NodeAction::ResumeServer
            | NodeAction::CollectServerInfo
            | NodeAction::ChangeInstanceType(_)
            | NodeAction::ResizeVolume(_)
            | NodeAction::ConfigureTls(_) => {}
        }

        debug!(node = %name, action = %action, "simulated action completed");
        self.log
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((name, action.clone()));
        Ok(())
    }

    async fn is_server_healthy(
        &self,
        node: &NodeDetails,
        server: ServerType,
    ) -> Result<bool, Error> {
        let key = (node.node_name.clone(), server);
        Ok(!self.unhealthy.contains(&key) && self.running.contains(&key))
    }
}

/// Key service holding rotation counts in memory
#[derive(Debug, Default)]
pub struct InMemoryKeyService {
    rotations: DashMap<Uuid, u32>,
    activations: DashMap<Uuid, u32>,
}

impl InMemoryKeyService {
    /// Create a key service with no rotations
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `count` rotations for a universe
    pub fn set_rotations(&self, universe: Uuid, count: u32) {
        self.rotations.insert(universe, count);
    }

    /// How many times the latest keys were activated for a universe
    pub fn activations(&self, universe: Uuid) -> u32 {
        self.activations.get(&universe).map(|c| *c).unwrap_or(0)
    }
}

#[async_trait]
impl EncryptionKeyService for InMemoryKeyService {
    async fn num_key_rotations(&self, universe: Uuid) -> Result<u32, Error> {
        Ok(self.rotations.get(&universe).map(|c| *c).unwrap_or(0))
    }

    async fn activate_latest_keys(&self, universe: Uuid) -> Result<(), Error> {
        *self.activations.entry(universe).or_insert(0) += 1;
        info!(universe = %universe, "activated latest universe keys");
        Ok(())
    }
}

/// Telemetry sink that only logs
#[derive(Debug, Default)]
pub struct LoggingTelemetry;

#[async_trait]
impl ActivityTelemetry for LoggingTelemetry {
    async fn mark_source_active(
        &self,
        customer: Option<Uuid>,
        universe: Uuid,
    ) -> Result<(), Error> {
        info!(universe = %universe, customer = ?customer, "universe marked active");
        Ok(())
    }
}

/// Artifact regenerator that only logs
#[derive(Debug, Default)]
pub struct LoggingArtifactRegenerator;

#[async_trait]
impl ArtifactRegenerator for LoggingArtifactRegenerator {
    async fn regenerate_alert_definitions(&self, universe: &Universe) -> Result<(), Error> {
        debug!(universe = %universe.universe_uuid, "alert definitions regenerated");
        Ok(())
    }

    async fn regenerate_monitoring_targets(&self, universe: &Universe) -> Result<(), Error> {
        debug!(universe = %universe.universe_uuid, "monitoring targets regenerated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::universe;

    #[tokio::test]
    async fn live_nodes_start_with_their_processes() {
        let u = universe(4, NodeState::Live);
        let backend = SimulatedNodeBackend::from_universe(&u);
        assert!(backend.is_running("n1", ServerType::Master));
        assert!(!backend.is_running("n4", ServerType::Master));
        assert!(backend.is_running("n4", ServerType::Tserver));
    }

    #[tokio::test]
    async fn stopped_universe_runs_nothing() {
        let u = universe(3, NodeState::Stopped);
        let backend = SimulatedNodeBackend::from_universe(&u);
        let node = &u.details.nodes[0];
        assert!(!backend
            .is_server_healthy(node, ServerType::Master)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn start_and_stop_track_health() {
        let u = universe(1, NodeState::Stopped);
        let backend = SimulatedNodeBackend::new();
        let node = &u.details.nodes[0];

        backend
            .execute(node, &NodeAction::StartServer(ServerType::Tserver))
            .await
            .unwrap();
        assert!(backend
            .is_server_healthy(node, ServerType::Tserver)
            .await
            .unwrap());

        backend
            .execute(node, &NodeAction::StopServer(ServerType::Tserver))
            .await
            .unwrap();
        assert!(!backend
            .is_server_healthy(node, ServerType::Tserver)
            .await
            .unwrap());
        assert_eq!(backend.executed().len(), 2);
    }

    #[tokio::test]
    async fn injected_failure_is_returned_and_not_logged() {
        let u = universe(1, NodeState::Stopped);
        let backend = SimulatedNodeBackend::new();
        backend.fail_on("n1", "start-master", "process exited");

        let err = backend
            .execute(&u.details.nodes[0], &NodeAction::StartServer(ServerType::Master))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("process exited"));
        assert!(backend.executed().is_empty());
    }

    #[tokio::test]
    async fn never_healthy_overrides_running() {
        let u = universe(1, NodeState::Live);
        let backend = SimulatedNodeBackend::from_universe(&u);
        backend.never_healthy("n1", ServerType::Master);
        assert!(!backend
            .is_server_healthy(&u.details.nodes[0], ServerType::Master)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn key_service_counts_activations() {
        let keys = InMemoryKeyService::new();
        let id = Uuid::new_v4();
        assert_eq!(keys.num_key_rotations(id).await.unwrap(), 0);
        keys.set_rotations(id, 2);
        assert_eq!(keys.num_key_rotations(id).await.unwrap(), 2);
        keys.activate_latest_keys(id).await.unwrap();
        assert_eq!(keys.activations(id), 1);
    }
}
