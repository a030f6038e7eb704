//! Collaborators the orchestrator drives while a universe is locked
//!
//! Each trait is a seam to the outside world: the node execution backend,
//! the encryption key service, the activity telemetry sink and the derived
//! artifact regenerators. The simulated implementations in [`simulated`] let
//! the CLI and tests run whole operations without touching real machines.

mod simulated;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(test)]
use mockall::automock;

use crate::model::{NodeDetails, ServerType, Universe};
use crate::Error;

pub use simulated::{
    InMemoryKeyService, LoggingArtifactRegenerator, LoggingTelemetry, SimulatedNodeBackend,
};

/// Transport encryption settings pushed to a node
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TlsSettings {
    /// Encrypt traffic between database nodes
    pub node_to_node: bool,
    /// Encrypt traffic between clients and nodes
    pub client_to_node: bool,
    /// CA securing node-to-node traffic
    pub root_ca: Option<Uuid>,
    /// CA securing client-to-node traffic
    pub client_root_ca: Option<Uuid>,
    /// Keep accepting plaintext connections during the switch
    pub allow_insecure: bool,
}

/// A single atomic action against one node
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "action", content = "value")]
pub enum NodeAction {
    /// Bring the machine of a paused node back up
    ResumeServer,
    /// Refresh the node's network/host information
    CollectServerInfo,
    /// Start a database process
    StartServer(ServerType),
    /// Stop a database process
    StopServer(ServerType),
    /// Change the machine's instance type
    ChangeInstanceType(String),
    /// Grow the node's volumes to the given size in GB
    ResizeVolume(u32),
    /// Rewrite the node's TLS configuration
    ConfigureTls(TlsSettings),
}

impl std::fmt::Display for NodeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ResumeServer => write!(f, "resume-server"),
            Self::CollectServerInfo => write!(f, "collect-server-info"),
            Self::StartServer(server) => write!(f, "start-{server}"),
            Self::StopServer(server) => write!(f, "stop-{server}"),
            Self::ChangeInstanceType(code) => write!(f, "change-instance-type({code})"),
            Self::ResizeVolume(size) => write!(f, "resize-volume({size}GB)"),
            Self::ConfigureTls(_) => write!(f, "configure-tls"),
        }
    }
}

/// Performs process and machine actions on nodes
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NodeBackend: Send + Sync {
    /// Run one action against a node, returning when it has completed
    async fn execute(&self, node: &NodeDetails, action: &NodeAction) -> Result<(), Error>;

    /// Returns true if the given server process on the node reports healthy
    async fn is_server_healthy(&self, node: &NodeDetails, server: ServerType)
        -> Result<bool, Error>;
}

/// Encryption-at-rest key management
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EncryptionKeyService: Send + Sync {
    /// Number of key rotations recorded for the universe
    async fn num_key_rotations(&self, universe: Uuid) -> Result<u32, Error>;

    /// Make the latest universe key active on the masters
    async fn activate_latest_keys(&self, universe: Uuid) -> Result<(), Error>;
}

/// Fire-and-forget activity notifications
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ActivityTelemetry: Send + Sync {
    /// Record that the universe is an active source again
    async fn mark_source_active(&self, customer: Option<Uuid>, universe: Uuid)
        -> Result<(), Error>;
}

/// Regenerates files derived from the universe layout
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ArtifactRegenerator: Send + Sync {
    /// Rewrite the universe's alert definitions
    async fn regenerate_alert_definitions(&self, universe: &Universe) -> Result<(), Error>;

    /// Rewrite the monitoring scrape targets
    async fn regenerate_monitoring_targets(&self, universe: &Universe) -> Result<(), Error>;
}
