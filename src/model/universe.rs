//! Universe aggregate: clusters, nodes and their provisioning intent
//!
//! A [`Universe`] is owned by the persistence collaborator. The orchestrator
//! only ever mutates a working copy obtained under the universe lock and hands
//! it back through a compare-and-swap save.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::node_state::NodeState;
use super::params::OperationType;
use super::types::{ClusterRole, DeviceInfo, ProviderType};
use crate::Error;

/// The logical database cluster managed as one orchestration unit
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Universe {
    /// Universe identity
    pub universe_uuid: Uuid,

    /// Human-readable name
    pub name: String,

    /// Optimistic-concurrency token, bumped once per committed operation
    #[serde(default)]
    pub version: u64,

    /// Topology and intent
    pub details: UniverseDetails,
}

/// Mutable description of a universe
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UniverseDetails {
    /// Primary cluster plus any read replicas
    pub clusters: Vec<Cluster>,

    /// Every node of every cluster
    #[serde(default)]
    pub nodes: Vec<NodeDetails>,

    /// True while the universe's machines are stopped
    #[serde(default)]
    pub paused: bool,

    /// True for universes adopted from outside the platform
    #[serde(default)]
    pub imported: bool,

    /// Whether the last locked operation reached its success marker
    #[serde(default)]
    pub update_succeeded: bool,

    /// Certificate authority securing node-to-node traffic
    #[serde(default, rename = "rootCA", skip_serializing_if = "Option::is_none")]
    pub root_ca: Option<Uuid>,

    /// Certificate authority securing client-to-node traffic
    #[serde(default, rename = "clientRootCA", skip_serializing_if = "Option::is_none")]
    pub client_root_ca: Option<Uuid>,

    /// True when one CA serves both node-to-node and client-to-node traffic
    #[serde(default, rename = "rootAndClientRootCASame")]
    pub root_and_client_root_ca_same: bool,

    /// Encryption-at-rest metadata
    #[serde(default)]
    pub encryption_at_rest: EncryptionAtRestConfig,
}

/// Encryption-at-rest settings of a universe
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionAtRestConfig {
    /// Whether data is encrypted at rest
    #[serde(default)]
    pub enabled: bool,

    /// Key management configuration in use
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kms_config_uuid: Option<Uuid>,
}

/// A node group inside a universe
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    /// Cluster identity
    pub uuid: Uuid,

    /// Primary or read replica
    #[serde(default)]
    pub role: ClusterRole,

    /// Desired provisioning
    pub user_intent: UserIntent,
}

/// Desired provisioning specification of a cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserIntent {
    /// Cloud the nodes run on
    pub provider_type: ProviderType,

    /// Provider configuration id
    pub provider: String,

    /// Machine type code (e.g. `c5.xlarge`)
    pub instance_type: String,

    /// Volume layout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_info: Option<DeviceInfo>,

    /// TLS between database nodes
    #[serde(default)]
    pub enable_node_to_node_encrypt: bool,

    /// TLS between clients and database nodes
    #[serde(default)]
    pub enable_client_to_node_encrypt: bool,
}

impl UserIntent {
    /// Requested volume size, if any
    pub fn volume_size(&self) -> Option<u32> {
        self.device_info.as_ref().and_then(|d| d.volume_size)
    }
}

/// A single database node
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeDetails {
    /// Node name, unique within the universe
    pub node_name: String,

    /// Cluster this node belongs to
    pub placement_uuid: Uuid,

    /// Runs a master process
    #[serde(default)]
    pub is_master: bool,

    /// Runs a tserver process
    #[serde(default)]
    pub is_tserver: bool,

    /// Current lifecycle state
    #[serde(default)]
    pub state: NodeState,

    /// Instance type the machine currently runs as
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,

    /// Volume size currently attached, in GB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_size: Option<u32>,
}

impl NodeDetails {
    /// Returns true if the node runs any database process
    pub fn has_server_role(&self) -> bool {
        self.is_master || self.is_tserver
    }

    /// Move this node to `to`, if the operation's path allows it
    pub fn transition(&mut self, op: OperationType, to: NodeState) -> Result<(), Error> {
        if !op.allows_transition(self.state, to) {
            return Err(Error::validation(format!(
                "illegal node state transition for {} during {op}: {} -> {to}",
                self.node_name, self.state
            )));
        }
        self.state = to;
        Ok(())
    }
}

impl Universe {
    /// The primary cluster, if the universe has one
    pub fn primary_cluster(&self) -> Option<&Cluster> {
        self.details
            .clusters
            .iter()
            .find(|c| c.role == ClusterRole::Primary)
    }

    /// Look up a cluster by id
    pub fn cluster(&self, uuid: Uuid) -> Option<&Cluster> {
        self.details.clusters.iter().find(|c| c.uuid == uuid)
    }

    /// Look up a cluster by id for mutation
    pub fn cluster_mut(&mut self, uuid: Uuid) -> Option<&mut Cluster> {
        self.details.clusters.iter_mut().find(|c| c.uuid == uuid)
    }

    /// Look up a node by name
    pub fn node(&self, name: &str) -> Option<&NodeDetails> {
        self.details.nodes.iter().find(|n| n.node_name == name)
    }

    /// Look up a node by name for mutation
    pub fn node_mut(&mut self, name: &str) -> Option<&mut NodeDetails> {
        self.details.nodes.iter_mut().find(|n| n.node_name == name)
    }

    /// Nodes running a master process
    pub fn masters(&self) -> impl Iterator<Item = &NodeDetails> {
        self.details.nodes.iter().filter(|n| n.is_master)
    }

    /// Nodes running a tserver process
    pub fn tservers(&self) -> impl Iterator<Item = &NodeDetails> {
        self.details.nodes.iter().filter(|n| n.is_tserver)
    }

    /// Nodes belonging to the given cluster, ordered by name
    pub fn nodes_in_cluster(&self, cluster: Uuid) -> Vec<&NodeDetails> {
        let mut nodes: Vec<_> = self
            .details
            .nodes
            .iter()
            .filter(|n| n.placement_uuid == cluster)
            .collect();
        nodes.sort_by(|a, b| a.node_name.cmp(&b.node_name));
        nodes
    }

    /// Provider type of the primary cluster
    pub fn provider_type(&self) -> Option<ProviderType> {
        self.primary_cluster().map(|c| c.user_intent.provider_type)
    }
}
