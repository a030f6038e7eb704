//! Operation requests accepted by the orchestrator

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::UpgradeOption;
use super::universe::UserIntent;

/// The closed set of orchestrated operations
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub enum OperationType {
    /// Start a paused universe
    Resume,
    /// Change instance type and/or volume size of a cluster's nodes
    ResizeNode,
    /// Enable or disable transport encryption
    TlsToggle,
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resume => write!(f, "ResumeUniverse"),
            Self::ResizeNode => write!(f, "ResizeNode"),
            Self::TlsToggle => write!(f, "TlsToggle"),
        }
    }
}

/// Universe version a caller expects to operate on
///
/// Serialized as an integer where `-1` means any version.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(from = "i64", into = "i64")]
pub enum ExpectedVersion {
    /// Accept whatever version is current
    #[default]
    Any,
    /// Reject unless the persisted version matches
    Exactly(u64),
}

impl ExpectedVersion {
    /// Returns true if `actual` satisfies this expectation
    pub fn matches(self, actual: u64) -> bool {
        match self {
            Self::Any => true,
            Self::Exactly(v) => v == actual,
        }
    }
}

impl From<i64> for ExpectedVersion {
    fn from(v: i64) -> Self {
        u64::try_from(v).map(Self::Exactly).unwrap_or(Self::Any)
    }
}

impl From<ExpectedVersion> for i64 {
    fn from(v: ExpectedVersion) -> Self {
        match v {
            ExpectedVersion::Any => -1,
            ExpectedVersion::Exactly(v) => i64::try_from(v).unwrap_or(i64::MAX),
        }
    }
}

/// Desired intent for one cluster of the target universe
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterIntent {
    /// Cluster being changed
    pub uuid: Uuid,
    /// Intent the cluster should end up with
    pub user_intent: UserIntent,
}

/// Fields shared by every upgrade-style request
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskParams {
    /// Universe the request targets
    #[serde(default)]
    pub universe_uuid: Uuid,

    /// Version the caller read; `-1` accepts any
    #[serde(default)]
    pub expected_universe_version: ExpectedVersion,

    /// Target intent per cluster
    #[serde(default)]
    pub clusters: Vec<ClusterIntent>,

    /// How nodes are walked
    #[serde(default)]
    pub upgrade_option: UpgradeOption,
}

/// Request to resume a paused universe
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResumeParams {
    /// Universe to resume
    pub universe_uuid: Uuid,

    /// Owner reported to activity telemetry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_uuid: Option<Uuid>,
}

/// Request to change instance type and/or volume size
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResizeNodeParams {
    /// Shared upgrade fields
    #[serde(flatten)]
    pub base: TaskParams,

    /// Resize every node even if it already reports the target shape
    #[serde(default)]
    pub force_resize_node: bool,
}

/// Request to enable or disable TLS
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TlsToggleParams {
    /// Shared upgrade fields
    #[serde(flatten)]
    pub base: TaskParams,

    /// Desired node-to-node encryption
    pub enable_node_to_node_encrypt: bool,

    /// Desired client-to-node encryption
    pub enable_client_to_node_encrypt: bool,

    /// Keep the plaintext ports open while TLS rolls out
    #[serde(default = "default_allow_insecure")]
    pub allow_insecure: bool,

    /// Root CA for node-to-node traffic
    #[serde(default, rename = "rootCA", skip_serializing_if = "Option::is_none")]
    pub root_ca: Option<Uuid>,

    /// Root CA for client-to-node traffic
    #[serde(default, rename = "clientRootCA", skip_serializing_if = "Option::is_none")]
    pub client_root_ca: Option<Uuid>,

    /// Caller asserts both CAs are the same certificate
    #[serde(
        default,
        rename = "rootAndClientRootCASame",
        skip_serializing_if = "Option::is_none"
    )]
    pub root_and_client_root_ca_same: Option<bool>,
}

fn default_allow_insecure() -> bool {
    true
}

/// An orchestrated operation with its request
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "operation", rename_all = "camelCase")]
pub enum Operation {
    /// Resume a paused universe
    Resume(ResumeParams),
    /// Resize nodes
    ResizeNode(ResizeNodeParams),
    /// Toggle TLS
    TlsToggle(TlsToggleParams),
}

impl Operation {
    /// Tag of this operation
    pub fn operation_type(&self) -> OperationType {
        match self {
            Self::Resume(_) => OperationType::Resume,
            Self::ResizeNode(_) => OperationType::ResizeNode,
            Self::TlsToggle(_) => OperationType::TlsToggle,
        }
    }

    /// Universe the operation targets
    pub fn universe_uuid(&self) -> Uuid {
        match self {
            Self::Resume(p) => p.universe_uuid,
            Self::ResizeNode(p) => p.base.universe_uuid,
            Self::TlsToggle(p) => p.base.universe_uuid,
        }
    }

    /// Version the lock must observe
    ///
    /// Resume never carries a caller version.
    pub fn expected_version(&self) -> ExpectedVersion {
        match self {
            Self::Resume(_) => ExpectedVersion::Any,
            Self::ResizeNode(p) => p.base.expected_universe_version,
            Self::TlsToggle(p) => p.base.expected_universe_version,
        }
    }
}
