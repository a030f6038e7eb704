//! Universe data model and operation requests

mod node_state;
mod params;
mod types;
mod universe;

pub use node_state::NodeState;
pub use params::{
    ClusterIntent, ExpectedVersion, Operation, OperationType, ResizeNodeParams, ResumeParams,
    TaskParams, TlsToggleParams,
};
pub use types::{
    has_ephemeral_storage, CertType, Certificate, ClusterRole, DeviceInfo, ProviderType,
    ServerType, StorageType, UpgradeOption,
};
pub use universe::{
    Cluster, EncryptionAtRestConfig, NodeDetails, Universe, UniverseDetails, UserIntent,
};

#[cfg(test)]
pub(crate) use universe::fixtures;
