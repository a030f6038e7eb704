//! Supporting types for the universe data model

use serde::{Deserialize, Serialize};

/// Supported infrastructure provider types
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum ProviderType {
    /// Amazon Web Services
    #[default]
    Aws,
    /// Google Cloud Platform
    Gcp,
    /// Microsoft Azure
    Azure,
    /// Customer-managed machines
    Onprem,
    /// Kubernetes pods
    Kubernetes,
}

impl ProviderType {
    /// Returns true if nodes on this provider can be resized in place
    pub fn supports_resize(&self) -> bool {
        matches!(self, Self::Aws | Self::Gcp)
    }
}

impl std::str::FromStr for ProviderType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "aws" => Ok(Self::Aws),
            "gcp" => Ok(Self::Gcp),
            "azure" | "azu" => Ok(Self::Azure),
            "onprem" => Ok(Self::Onprem),
            "kubernetes" => Ok(Self::Kubernetes),
            _ => Err(crate::Error::validation(format!(
                "invalid provider type: {s}, expected one of: aws, gcp, azure, onprem, kubernetes"
            ))),
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Aws => write!(f, "aws"),
            Self::Gcp => write!(f, "gcp"),
            Self::Azure => write!(f, "azure"),
            Self::Onprem => write!(f, "onprem"),
            Self::Kubernetes => write!(f, "kubernetes"),
        }
    }
}

/// Disk storage class backing a node's volumes
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    /// AWS general purpose SSD
    Gp2,
    /// AWS general purpose SSD, provisioned throughput
    Gp3,
    /// AWS provisioned IOPS
    Io1,
    /// GCP persistent SSD
    Persistent,
    /// GCP local scratch disk, lost on stop
    Scratch,
}

/// Instance families whose storage is local NVMe and does not survive a stop
const EPHEMERAL_AWS_PREFIXES: &[&str] = &[
    "i3.", "i3en.", "i4i.", "c5d.", "c6gd.", "m5d.", "m6gd.", "r5d.", "r6gd.", "z1d.", "x1.",
];

/// Volume layout requested for each node
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Size of each volume in GB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_size: Option<u32>,

    /// Number of volumes per node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_volumes: Option<u32>,

    /// Storage class of the volumes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_type: Option<StorageType>,
}

/// Returns true if nodes of this shape lose their data when stopped
pub fn has_ephemeral_storage(
    provider: ProviderType,
    instance_type: &str,
    device: Option<&DeviceInfo>,
) -> bool {
    match provider {
        ProviderType::Aws => EPHEMERAL_AWS_PREFIXES
            .iter()
            .any(|prefix| instance_type.starts_with(prefix)),
        ProviderType::Gcp => device
            .and_then(|d| d.storage_type)
            .map(|s| s == StorageType::Scratch)
            .unwrap_or(false),
        _ => false,
    }
}

/// How an upgrade-style operation walks the nodes
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpgradeOption {
    /// One node at a time, waiting for health in between
    #[default]
    Rolling,
    /// All nodes at once, accepting downtime
    NonRolling,
    /// Only rewrite configuration, no restart
    NonRestart,
}

impl std::fmt::Display for UpgradeOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rolling => write!(f, "ROLLING"),
            Self::NonRolling => write!(f, "NON_ROLLING"),
            Self::NonRestart => write!(f, "NON_RESTART"),
        }
    }
}

/// Database server process kinds running on a node
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ServerType {
    /// Consensus/metadata server
    Master,
    /// Tablet (data) server
    Tserver,
}

impl std::fmt::Display for ServerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Master => write!(f, "master"),
            Self::Tserver => write!(f, "tserver"),
        }
    }
}

/// Role of a cluster inside its universe
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ClusterRole {
    /// Cluster holding the masters and the primary data copy
    #[default]
    Primary,
    /// Asynchronous read replica
    ReadReplica,
}

/// How a certificate was provisioned
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum CertType {
    /// Generated by the platform
    SelfSigned,
    /// Issued by a HashiCorp Vault PKI
    HashicorpVault,
    /// Customer files already present on each node's file system
    CustomCertHostPath,
    /// Customer server certificate, client-to-server only
    CustomServerCert,
}

/// A registered certificate
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Certificate {
    /// Registry identifier
    pub id: uuid::Uuid,
    /// How the certificate was provisioned
    pub cert_type: CertType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_round_trips_through_display() {
        for p in [
            ProviderType::Aws,
            ProviderType::Gcp,
            ProviderType::Azure,
            ProviderType::Onprem,
            ProviderType::Kubernetes,
        ] {
            assert_eq!(p.to_string().parse::<ProviderType>().unwrap(), p);
        }
        assert!("docker".parse::<ProviderType>().is_err());
    }

    #[test]
    fn only_aws_and_gcp_support_resize() {
        assert!(ProviderType::Aws.supports_resize());
        assert!(ProviderType::Gcp.supports_resize());
        assert!(!ProviderType::Azure.supports_resize());
        assert!(!ProviderType::Onprem.supports_resize());
    }

    #[test]
    fn aws_nvme_families_are_ephemeral() {
        assert!(has_ephemeral_storage(ProviderType::Aws, "i3.2xlarge", None));
        assert!(has_ephemeral_storage(ProviderType::Aws, "c5d.large", None));
        assert!(!has_ephemeral_storage(ProviderType::Aws, "c5.large", None));
    }

    #[test]
    fn gcp_scratch_is_ephemeral() {
        let scratch = DeviceInfo {
            storage_type: Some(StorageType::Scratch),
            ..Default::default()
        };
        let persistent = DeviceInfo {
            storage_type: Some(StorageType::Persistent),
            ..Default::default()
        };
        assert!(has_ephemeral_storage(ProviderType::Gcp, "n1-standard-4", Some(&scratch)));
        assert!(!has_ephemeral_storage(ProviderType::Gcp, "n1-standard-4", Some(&persistent)));
        assert!(!has_ephemeral_storage(ProviderType::Gcp, "n1-standard-4", None));
    }

    #[test]
    fn upgrade_option_uses_wire_names() {
        let yaml = serde_yaml::to_string(&UpgradeOption::NonRolling).unwrap();
        assert_eq!(yaml.trim(), "NON_ROLLING");
        let parsed: UpgradeOption = serde_yaml::from_str("ROLLING").unwrap();
        assert_eq!(parsed, UpgradeOption::Rolling);
    }
}
