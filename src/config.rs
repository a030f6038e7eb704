//! Orchestrator configuration
//!
//! Loaded from a YAML file; every field has a default so an empty file (or
//! no file at all) is a valid configuration.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::CertType;
use crate::validation::{InstanceType, StaticCertificateRegistry, StaticInstanceCatalog};
use crate::Error;

/// Default overall wait for a server to report healthy
pub const DEFAULT_HEALTH_TIMEOUT_SECS: u64 = 300;

/// Default interval between health probes
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

/// Upper bound on any health wait; larger configured values are clamped
pub const MAX_HEALTH_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;

/// Log output format
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Bounded wait used by every wait-for-healthy barrier
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthCheckConfig {
    /// Give up after this many seconds
    pub timeout_secs: u64,
    /// Initial delay between probes, in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_HEALTH_TIMEOUT_SECS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl HealthCheckConfig {
    /// Overall timeout, at most [`MAX_HEALTH_TIMEOUT_SECS`]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.min(MAX_HEALTH_TIMEOUT_SECS))
    }

    /// Initial poll interval, between 1ms and the timeout
    pub fn poll_interval(&self) -> Duration {
        let floor = Duration::from_millis(1);
        Duration::from_millis(self.poll_interval_ms)
            .min(self.timeout())
            .max(floor)
    }
}

/// Top-level configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct OrchestratorConfig {
    /// Health barrier timing
    pub health_check: HealthCheckConfig,
    /// Allow resizing to instance types the provider marks unsupported
    pub allow_unsupported_instances: bool,
    /// Log output format
    pub log_format: LogFormat,
    /// Provider id → instance type codes offered by that provider
    pub catalog: HashMap<String, Vec<String>>,
    /// Certificate id → certificate type
    pub certificates: HashMap<Uuid, CertType>,
}

impl OrchestratorConfig {
    /// Parse a configuration from YAML text
    pub fn from_yaml(yaml: &str) -> Result<Self, Error> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml).map_err(|e| Error::config(e.to_string()))
    }

    /// Load a configuration file
    pub async fn load(path: &Path) -> Result<Self, Error> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_yaml(&text)
    }

    /// Instance catalog seeded from `catalog`
    pub fn instance_catalog(&self) -> StaticInstanceCatalog {
        self.catalog
            .iter()
            .fold(StaticInstanceCatalog::default(), |catalog, (provider, codes)| {
                catalog.with_provider(provider.clone(), codes.iter().map(InstanceType::new))
            })
    }

    /// Certificate registry seeded from `certificates`
    pub fn certificate_registry(&self) -> StaticCertificateRegistry {
        StaticCertificateRegistry::new(self.certificates.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::{CertificateRegistry, InstanceCatalog};

    #[test]
    fn oversized_health_timings_are_clamped() {
        let config = OrchestratorConfig::from_yaml(
            "healthCheck:\n  timeoutSecs: 18446744073709551615\n  pollIntervalMs: 18446744073709551615\n",
        )
        .unwrap();
        let health = &config.health_check;
        assert_eq!(health.timeout(), Duration::from_secs(MAX_HEALTH_TIMEOUT_SECS));
        assert_eq!(health.poll_interval(), health.timeout());

        let zero = HealthCheckConfig {
            timeout_secs: 0,
            poll_interval_ms: 0,
        };
        assert_eq!(zero.poll_interval(), Duration::from_millis(1));
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config = OrchestratorConfig::from_yaml("").unwrap();
        assert_eq!(config, OrchestratorConfig::default());
        assert_eq!(config.health_check.timeout(), Duration::from_secs(300));
        assert_eq!(config.health_check.poll_interval(), Duration::from_secs(2));
    }

    #[test]
    fn partial_document_keeps_other_defaults() {
        let config = OrchestratorConfig::from_yaml(
            r#"
healthCheck:
  timeoutSecs: 30
logFormat: json
catalog:
  aws-provider: [c5.xlarge, c5.2xlarge]
"#,
        )
        .unwrap();
        assert_eq!(config.health_check.timeout_secs, 30);
        assert_eq!(config.health_check.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(!config.allow_unsupported_instances);

        let types = config
            .instance_catalog()
            .list_instance_types("aws-provider", false)
            .unwrap();
        assert_eq!(types.len(), 2);
    }

    #[test]
    fn certificates_seed_the_registry() {
        let id = Uuid::new_v4();
        let config =
            OrchestratorConfig::from_yaml(&format!("certificates:\n  {id}: SelfSigned\n")).unwrap();
        assert!(config.certificate_registry().is_valid(id));
    }

    #[test]
    fn malformed_document_is_a_config_error() {
        let err = OrchestratorConfig::from_yaml("healthCheck: [1, 2]").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn load_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commissioner.yaml");
        std::fs::write(&path, "allowUnsupportedInstances: true\n").unwrap();
        let config = OrchestratorConfig::load(&path).await.unwrap();
        assert!(config.allow_unsupported_instances);
    }

    #[tokio::test]
    async fn missing_file_is_a_config_error() {
        let err = OrchestratorConfig::load(Path::new("/nonexistent/commissioner.yaml"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
