//! Shared collaborators for orchestrated operations

use std::sync::Arc;

use crate::backend::{
    ActivityTelemetry, ArtifactRegenerator, EncryptionKeyService, InMemoryKeyService,
    LoggingArtifactRegenerator, LoggingTelemetry, NodeBackend, SimulatedNodeBackend,
};
use crate::config::OrchestratorConfig;
use crate::retry::RetryConfig;
use crate::store::UniverseStore;
use crate::validation::{
    CertificateRegistry, InstanceCatalog, StaticCertificateRegistry, StaticInstanceCatalog,
};

/// Everything an operation talks to outside the orchestrator
///
/// Trait objects let tests swap any collaborator for a mock or simulator.
pub struct Context {
    /// Persistence gateway
    pub store: Arc<dyn UniverseStore>,
    /// Node execution backend
    pub nodes: Arc<dyn NodeBackend>,
    /// Provider instance catalog
    pub catalog: Arc<dyn InstanceCatalog>,
    /// Certificate registry
    pub certificates: Arc<dyn CertificateRegistry>,
    /// Encryption key service
    pub keys: Arc<dyn EncryptionKeyService>,
    /// Activity telemetry sink
    pub telemetry: Arc<dyn ActivityTelemetry>,
    /// Alert and monitoring regeneration
    pub artifacts: Arc<dyn ArtifactRegenerator>,
    /// Orchestrator settings
    pub config: OrchestratorConfig,
    /// Retry policy for idempotent late-phase calls
    pub retry: RetryConfig,
}

impl Context {
    /// Create a builder around a persistence gateway
    pub fn builder(store: Arc<dyn UniverseStore>) -> ContextBuilder {
        ContextBuilder::new(store)
    }
}

/// Builder for [`Context`]
///
/// Unset collaborators default to the in-process implementations: a
/// simulated node backend, the catalog and registry seeded from the
/// config, and logging-only telemetry and regenerators.
///
/// ```ignore
/// let ctx = Context::builder(store)
///     .node_backend(backend)
///     .config(config)
///     .build();
/// ```
pub struct ContextBuilder {
    store: Arc<dyn UniverseStore>,
    nodes: Option<Arc<dyn NodeBackend>>,
    catalog: Option<Arc<dyn InstanceCatalog>>,
    certificates: Option<Arc<dyn CertificateRegistry>>,
    keys: Option<Arc<dyn EncryptionKeyService>>,
    telemetry: Option<Arc<dyn ActivityTelemetry>>,
    artifacts: Option<Arc<dyn ArtifactRegenerator>>,
    config: OrchestratorConfig,
    retry: RetryConfig,
}

impl ContextBuilder {
    fn new(store: Arc<dyn UniverseStore>) -> Self {
        Self {
            store,
            nodes: None,
            catalog: None,
            certificates: None,
            keys: None,
            telemetry: None,
            artifacts: None,
            config: OrchestratorConfig::default(),
            retry: RetryConfig::default(),
        }
    }

    /// Set orchestrator settings
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the retry policy for late-phase regeneration
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Override the node execution backend
    pub fn node_backend(mut self, nodes: Arc<dyn NodeBackend>) -> Self {
        self.nodes = Some(nodes);
        self
    }

    /// Override the instance catalog
    pub fn instance_catalog(mut self, catalog: Arc<dyn InstanceCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Override the certificate registry
    pub fn certificate_registry(mut self, certificates: Arc<dyn CertificateRegistry>) -> Self {
        self.certificates = Some(certificates);
        self
    }

    /// Override the encryption key service
    pub fn key_service(mut self, keys: Arc<dyn EncryptionKeyService>) -> Self {
        self.keys = Some(keys);
        self
    }

    /// Override the activity telemetry sink
    pub fn telemetry(mut self, telemetry: Arc<dyn ActivityTelemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Override the artifact regenerator
    pub fn artifacts(mut self, artifacts: Arc<dyn ArtifactRegenerator>) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        let catalog: StaticInstanceCatalog = self.config.instance_catalog();
        let certificates: StaticCertificateRegistry = self.config.certificate_registry();
        Context {
            store: self.store,
            nodes: self
                .nodes
                .unwrap_or_else(|| Arc::new(SimulatedNodeBackend::new())),
            catalog: self.catalog.unwrap_or_else(|| Arc::new(catalog)),
            certificates: self
                .certificates
                .unwrap_or_else(|| Arc::new(certificates)),
            keys: self
                .keys
                .unwrap_or_else(|| Arc::new(InMemoryKeyService::new())),
            telemetry: self.telemetry.unwrap_or_else(|| Arc::new(LoggingTelemetry)),
            artifacts: self
                .artifacts
                .unwrap_or_else(|| Arc::new(LoggingArtifactRegenerator)),
            config: self.config,
            retry: self.retry,
        }
    }
}
