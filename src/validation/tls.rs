//! Preconditions for toggling transport encryption

use std::collections::HashMap;

use uuid::Uuid;

#[cfg(test)]
use mockall::automock;

use crate::model::{CertType, Certificate, ProviderType, TlsToggleParams, Universe, UpgradeOption};
use crate::Error;

/// Registry of certificates known to the platform
#[cfg_attr(test, automock)]
pub trait CertificateRegistry: Send + Sync {
    /// Returns true if the certificate exists and has not expired
    fn is_valid(&self, cert: Uuid) -> bool;

    /// Fetch a certificate by id
    fn get(&self, cert: Uuid) -> Option<Certificate>;
}

/// Registry backed by a fixed id → type table
#[derive(Clone, Debug, Default)]
pub struct StaticCertificateRegistry {
    certs: HashMap<Uuid, CertType>,
}

impl StaticCertificateRegistry {
    /// Create a registry from an id → type table
    pub fn new(certs: HashMap<Uuid, CertType>) -> Self {
        Self { certs }
    }

    /// Register a certificate
    pub fn with_cert(mut self, id: Uuid, cert_type: CertType) -> Self {
        self.certs.insert(id, cert_type);
        self
    }
}

impl CertificateRegistry for StaticCertificateRegistry {
    fn is_valid(&self, cert: Uuid) -> bool {
        self.certs.contains_key(&cert)
    }

    fn get(&self, cert: Uuid) -> Option<Certificate> {
        self.certs.get(&cert).map(|t| Certificate {
            id: cert,
            cert_type: *t,
        })
    }
}

fn cert_type(registry: &dyn CertificateRegistry, cert: Option<Uuid>) -> Option<CertType> {
    cert.and_then(|id| registry.get(id)).map(|c| c.cert_type)
}

/// Decide whether a TLS toggle request is legal for the universe
///
/// The first failing check wins. The function reads the universe and the
/// registry only, so repeated calls with the same inputs return the same
/// answer.
pub fn verify_tls_toggle(
    params: &TlsToggleParams,
    universe: &Universe,
    registry: &dyn CertificateRegistry,
) -> Result<(), Error> {
    let details = &universe.details;
    let intent = &universe
        .primary_cluster()
        .ok_or_else(|| {
            Error::validation(format!(
                "Universe {} has no primary cluster",
                universe.universe_uuid
            ))
        })?
        .user_intent;

    if !matches!(
        params.base.upgrade_option,
        UpgradeOption::Rolling | UpgradeOption::NonRolling
    ) {
        return Err(Error::validation(
            "TLS toggle can be performed either rolling or non-rolling way.",
        ));
    }

    if params.enable_client_to_node_encrypt == intent.enable_client_to_node_encrypt
        && params.enable_node_to_node_encrypt == intent.enable_node_to_node_encrypt
    {
        return Err(Error::validation(
            "No changes in Tls parameters, cannot perform update operation.",
        ));
    }

    if let (Some(existing), Some(requested)) = (details.root_ca, params.root_ca) {
        if existing != requested {
            return Err(Error::validation(
                "Cannot update root certificate, if already created.",
            ));
        }
    }

    if let (Some(existing), Some(requested)) = (details.client_root_ca, params.client_root_ca) {
        if existing != requested {
            return Err(Error::validation(
                "Cannot update client root certificate, if already created.",
            ));
        }
    }

    if let Some(root) = params.root_ca {
        if !registry.is_valid(root) {
            return Err(Error::validation(format!(
                "No valid root certificate found for UUID: {root}"
            )));
        }
    }

    if let Some(client_root) = params.client_root_ca {
        if !registry.is_valid(client_root) {
            return Err(Error::validation(format!(
                "No valid client root certificate found for UUID: {client_root}"
            )));
        }
    }

    let root_type = cert_type(registry, params.root_ca);
    let client_root_type = cert_type(registry, params.client_root_ca);

    if root_type == Some(CertType::CustomServerCert) {
        return Err(Error::validation(
            "CustomServerCert are only supported for Client to Server Communication.",
        ));
    }

    let on_prem = intent.provider_type == ProviderType::Onprem;
    if !on_prem
        && (root_type == Some(CertType::CustomCertHostPath)
            || client_root_type == Some(CertType::CustomCertHostPath))
    {
        return Err(Error::validation(
            "CustomCertHostPath certificates are only supported for on-prem providers.",
        ));
    }

    if params.root_and_client_root_ca_same == Some(true)
        && params.enable_node_to_node_encrypt
        && params.enable_client_to_node_encrypt
    {
        if let (Some(root), Some(client_root)) = (params.root_ca, params.client_root_ca) {
            if root != client_root {
                return Err(Error::validation(
                    "RootCA and ClientRootCA cannot be different when rootAndClientRootCASame is true.",
                ));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::universe;
    use crate::model::{NodeState, TaskParams};
    use rstest::rstest;

    fn request(u: &Universe, n2n: bool, c2n: bool) -> TlsToggleParams {
        TlsToggleParams {
            base: TaskParams {
                universe_uuid: u.universe_uuid,
                upgrade_option: UpgradeOption::Rolling,
                ..Default::default()
            },
            enable_node_to_node_encrypt: n2n,
            enable_client_to_node_encrypt: c2n,
            allow_insecure: true,
            root_ca: None,
            client_root_ca: None,
            root_and_client_root_ca_same: None,
        }
    }

    fn message(result: Result<(), Error>) -> String {
        match result {
            Err(Error::Validation(msg)) => msg,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn non_restart_upgrade_is_rejected() {
        let u = universe(3, NodeState::Live);
        let mut params = request(&u, true, true);
        params.base.upgrade_option = UpgradeOption::NonRestart;
        let msg = message(verify_tls_toggle(&params, &u, &StaticCertificateRegistry::default()));
        assert_eq!(msg, "TLS toggle can be performed either rolling or non-rolling way.");
    }

    #[test]
    fn unchanged_flags_are_a_noop_every_time() {
        let u = universe(3, NodeState::Live);
        let params = request(&u, false, false);
        let registry = StaticCertificateRegistry::default();
        let first = message(verify_tls_toggle(&params, &u, &registry));
        let second = message(verify_tls_toggle(&params, &u, &registry));
        assert_eq!(first, "No changes in Tls parameters, cannot perform update operation.");
        assert_eq!(first, second);
    }

    #[test]
    fn existing_root_ca_cannot_change() {
        let mut u = universe(3, NodeState::Live);
        u.details.root_ca = Some(Uuid::new_v4());
        let mut params = request(&u, true, false);
        params.root_ca = Some(Uuid::new_v4());
        let msg = message(verify_tls_toggle(&params, &u, &StaticCertificateRegistry::default()));
        assert_eq!(msg, "Cannot update root certificate, if already created.");
    }

    #[test]
    fn existing_client_root_ca_cannot_change() {
        let mut u = universe(3, NodeState::Live);
        u.details.client_root_ca = Some(Uuid::new_v4());
        let mut params = request(&u, false, true);
        params.client_root_ca = Some(Uuid::new_v4());
        let msg = message(verify_tls_toggle(&params, &u, &StaticCertificateRegistry::default()));
        assert_eq!(msg, "Cannot update client root certificate, if already created.");
    }

    /// Which CA reference of the request a case sets
    #[derive(Clone, Copy, Debug)]
    enum CaSlot {
        Root,
        ClientRoot,
    }

    fn with_ca(mut params: TlsToggleParams, slot: CaSlot, cert: Uuid) -> TlsToggleParams {
        match slot {
            CaSlot::Root => params.root_ca = Some(cert),
            CaSlot::ClientRoot => params.client_root_ca = Some(cert),
        }
        params
    }

    #[rstest]
    #[case::root(CaSlot::Root, "root certificate")]
    #[case::client_root(CaSlot::ClientRoot, "client root certificate")]
    fn unknown_ca_is_rejected(#[case] slot: CaSlot, #[case] what: &str) {
        let u = universe(3, NodeState::Live);
        let cert = Uuid::new_v4();
        let params = with_ca(request(&u, true, true), slot, cert);
        let msg = message(verify_tls_toggle(&params, &u, &StaticCertificateRegistry::default()));
        assert_eq!(msg, format!("No valid {what} found for UUID: {cert}"));
    }

    #[test]
    fn custom_server_cert_cannot_secure_node_to_node() {
        let u = universe(3, NodeState::Live);
        let cert = Uuid::new_v4();
        let registry =
            StaticCertificateRegistry::default().with_cert(cert, CertType::CustomServerCert);
        let mut params = request(&u, true, false);
        params.root_ca = Some(cert);
        let msg = message(verify_tls_toggle(&params, &u, &registry));
        assert_eq!(
            msg,
            "CustomServerCert are only supported for Client to Server Communication."
        );
    }

    #[rstest]
    #[case::root_on_aws(CaSlot::Root, ProviderType::Aws)]
    #[case::client_root_on_aws(CaSlot::ClientRoot, ProviderType::Aws)]
    #[case::root_on_gcp(CaSlot::Root, ProviderType::Gcp)]
    #[case::client_root_on_kubernetes(CaSlot::ClientRoot, ProviderType::Kubernetes)]
    fn host_path_cert_requires_onprem(#[case] slot: CaSlot, #[case] provider: ProviderType) {
        let mut u = universe(3, NodeState::Live);
        u.details.clusters[0].user_intent.provider_type = provider;
        let cert = Uuid::new_v4();
        let registry =
            StaticCertificateRegistry::default().with_cert(cert, CertType::CustomCertHostPath);
        let params = with_ca(request(&u, true, true), slot, cert);
        let msg = message(verify_tls_toggle(&params, &u, &registry));
        assert_eq!(
            msg,
            "CustomCertHostPath certificates are only supported for on-prem providers."
        );
    }

    #[test]
    fn host_path_cert_accepted_on_onprem() {
        let mut u = universe(3, NodeState::Live);
        u.details.clusters[0].user_intent.provider_type = ProviderType::Onprem;
        let cert = Uuid::new_v4();
        let registry =
            StaticCertificateRegistry::default().with_cert(cert, CertType::CustomCertHostPath);
        let mut params = request(&u, true, false);
        params.root_ca = Some(cert);
        assert!(verify_tls_toggle(&params, &u, &registry).is_ok());
    }

    #[test]
    fn same_ca_assertion_must_match_references() {
        let u = universe(3, NodeState::Live);
        let root = Uuid::new_v4();
        let client_root = Uuid::new_v4();
        let registry = StaticCertificateRegistry::default()
            .with_cert(root, CertType::SelfSigned)
            .with_cert(client_root, CertType::SelfSigned);
        let mut params = request(&u, true, true);
        params.root_ca = Some(root);
        params.client_root_ca = Some(client_root);
        params.root_and_client_root_ca_same = Some(true);
        let msg = message(verify_tls_toggle(&params, &u, &registry));
        assert_eq!(
            msg,
            "RootCA and ClientRootCA cannot be different when rootAndClientRootCASame is true."
        );

        params.root_and_client_root_ca_same = Some(false);
        assert!(verify_tls_toggle(&params, &u, &registry).is_ok());
    }

    #[test]
    fn registry_is_only_asked_about_requested_certs() {
        let u = universe(3, NodeState::Live);
        let cert = Uuid::new_v4();
        let mut mock = MockCertificateRegistry::new();
        mock.expect_is_valid()
            .withf(move |id| *id == cert)
            .times(1)
            .returning(|_| true);
        mock.expect_get().returning(move |id| {
            Some(Certificate {
                id,
                cert_type: CertType::SelfSigned,
            })
        });
        let mut params = request(&u, true, false);
        params.root_ca = Some(cert);
        assert!(verify_tls_toggle(&params, &u, &mock).is_ok());
    }
}
