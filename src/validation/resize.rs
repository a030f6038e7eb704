//! Preconditions for resizing nodes in place
//!
//! The checks run in a fixed order and the first failing one wins. They are
//! pure over the two intent snapshots; the only outside call is the catalog
//! lookup when the instance type changes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[cfg(test)]
use mockall::automock;

use crate::model::{has_ephemeral_storage, ResizeNodeParams, Universe, UpgradeOption, UserIntent};
use crate::Error;

/// An instance type offered by a provider
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceType {
    /// Provider-specific type code (e.g. `c5.2xlarge`)
    pub instance_type_code: String,

    /// Whether the platform officially supports this type
    #[serde(default = "default_supported")]
    pub supported: bool,
}

fn default_supported() -> bool {
    true
}

impl InstanceType {
    /// A supported instance type with the given code
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            instance_type_code: code.into(),
            supported: true,
        }
    }
}

/// Provider catalog of instance types
#[cfg_attr(test, automock)]
pub trait InstanceCatalog: Send + Sync {
    /// List the instance types a provider offers
    ///
    /// Unsupported types are only returned when `allow_unsupported` is set.
    fn list_instance_types(
        &self,
        provider: &str,
        allow_unsupported: bool,
    ) -> Result<Vec<InstanceType>, Error>;
}

/// Catalog backed by a fixed provider → types table
#[derive(Clone, Debug, Default)]
pub struct StaticInstanceCatalog {
    types: HashMap<String, Vec<InstanceType>>,
}

impl StaticInstanceCatalog {
    /// Create a catalog from a provider → types table
    pub fn new(types: HashMap<String, Vec<InstanceType>>) -> Self {
        Self { types }
    }

    /// Add instance types for a provider
    pub fn with_provider(
        mut self,
        provider: impl Into<String>,
        types: impl IntoIterator<Item = InstanceType>,
    ) -> Self {
        self.types
            .entry(provider.into())
            .or_default()
            .extend(types);
        self
    }
}

impl InstanceCatalog for StaticInstanceCatalog {
    fn list_instance_types(
        &self,
        provider: &str,
        allow_unsupported: bool,
    ) -> Result<Vec<InstanceType>, Error> {
        Ok(self
            .types
            .get(provider)
            .map(|types| {
                types
                    .iter()
                    .filter(|t| allow_unsupported || t.supported)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Decide whether `current` can be resized in place to `desired`
///
/// Returns `Ok(())` when the resize is possible, otherwise a validation
/// error carrying the first failing reason.
pub fn check_resize_is_possible(
    current: Option<&UserIntent>,
    desired: Option<&UserIntent>,
    allow_unsupported_instances: bool,
    verify_volume_size: bool,
    catalog: &dyn InstanceCatalog,
) -> Result<(), Error> {
    let (current, desired) = match (current, desired) {
        (Some(c), Some(d)) => (c, d),
        (c, d) => {
            return Err(Error::validation(format!(
                "Should have both intents, but got: {c:?}, {d:?}"
            )))
        }
    };

    if !current.provider_type.supports_resize() {
        return Err(Error::validation(format!(
            "Smart resizing is only supported for AWS / GCP, It is: {}",
            current.provider_type
        )));
    }

    let mut disk_changed = false;
    if let Some(new_size) = desired.volume_size() {
        let current_device = current.device_info.as_ref();
        let current_size = current_device.and_then(|d| d.volume_size);
        if let Some(cur) = current_size {
            if cur > new_size {
                return Err(Error::validation(format!(
                    "Disk size cannot be decreased. It was {cur} got {new_size}"
                )));
            }
        }

        let current_volumes = current_device.and_then(|d| d.num_volumes);
        let new_volumes = desired.device_info.as_ref().and_then(|d| d.num_volumes);
        if let Some(new_volumes) = new_volumes {
            if Some(new_volumes) != current_volumes {
                return Err(Error::validation(format!(
                    "Number of volumes cannot be changed. It was {} got {new_volumes}",
                    current_volumes.map_or_else(|| "none".to_string(), |v| v.to_string())
                )));
            }
        }

        disk_changed = current_size != Some(new_size);
    }

    let instance_changed = current.instance_type != desired.instance_type;
    if verify_volume_size && !disk_changed && !instance_changed {
        return Err(Error::validation("Nothing changed!"));
    }

    if has_ephemeral_storage(
        current.provider_type,
        &current.instance_type,
        current.device_info.as_ref(),
    ) {
        return Err(Error::validation(
            "ResizeNode operation is not supported for instances with ephemeral drives",
        ));
    }

    if instance_changed {
        let types = catalog.list_instance_types(&current.provider, allow_unsupported_instances)?;
        let found = types
            .iter()
            .any(|t| t.instance_type_code == desired.instance_type);
        if !found {
            return Err(Error::validation(format!(
                "Provider {} of type {} does not contain the intended instance type '{}'",
                current.provider, current.provider_type, desired.instance_type
            )));
        }
    }

    Ok(())
}

/// Validate a resize request against the universe it targets
///
/// Only rolling resizes are allowed; every requested cluster must exist and
/// pass [`check_resize_is_possible`].
pub fn verify_resize_params(
    universe: &Universe,
    params: &ResizeNodeParams,
    allow_unsupported_instances: bool,
    catalog: &dyn InstanceCatalog,
) -> Result<(), Error> {
    if params.base.upgrade_option != UpgradeOption::Rolling {
        return Err(Error::validation(
            "Only ROLLING upgrade option is supported for resizing node (changing VM type).",
        ));
    }

    if params.base.clusters.is_empty() {
        return Err(Error::validation("No clusters specified for resize"));
    }

    for cluster in &params.base.clusters {
        let current = universe.cluster(cluster.uuid).ok_or_else(|| {
            Error::validation(format!(
                "Cluster {} not found in universe {}",
                cluster.uuid, universe.universe_uuid
            ))
        })?;
        check_resize_is_possible(
            Some(&current.user_intent),
            Some(&cluster.user_intent),
            allow_unsupported_instances,
            true,
            catalog,
        )?;
    }

    Ok(())
}
