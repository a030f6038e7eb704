//! Persistence gateway for universe records
//!
//! The orchestrator treats [`UniverseStore::save`] as an atomic
//! compare-and-swap on the universe version: a save only lands if the
//! persisted version still equals the version the caller locked.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

#[cfg(test)]
use mockall::automock;

use crate::model::Universe;
use crate::Error;

/// Loads and saves universe records
#[cfg_attr(test, automock)]
#[async_trait]
pub trait UniverseStore: Send + Sync {
    /// Load the current record of a universe
    async fn load(&self, universe: Uuid) -> Result<Universe, Error>;

    /// Save a universe if the persisted version equals `expected_version`
    ///
    /// Returns the new version, which is always `expected_version + 1`.
    async fn save(&self, universe: &Universe, expected_version: u64) -> Result<u64, Error>;
}

/// Process-local store, used by the CLI and tests
#[derive(Debug, Default)]
pub struct InMemoryUniverseStore {
    universes: DashMap<Uuid, Universe>,
}

impl InMemoryUniverseStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a universe record as-is
    pub fn insert(&self, universe: Universe) {
        self.universes.insert(universe.universe_uuid, universe);
    }

    /// Snapshot of a stored universe
    pub fn get(&self, universe: Uuid) -> Option<Universe> {
        self.universes.get(&universe).map(|u| u.clone())
    }
}

#[async_trait]
impl UniverseStore for InMemoryUniverseStore {
    async fn load(&self, universe: Uuid) -> Result<Universe, Error> {
        self.get(universe).ok_or(Error::NotFound { universe })
    }

    async fn save(&self, universe: &Universe, expected_version: u64) -> Result<u64, Error> {
        let id = universe.universe_uuid;
        match self.universes.entry(id) {
            Entry::Vacant(_) => Err(Error::NotFound { universe: id }),
            Entry::Occupied(mut stored) => {
                let actual = stored.get().version;
                if actual != expected_version {
                    return Err(Error::VersionConflict {
                        universe: id,
                        expected: expected_version,
                        actual,
                    });
                }
                let mut next = universe.clone();
                next.version = expected_version + 1;
                stored.insert(next);
                debug!(universe = %id, version = expected_version + 1, "universe saved");
                Ok(expected_version + 1)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::universe;
    use crate::model::NodeState;

    #[tokio::test]
    async fn save_bumps_version_by_one() {
        let store = InMemoryUniverseStore::new();
        let u = universe(3, NodeState::Live);
        store.insert(u.clone());

        let next = store.save(&u, 1).await.unwrap();
        assert_eq!(next, 2);
        assert_eq!(store.load(u.universe_uuid).await.unwrap().version, 2);
    }

    #[tokio::test]
    async fn stale_save_is_rejected_without_writing() {
        let store = InMemoryUniverseStore::new();
        let mut u = universe(3, NodeState::Live);
        store.insert(u.clone());

        u.details.paused = true;
        let err = store.save(&u, 0).await.unwrap_err();
        assert!(matches!(
            err,
            Error::VersionConflict {
                expected: 0,
                actual: 1,
                ..
            }
        ));
        assert!(!store.get(u.universe_uuid).unwrap().details.paused);
    }

    #[tokio::test]
    async fn missing_universe_is_not_found() {
        let store = InMemoryUniverseStore::new();
        let err = store.load(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
