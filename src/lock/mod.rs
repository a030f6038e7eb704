//! Exclusive per-universe leases
//!
//! At most one mutating operation may hold a universe at a time. Holding is
//! represented by a [`UniverseLease`]: acquiring one is the only way to get a
//! mutable working copy of the universe, and the lease gives the universe back
//! when it is released or dropped.
//!
//! # Release guarantee
//!
//! Release runs exactly once per successful acquire. An explicit
//! [`UniverseLease::release`] consumes the lease; every other exit path
//! (early return, `?`, panic unwinding) releases from `Drop`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::model::{ExpectedVersion, OperationType, Universe};
use crate::store::UniverseStore;
use crate::Error;

/// Who holds a universe lock
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct LockHolder {
    /// Task that took the lock
    pub task_id: Uuid,
    /// Operation being run
    pub operation: OperationType,
    /// When the lock was taken
    pub acquired_at: DateTime<Utc>,
}

impl LockHolder {
    /// Holder record for a task starting now
    pub fn new(task_id: Uuid, operation: OperationType) -> Self {
        Self {
            task_id,
            operation,
            acquired_at: Utc::now(),
        }
    }
}

/// Counters over the lifetime of a lock table
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LockStats {
    /// Successful acquisitions
    pub acquired: u64,
    /// Releases
    pub released: u64,
}

/// Keyed table of held universe locks
#[derive(Debug, Default)]
pub struct LockTable {
    held: DashMap<Uuid, LockHolder>,
    acquired: AtomicU64,
    released: AtomicU64,
}

impl LockTable {
    /// Create an empty lock table
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Take exclusive access to a universe
    ///
    /// Fails with [`Error::AlreadyLocked`] if another operation holds it and
    /// with [`Error::VersionConflict`] if `expected` does not match the
    /// persisted version. The working copy is loaded after the lock is taken,
    /// so it cannot be overtaken by a concurrent commit.
    pub async fn acquire(
        self: &Arc<Self>,
        store: &dyn UniverseStore,
        universe: Uuid,
        expected: ExpectedVersion,
        holder: LockHolder,
    ) -> Result<UniverseLease, Error> {
        match self.held.entry(universe) {
            Entry::Occupied(existing) => {
                debug!(
                    universe = %universe,
                    holder = %existing.get().task_id,
                    "universe already locked"
                );
                return Err(Error::AlreadyLocked { universe });
            }
            Entry::Vacant(slot) => {
                slot.insert(holder.clone());
            }
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);

        // From here on the lease owns the table entry; errors drop it.
        let mut lease = UniverseLease {
            table: Arc::clone(self),
            universe_uuid: universe,
            holder,
            working: None,
            locked_version: 0,
            released: false,
        };

        let mut working = store.load(universe).await?;
        if !expected.matches(working.version) {
            return Err(Error::VersionConflict {
                universe,
                expected: match expected {
                    ExpectedVersion::Exactly(v) => v,
                    ExpectedVersion::Any => working.version,
                },
                actual: working.version,
            });
        }

        working.details.update_succeeded = false;
        lease.locked_version = working.version;
        lease.working = Some(working);

        info!(
            universe = %universe,
            task = %lease.holder.task_id,
            operation = %lease.holder.operation,
            version = lease.locked_version,
            "universe locked"
        );
        Ok(lease)
    }

    /// Returns true if the universe is currently locked
    pub fn is_locked(&self, universe: Uuid) -> bool {
        self.held.contains_key(&universe)
    }

    /// Current holder of a universe lock
    pub fn holder(&self, universe: Uuid) -> Option<LockHolder> {
        self.held.get(&universe).map(|h| h.clone())
    }

    /// Acquire/release counters
    pub fn stats(&self) -> LockStats {
        LockStats {
            acquired: self.acquired.load(Ordering::SeqCst),
            released: self.released.load(Ordering::SeqCst),
        }
    }

    fn release(&self, universe: Uuid, task_id: Uuid) {
        let removed = self
            .held
            .remove_if(&universe, |_, holder| holder.task_id == task_id);
        if removed.is_some() {
            self.released.fetch_add(1, Ordering::SeqCst);
            info!(universe = %universe, task = %task_id, "universe unlocked");
        } else {
            warn!(universe = %universe, task = %task_id, "lock release found no matching holder");
        }
    }
}

/// Capability to mutate one universe, returned by [`LockTable::acquire`]
#[derive(Debug)]
pub struct UniverseLease {
    table: Arc<LockTable>,
    universe_uuid: Uuid,
    holder: LockHolder,
    working: Option<Universe>,
    locked_version: u64,
    released: bool,
}

impl UniverseLease {
    /// Locked universe id
    pub fn universe_uuid(&self) -> Uuid {
        self.universe_uuid
    }

    /// Version observed when the lock was taken
    pub fn locked_version(&self) -> u64 {
        self.locked_version
    }

    /// The lock holder record
    pub fn holder(&self) -> &LockHolder {
        &self.holder
    }

    /// Working copy of the universe
    pub fn universe(&self) -> &Universe {
        self.working
            .as_ref()
            .unwrap_or_else(|| unreachable!("lease handed out without a working copy"))
    }

    /// Mutable working copy of the universe
    pub fn universe_mut(&mut self) -> &mut Universe {
        self.working
            .as_mut()
            .unwrap_or_else(|| unreachable!("lease handed out without a working copy"))
    }

    /// Save the working copy with compare-and-swap on the locked version
    ///
    /// Returns the committed version. The lease stays held; release it
    /// afterwards.
    pub async fn commit(&mut self, store: &dyn UniverseStore) -> Result<u64, Error> {
        let version = store.save(self.universe(), self.locked_version).await?;
        if let Some(working) = self.working.as_mut() {
            working.version = version;
        }
        Ok(version)
    }

    /// Release the lock now
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.table
                .release(self.universe_uuid, self.holder.task_id);
        }
    }
}

impl Drop for UniverseLease {
    fn drop(&mut self) {
        self.release_once();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::universe;
    use crate::model::NodeState;
    use crate::store::{InMemoryUniverseStore, MockUniverseStore};

    fn holder() -> LockHolder {
        LockHolder::new(Uuid::new_v4(), OperationType::ResizeNode)
    }

    fn seeded() -> (InMemoryUniverseStore, Universe) {
        let store = InMemoryUniverseStore::new();
        let u = universe(3, NodeState::Live);
        store.insert(u.clone());
        (store, u)
    }

    #[tokio::test]
    async fn second_acquire_sees_already_locked() {
        let (store, u) = seeded();
        let table = LockTable::new();

        let first = holder();
        let lease = table
            .acquire(&store, u.universe_uuid, ExpectedVersion::Any, first.clone())
            .await
            .unwrap();
        assert_eq!(lease.universe_uuid(), u.universe_uuid);
        assert_eq!(lease.locked_version(), 1);
        assert_eq!(lease.holder(), &first);
        assert_eq!(table.holder(u.universe_uuid), Some(first));
        let err = table
            .acquire(&store, u.universe_uuid, ExpectedVersion::Any, holder())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyLocked { .. }));

        lease.release();
        assert!(!table.is_locked(u.universe_uuid));
        assert!(table
            .acquire(&store, u.universe_uuid, ExpectedVersion::Any, holder())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn stale_version_is_rejected_and_unlocked() {
        let (store, u) = seeded();
        let table = LockTable::new();

        let err = table
            .acquire(&store, u.universe_uuid, ExpectedVersion::Exactly(0), holder())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::VersionConflict {
                expected: 0,
                actual: 1,
                ..
            }
        ));
        assert!(!table.is_locked(u.universe_uuid));
        assert_eq!(
            table.stats(),
            LockStats {
                acquired: 1,
                released: 1
            }
        );
    }

    #[tokio::test]
    async fn drop_releases_exactly_once() {
        let (store, u) = seeded();
        let table = LockTable::new();
        {
            let _lease = table
                .acquire(&store, u.universe_uuid, ExpectedVersion::Exactly(1), holder())
                .await
                .unwrap();
            assert!(table.is_locked(u.universe_uuid));
        }
        assert!(!table.is_locked(u.universe_uuid));
        assert_eq!(table.stats().released, 1);
    }

    #[tokio::test]
    async fn load_failure_releases_the_lock() {
        let mut store = MockUniverseStore::new();
        store
            .expect_load()
            .returning(|id| Err(Error::NotFound { universe: id }));
        let table = LockTable::new();
        let id = Uuid::new_v4();

        let err = table
            .acquire(&store, id, ExpectedVersion::Any, holder())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert!(!table.is_locked(id));
    }

    #[tokio::test]
    async fn commit_saves_against_locked_version() {
        let (store, u) = seeded();
        let table = LockTable::new();
        let mut lease = table
            .acquire(&store, u.universe_uuid, ExpectedVersion::Any, holder())
            .await
            .unwrap();

        lease.universe_mut().details.paused = true;
        let version = lease.commit(&store).await.unwrap();
        lease.release();

        assert_eq!(version, 2);
        let stored = store.get(u.universe_uuid).unwrap();
        assert!(stored.details.paused);
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn different_universes_lock_independently() {
        let store = InMemoryUniverseStore::new();
        let a = universe(1, NodeState::Live);
        let b = universe(1, NodeState::Live);
        store.insert(a.clone());
        store.insert(b.clone());
        let table = LockTable::new();

        let _la = table
            .acquire(&store, a.universe_uuid, ExpectedVersion::Any, holder())
            .await
            .unwrap();
        let _lb = table
            .acquire(&store, b.universe_uuid, ExpectedVersion::Any, holder())
            .await
            .unwrap();
        assert!(table.is_locked(a.universe_uuid));
        assert!(table.is_locked(b.universe_uuid));
    }

    #[tokio::test]
    async fn concurrent_acquires_admit_one_holder() {
        let (store, u) = seeded();
        let store = Arc::new(store);
        let table = LockTable::new();

        let attempts = (0..8).map(|_| {
            let table = Arc::clone(&table);
            let store = Arc::clone(&store);
            let id = u.universe_uuid;
            tokio::spawn(async move {
                table
                    .acquire(store.as_ref(), id, ExpectedVersion::Any, holder())
                    .await
            })
        });
        let results = futures::future::join_all(attempts).await;

        let mut leases = Vec::new();
        let mut locked = 0;
        for r in results {
            match r.unwrap() {
                Ok(lease) => leases.push(lease),
                Err(Error::AlreadyLocked { .. }) => locked += 1,
                Err(e) => panic!("unexpected error {e}"),
            }
        }
        assert_eq!(leases.len(), 1);
        assert_eq!(locked, 7);
    }
}
