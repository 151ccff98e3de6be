use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::connection::{Connection, ConnectionId};

/// Live connections of a server, keyed by id.
///
/// Lookups and snapshots take a read lock; admission and removal take a
/// write lock. Callers never hold the lock while doing I/O: send paths clone
/// the `Arc<Connection>` out and release it first.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    inner: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, conn: Arc<Connection>) {
        self.write().insert(conn.id(), conn);
    }

    pub(crate) fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.write().remove(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.read().get(&id).cloned()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.read().contains_key(&id)
    }

    /// All connections registered at the time of the call.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.read().values().cloned().collect()
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // The map holds no invariant a panicking holder could break halfway, so
    // a poisoned lock is still usable.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<ConnectionId, Arc<Connection>>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ConnectionId, Arc<Connection>>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}
