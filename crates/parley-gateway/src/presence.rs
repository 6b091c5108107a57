use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

use uuid::Uuid;

/// Identifies one live connection. A fresh id is minted for every socket,
/// so a reconnecting user never reuses an old one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Which user currently owns which live connection.
///
/// One authoritative connection per user; the latest `register` wins.
/// Implementations backed by a shared cache can replace the in-memory one
/// when running more than one process.
pub trait PresenceRegistry: Send + Sync {
    /// Make `conn_id` the user's current connection. Returns the connection it replaced.
    fn register(&self, user_id: Uuid, conn_id: ConnectionId) -> Option<ConnectionId>;

    /// Remove the user's entry only if it still points at `conn_id`.
    /// Returns whether anything was removed.
    fn unregister(&self, user_id: Uuid, conn_id: ConnectionId) -> bool;

    fn lookup(&self, user_id: Uuid) -> Option<ConnectionId>;

    fn list_online(&self) -> Vec<Uuid>;
}

#[derive(Default)]
pub struct InMemoryPresence {
    entries: RwLock<HashMap<Uuid, ConnectionId>>,
}

impl InMemoryPresence {
    pub fn new() -> Self {
        Self::default()
    }
}

// The map is never left half-updated, so a poisoned lock is still usable.
impl PresenceRegistry for InMemoryPresence {
    fn register(&self, user_id: Uuid, conn_id: ConnectionId) -> Option<ConnectionId> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user_id, conn_id)
    }

    fn unregister(&self, user_id: Uuid, conn_id: ConnectionId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.get(&user_id) == Some(&conn_id) {
            entries.remove(&user_id);
            true
        } else {
            false
        }
    }

    fn lookup(&self, user_id: Uuid) -> Option<ConnectionId> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&user_id)
            .copied()
    }

    fn list_online(&self) -> Vec<Uuid> {
        let mut online: Vec<Uuid> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        online.sort();
        online
    }
}
