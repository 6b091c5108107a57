use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use parley_types::events::ServerEvent;

use crate::presence::{ConnectionId, PresenceRegistry};

/// Result of a targeted push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the user's current connection.
    Delivered,
    /// The user has no live connection. Not an error.
    Offline,
    /// The user is registered but the connection is already gone.
    Dropped,
}

/// Pushes named events to live connections.
pub trait EventChannel: Send + Sync {
    /// Deliver to `user_id`'s current connection, if any. Never queues.
    fn push_to_user(&self, user_id: Uuid, event: ServerEvent) -> Delivery;

    /// Deliver to every open connection.
    fn broadcast_all(&self, event: ServerEvent);
}

/// Owns the outbound half of every open connection and routes events to them.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    presence: Arc<dyn PresenceRegistry>,

    /// conn_id -> outbound queue drained by that connection's send task
    connections: RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<ServerEvent>>>,
}

impl Dispatcher {
    pub fn new(presence: Arc<dyn PresenceRegistry>) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                presence,
                connections: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn presence(&self) -> Arc<dyn PresenceRegistry> {
        self.inner.presence.clone()
    }

    /// Open an outbound queue for a new socket. Returns (conn_id, receiver).
    pub fn open_connection(&self) -> (ConnectionId, mpsc::UnboundedReceiver<ServerEvent>) {
        let conn_id = ConnectionId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(conn_id, tx);
        (conn_id, rx)
    }

    /// Bind `user_id` to `conn_id` and tell everyone who is online.
    pub fn identify(&self, user_id: Uuid, conn_id: ConnectionId) {
        if let Some(previous) = self.inner.presence.register(user_id, conn_id) {
            if previous != conn_id {
                info!("{} replaced connection {} with {}", user_id, previous, conn_id);
            }
        }
        self.broadcast_online_users();
    }

    /// Tear down a socket. Presence is only cleared if `conn_id` is still the
    /// user's current connection.
    pub fn close_connection(&self, conn_id: ConnectionId, user_id: Option<Uuid>) {
        self.inner
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&conn_id);

        if let Some(user_id) = user_id {
            if self.inner.presence.unregister(user_id, conn_id) {
                self.broadcast_online_users();
            } else {
                debug!("{} closed stale connection {}", user_id, conn_id);
            }
        }
    }

    pub fn connection_count(&self) -> usize {
        self.inner
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn broadcast_online_users(&self) {
        let user_ids = self.inner.presence.list_online();
        self.broadcast_all(ServerEvent::OnlineUsers { user_ids });
    }
}

impl EventChannel for Dispatcher {
    fn push_to_user(&self, user_id: Uuid, event: ServerEvent) -> Delivery {
        let Some(conn_id) = self.inner.presence.lookup(user_id) else {
            return Delivery::Offline;
        };

        let connections = self
            .inner
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        match connections.get(&conn_id) {
            Some(tx) if tx.send(event).is_ok() => Delivery::Delivered,
            _ => Delivery::Dropped,
        }
    }

    fn broadcast_all(&self, event: ServerEvent) {
        let connections = self
            .inner
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        for tx in connections.values() {
            let _ = tx.send(event.clone());
        }
    }
}
