//! Live connection registry.
//!
//! Connections are grouped by user. Every connection owns a bounded outbound
//! queue; the registry only ever hands messages to that queue and never
//! waits on a socket. A connection whose queue is full is closed as lagging.

use flowey_protocol::{CloseReason, UserId};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Process-unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Returns the raw value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Close request shared between a connection task and the registry.
///
/// The first reason recorded wins.
#[derive(Debug, Default)]
pub struct CloseSignal {
    token: CancellationToken,
    reason: Mutex<Option<CloseReason>>,
}

impl CloseSignal {
    /// Creates a signal that also fires when `parent` is cancelled.
    pub fn child_of(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
            reason: Mutex::new(None),
        }
    }

    /// Requests a close with `reason`.
    pub fn close(&self, reason: CloseReason) {
        {
            let mut slot = self.reason.lock();
            if slot.is_none() {
                *slot = Some(reason);
            }
        }
        self.token.cancel();
    }

    /// Returns the recorded reason, if a close was requested.
    pub fn reason(&self) -> Option<CloseReason> {
        *self.reason.lock()
    }

    /// Returns whether the signal fired, directly or through its parent.
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the signal fires.
    pub async fn closed(&self) {
        self.token.cancelled().await;
    }
}

/// Registry-side handle to one connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbound: mpsc::Sender<Arc<str>>,
    signal: Arc<CloseSignal>,
}

impl ConnectionHandle {
    /// Creates a handle.
    pub fn new(id: ConnectionId, outbound: mpsc::Sender<Arc<str>>, signal: Arc<CloseSignal>) -> Self {
        Self {
            id,
            outbound,
            signal,
        }
    }

    /// Returns the connection ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues `message` without waiting.
    ///
    /// Returns `false` if the message was not queued. A full queue closes
    /// the connection as lagging.
    pub fn deliver(&self, message: &Arc<str>) -> bool {
        match self.outbound.try_send(Arc::clone(message)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(connection = %self.id, "outbound queue full, closing connection");
                self.signal.close(CloseReason::Lagging);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Requests that the connection close.
    pub fn close(&self, reason: CloseReason) {
        self.signal.close(reason);
    }
}

/// All live connections, grouped by user.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<UserId, HashMap<ConnectionId, ConnectionHandle>>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh connection ID.
    pub fn next_connection_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Adds a connection for `user`.
    pub fn register(&self, user: UserId, handle: ConnectionHandle) {
        let id = handle.id();
        let previous = self
            .connections
            .write()
            .entry(user)
            .or_default()
            .insert(id, handle);
        debug_assert!(previous.is_none(), "connection {} registered twice", id);
        debug!(user = %user, connection = %id, "registered connection");
    }

    /// Removes a connection. Returns `false` if it was not registered.
    pub fn unregister(&self, user: UserId, id: ConnectionId) -> bool {
        let mut connections = self.connections.write();
        let Some(entry) = connections.get_mut(&user) else {
            return false;
        };
        let removed = entry.remove(&id).is_some();
        if entry.is_empty() {
            connections.remove(&user);
        }
        if removed {
            debug!(user = %user, connection = %id, "unregistered connection");
        }
        removed
    }

    fn snapshot(&self, user: UserId) -> Vec<ConnectionHandle> {
        self.connections
            .read()
            .get(&user)
            .map(|entry| entry.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Queues `message` on every connection of `user` except `exclude`.
    ///
    /// Returns the number of connections the message was queued on.
    pub fn broadcast(&self, user: UserId, message: &Arc<str>, exclude: Option<ConnectionId>) -> usize {
        self.snapshot(user)
            .iter()
            .filter(|handle| Some(handle.id()) != exclude)
            .filter(|handle| handle.deliver(message))
            .count()
    }

    /// Queues `message` on a single connection.
    pub fn send_to(&self, user: UserId, id: ConnectionId, message: &Arc<str>) -> bool {
        let handle = self
            .connections
            .read()
            .get(&user)
            .and_then(|entry| entry.get(&id))
            .cloned();
        handle.is_some_and(|handle| handle.deliver(message))
    }

    /// Asks every connection to close for shutdown. Returns how many were asked.
    pub fn close_all(&self) -> usize {
        let handles: Vec<ConnectionHandle> = self
            .connections
            .read()
            .values()
            .flat_map(|entry| entry.values().cloned())
            .collect();
        for handle in &handles {
            handle.close(CloseReason::Shutdown);
        }
        handles.len()
    }

    /// Returns the number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.read().values().map(HashMap::len).sum()
    }

    /// Returns the number of users with at least one connection.
    pub fn user_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Returns the connection IDs of `user`.
    pub fn connections_for(&self, user: UserId) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.snapshot(user).iter().map(ConnectionHandle::id).collect();
        ids.sort();
        ids
    }

    /// Returns whether the connection is registered.
    pub fn contains(&self, user: UserId, id: ConnectionId) -> bool {
        self.connections
            .read()
            .get(&user)
            .is_some_and(|entry| entry.contains_key(&id))
    }
}
