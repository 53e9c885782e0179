// Connection registry: the live set of sockets and which player each one controls.

use crate::domain::world::validate_player_id;
use crate::use_cases::GameWorld;

use axum::extract::ws::Utf8Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{RwLock, mpsc, watch};
use tracing::info;

/// Sending half of one connection, as seen by the broadcast loop.
///
/// Cloning is cheap; all clones share the same outbound queue and close flag.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    conn_id: u64,
    outbound: mpsc::Sender<Utf8Bytes>,
    closed: Arc<watch::Sender<bool>>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum DeliveryError {
    // Outbound queue stayed full for the whole timeout.
    Timeout,
    // Writer is gone.
    Closed,
}

impl ConnectionHandle {
    pub fn new(conn_id: u64, outbound: mpsc::Sender<Utf8Bytes>) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            conn_id,
            outbound,
            closed: Arc::new(closed),
        }
    }

    pub fn conn_id(&self) -> u64 {
        self.conn_id
    }

    /// Enqueues one frame for the connection's writer, waiting at most `timeout`.
    pub async fn deliver(&self, frame: Utf8Bytes, timeout: Duration) -> Result<(), DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError::Closed);
        }
        self.outbound
            .send_timeout(frame, timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => DeliveryError::Timeout,
                SendTimeoutError::Closed(_) => DeliveryError::Closed,
            })
    }

    /// Asks the connection's tasks to shut down. Idempotent.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once `close` has been called on any clone of this handle.
    pub fn closed(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.closed.subscribe();
        async move {
            let _ = rx.wait_for(|closed| *closed).await;
        }
    }
}

#[derive(Debug)]
pub enum BindError {
    NotRegistered,
    InvalidPlayerId,
    // The connection already controls a different player.
    AlreadyBound { current: Arc<str> },
}

/// Outcome of binding a connection to a player identity.
#[derive(Debug, Default)]
pub struct Binding {
    // Older connection for the same player, already unregistered and closed.
    pub replaced: Option<ConnectionHandle>,
    // True when the player was spawned or revived.
    pub joined: bool,
}

/// Outcome of releasing a connection.
#[derive(Debug, Default)]
pub struct Release {
    pub removed: bool,
    // Set when this was the player's last connection and it was marked dead.
    pub left: Option<Arc<str>>,
}

#[derive(Debug)]
struct Entry {
    handle: ConnectionHandle,
    client_id: Option<Arc<str>>,
}

#[derive(Debug, Default)]
struct Inner {
    conns: HashMap<u64, Entry>,
    // Player identity -> the one connection currently controlling it.
    owners: HashMap<Arc<str>, u64>,
}

impl Inner {
    fn remove(&mut self, conn_id: u64) -> Option<Entry> {
        let entry = self.conns.remove(&conn_id)?;
        if let Some(client_id) = &entry.client_id
            && self.owners.get(client_id) == Some(&conn_id)
        {
            self.owners.remove(client_id);
        }
        Some(entry)
    }
}

/// Thread-safe registry of live connections.
///
/// All mutation happens behind one lock. Player join/leave decisions are made while
/// that lock is held so a reconnect cannot interleave with the old socket's cleanup.
#[derive(Debug)]
pub struct ConnectionRegistry {
    inner: RwLock<Inner>,
    next_conn_id: AtomicU64,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            next_conn_id: AtomicU64::new(1),
        }
    }

    /// Returns a connection id unique within this registry.
    pub fn allocate_id(&self) -> u64 {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Adds an unbound connection. Re-registering an id replaces the old handle.
    pub async fn register(&self, handle: ConnectionHandle) {
        let mut inner = self.inner.write().await;
        let conn_id = handle.conn_id();
        if let Some(stale) = inner.remove(conn_id) {
            stale.handle.close();
        }
        inner.conns.insert(
            conn_id,
            Entry {
                handle,
                client_id: None,
            },
        );
    }

    /// Removes a connection. Safe to call repeatedly and from several tasks.
    pub async fn unregister(&self, conn_id: u64) -> Option<ConnectionHandle> {
        self.inner
            .write()
            .await
            .remove(conn_id)
            .map(|entry| entry.handle)
    }

    /// Point-in-time copy of the registered connections.
    pub async fn snapshot(&self) -> Vec<ConnectionHandle> {
        self.inner
            .read()
            .await
            .conns
            .values()
            .map(|entry| entry.handle.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.conns.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn owner_of(&self, client_id: &str) -> Option<u64> {
        self.inner.read().await.owners.get(client_id).copied()
    }

    /// Binds a registered connection to `client_id` and spawns or revives the player.
    ///
    /// A previous connection for the same player is unregistered and closed.
    pub async fn bind(
        &self,
        conn_id: u64,
        client_id: Arc<str>,
        world: &GameWorld,
    ) -> Result<Binding, BindError> {
        validate_player_id(&client_id).map_err(|_| BindError::InvalidPlayerId)?;

        let mut inner = self.inner.write().await;
        let entry = inner
            .conns
            .get_mut(&conn_id)
            .ok_or(BindError::NotRegistered)?;
        if let Some(current) = &entry.client_id {
            if *current == client_id {
                return Ok(Binding::default());
            }
            return Err(BindError::AlreadyBound {
                current: current.clone(),
            });
        }
        entry.client_id = Some(client_id.clone());

        let mut replaced = None;
        if let Some(previous) = inner.owners.insert(client_id.clone(), conn_id)
            && previous != conn_id
            && let Some(stale) = inner.conns.remove(&previous)
        {
            info!(
                client_id = %client_id,
                previous_conn_id = previous,
                conn_id,
                "replacing older connection for player"
            );
            stale.handle.close();
            replaced = Some(stale.handle);
        }

        let joined = world
            .join(&client_id)
            .await
            .map_err(|_| BindError::InvalidPlayerId)?;

        Ok(Binding { replaced, joined })
    }

    /// Unregisters `conn_id` and marks `client_id` dead if nothing else controls it.
    ///
    /// `client_id` is passed by the caller because the broadcast loop may already
    /// have removed the entry.
    pub async fn release(
        &self,
        conn_id: u64,
        client_id: Option<&Arc<str>>,
        world: &GameWorld,
    ) -> Release {
        let mut inner = self.inner.write().await;
        let removed = inner.remove(conn_id).is_some();

        let mut left = None;
        if let Some(client_id) = client_id
            && !inner.owners.contains_key(client_id)
            && world.leave(client_id).await
        {
            left = Some(client_id.clone());
        }

        Release { removed, left }
    }
}
