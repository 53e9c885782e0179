// Broadcast loop: turns change signals into one serialized snapshot per pass and
// fans it out to every registered connection.

use crate::interface_adapters::net::registry::{ConnectionHandle, ConnectionRegistry};
use crate::interface_adapters::protocol::encode_snapshot;
use crate::use_cases::{GameWorld, StateChanged};

use axum::extract::ws::Utf8Bytes;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

#[derive(Debug, PartialEq, Eq)]
pub enum NotifyError {
    // The broadcast loop has exited.
    Closed,
}

/// Producer side of the bounded change-signal queue.
///
/// Overload policy: when the queue is full a broadcast is already pending and will
/// snapshot the latest state, so the new signal is dropped (coalesced).
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    tx: mpsc::Sender<StateChanged>,
}

impl ChangeNotifier {
    pub fn notify(&self, change: StateChanged) -> Result<(), NotifyError> {
        match self.tx.try_send(change) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(change)) => {
                trace!(?change, "broadcast already pending; coalescing signal");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(NotifyError::Closed),
        }
    }
}

pub fn change_channel(capacity: usize) -> (ChangeNotifier, mpsc::Receiver<StateChanged>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ChangeNotifier { tx }, rx)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanOutReport {
    pub delivered: usize,
    pub dropped: usize,
}

/// Delivers one frame to every registered connection.
///
/// Sends run concurrently, each bounded by `send_timeout`. A failed connection is
/// unregistered and closed without affecting delivery to the others.
pub async fn fan_out(
    registry: &ConnectionRegistry,
    frame: Utf8Bytes,
    send_timeout: Duration,
) -> FanOutReport {
    let conns = registry.snapshot().await;
    let results = join_all(conns.iter().map(|conn| {
        let frame = frame.clone();
        async move {
            let result = conn.deliver(frame, send_timeout).await;
            (conn, result)
        }
    }))
    .await;

    let mut report = FanOutReport::default();
    for (conn, result) in results {
        match result {
            Ok(()) => report.delivered += 1,
            Err(err) => {
                warn!(conn_id = conn.conn_id(), error = ?err, "send failed; dropping connection");
                drop_connection(registry, conn).await;
                report.dropped += 1;
            }
        }
    }
    report
}

async fn drop_connection(registry: &ConnectionRegistry, conn: &ConnectionHandle) {
    if let Some(removed) = registry.unregister(conn.conn_id()).await {
        removed.close();
    }
    conn.close();
}

/// Single consumer of change signals. Exits when every `ChangeNotifier` is dropped.
pub async fn broadcast_task(
    mut signal_rx: mpsc::Receiver<StateChanged>,
    world: Arc<GameWorld>,
    registry: Arc<ConnectionRegistry>,
    send_timeout: Duration,
) {
    while let Some(trigger) = signal_rx.recv().await {
        // Drain the backlog so a burst of signals costs one pass.
        let mut coalesced = 0usize;
        while signal_rx.try_recv().is_ok() {
            coalesced += 1;
        }

        let snapshot = world.snapshot().await;
        let frame = match encode_snapshot(&snapshot) {
            Ok(txt) => Utf8Bytes::from(txt),
            Err(e) => {
                error!(error = ?e, "failed to serialize world snapshot");
                continue;
            }
        };
        let bytes = frame.len();

        let report = fan_out(&registry, frame, send_timeout).await;
        debug!(
            ?trigger,
            coalesced,
            players = snapshot.players.len(),
            bytes,
            delivered = report.delivered,
            dropped = report.dropped,
            "broadcast pass complete"
        );
    }
    warn!("change signal channel closed; broadcast loop exiting");
}

pub fn spawn_broadcaster(
    signal_rx: mpsc::Receiver<StateChanged>,
    world: Arc<GameWorld>,
    registry: Arc<ConnectionRegistry>,
    send_timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(broadcast_task(signal_rx, world, registry, send_timeout))
}
