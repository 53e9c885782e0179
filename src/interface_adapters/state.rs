use crate::interface_adapters::net::{ChangeNotifier, ConnectionRegistry};
use crate::use_cases::GameWorld;
use std::sync::Arc;
use std::time::Duration;

// Per-server context handed to every connection; one instance per `run`.
pub struct AppState {
    // Authoritative world behind the movement lock.
    pub world: Arc<GameWorld>,
    // Live sockets and their player bindings.
    pub registry: Arc<ConnectionRegistry>,
    // Change signals into the single broadcast loop.
    pub notifier: ChangeNotifier,
    pub outbound_queue_capacity: usize,
    // Bound on enqueueing or writing one frame for one connection.
    pub send_timeout: Duration,
}
