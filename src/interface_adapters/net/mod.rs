// Network adapter modules: connection registry, broadcast fan-out and per-socket ingress.

pub mod broadcast;
pub mod client;
pub mod registry;

pub use broadcast::{ChangeNotifier, change_channel, spawn_broadcaster};
pub use client::ws_handler;
pub use registry::{ConnectionHandle, ConnectionRegistry};
