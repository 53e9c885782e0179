use std::{env, net::IpAddr, str::FromStr, time::Duration};

// Runtime/server settings read from the environment (after `.env` is loaded).

pub const DEFAULT_PORT: u16 = 5555;
pub const DEFAULT_WORLD_SIZE: i32 = 40;
pub const SIGNAL_CHANNEL_CAPACITY: usize = 64;
pub const OUTBOUND_QUEUE_CAPACITY: usize = 32;
pub const SEND_TIMEOUT: Duration = Duration::from_millis(250);

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

pub fn http_port() -> u16 {
    env_or("NOWHERE_PORT", DEFAULT_PORT)
}

pub fn bind_host() -> IpAddr {
    env_or("NOWHERE_HOST", IpAddr::from([127, 0, 0, 1]))
}

/// Knobs for one server instance.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub world_width: i32,
    pub world_height: i32,
    /// Capacity of the change-signal queue feeding the broadcast loop.
    pub signal_channel_capacity: usize,
    /// Frames buffered per connection before sends start waiting.
    pub outbound_queue_capacity: usize,
    /// Bound on a single enqueue or socket write before the client is dropped.
    pub send_timeout: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            world_width: DEFAULT_WORLD_SIZE,
            world_height: DEFAULT_WORLD_SIZE,
            signal_channel_capacity: SIGNAL_CHANNEL_CAPACITY,
            outbound_queue_capacity: OUTBOUND_QUEUE_CAPACITY,
            send_timeout: SEND_TIMEOUT,
        }
    }
}

impl ServerSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let send_timeout_ms = env_or(
            "SEND_TIMEOUT_MS",
            defaults.send_timeout.as_millis() as u64,
        );
        Self {
            world_width: env_or("WORLD_WIDTH", defaults.world_width),
            world_height: env_or("WORLD_HEIGHT", defaults.world_height),
            signal_channel_capacity: env_or(
                "SIGNAL_CHANNEL_CAPACITY",
                defaults.signal_channel_capacity,
            )
            .max(1),
            outbound_queue_capacity: env_or(
                "OUTBOUND_QUEUE_CAPACITY",
                defaults.outbound_queue_capacity,
            )
            .max(1),
            send_timeout: Duration::from_millis(send_timeout_ms.max(1)),
        }
    }
}
