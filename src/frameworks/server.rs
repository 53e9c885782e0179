// Framework bootstrap for the sync server runtime.

use crate::frameworks::config::{self, ServerSettings};
use crate::interface_adapters::net::{
    ConnectionRegistry, change_channel, spawn_broadcaster, ws_handler,
};
use crate::interface_adapters::state::AppState;
use crate::use_cases::GameWorld;

use axum::{Router, routing::get};
use std::net::SocketAddr;
use std::{io::Result, sync::Arc};

fn init_runtime() {
    let _ = dotenvy::dotenv();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = matches!(std::env::var("LOG_FORMAT").as_deref(), Ok("json"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }

    std::panic::set_hook(Box::new(|info| {
        let backtrace = std::backtrace::Backtrace::capture();
        tracing::error!(%info, ?backtrace, "panic");
    }));
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

pub async fn run(listener: tokio::net::TcpListener, settings: ServerSettings) -> Result<()> {
    let address = listener.local_addr()?;
    let state = build_state(&settings)?;

    tracing::info!(
        %address,
        width = settings.world_width,
        height = settings.world_height,
        "listening"
    );

    // Serve app and report errors rather than panicking
    axum::serve(listener, app(state)).await.inspect_err(|e| {
        tracing::error!(error = %e, "server error");
    })
}

pub async fn run_with_config() -> Result<()> {
    init_runtime();

    let settings = ServerSettings::from_env();
    let address = SocketAddr::new(config::bind_host(), config::http_port());

    // Bind TCP listener with error handling
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .inspect_err(|e| {
            tracing::error!(%address, error = %e, "failed to bind");
        })?;

    run(listener, settings).await
}

/// Builds one independent server context and spawns its broadcast loop.
pub fn build_state(settings: &ServerSettings) -> Result<Arc<AppState>> {
    let world = GameWorld::new(settings.world_width, settings.world_height)
        .map(Arc::new)
        .map_err(|e| std::io::Error::other(format!("invalid world settings: {e:?}")))?;
    let registry = Arc::new(ConnectionRegistry::new());

    // Single consumer; it stops once the last notifier clone (held by the state) drops.
    let (notifier, signal_rx) = change_channel(settings.signal_channel_capacity);
    spawn_broadcaster(
        signal_rx,
        world.clone(),
        registry.clone(),
        settings.send_timeout,
    );
    tracing::debug!(
        signal_channel_capacity = settings.signal_channel_capacity,
        outbound_queue_capacity = settings.outbound_queue_capacity,
        send_timeout_ms = settings.send_timeout.as_millis(),
        "broadcast loop started"
    );

    Ok(Arc::new(AppState {
        world,
        registry,
        notifier,
        outbound_queue_capacity: settings.outbound_queue_capacity.max(1),
        send_timeout: settings.send_timeout,
    }))
}
