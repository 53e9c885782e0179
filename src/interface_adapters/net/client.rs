use crate::domain::{Direction, MAX_PLAYER_ID_LEN, MovementError};
use crate::interface_adapters::http::ErrorResponse;
use crate::interface_adapters::net::registry::{BindError, ConnectionHandle};
use crate::interface_adapters::protocol::ClientMessage;
use crate::interface_adapters::state::AppState;
use crate::use_cases::StateChanged;

use axum::{
    Error, Json,
    extract::{
        Query, State,
        ws::{
            Message, Utf8Bytes, WebSocket, WebSocketUpgrade,
            rejection::WebSocketUpgradeRejection,
        },
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures::{Sink, SinkExt, StreamExt};
use futures_util::stream::SplitStream;
use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{Instrument, Span, debug, info, info_span, trace, warn};

pub const CLIENT_ID_HEADER: &str = "x-client-id";

const LOG_THROTTLE: Duration = Duration::from_secs(2);

// Categorizes connection lifecycle failures so callers can decide policy.
#[derive(Debug, PartialEq, Eq)]
enum NetError {
    // The broadcast loop is gone.
    SignalClosed,
    // The registry dropped this connection (failed send or replaced by a newer one).
    Evicted,
    // The handshake identity could not be bound to this connection.
    BindRefused,
}

#[derive(Debug, serde::Deserialize)]
pub struct ConnectQuery {
    // Fallback for clients that cannot set custom upgrade headers.
    #[serde(default)]
    client_id: Option<String>,
}

/// Upgrade handler. Identity comes from `X-Client-ID` or `?client_id=`, header first.
pub async fn ws_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConnectQuery>,
    headers: HeaderMap,
) -> Response {
    let client_id = match resolve_client_id(&headers, query.client_id.as_deref()) {
        Ok(client_id) => client_id,
        Err(reason) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: reason.to_string(),
                }),
            )
                .into_response();
        }
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, client_id))
}

fn resolve_client_id(
    headers: &HeaderMap,
    query_id: Option<&str>,
) -> Result<Option<Arc<str>>, &'static str> {
    let raw = match headers.get(CLIENT_ID_HEADER) {
        Some(value) => Some(value.to_str().map_err(|_| "client id must be valid text")?),
        None => query_id,
    };
    let Some(raw) = raw else {
        return Ok(None);
    };

    let client_id = raw.trim();
    if client_id.is_empty() {
        return Err("client id must not be empty");
    }
    if client_id.len() > MAX_PLAYER_ID_LEN {
        return Err("client id too long");
    }
    Ok(Some(Arc::from(client_id)))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, client_id: Option<Arc<str>>) {
    let conn_id = state.registry.allocate_id();
    let span = info_span!("conn", conn_id, client_id = tracing::field::Empty);
    if let Some(client_id) = &client_id {
        span.record("client_id", tracing::field::display(client_id));
    }

    run_connection(socket, state, conn_id, client_id)
        .instrument(span)
        .await;
}

struct ConnCtx {
    conn_id: u64,
    // Player this connection controls; set at handshake or by the first intent.
    client_id: Option<Arc<str>>,

    msgs_in: u64,
    bytes_in: u64,
    moves: u64,
    decode_failures: u32,
    rejected_intents: u32,

    last_decode_log: Instant,
    last_reject_log: Instant,
}

impl ConnCtx {
    fn new(conn_id: u64) -> Self {
        let now = Instant::now();
        let past = now.checked_sub(LOG_THROTTLE).unwrap_or(now);
        Self {
            conn_id,
            client_id: None,
            msgs_in: 0,
            bytes_in: 0,
            moves: 0,
            decode_failures: 0,
            rejected_intents: 0,
            last_decode_log: past,
            last_reject_log: past,
        }
    }
}

#[derive(Debug, Default)]
struct WriterStats {
    msgs_out: u64,
    bytes_out: u64,
}

enum LoopControl {
    Continue,
    Disconnect,
}

fn should_log(last: &mut Instant) -> bool {
    if last.elapsed() >= LOG_THROTTLE {
        *last = Instant::now();
        true
    } else {
        false
    }
}

async fn run_connection(
    socket: WebSocket,
    state: Arc<AppState>,
    conn_id: u64,
    client_id: Option<Arc<str>>,
) {
    let (sink, mut stream) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::channel::<Utf8Bytes>(state.outbound_queue_capacity);
    let handle = ConnectionHandle::new(conn_id, outbound_tx);

    // Register before anything can change so this socket sees every later broadcast.
    state.registry.register(handle.clone()).await;
    let writer = tokio::spawn(
        write_loop(sink, outbound_rx, handle.clone(), state.send_timeout).in_current_span(),
    );

    let mut ctx = ConnCtx::new(conn_id);
    let outcome = match bootstrap_connection(&state, &mut ctx, client_id).await {
        Ok(()) => {
            info!("client connected");
            run_ingress_loop(&state, &mut ctx, &handle, &mut stream).await
        }
        Err(e) => Err(e),
    };
    if let Err(e) = outcome {
        warn!(error = ?e, "client loop exited with error");
    }

    handle.close();
    let writer_stats = writer.await.unwrap_or_default();
    disconnect_cleanup(&state, &ctx, writer_stats).await;
}

async fn bootstrap_connection(
    state: &AppState,
    ctx: &mut ConnCtx,
    client_id: Option<Arc<str>>,
) -> Result<(), NetError> {
    if let Some(client_id) = client_id
        && !bind_player(state, ctx, client_id).await?
    {
        return Err(NetError::BindRefused);
    }

    // Push the current state to the new socket even if nothing changed.
    state
        .notifier
        .notify(StateChanged::Connected {
            conn_id: ctx.conn_id,
        })
        .map_err(|_| NetError::SignalClosed)
}

/// Binds the connection to `client_id`. Returns `Ok(false)` when the identity was refused.
async fn bind_player(
    state: &AppState,
    ctx: &mut ConnCtx,
    client_id: Arc<str>,
) -> Result<bool, NetError> {
    match state
        .registry
        .bind(ctx.conn_id, client_id.clone(), &state.world)
        .await
    {
        Ok(binding) => {
            Span::current().record("client_id", tracing::field::display(&client_id));
            if let Some(replaced) = binding.replaced {
                info!(
                    replaced_conn_id = replaced.conn_id(),
                    "took over player from older connection"
                );
            }
            ctx.client_id = Some(client_id.clone());
            if binding.joined {
                state
                    .notifier
                    .notify(StateChanged::Joined {
                        player_id: client_id,
                    })
                    .map_err(|_| NetError::SignalClosed)?;
            }
            Ok(true)
        }
        Err(BindError::NotRegistered) => Err(NetError::Evicted),
        Err(e) => {
            ctx.rejected_intents += 1;
            if should_log(&mut ctx.last_reject_log) {
                warn!(error = ?e, client_id = %client_id, "cannot bind player to connection");
            }
            Ok(false)
        }
    }
}

async fn run_ingress_loop(
    state: &AppState,
    ctx: &mut ConnCtx,
    handle: &ConnectionHandle,
    stream: &mut SplitStream<WebSocket>,
) -> Result<(), NetError> {
    let closed = handle.closed();
    tokio::pin!(closed);

    loop {
        let control = tokio::select! {
            _ = &mut closed => {
                info!("connection closed by server");
                LoopControl::Disconnect
            }
            incoming = stream.next() => handle_incoming_ws(state, ctx, incoming).await?,
        };

        if let LoopControl::Disconnect = control {
            return Ok(());
        }
    }
}

async fn handle_incoming_ws(
    state: &AppState,
    ctx: &mut ConnCtx,
    incoming: Option<Result<Message, Error>>,
) -> Result<LoopControl, NetError> {
    match incoming {
        Some(Ok(msg)) => match msg {
            Message::Text(text) => {
                ctx.msgs_in += 1;
                ctx.bytes_in += text.len() as u64;
                handle_intent(state, ctx, text.as_str()).await
            }
            Message::Binary(bytes) => {
                ctx.msgs_in += 1;
                ctx.bytes_in += bytes.len() as u64;
                ctx.decode_failures += 1;
                if should_log(&mut ctx.last_decode_log) {
                    warn!(bytes = bytes.len(), "binary messages not supported; ignoring");
                }
                Ok(LoopControl::Continue)
            }
            Message::Ping(_) | Message::Pong(_) => Ok(LoopControl::Continue),
            Message::Close(_) => Ok(LoopControl::Disconnect),
        },
        Some(Err(e)) => {
            warn!(error = %e, "websocket recv error");
            Ok(LoopControl::Disconnect)
        }
        None => {
            info!("websocket closed");
            Ok(LoopControl::Disconnect)
        }
    }
}

async fn handle_intent(
    state: &AppState,
    ctx: &mut ConnCtx,
    text: &str,
) -> Result<LoopControl, NetError> {
    let msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            ctx.decode_failures += 1;
            if should_log(&mut ctx.last_decode_log) {
                warn!(bytes = text.len(), error = %e, "failed to parse client message");
            }
            return Ok(LoopControl::Continue);
        }
    };

    let direction = match msg.direction.parse::<Direction>() {
        Ok(direction) => direction,
        Err(_) => {
            reject(ctx, &msg, "unknown direction");
            return Ok(LoopControl::Continue);
        }
    };

    // Same normalization as the handshake identity.
    let player_id = msg.player_id.trim();
    match ctx.client_id.clone() {
        Some(bound) if *bound == *player_id => {}
        Some(_) => {
            reject(ctx, &msg, "player_id does not match connection");
            return Ok(LoopControl::Continue);
        }
        None => {
            if !bind_player(state, ctx, Arc::from(player_id)).await? {
                return Ok(LoopControl::Continue);
            }
        }
    }

    match state.world.apply_movement(player_id, direction).await {
        Ok(true) => {
            ctx.moves += 1;
            state
                .notifier
                .notify(StateChanged::Moved {
                    player_id: Arc::from(player_id),
                })
                .map_err(|_| NetError::SignalClosed)?;
        }
        Ok(false) => trace!(player_id, ?direction, "intent caused no change"),
        Err(MovementError::InvalidPlayerId) => {
            reject(ctx, &msg, "invalid player_id");
        }
    }
    Ok(LoopControl::Continue)
}

fn reject(ctx: &mut ConnCtx, msg: &ClientMessage, reason: &str) {
    ctx.rejected_intents += 1;
    if should_log(&mut ctx.last_reject_log) {
        warn!(
            player_id = %msg.player_id,
            direction = %msg.direction,
            reason,
            "intent rejected"
        );
    }
}

async fn write_loop<S>(
    mut sink: S,
    mut outbound_rx: mpsc::Receiver<Utf8Bytes>,
    handle: ConnectionHandle,
    send_timeout: Duration,
) -> WriterStats
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    let closed = handle.closed();
    tokio::pin!(closed);
    let mut stats = WriterStats::default();

    loop {
        let frame = tokio::select! {
            _ = &mut closed => break,
            frame = outbound_rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let bytes = frame.len();
        match timeout(send_timeout, sink.send(Message::Text(frame))).await {
            Ok(Ok(())) => {
                stats.msgs_out += 1;
                stats.bytes_out += bytes as u64;
            }
            Ok(Err(e)) => {
                warn!(error = %e, "websocket send failed");
                break;
            }
            Err(_) => {
                warn!(timeout_ms = send_timeout.as_millis(), "websocket send timed out");
                break;
            }
        }
    }

    // A writer failure ends the whole connection.
    handle.close();
    if let Err(e) = timeout(send_timeout, sink.close()).await.unwrap_or(Ok(())) {
        debug!(error = %e, "socket close error");
    }
    stats
}

async fn disconnect_cleanup(state: &AppState, ctx: &ConnCtx, writer: WriterStats) {
    let release = state
        .registry
        .release(ctx.conn_id, ctx.client_id.as_ref(), &state.world)
        .await;
    if let Some(player_id) = release.left
        && let Err(e) = state.notifier.notify(StateChanged::Left { player_id })
    {
        debug!(error = ?e, "broadcast loop gone during disconnect");
    }

    debug!(
        msgs_in = ctx.msgs_in,
        msgs_out = writer.msgs_out,
        bytes_in = ctx.bytes_in,
        bytes_out = writer.bytes_out,
        moves = ctx.moves,
        decode_failures = ctx.decode_failures,
        rejected_intents = ctx.rejected_intents,
        "connection stats"
    );
    info!("client disconnected");
}
