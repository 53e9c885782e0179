// Shared helpers: start an isolated server per test and drive it with WebSocket clients.
#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use nowhere_server::ServerSettings;
use serde_json::{Value, json};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const WAIT: Duration = Duration::from_secs(5);

// Start a fresh server on an ephemeral port and return its WebSocket URL.
pub async fn spawn_server() -> String {
    // Bind before spawning so connects queue in the backlog instead of racing startup.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral test port");
    let addr = listener.local_addr().expect("get local addr");
    tokio::spawn(async move {
        nowhere_server::run(listener, ServerSettings::default())
            .await
            .expect("server failed");
    });
    format!("ws://{addr}/ws")
}

// Connect with an optional `X-Client-ID` identity.
pub async fn connect(url: &str, client_id: Option<&str>) -> Client {
    let mut request = url.into_client_request().expect("valid ws request");
    if let Some(client_id) = client_id {
        request.headers_mut().insert(
            "x-client-id",
            HeaderValue::from_str(client_id).expect("valid header value"),
        );
    }
    let (ws, _response) = connect_async(request).await.expect("websocket connects");
    ws
}

pub async fn send_raw(ws: &mut Client, text: &str) {
    ws.send(Message::text(text.to_string()))
        .await
        .expect("send succeeds");
}

pub async fn send_move(ws: &mut Client, player_id: &str, direction: &str) {
    let payload = json!({ "player_id": player_id, "direction": direction });
    send_raw(ws, &payload.to_string()).await;
}

// Read game states until one satisfies `done`, then return that `gameState` object.
pub async fn wait_for_state(ws: &mut Client, done: impl Fn(&Value) -> bool) -> Value {
    tokio::time::timeout(WAIT, async {
        loop {
            let msg = ws
                .next()
                .await
                .expect("connection stays open")
                .expect("frame reads cleanly");
            let Message::Text(text) = msg else {
                continue;
            };
            let value: Value = serde_json::from_str(text.as_str()).expect("server sends json");
            let state = value["gameState"].clone();
            assert!(state.is_object(), "unexpected message: {value}");
            if done(&state) {
                return state;
            }
        }
    })
    .await
    .expect("expected game state did not arrive in time")
}

// Read the next frame and return its `gameState` object.
pub async fn next_state(ws: &mut Client) -> Value {
    wait_for_state(ws, |_| true).await
}

// Consume frames until none arrives for `quiet`.
pub async fn drain_until_quiet(ws: &mut Client, quiet: Duration) {
    while let Ok(Some(msg)) = tokio::time::timeout(quiet, ws.next()).await {
        msg.expect("frame reads cleanly");
    }
}

// Fail if any frame arrives within `window`.
pub async fn assert_no_frame(ws: &mut Client, window: Duration) {
    if let Ok(frame) = tokio::time::timeout(window, ws.next()).await {
        panic!("expected no frame, got {frame:?}");
    }
}

pub async fn send_binary(ws: &mut Client, bytes: &[u8]) {
    ws.send(Message::binary(bytes.to_vec()))
        .await
        .expect("send succeeds");
}

// Wait until the server ends the connection.
pub async fn wait_for_close(ws: &mut Client) {
    tokio::time::timeout(WAIT, async {
        while let Some(msg) = ws.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => return,
                Ok(_) => {}
            }
        }
    })
    .await
    .expect("server did not close the connection in time");
}

pub fn player(x: i64, y: i64, alive: bool) -> Value {
    json!({ "x": x, "y": y, "alive": alive })
}
