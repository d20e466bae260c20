//! WebSocket upgrade handler

use std::time::Instant;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::matchmaking::{ConnId, RelayHub};
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::ws::protocol::{ClientMsg, ProtocolError, ServerMsg};

/// Per-connection outbound buffer
const OUTBOX_CAPACITY: usize = 256;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn = Uuid::new_v4();
    info!(conn_id = %conn, "New WebSocket connection");

    let (ws_sink, ws_stream) = socket.split();
    let (outbox, outbox_rx) = mpsc::channel::<ServerMsg>(OUTBOX_CAPACITY);
    state.hub.attach(conn, outbox);

    // Spawn writer task: hub messages -> WebSocket. Ends once the hub drops the sender.
    let writer_handle = tokio::spawn(write_loop(conn, ws_sink, outbox_rx));

    let limiter = ConnectionRateLimiter::new(state.config.relay_rate_limit);
    read_loop(conn, ws_stream, &state.hub, &limiter).await;

    state.hub.disconnect(conn, Instant::now());
    writer_handle.abort();

    info!(conn_id = %conn, "WebSocket connection closed");
}

async fn write_loop(
    conn: ConnId,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut outbox_rx: mpsc::Receiver<ServerMsg>,
) {
    while let Some(msg) = outbox_rx.recv().await {
        if let Err(e) = send_msg(&mut ws_sink, &msg).await {
            debug!(conn_id = %conn, error = %e, "WebSocket send failed");
            break;
        }
    }
    let _ = ws_sink.close().await;
}

/// Reader loop: WebSocket -> hub
async fn read_loop(
    conn: ConnId,
    mut ws_stream: SplitStream<WebSocket>,
    hub: &RelayHub,
    limiter: &ConnectionRateLimiter,
) {
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !limiter.check_message() {
                    warn!(conn_id = %conn, "Rate limited relay message");
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(msg) => dispatch(conn, hub, msg),
                    Err(e) => {
                        warn!(conn_id = %conn, error = %ProtocolError::from(e), "Dropped client message");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(conn_id = %conn, error = %ProtocolError::Binary, "Dropped client message");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                debug!(conn_id = %conn, "Transport keepalive");
            }
            Ok(Message::Close(_)) => {
                info!(conn_id = %conn, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(conn_id = %conn, error = %e, "WebSocket error");
                break;
            }
        }
    }
}

fn dispatch(conn: ConnId, hub: &RelayHub, msg: ClientMsg) {
    match msg {
        ClientMsg::JoinSession {
            session_id,
            username,
            is_reconnecting,
        } => {
            if session_id.is_empty() {
                warn!(conn_id = %conn, "JOIN_SESSION without session id");
                return;
            }
            hub.join(conn, &session_id, &username, is_reconnecting, Instant::now());
        }
        ClientMsg::LeaveQueue => hub.leave_queue(conn),
        ClientMsg::LeaveMatch => hub.leave_match(conn),
        ClientMsg::Relay { payload } => hub.relay(conn, payload),
        ClientMsg::Ping => hub.ping(conn, Instant::now()),
    }
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
