//! WebSocket upgrade handlers and the per-connection event loop.

use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use huddle_common::id::{prefix, prefixed_ulid};
use serde_json::json;
use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};

use crate::error::ApiError;
use crate::AppState;

use super::connections::{ChannelBinding, GatewayParams};
use super::dispatcher;
use super::events::{
    ClientMessage, EventName, GatewayMessage, HeartbeatPayload, OP_EVENT, OP_HEARTBEAT,
};
use super::session::GatewaySession;

/// Close codes (4000-range for application-level).
const CLOSE_INVALID_PAYLOAD: u16 = 4000;
const CLOSE_UNKNOWN_OPCODE: u16 = 4001;
const CLOSE_SESSION_TIMEOUT: u16 = 4009;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/gateway", get(unscoped_upgrade))
        .route("/gateway/channel", get(channel_upgrade))
}

async fn unscoped_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state, None))
}

/// Channel-scoped connections are admitted before the upgrade; a rejected
/// attempt gets a 401 and touches no state.
async fn channel_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<GatewayParams>,
) -> Result<impl IntoResponse, ApiError> {
    let binding = ChannelBinding::admit(&params).inspect_err(|_| {
        tracing::debug!("rejected channel connection without credentials");
    })?;
    Ok(ws.on_upgrade(move |socket| handle_connection(socket, state, Some(binding))))
}

async fn handle_connection(socket: WebSocket, state: AppState, binding: Option<ChannelBinding>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let session = GatewaySession::new(prefixed_ulid(prefix::CONNECTION), binding);

    // Subscribe before registering so the connection sees its own presence event.
    let mut broadcast_rx = state.broadcast.subscribe();

    let interval_ms = state.config.heartbeat_interval_ms;
    let hello = GatewayMessage::dispatch(
        EventName::HELLO,
        session.next_seq(),
        json!({
            "connectionId": session.connection_id,
            "heartbeatInterval": interval_ms,
        }),
    );
    if send_message(&mut ws_tx, &hello).await.is_err() {
        return;
    }

    dispatcher::on_connect(&state, &session);
    tracing::info!(
        connection_id = %session.connection_id,
        channel_id = session.channel_id().unwrap_or("-"),
        user_id = session.user_id().unwrap_or("-"),
        "gateway connection opened"
    );

    // Heartbeat timeout: 1.5× the advertised interval.
    let heartbeat_deadline = Duration::from_millis(interval_ms * 3 / 2);
    let mut heartbeat_timer = time::interval(heartbeat_deadline);
    heartbeat_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat_timer.tick().await; // First tick fires immediately; skip it.
    let mut got_heartbeat = true;

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let client_msg: ClientMessage = match serde_json::from_str(&text) {
                            Ok(m) => m,
                            Err(_) => {
                                let _ = send_close(&mut ws_tx, CLOSE_INVALID_PAYLOAD, "Invalid JSON").await;
                                break;
                            }
                        };

                        match client_msg.op {
                            OP_HEARTBEAT => {
                                got_heartbeat = true;
                                let payload: HeartbeatPayload = serde_json::from_value(client_msg.d)
                                    .unwrap_or(HeartbeatPayload { seq: 0 });
                                let ack = GatewayMessage::heartbeat_ack(payload.seq);
                                if send_message(&mut ws_tx, &ack).await.is_err() {
                                    break;
                                }
                            }
                            OP_EVENT => {
                                let Some(event) = client_msg.t else {
                                    tracing::debug!(connection_id = %session.connection_id, "event without a name");
                                    continue;
                                };
                                let reply = dispatcher::handle_event(&state, &session, &event, client_msg.d).await;
                                if let (Some(ack), Some(reply)) = (client_msg.ack, reply) {
                                    if send_message(&mut ws_tx, &GatewayMessage::ack(ack, reply)).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            _ => {
                                let _ = send_close(&mut ws_tx, CLOSE_UNKNOWN_OPCODE, "Unknown opcode").await;
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(?e, connection_id = %session.connection_id, "ws read error");
                        break;
                    }
                    Some(Ok(_)) => continue,
                }
            }

            result = broadcast_rx.recv() => {
                match result {
                    Ok(payload) => {
                        if !session.accepts(&payload.audience) {
                            continue;
                        }
                        let msg = GatewayMessage::dispatch(&payload.event_name, session.next_seq(), payload.data.clone());
                        if send_message(&mut ws_tx, &msg).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(
                            connection_id = %session.connection_id,
                            skipped = n,
                            "gateway connection lagged behind broadcast"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            _ = heartbeat_timer.tick() => {
                if !got_heartbeat {
                    tracing::debug!(connection_id = %session.connection_id, "heartbeat timeout, closing connection");
                    let _ = send_close(&mut ws_tx, CLOSE_SESSION_TIMEOUT, "Heartbeat timeout").await;
                    break;
                }
                got_heartbeat = false;
            }
        }
    }

    dispatcher::on_disconnect(&state, &session);
    tracing::info!(connection_id = %session.connection_id, "gateway connection closed");
}

async fn send_message(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    msg: &GatewayMessage,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(msg).map_err(axum::Error::new)?;
    ws_tx.send(Message::Text(json.into())).await
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    code: u16,
    reason: &str,
) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}
