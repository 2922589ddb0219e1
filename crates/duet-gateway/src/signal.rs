use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
};
use duet_common::{ControlEnvelope, Identity, ServerMessage};
use futures::{stream::StreamExt, SinkExt};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::presence::{Registration, Signaler};
use crate::{relay, security};

const WS_OUTBOX_CAPACITY: usize = 128;
const WS_MAX_TEXT_BYTES: usize = 64 * 1024;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    if !security::ws_origin_allowed(&state.config, origin) {
        warn!("rejecting control connection from {} with origin {:?}", addr, origin);
        return StatusCode::FORBIDDEN.into_response();
    }

    if let Err(status) = state.limits.try_acquire(addr.ip(), &state.config) {
        warn!("rejecting control connection from {}: {}", addr, status);
        return status.into_response();
    }

    let limits = state.limits.clone();
    ws.max_message_size(WS_MAX_TEXT_BYTES)
        .max_frame_size(WS_MAX_TEXT_BYTES)
        .on_failed_upgrade(move |err| {
            warn!("websocket upgrade from {} failed: {}", addr, err);
            limits.release(addr.ip());
        })
        .on_upgrade(move |socket| handle_socket(socket, state, addr))
        .into_response()
}

async fn handle_socket(stream: WebSocket, state: AppState, addr: SocketAddr) {
    let connection_id = Uuid::new_v4();
    info!("control connection {} opened from {}", connection_id, addr);
    let (mut sender, mut receiver) = stream.split();
    let (tx, mut rx) = mpsc::channel::<Message>(WS_OUTBOX_CAPACITY);

    let (disconnect_tx, mut disconnect_rx) = mpsc::channel::<()>(1);

    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(msg).await.is_err() {
                break;
            }
        }
        let _ = disconnect_tx.try_send(());
    });

    let signaler = Signaler::new(tx);
    state.registry.attach(connection_id, signaler.clone()).await;

    let mut registered: Option<Identity> = None;
    let mut message_window_start = Instant::now();
    let mut message_count: u32 = 0;

    loop {
        tokio::select! {
            _ = disconnect_rx.recv() => {
                break;
            }
            msg = receiver.next() => {
                let Some(msg) = msg else { break; };
                let Ok(msg) = msg else { break; };

                let now = Instant::now();
                if now.duration_since(message_window_start) >= Duration::from_secs(60) {
                    message_window_start = now;
                    message_count = 0;
                }
                message_count = message_count.saturating_add(1);
                if message_count > state.config.ws_max_messages_per_minute {
                    let _ = signaler
                        .send(&ServerMessage::Error {
                            message: "Rate limit exceeded".into(),
                        })
                        .await;
                    break;
                }

                let text = match msg {
                    Message::Text(text) => text,
                    Message::Binary(_) => {
                        let _ = signaler
                            .send(&ServerMessage::Error {
                                message: "Binary messages are not supported".into(),
                            })
                            .await;
                        continue;
                    }
                    Message::Close(_) => break,
                    Message::Ping(_) | Message::Pong(_) => continue,
                };

                let envelope = match ControlEnvelope::parse(&text) {
                    Ok(envelope) => envelope,
                    Err(err) => {
                        warn!("malformed control message from {}: {}", addr, err);
                        let _ = signaler
                            .send(&ServerMessage::Error {
                                message: err.to_string(),
                            })
                            .await;
                        continue;
                    }
                };

                match envelope {
                    ControlEnvelope::Register(identity) => {
                        if !state.register_limiter.allow(&format!("register:{}", addr.ip())) {
                            let _ = signaler
                                .send(&ServerMessage::Error {
                                    message: "Register rate limit exceeded".into(),
                                })
                                .await;
                            break;
                        }

                        match state.registry.register(connection_id, identity.clone()).await {
                            Ok(outcome) => {
                                if outcome == Registration::Added {
                                    registered = Some(identity.clone());
                                }
                                let _ = signaler
                                    .send(&ServerMessage::Registered {
                                        peer_id: identity.transport_id,
                                    })
                                    .await;
                            }
                            Err(err) => {
                                warn!("register from {} rejected: {}", addr, err);
                                let _ = signaler
                                    .send(&ServerMessage::Error {
                                        message: err.to_string(),
                                    })
                                    .await;
                            }
                        }
                    }
                    ControlEnvelope::Relay { kind, target } => {
                        if registered.is_none() {
                            let _ = signaler
                                .send(&ServerMessage::Error {
                                    message: "Register required before signaling".into(),
                                })
                                .await;
                            continue;
                        }
                        relay::relay(&state.registry, kind, &target, text).await;
                    }
                }
            }
        }
    }

    if let Some(identity) = registered {
        info!("client disconnected: {} ({})", identity.username, identity.transport_id);
    }
    state.registry.unregister(connection_id).await;
    state.limits.release(addr.ip());
    info!("control connection {} closed", connection_id);
}
