//! WebSocket control channel
//!
//! One socket is one session. Outbound messages flow through a dedicated
//! task; worker events are pumped into the same outbound queue so the
//! client sees them in arrival order. Socket close stops any running
//! worker and releases the session.

use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use surge_core::LogEntry;
use surge_engine::{SessionEvent, SessionParameters};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Outbound queue depth per connection.
const OUTBOUND_BUFFER: usize = 256;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let session = Uuid::new_v4();
    info!(session = %session, "Control channel connected");

    let (mut ws_sink, mut ws_stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_BUFFER);

    let outbound = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(e) => {
                    error!(error = %e, "Outbound serialize failed");
                    continue;
                }
            };
            if ws_sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Greeting: the client's first snapshot carries the directory size.
    let relays = state.store.relay_count();
    let _ = out_tx
        .send(ServerMessage::notice(
            relays,
            LogEntry::new("relays_loaded").with("count", relays.to_string()),
        ))
        .await;

    // Worker events for this session feed the same outbound queue.
    let (ev_tx, mut ev_rx) = mpsc::channel::<SessionEvent>(OUTBOUND_BUFFER);
    let pump = {
        let out_tx = out_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = ev_rx.recv().await {
                let msg = match event {
                    SessionEvent::Stats(snapshot) => ServerMessage::from(snapshot),
                    SessionEvent::Ended { .. } => ServerMessage::AttackEnd,
                };
                if out_tx.send(msg).await.is_err() {
                    break;
                }
            }
        })
    };

    while let Some(Ok(msg)) = ws_stream.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(msg) => handle_message(&state, session, &out_tx, &ev_tx, msg).await,
                Err(e) => {
                    warn!(session = %session, error = %e, "Malformed control message");
                    let _ = out_tx
                        .send(ServerMessage::AttackError {
                            message: format!("malformed message: {e}"),
                        })
                        .await;
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    info!(session = %session, "Control channel disconnected");
    state.orchestrator.on_disconnect(session);
    pump.abort();
    outbound.abort();
}

async fn handle_message(
    state: &AppState,
    session: Uuid,
    out_tx: &mpsc::Sender<ServerMessage>,
    ev_tx: &mpsc::Sender<SessionEvent>,
    msg: ClientMessage,
) {
    match msg {
        ClientMessage::StartAttack {
            target,
            attack_method,
            duration,
            packet_delay,
            packet_size,
        } => {
            let params = SessionParameters {
                target,
                driver: attack_method,
                duration: Duration::from_secs(duration),
                packet_delay: Duration::from_millis(packet_delay),
                packet_size,
            };
            match state.orchestrator.start(session, params, ev_tx.clone()) {
                Ok(started) => {
                    let _ = out_tx
                        .send(ServerMessage::notice(
                            started.relays,
                            LogEntry::new("attack_started")
                                .with("relays", started.relays.to_string()),
                        ))
                        .await;
                }
                Err(e) => {
                    if e.is_rejection() {
                        warn!(session = %session, error = %e, "Start rejected");
                    } else {
                        error!(session = %session, error = %e, "Start failed");
                    }
                    let _ = out_tx
                        .send(ServerMessage::AttackError {
                            message: e.to_string(),
                        })
                        .await;
                }
            }
        }
        ClientMessage::StopAttack => {
            state.orchestrator.stop(session);
        }
    }
}
