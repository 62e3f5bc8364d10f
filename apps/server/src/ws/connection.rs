use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use remus_shared::api::ws::{ClientEnvelope, ServerEvent};
use remus_shared::ids::{SessionId, UserId};
use tokio::sync::mpsc;

use crate::state::AppState;
use crate::ws::{Outbound, RoomKey};

const PING_INTERVAL: Duration = Duration::from_secs(30);
const MAX_MISSED_PONGS: u8 = 2;

/// Handle one authenticated WebSocket connection after upgrade.
pub async fn handle_connection(socket: WebSocket, state: AppState, user_id: UserId) {
    let (mut ws_sender, ws_receiver) = socket.split();

    // Ban propagation at the door: say why, then hang up.
    match state.store.is_banned(&user_id).await {
        Ok(false) => {}
        Ok(true) => {
            let banned = ServerEvent::AuthBanned { reason: None };
            if let Ok(json) = serde_json::to_string(&banned) {
                let _ = ws_sender.send(Message::Text(json.into())).await;
            }
            let _ = ws_sender
                .send(Message::Close(Some(CloseFrame {
                    code: 4403,
                    reason: "banned".into(),
                })))
                .await;
            return;
        }
        Err(e) => {
            tracing::error!(user_id = %user_id, error = %e, "ban check failed on connect");
            let _ = ws_sender
                .send(Message::Close(Some(CloseFrame {
                    code: 1011,
                    reason: "internal error".into(),
                })))
                .await;
            return;
        }
    }

    let session_id = SessionId::generate();
    let rx = state.ws.register(&session_id, &user_id);

    // Members join their guild room immediately; everyone else can still
    // use request/ack traffic (e.g. to join) before any room membership.
    match state.store.node_guild_id().await {
        Ok(guild_id) => {
            let is_member = state
                .store
                .get_member(&guild_id, &user_id)
                .await
                .ok()
                .flatten()
                .is_some();
            if is_member {
                state.ws.join_room(&session_id, RoomKey::Guild(guild_id));
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "node guild lookup failed on connect");
        }
    }

    tracing::info!(user_id = %user_id, session_id = %session_id, "gateway connected");

    let pong_received = Arc::new(AtomicBool::new(true));
    let mut send_handle = tokio::spawn(send_loop(ws_sender, rx, pong_received.clone()));
    let mut recv_handle = tokio::spawn(recv_loop(
        ws_receiver,
        state.clone(),
        session_id.clone(),
        user_id.clone(),
        pong_received,
    ));

    tokio::select! {
        _ = &mut send_handle => recv_handle.abort(),
        _ = &mut recv_handle => send_handle.abort(),
    }

    cleanup_connection(&state, &session_id, &user_id).await;
}

async fn send_loop(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
    pong_received: Arc<AtomicBool>,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    ping_interval.tick().await; // skip immediate first tick
    let mut missed_pongs: u8 = 0;

    loop {
        tokio::select! {
            frame = rx.recv() => {
                match frame {
                    Some(Outbound::Event(event)) => {
                        match serde_json::to_string(&event) {
                            Ok(json) => {
                                if ws_sender.send(Message::Text(json.into())).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "failed to serialize server event");
                            }
                        }
                    }
                    Some(Outbound::Close) => {
                        let _ = ws_sender.send(Message::Close(Some(CloseFrame {
                            code: 4000,
                            reason: "closed by server".into(),
                        }))).await;
                        break;
                    }
                    None => {
                        let _ = ws_sender.send(Message::Close(Some(CloseFrame {
                            code: 1001,
                            reason: "going away".into(),
                        }))).await;
                        break;
                    }
                }
            }
            _ = ping_interval.tick() => {
                if !pong_received.swap(false, Ordering::SeqCst) {
                    missed_pongs += 1;
                    if missed_pongs >= MAX_MISSED_PONGS {
                        tracing::info!("connection timed out: no pong received");
                        let _ = ws_sender.send(Message::Close(Some(CloseFrame {
                            code: 1001,
                            reason: "ping timeout".into(),
                        }))).await;
                        break;
                    }
                } else {
                    missed_pongs = 0;
                }
                if ws_sender.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Inbound events run to completion one at a time, giving each socket FIFO
/// handler execution.
async fn recv_loop(
    mut ws_receiver: futures::stream::SplitStream<WebSocket>,
    state: AppState,
    session_id: SessionId,
    user_id: UserId,
    pong_received: Arc<AtomicBool>,
) {
    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientEnvelope>(&text) {
                Ok(envelope) => {
                    super::events::handle(&state, &session_id, &user_id, envelope).await;
                }
                Err(e) => {
                    tracing::debug!(user_id = %user_id, error = %e, "invalid client event dropped");
                }
            },
            Ok(Message::Pong(_)) => {
                pong_received.store(true, Ordering::SeqCst);
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Binary(_)) => {
                tracing::debug!(user_id = %user_id, "binary frame dropped");
            }
            Ok(Message::Ping(_)) => {
                // Axum auto-responds with Pong
            }
            Err(e) => {
                tracing::debug!(error = %e, "websocket receive error");
                break;
            }
        }
    }
}

async fn cleanup_connection(state: &AppState, session_id: &SessionId, user_id: &UserId) {
    // Voice first so producerClosed and presence reach rooms while the
    // indices still know the departing peers' rooms.
    state.voice.handle_disconnect(session_id).await;
    state.ws.deregister(session_id);
    tracing::info!(user_id = %user_id, session_id = %session_id, "gateway disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_interval_is_30_seconds() {
        assert_eq!(PING_INTERVAL, Duration::from_secs(30));
    }

    #[test]
    fn max_missed_pongs_is_2() {
        assert_eq!(MAX_MISSED_PONGS, 2);
    }
}
