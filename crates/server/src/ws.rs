//! WebSocket transport bridge
//!
//! Each connection gets a session: the reader half forwards control and
//! PCM frames to the turn controller, the writer half drains the egress
//! output. Teardown drops the session's cached artifacts.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::sync::mpsc;

use voiceline_pipeline::{spawn_session, Inbound, SessionParams};

use crate::state::AppState;

/// Handle a websocket upgrade at `/ws`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, addr))
}

async fn handle_socket(socket: WebSocket, state: AppState, addr: SocketAddr) {
    let session_id = match state.sessions.register() {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(error = %e, "rejecting connection");
            return;
        }
    };
    tracing::info!(session_id = %session_id, %addr, "websocket connected");

    let (mut sender, mut receiver) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(256);

    let params = SessionParams {
        session_id: session_id.clone(),
        settings: (*state.settings).clone(),
        caller_info: Some(addr.to_string()),
    };
    let handle = spawn_session(
        params,
        state.providers.clone(),
        state.agents.clone(),
        state.cache.clone(),
        out_tx,
    );

    // Single writer: drains the egress output in emission order.
    let writer = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        // Egress closed (controller ended): say goodbye to the client.
        let _ = sender.send(Message::Close(None)).await;
    });

    while let Some(message) = receiver.next().await {
        let inbound = match message {
            Ok(Message::Text(text)) => Inbound::Control(text),
            Ok(Message::Binary(bytes)) => Inbound::Audio(bytes),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::debug!(error = %e, "websocket read error");
                break;
            }
        };
        if handle.inbound.send(inbound).await.is_err() {
            // Controller ended (fatal error or idle timeout).
            break;
        }
    }

    let _ = handle.inbound.send(Inbound::Closed).await;
    let _ = handle.task.await;
    writer.abort();

    state.cache.drop_session(&session_id);
    state.sessions.remove(&session_id);
    tracing::info!(session_id = %session_id, "websocket closed");
}
