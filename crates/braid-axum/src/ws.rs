//! WebSocket upgrade handler for the multiplexed channel.
//!
//! `GET /api/ws` upgrades to a text-frame WebSocket carrying wire
//! envelopes in both directions. The connection registers with the
//! session registry, receives one telemetry snapshot immediately, then
//! two tasks run until either side goes away:
//!
//! - **Egress** drains the connection's outbound queue and writes each
//!   envelope as a text frame.
//! - **Ingest** reads inbound text frames and hands them to the
//!   registry's dispatcher.
//!
//! Whichever task finishes first aborts the other, and the connection is
//! unregistered, cancelling any generations it still owns.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use braid_core::wire::{encode, Envelope};

use crate::state::AppState;

const OUTBOUND_QUEUE: usize = 256;

/// `GET /api/ws`
pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Envelope>(OUTBOUND_QUEUE);
    let connection = state.registry.register(outbound_tx).await;
    let connection_id = connection.id();
    info!(%connection_id, "websocket session opened");

    // Give the client a snapshot right away so it can render telemetry
    // before the first poller tick.
    match state.probe.sample().await {
        Ok(snapshot) => {
            connection.send(Envelope::System(snapshot)).await;
        }
        Err(e) => warn!(%connection_id, error = %e, "initial snapshot failed"),
    }

    let (mut ws_sender, mut ws_receiver) = socket.split();

    let mut egress = tokio::spawn(async move {
        while let Some(envelope) = outbound_rx.recv().await {
            let frame = match encode(&envelope) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "failed to encode envelope, dropping");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(frame.into())).await.is_err() {
                // Client went away; ingest will notice too.
                break;
            }
        }
    });

    let ingest_state = state.clone();
    let ingest_connection = connection.clone();
    let mut ingest = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    ingest_state
                        .registry
                        .dispatch(&ingest_connection, &text)
                        .await;
                }
                Ok(Message::Close(_)) | Err(_) => break,
                // Binary frames are not part of the protocol.
                Ok(Message::Binary(_)) => {
                    debug!("ignoring binary frame");
                }
                Ok(_) => {}
            }
        }
    });

    // Whichever side finishes first takes the other down with it. This
    // covers both graceful close and abrupt network drops.
    tokio::select! {
        _ = &mut ingest => { egress.abort(); }
        _ = &mut egress => { ingest.abort(); }
    }

    state.registry.unregister(connection_id).await;
    info!(%connection_id, "websocket session closed");
}
