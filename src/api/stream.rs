use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;

use crate::session::SessionController;

use super::server::AppState;

pub async fn stream_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let controller = Arc::clone(&state.controller);
    ws.on_upgrade(move |socket| handle_socket(socket, controller))
}

/// Forwards session events to one client until either side goes away.
async fn handle_socket(socket: WebSocket, controller: Arc<SessionController>) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = controller.subscribe();
    tracing::debug!("stream subscriber attached");

    loop {
        tokio::select! {
            result = events.recv() => match result {
                Ok(event) => {
                    let json = match serde_json::to_string(event.as_ref()) {
                        Ok(json) => json,
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to serialize stream event");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "stream subscriber lagging, events skipped");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    let _ = sender.close().await;
    tracing::debug!("stream subscriber detached");
    controller.release_subscriber(events).await;
}
