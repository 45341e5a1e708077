//! WebSocket handler for the live event feed

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, stream::StreamExt};
use tracing::{debug, info, warn};

use crate::api::state::ApiState;

/// WebSocket upgrade handler
///
/// GET /api/stream
///
/// Each text frame is one `{"event": ..., "data": ...}` object, starting with `init`.
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<ApiState>) -> Response {
    ws.on_upgrade(|socket| handle_websocket(socket, state))
}

async fn handle_websocket(socket: WebSocket, state: ApiState) {
    info!("WebSocket client connected");

    let (mut sender, mut receiver) = socket.split();
    let mut subscription = state.engine.subscribe().await;

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = subscription.next().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!("failed to encode {} event: {e}", event.event_name());
                    continue;
                }
            };

            if sender.send(Message::Text(text)).await.is_err() {
                debug!("WebSocket send failed, client disconnected");
                break;
            }
        }
    });

    // observers only listen; drain until the client goes away
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => {
            recv_task.abort();
        }
        _ = (&mut recv_task) => {
            send_task.abort();
        }
    }

    info!("WebSocket client disconnected");
}
