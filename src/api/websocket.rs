use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use tracing::{debug, error, info};

use crate::api::state::AppState;

/// GET /ws -- pushes every published snapshot as JSON
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut snapshots = state.dashboard.subscribe();

    let send_task = tokio::spawn(async move {
        loop {
            let snapshot = snapshots.borrow_and_update().clone();
            let json = match serde_json::to_string(snapshot.as_ref()) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize snapshot: {}", e);
                    break;
                }
            };

            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
            if snapshots.changed().await.is_err() {
                debug!("Snapshot channel closed");
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        if let Message::Close(_) = msg {
            break;
        }
    }

    send_task.abort();
    info!("Snapshot WebSocket connection closed");
}
