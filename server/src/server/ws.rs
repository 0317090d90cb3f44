//! Live log streaming over WebSocket

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
};
use deploy_api::models::LogFrame;
use tracing::{debug, info, warn};

use crate::logstream::Delivery;
use crate::server::state::ServerState;

/// Upgrade handler for `/ws/logs/{id}`
pub async fn logs_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_logs(socket, state, id))
}

/// Forward the deployment's log lines until the client leaves, a send fails,
/// or the deployment's channel is closed
async fn stream_logs(mut socket: WebSocket, state: Arc<ServerState>, id: String) {
    let mut subscription = state.service.subscribe(&id);
    info!("WebSocket client connected for deployment {}", id);

    loop {
        let frame = tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None => {
                    debug!("WebSocket client of deployment {} closed", id);
                    break;
                }
                Some(Err(e)) => {
                    warn!("WebSocket error for deployment {}: {}", id, e);
                    break;
                }
                Some(Ok(_)) => continue,
            },
            delivery = subscription.next(state.heartbeat) => match delivery {
                Delivery::Message(entry) => LogFrame::Log(entry.to_response()),
                Delivery::Heartbeat => LogFrame::Heartbeat,
                Delivery::Closed => {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            },
        };

        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode log frame for deployment {}: {}", id, e);
                continue;
            }
        };
        if socket.send(Message::Text(text.into())).await.is_err() {
            debug!("WebSocket send to deployment {} listener failed", id);
            break;
        }
    }

    drop(subscription);
    info!("WebSocket client disconnected for deployment {}", id);
}
