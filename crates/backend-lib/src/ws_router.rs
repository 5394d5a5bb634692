// ============================
// classroom-backend-lib/src/ws_router.rs
// ============================
//! WebSocket router and connection handling.
//!
//! One upgrade per physical connection: a fresh connection id, an outbound
//! queue pumped into the socket by its own task, and every parsed frame
//! forwarded to the coordinator. The router also exposes the read-only
//! introspection surface the REST layer consumes for status endpoints.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use classroom_common::{ClientEvent, ConnectionId, Envelope, ServerEvent};
use futures_util::{SinkExt, StreamExt};
use metrics::counter;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::metrics::EVENTS_MALFORMED;
use crate::AppState;

/// Frames queued per connection before the fan-out starts dropping.
const OUTBOUND_QUEUE: usize = 64;

/// Create the router: the websocket endpoint plus introspection routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/live/ws", get(ws_handler))
        .route("/live/rooms", get(list_rooms))
        .route("/live/rooms/{room_id}/participants", get(room_roster))
        .route("/live/rooms/{room_id}/active", get(room_active))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}

/// Handler for WebSocket connections
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>) {
    let connection_id: ConnectionId = Uuid::new_v4();
    let (mut sink, mut stream) = socket.split();

    // Channel for frames addressed to this connection
    let (tx, mut rx) = mpsc::channel::<Envelope>(OUTBOUND_QUEUE);
    state.coordinator.connect(connection_id, tx.clone());

    // Forward queued envelopes to the socket
    let send_task = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let json = match serde_json::to_string(&envelope) {
                Ok(json) => json,
                Err(err) => {
                    warn!(%err, "failed to serialize outbound frame");
                    continue;
                },
            };
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Main loop: parse inbound frames and hand them to the coordinator
    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => state.coordinator.event(connection_id, event),
                Err(err) => {
                    // a corrupt frame must not take down the stream; answer
                    // the sender and move on
                    debug!(%connection_id, %err, "malformed client frame");
                    counter!(EVENTS_MALFORMED).increment(1);
                    let reply = Envelope {
                        sent_at: Utc::now(),
                        event: ServerEvent::MalformedEvent {
                            detail: err.to_string(),
                        },
                    };
                    if tx.try_send(reply).is_err() {
                        break;
                    }
                },
            },
            Message::Close(_) => break,
            _ => {}, // ping/pong/binary are ignored
        }
    }

    // Same-tick cleanup: the coordinator removes the participant from every
    // joined room and notifies the rest
    state.coordinator.disconnect(connection_id);
    send_task.abort();
}

async fn list_rooms(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.registry.active_rooms())
}

async fn room_roster(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    match state.registry.roster(&room_id) {
        Some(roster) => Ok(Json(roster)),
        None => Err(AppError::RoomNotFound(room_id)),
    }
}

async fn room_active(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> Json<bool> {
    Json(state.registry.is_active(&room_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_state(temp_dir: &TempDir) -> Arc<AppState> {
        let settings = Settings {
            data_dir: temp_dir.path().to_path_buf(),
            ..Settings::default()
        };
        Arc::new(AppState::new(settings).unwrap())
    }

    #[tokio::test]
    async fn rooms_listing_starts_empty() {
        let temp_dir = TempDir::new().unwrap();
        let app = create_router(test_state(&temp_dir));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/live/rooms")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let rooms: Vec<String> = serde_json::from_slice(&bytes).unwrap();
        assert!(rooms.is_empty());
    }

    #[tokio::test]
    async fn roster_for_unknown_room_is_404() {
        let temp_dir = TempDir::new().unwrap();
        let app = create_router(test_state(&temp_dir));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/live/rooms/ghost/participants")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn activity_flag_is_false_for_unknown_room() {
        let temp_dir = TempDir::new().unwrap();
        let app = create_router(test_state(&temp_dir));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/live/rooms/ghost/active")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let active: bool = serde_json::from_slice(&bytes).unwrap();
        assert!(!active);
    }
}
