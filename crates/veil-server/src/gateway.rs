//! Connection gateway: authenticate the socket, then hand it to the hub.
//!
//! The socket is accepted before authentication so a rejected client gets
//! a typed `auth_rejected` event naming the failure, then a close frame,
//! instead of a bare handshake error.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use tracing::info;

use veil_core::errors::AuthError;
use veil_core::events::ServerEvent;
use veil_core::identity::Identity;

use crate::hub;
use crate::server::AppState;

/// WebSocket upgrade handler. The credential arrives as a `token` query
/// parameter or an `Authorization: Bearer` header.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let token = query
        .get("token")
        .cloned()
        .or_else(|| bearer_token(&headers));
    ws.on_upgrade(move |socket| handle_socket(socket, token, state))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(String::from)
}

async fn handle_socket(socket: WebSocket, token: Option<String>, state: AppState) {
    match state.sessions.resolve(token.as_deref()).await {
        Ok(identity) => run_connection(socket, identity, state).await,
        Err(e) => reject(socket, &e).await,
    }
}

async fn reject(mut socket: WebSocket, err: &AuthError) {
    info!(reason = err.reason(), "connection rejected");
    let event = ServerEvent::AuthRejected {
        reason: err.reason().to_string(),
    };
    if let Ok(json) = serde_json::to_string(&event) {
        let _ = socket.send(WsMessage::Text(json.into())).await;
    }
    let _ = socket.send(WsMessage::Close(None)).await;
}

async fn run_connection(socket: WebSocket, identity: Identity, state: AppState) {
    let caller = Arc::new(identity);
    let (conn_id, rx) = state.hub.register(&caller.id);
    state.presence.connect(&caller.id, &conn_id);
    info!(conn_id = %conn_id, user_id = %caller.id, "connection established");

    hub::handle_ws_connection(
        socket,
        conn_id.clone(),
        rx,
        Arc::clone(&state.hub),
        state.message_tx.clone(),
        Arc::clone(&caller),
    )
    .await;

    state.presence.disconnect(&caller.id, &conn_id);
    state.hub.unregister(&conn_id);
    info!(conn_id = %conn_id, user_id = %caller.id, "connection closed");
}
