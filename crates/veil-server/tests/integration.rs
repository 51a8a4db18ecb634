//! End-to-end handshake tests using a real WebSocket client.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use secrecy::SecretString;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use veil_auth::issue_token;
use veil_core::identity::Identity;
use veil_core::ids::UserId;
use veil_server::{start, ServerConfig, ServerHandle};
use veil_store::users::UserRepo;
use veil_store::Database;

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn boot_server(db: Database) -> ServerHandle {
    start(
        ServerConfig {
            port: 0, // random port
            ..Default::default()
        },
        db,
    )
    .await
    .unwrap()
}

async fn next_message(ws: &mut WsStream) -> Message {
    timeout(TIMEOUT, ws.next())
        .await
        .expect("timed out waiting for a frame")
        .expect("socket ended unexpectedly")
        .unwrap()
}

/// Connect and collect the rejection the server must answer with: one
/// `auth_rejected` event, then a close frame.
async fn rejection_reason(url: &str) -> String {
    let (mut ws, _) = connect_async(url).await.unwrap();

    let msg = next_message(&mut ws).await;
    let frame: serde_json::Value = serde_json::from_str(msg.to_text().unwrap()).unwrap();
    assert_eq!(frame["type"], "auth_rejected");

    let close = next_message(&mut ws).await;
    assert!(close.is_close(), "expected a close frame, got {close:?}");

    frame["reason"].as_str().unwrap().to_owned()
}

#[tokio::test]
async fn handshake_without_token_is_rejected() {
    let handle = boot_server(Database::in_memory().unwrap()).await;
    let url = format!("ws://127.0.0.1:{}/ws", handle.port);
    assert_eq!(rejection_reason(&url).await, "missing_token");
}

#[tokio::test]
async fn handshake_with_expired_token_is_rejected() {
    let handle = boot_server(Database::in_memory().unwrap()).await;
    let token = issue_token(
        &SecretString::from("dev-secret"),
        &UserId::from_raw("user_a"),
        -60,
    );
    let url = format!("ws://127.0.0.1:{}/ws?token={token}", handle.port);
    assert_eq!(rejection_reason(&url).await, "expired");
}

#[tokio::test]
async fn handshake_with_garbage_token_is_rejected() {
    let handle = boot_server(Database::in_memory().unwrap()).await;
    let url = format!("ws://127.0.0.1:{}/ws?token=not-a-credential", handle.port);
    assert_eq!(rejection_reason(&url).await, "malformed");
}

#[tokio::test]
async fn handshake_for_unknown_subject_is_rejected() {
    let handle = boot_server(Database::in_memory().unwrap()).await;
    let token = issue_token(
        &SecretString::from("dev-secret"),
        &UserId::from_raw("user_nobody"),
        60,
    );
    let url = format!("ws://127.0.0.1:{}/ws?token={token}", handle.port);
    assert_eq!(rejection_reason(&url).await, "subject_not_found");
}

#[tokio::test]
async fn authenticated_handshake_stays_open() {
    let db = Database::in_memory().unwrap();
    UserRepo::new(db.clone())
        .insert(&Identity {
            id: UserId::from_raw("user_a"),
            username: "ada".into(),
            alias: "MidnightFox".into(),
            avatar_glyph: "🦊".into(),
            is_online: false,
            last_seen: None,
            push_token: None,
            last_notified_at: None,
        })
        .unwrap();
    let handle = boot_server(db).await;

    let token = issue_token(
        &SecretString::from("dev-secret"),
        &UserId::from_raw("user_a"),
        60,
    );
    let url = format!("ws://127.0.0.1:{}/ws?token={token}", handle.port);
    let (mut ws, _) = connect_async(url).await.unwrap();

    ws.send(Message::Text(r#"{"method":"health","id":1}"#.into()))
        .await
        .unwrap();
    let msg = next_message(&mut ws).await;
    let frame: serde_json::Value = serde_json::from_str(msg.to_text().unwrap()).unwrap();
    assert_eq!(frame["success"], true);
    assert_eq!(frame["result"]["status"], "healthy");
}
