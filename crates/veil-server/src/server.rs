use std::sync::Arc;
use std::time::Duration;

use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use secrecy::SecretString;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;

use veil_auth::{MemoryCacheStore, SessionCache};
use veil_core::events::LiveChannel;
use veil_core::identity::Identity;
use veil_core::ids::ConnId;
use veil_engine::{
    DisclosureEngine, HttpPushGateway, LikeDigest, Notifier, PushError, PushGateway,
    DIGEST_INTERVAL,
};
use veil_store::likes::LikeRepo;
use veil_store::notifications::NotificationRepo;
use veil_store::recognition::RecognitionRepo;
use veil_store::users::UserRepo;
use veil_store::whispers::WhisperRepo;
use veil_store::Database;

use crate::gateway;
use crate::handlers::HandlerState;
use crate::hub::RoomHub;
use crate::presence::PresenceRegistry;
use crate::router::WhisperRouter;
use crate::rpc::{RpcRequest, RpcResponse};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Server configuration.
pub struct ServerConfig {
    pub port: u16,
    pub max_send_queue: usize,
    pub token_secret: SecretString,
    pub digest_interval: Duration,
    pub push_endpoint: Option<String>,
    pub push_api_key: Option<SecretString>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 9090,
            max_send_queue: 256,
            token_secret: SecretString::from("dev-secret"),
            digest_interval: DIGEST_INTERVAL,
            push_endpoint: None,
            push_api_key: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Push(#[from] PushError),
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub handler_state: Arc<HandlerState>,
    pub hub: Arc<RoomHub>,
    pub sessions: Arc<SessionCache>,
    pub presence: Arc<PresenceRegistry>,
    pub message_tx: mpsc::Sender<(ConnId, Arc<Identity>, String)>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(gateway::ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Wire every component and start serving. Returns a handle that keeps
/// the background tasks alive.
pub async fn start(config: ServerConfig, db: Database) -> Result<ServerHandle, ServerError> {
    let users = UserRepo::new(db.clone());
    let whispers = WhisperRepo::new(db.clone());
    let notifications = NotificationRepo::new(db.clone());

    let hub = Arc::new(RoomHub::new(config.max_send_queue));
    let channel: Arc<dyn LiveChannel> = hub.clone();

    let sessions = Arc::new(SessionCache::new(
        Arc::new(MemoryCacheStore::new()),
        users.clone(),
        &config.token_secret,
    ));
    let presence = Arc::new(PresenceRegistry::new(
        users.clone(),
        Arc::clone(&sessions),
        Arc::clone(&channel),
    ));

    let push: Option<Arc<dyn PushGateway>> = match (&config.push_endpoint, &config.push_api_key) {
        (Some(endpoint), Some(key)) => {
            Some(Arc::new(HttpPushGateway::new(endpoint.clone(), key.clone())?))
        }
        _ => {
            tracing::info!("push gateway not configured, pushes disabled");
            None
        }
    };

    let notifier = Arc::new(Notifier::new(
        notifications.clone(),
        users.clone(),
        push,
        Some(Arc::clone(&channel)),
    ));

    let digest = Arc::new(LikeDigest::new(
        LikeRepo::new(db.clone()),
        users.clone(),
        Arc::clone(&notifier),
    ));
    let digest_handle = digest.start(config.digest_interval);

    let sweep_handle = start_sweep_task(Arc::clone(&hub), Arc::clone(&presence));

    let handler_state = Arc::new(HandlerState {
        users: users.clone(),
        whispers: whispers.clone(),
        notifications,
        disclosure: DisclosureEngine::new(whispers, RecognitionRepo::new(db), users),
        router: WhisperRouter::new(Some(Arc::clone(&channel)), notifier),
        presence: Arc::clone(&presence),
        cache: Arc::clone(&sessions),
        hub: Arc::clone(&hub),
    });

    let (message_tx, message_rx) = mpsc::channel::<(ConnId, Arc<Identity>, String)>(1024);
    let rpc_handle = tokio::spawn(process_rpc_messages(
        message_rx,
        Arc::clone(&handler_state),
        Arc::clone(&hub),
    ));

    let app_state = AppState {
        handler_state,
        hub,
        sessions,
        presence,
        message_tx,
    };

    let router = build_router(app_state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "veil server started");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        _server: server_handle,
        _rpc: rpc_handle,
        _digest: digest_handle,
        _sweep: sweep_handle,
    })
}

/// Handle returned by `start()` — keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
    _rpc: tokio::task::JoinHandle<()>,
    _digest: tokio::task::JoinHandle<()>,
    _sweep: tokio::task::JoinHandle<()>,
}

/// Health check HTTP endpoint.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({"status": "healthy"}))
}

/// Sweep connections that stopped answering pings, running the same
/// disconnect path a clean close takes.
fn start_sweep_task(
    hub: Arc<RoomHub>,
    presence: Arc<PresenceRegistry>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            for (conn_id, user_id) in hub.sweep_dead() {
                presence.disconnect(&user_id, &conn_id);
            }
        }
    })
}

/// Process incoming RPC messages from connected sockets.
async fn process_rpc_messages(
    mut rx: mpsc::Receiver<(ConnId, Arc<Identity>, String)>,
    state: Arc<HandlerState>,
    hub: Arc<RoomHub>,
) {
    while let Some((conn_id, caller, raw_message)) = rx.recv().await {
        let request: RpcRequest = match serde_json::from_str(&raw_message) {
            Ok(req) => req,
            Err(_) => {
                send_response(&hub, &conn_id, &RpcResponse::parse_error());
                continue;
            }
        };

        let params = request.params.unwrap_or(serde_json::json!({}));
        let response = crate::handlers::dispatch(
            &state,
            &caller,
            &conn_id,
            &request.method,
            &params,
            request.id,
        )
        .await;
        send_response(&hub, &conn_id, &response);
    }
}

fn send_response(hub: &RoomHub, conn_id: &ConnId, response: &RpcResponse) {
    if let Ok(json) = serde_json::to_string(response) {
        hub.send_to(conn_id, json);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let db = Database::in_memory().unwrap();
        let config = ServerConfig {
            port: 0, // random port
            ..Default::default()
        };

        let handle = start(config, db).await.unwrap();
        assert!(handle.port > 0);

        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn ws_route_exists() {
        let db = Database::in_memory().unwrap();
        let handle = start(
            ServerConfig {
                port: 0,
                ..Default::default()
            },
            db,
        )
        .await
        .unwrap();

        // A plain GET without the upgrade handshake is rejected by axum,
        // not a 404: the route is mounted.
        let url = format!("http://127.0.0.1:{}/ws", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_ne!(resp.status(), 404);
    }
}
