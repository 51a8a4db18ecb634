use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use veil_core::events::{LiveChannel, ServerEvent};
use veil_core::identity::Identity;
use veil_core::ids::{ConnId, UserId};
use veil_core::rooms::RoomId;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CONN_TIMEOUT: Duration = Duration::from_secs(90);

/// A connected socket. The user binding is fixed at registration; a
/// reconnect gets a fresh conn.
pub struct Conn {
    pub id: ConnId,
    pub user_id: UserId,
    tx: mpsc::Sender<String>,
    connected: AtomicBool,
    last_pong: AtomicU64,
}

impl Conn {
    fn new(id: ConnId, user_id: UserId, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            user_id,
            tx,
            connected: AtomicBool::new(true),
            last_pong: AtomicU64::new(now_secs()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < CONN_TIMEOUT.as_secs()
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Socket registry plus room membership. Rooms are cheap labels: joining
/// creates them, the last leave drops them, and emitting into an empty
/// room is a no-op.
pub struct RoomHub {
    conns: DashMap<ConnId, Arc<Conn>>,
    rooms: DashMap<RoomId, HashSet<ConnId>>,
    max_send_queue: usize,
}

impl RoomHub {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            conns: DashMap::new(),
            rooms: DashMap::new(),
            max_send_queue,
        }
    }

    /// Register a connection for `user` and return its id + outbound
    /// receiver.
    pub fn register(&self, user: &UserId) -> (ConnId, mpsc::Receiver<String>) {
        let id = ConnId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        self.conns
            .insert(id.clone(), Arc::new(Conn::new(id.clone(), user.clone(), tx)));
        (id, rx)
    }

    /// Drop a connection and its room memberships.
    pub fn unregister(&self, id: &ConnId) {
        if let Some((_, conn)) = self.conns.remove(id) {
            conn.connected.store(false, Ordering::Relaxed);
        }
        self.rooms.retain(|_, members| {
            members.remove(id);
            !members.is_empty()
        });
    }

    /// Send to one connection. Backpressure drops the message: the
    /// channel is bounded and a slow reader must not stall the hub.
    pub fn send_to(&self, id: &ConnId, message: String) -> bool {
        let Some(conn) = self.conns.get(id) else {
            return false;
        };
        match conn.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(
                    conn_id = %id,
                    msg_len = msg.len(),
                    "send queue full, dropping message"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn record_pong(&self, id: &ConnId) {
        if let Some(conn) = self.conns.get(id) {
            conn.record_pong();
        }
    }

    pub fn count(&self) -> usize {
        self.conns.len()
    }

    pub fn rooms_count(&self) -> usize {
        self.rooms.len()
    }

    /// Drop connections that stopped answering pings or whose writer task
    /// already ended. Returns the user binding of each so the caller can
    /// run the disconnect path.
    pub fn sweep_dead(&self) -> Vec<(ConnId, UserId)> {
        let dead: Vec<(ConnId, UserId)> = self
            .conns
            .iter()
            .filter(|entry| !entry.value().is_alive() || !entry.value().is_connected())
            .map(|entry| (entry.value().id.clone(), entry.value().user_id.clone()))
            .collect();

        for (id, _) in &dead {
            self.unregister(id);
            tracing::info!(conn_id = %id, "swept dead connection");
        }
        dead
    }

    fn members_of(&self, room: &RoomId) -> Vec<ConnId> {
        self.rooms
            .get(room)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn send_event(&self, id: &ConnId, event: &ServerEvent) {
        match serde_json::to_string(event) {
            Ok(json) => {
                self.send_to(id, json);
            }
            Err(e) => {
                tracing::warn!(error = %e, event = event.event_type(), "event serialize failed")
            }
        }
    }
}

impl LiveChannel for RoomHub {
    fn join(&self, conn: &ConnId, room: RoomId) {
        if !self.conns.contains_key(conn) {
            return;
        }
        self.rooms.entry(room).or_default().insert(conn.clone());
    }

    fn leave(&self, conn: &ConnId, room: &RoomId) {
        if let Some(mut members) = self.rooms.get_mut(room) {
            members.remove(conn);
        }
        self.rooms.remove_if(room, |_, members| members.is_empty());
    }

    fn emit(&self, room: &RoomId, event: &ServerEvent) {
        for id in self.members_of(room) {
            self.send_event(&id, event);
        }
    }

    fn broadcast_all(&self, event: &ServerEvent, except: Option<&ConnId>) {
        let targets: Vec<ConnId> = self
            .conns
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|id| Some(id) != except)
            .collect();
        for id in targets {
            self.send_event(&id, event);
        }
    }
}

/// Drive one socket: writer forwards queued messages and pings on an
/// interval, reader feeds inbound frames to the RPC processor and tracks
/// pongs. Returns when either side ends; the caller owns unregister and
/// the presence disconnect.
pub async fn handle_ws_connection(
    socket: WebSocket,
    conn_id: ConnId,
    mut rx: mpsc::Receiver<String>,
    hub: Arc<RoomHub>,
    on_message: mpsc::Sender<(ConnId, Arc<Identity>, String)>,
    caller: Arc<Identity>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_cid = conn_id.clone();
    let writer_hub = Arc::clone(&hub);
    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        ping_interval.tick().await; // consume first immediate tick

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(conn_id = %writer_cid, "sent ping");
                }
            }
        }

        if let Some(conn) = writer_hub.conns.get(&writer_cid) {
            conn.connected.store(false, Ordering::Relaxed);
        }
    });

    let reader_cid = conn_id.clone();
    let reader_hub = Arc::clone(&hub);
    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    let _ = on_message
                        .send((reader_cid.clone(), Arc::clone(&caller), text.to_string()))
                        .await;
                }
                WsMessage::Pong(_) => reader_hub.record_pong(&reader_cid),
                WsMessage::Close(_) => break,
                WsMessage::Ping(_) => {} // axum answers pongs itself
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }
}
