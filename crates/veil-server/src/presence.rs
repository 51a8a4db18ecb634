use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{info, instrument, warn};

use veil_auth::SessionCache;
use veil_core::events::{LiveChannel, ServerEvent};
use veil_core::ids::{ConnId, UserId};
use veil_core::rooms::{user_room, user_room_prefixed};
use veil_store::users::UserRepo;

/// Per-user connection sets and the online/offline transitions they
/// drive.
///
/// A user is online iff their connection set is non-empty, so only the
/// first connect and the last disconnect have side effects: flip the
/// persisted flag, invalidate the cached identity, broadcast the
/// presence event. Persistence is best-effort; in-memory presence stays
/// correct even when the store write fails.
pub struct PresenceRegistry {
    sessions: DashMap<UserId, HashSet<ConnId>>,
    users: UserRepo,
    cache: Arc<SessionCache>,
    channel: Arc<dyn LiveChannel>,
}

impl PresenceRegistry {
    pub fn new(users: UserRepo, cache: Arc<SessionCache>, channel: Arc<dyn LiveChannel>) -> Self {
        Self {
            sessions: DashMap::new(),
            users,
            cache,
            channel,
        }
    }

    /// Track a new connection. Every connection joins the user's two
    /// delivery rooms; only the first flips presence. The persisted flip
    /// and the broadcast stay inside the per-user critical section so
    /// racing connects and disconnects write transitions in order.
    #[instrument(skip(self), fields(user_id = %user, conn_id = %conn))]
    pub fn connect(&self, user: &UserId, conn: &ConnId) {
        let mut set = self.sessions.entry(user.clone()).or_default();
        set.insert(conn.clone());

        self.channel.join(conn, user_room(user));
        self.channel.join(conn, user_room_prefixed(user));

        if set.len() == 1 {
            if let Err(e) = self.users.update_online_status(user, true, None) {
                warn!(user_id = %user, error = %e, "online status write failed");
            }
            self.cache.invalidate(user);
            self.channel.broadcast_all(
                &ServerEvent::PresenceOnline {
                    user_id: user.clone(),
                },
                Some(conn),
            );
            info!(user_id = %user, "user online");
        }
    }

    /// Untrack a connection. Only the last one flips presence and stamps
    /// `last_seen`, again inside the per-user critical section.
    #[instrument(skip(self), fields(user_id = %user, conn_id = %conn))]
    pub fn disconnect(&self, user: &UserId, conn: &ConnId) {
        if let Entry::Occupied(mut occupied) = self.sessions.entry(user.clone()) {
            occupied.get_mut().remove(conn);
            if occupied.get().is_empty() {
                let last_seen = Utc::now().to_rfc3339();
                if let Err(e) = self
                    .users
                    .update_online_status(user, false, Some(&last_seen))
                {
                    warn!(user_id = %user, error = %e, "offline status write failed");
                }
                self.cache.invalidate(user);
                self.channel.broadcast_all(
                    &ServerEvent::PresenceOffline {
                        user_id: user.clone(),
                        last_seen,
                    },
                    None,
                );
                info!(user_id = %user, "user offline");
                occupied.remove();
            }
        }
    }

    /// Live presence: non-empty connection set.
    pub fn is_online(&self, user: &UserId) -> bool {
        self.sessions
            .get(user)
            .map(|set| !set.is_empty())
            .unwrap_or(false)
    }

    pub fn connection_count(&self, user: &UserId) -> usize {
        self.sessions.get(user).map(|set| set.len()).unwrap_or(0)
    }
}
