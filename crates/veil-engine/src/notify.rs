use std::sync::Arc;

use tracing::{debug, instrument, warn};

use veil_core::events::{LiveChannel, ServerEvent};
use veil_core::ids::UserId;
use veil_core::notification::{Notification, NotificationKind};
use veil_core::rooms::user_room_prefixed;
use veil_store::notifications::NotificationRepo;
use veil_store::users::UserRepo;

use crate::error::EngineError;
use crate::push::{PushGateway, PushMessage};

/// Notification fan-out: durable write, then best-effort push, then
/// best-effort live event. Only the durable write can fail the call;
/// the other two steps log and move on so a flaky gateway or a server
/// still starting up never loses the record.
pub struct Notifier {
    notifications: NotificationRepo,
    users: UserRepo,
    push: Option<Arc<dyn PushGateway>>,
    channel: Option<Arc<dyn LiveChannel>>,
}

impl Notifier {
    pub fn new(
        notifications: NotificationRepo,
        users: UserRepo,
        push: Option<Arc<dyn PushGateway>>,
        channel: Option<Arc<dyn LiveChannel>>,
    ) -> Self {
        Self {
            notifications,
            users,
            push,
            channel,
        }
    }

    #[instrument(skip(self, title, body, payload), fields(user_id = %user, kind = %kind))]
    pub async fn notify(
        &self,
        user: &UserId,
        kind: NotificationKind,
        title: &str,
        body: &str,
        payload: &serde_json::Value,
    ) -> Result<Notification, EngineError> {
        // Step 1, the only step allowed to fail the call
        let record = self.notifications.create(user, kind, title, body, payload)?;

        self.push_best_effort(user, title, body, payload).await;
        self.emit_best_effort(user, &record);

        Ok(record)
    }

    async fn push_best_effort(
        &self,
        user: &UserId,
        title: &str,
        body: &str,
        payload: &serde_json::Value,
    ) {
        let Some(gateway) = &self.push else {
            return;
        };

        let token = match self.users.find_by_id(user) {
            Ok(identity) => identity.push_token,
            Err(e) => {
                warn!(user_id = %user, error = %e, "push skipped, identity load failed");
                return;
            }
        };
        let Some(token) = token else {
            debug!(user_id = %user, "push skipped, no registered token");
            return;
        };

        if let Err(e) = gateway
            .send(PushMessage {
                token: &token,
                title,
                body,
                data: payload,
            })
            .await
        {
            warn!(user_id = %user, error = %e, "push delivery failed");
        }
    }

    fn emit_best_effort(&self, user: &UserId, record: &Notification) {
        match &self.channel {
            Some(channel) => channel.emit(
                &user_room_prefixed(user),
                &ServerEvent::Notification {
                    notification: record.clone(),
                },
            ),
            None => debug!(user_id = %user, "live channel not initialized, event skipped"),
        }
    }
}
