use std::sync::Arc;

use tracing::{instrument, warn};

use veil_core::events::{LiveChannel, ServerEvent};
use veil_core::identity::Identity;
use veil_core::ids::UserId;
use veil_core::notification::NotificationKind;
use veil_core::rooms::{conversation_room, conversation_room_alias, user_room, user_room_prefixed, RoomId};
use veil_core::whisper::Whisper;
use veil_engine::Notifier;

/// How much whisper content a notification body carries.
const PREVIEW_CHARS: usize = 80;

/// All rooms a whisper event fans out to: the canonical conversation
/// room, its legacy alias, and the counterparty's two user rooms.
pub fn delivery_rooms(actor: &UserId, counterparty: &UserId) -> [RoomId; 4] {
    [
        conversation_room(actor, counterparty),
        conversation_room_alias(actor, counterparty),
        user_room(counterparty),
        user_room_prefixed(counterparty),
    ]
}

/// Fans whisper events out to every relevant room and, for new whispers,
/// feeds the notification pipeline. The whisper is durably written
/// before this runs, so a missing live channel only costs the push; the
/// receiver sees the message on next fetch.
pub struct WhisperRouter {
    channel: Option<Arc<dyn LiveChannel>>,
    notifier: Arc<Notifier>,
}

impl WhisperRouter {
    pub fn new(channel: Option<Arc<dyn LiveChannel>>, notifier: Arc<Notifier>) -> Self {
        Self { channel, notifier }
    }

    /// Route a freshly created whisper and notify the receiver.
    #[instrument(skip(self, whisper, sender), fields(whisper_id = %whisper.id))]
    pub async fn deliver_new(&self, whisper: &Whisper, sender: &Identity) {
        let event = ServerEvent::WhisperNew {
            whisper: whisper.clone(),
            sender_alias: sender.alias.clone(),
            sender_glyph: sender.avatar_glyph.clone(),
        };
        self.emit_all(&whisper.sender_id, &whisper.receiver_id, &event);

        // The whisper itself is already durable; a failed notification
        // is logged, not surfaced as a failed send.
        if let Err(e) = self
            .notifier
            .notify(
                &whisper.receiver_id,
                NotificationKind::Message,
                "New whisper",
                &preview(&whisper.content),
                &serde_json::json!({
                    "whisper_id": whisper.id,
                    "sender_alias": sender.alias,
                }),
            )
            .await
        {
            warn!(whisper_id = %whisper.id, error = %e, "whisper notification failed");
        }
    }

    /// Route a read/edit/delete event. These carry no notification.
    pub fn deliver_update(&self, actor: &UserId, counterparty: &UserId, event: &ServerEvent) {
        self.emit_all(actor, counterparty, event);
    }

    fn emit_all(&self, actor: &UserId, counterparty: &UserId, event: &ServerEvent) {
        let Some(channel) = &self.channel else {
            warn!(
                event = event.event_type(),
                "live channel not initialized, delivery skipped"
            );
            return;
        };
        for room in delivery_rooms(actor, counterparty) {
            channel.emit(&room, event);
        }
    }
}

fn preview(content: &str) -> String {
    let mut out: String = content.chars().take(PREVIEW_CHARS).collect();
    if content.chars().count() > PREVIEW_CHARS {
        out.push('…');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;

    use veil_core::ids::{ConnId, WhisperId};
    use veil_store::notifications::NotificationRepo;
    use veil_store::users::UserRepo;
    use veil_store::Database;

    #[derive(Default)]
    struct RecordingChannel {
        emitted: Mutex<Vec<(String, String)>>,
    }

    impl LiveChannel for RecordingChannel {
        fn join(&self, _: &ConnId, _: RoomId) {}
        fn leave(&self, _: &ConnId, _: &RoomId) {}
        fn emit(&self, room: &RoomId, event: &ServerEvent) {
            self.emitted
                .lock()
                .push((room.as_str().to_owned(), event.event_type().to_owned()));
        }
        fn broadcast_all(&self, _: &ServerEvent, _: Option<&ConnId>) {}
    }

    fn seed(db: &Database, id: &str) {
        UserRepo::new(db.clone())
            .insert(&veil_core::identity::Identity {
                id: UserId::from_raw(id),
                username: id.trim_start_matches("user_").to_owned(),
                alias: format!("anon-{id}"),
                avatar_glyph: "👻".into(),
                is_online: false,
                last_seen: None,
                push_token: None,
                last_notified_at: None,
            })
            .unwrap();
    }

    fn setup(
        channel: Option<Arc<dyn LiveChannel>>,
    ) -> (WhisperRouter, NotificationRepo, Identity, Identity) {
        let db = Database::in_memory().unwrap();
        seed(&db, "user_a");
        seed(&db, "user_b");
        let users = UserRepo::new(db.clone());
        let notifications = NotificationRepo::new(db.clone());
        let notifier = Arc::new(Notifier::new(
            notifications.clone(),
            users.clone(),
            None,
            None,
        ));
        let sender = users.find_by_id(&UserId::from_raw("user_a")).unwrap();
        let receiver = users.find_by_id(&UserId::from_raw("user_b")).unwrap();
        (WhisperRouter::new(channel, notifier), notifications, sender, receiver)
    }

    fn whisper(sender: &Identity, receiver: &Identity) -> Whisper {
        Whisper {
            id: WhisperId::new(),
            sender_id: sender.id.clone(),
            receiver_id: receiver.id.clone(),
            content: "hey".into(),
            read: false,
            visibility_level: 0,
            created_at: "2026-08-26T12:00:00Z".into(),
        }
    }

    #[tokio::test]
    async fn new_whisper_fans_out_to_all_four_rooms() {
        let channel = Arc::new(RecordingChannel::default());
        let (router, notifications, sender, receiver) =
            setup(Some(channel.clone() as Arc<dyn LiveChannel>));

        router.deliver_new(&whisper(&sender, &receiver), &sender).await;

        let emitted = channel.emitted.lock();
        let rooms: Vec<&str> = emitted.iter().map(|(room, _)| room.as_str()).collect();
        assert_eq!(
            rooms,
            vec![
                "user_a:user_b",
                "user_a--user_b",
                "user_b",
                "user:user_b",
            ]
        );
        assert!(emitted.iter().all(|(_, t)| t == "whisper_new"));

        // And exactly one notification for the receiver
        assert_eq!(
            notifications
                .list_for_user(&receiver.id, 10)
                .unwrap()
                .len(),
            1
        );
        assert!(notifications.list_for_user(&sender.id, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn updates_emit_without_notifying() {
        let channel = Arc::new(RecordingChannel::default());
        let (router, notifications, sender, receiver) =
            setup(Some(channel.clone() as Arc<dyn LiveChannel>));
        let w = whisper(&sender, &receiver);

        // The receiver read it; the event flows back toward the sender
        router.deliver_update(
            &receiver.id,
            &sender.id,
            &ServerEvent::WhisperRead {
                whisper_id: w.id.clone(),
                reader_id: receiver.id.clone(),
            },
        );

        let emitted = channel.emitted.lock();
        assert_eq!(emitted.len(), 4);
        assert!(emitted.iter().any(|(room, _)| room == "user:user_a"));
        assert!(notifications.list_for_user(&sender.id, 10).unwrap().is_empty());
        assert!(notifications.list_for_user(&receiver.id, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_channel_skips_delivery_but_still_notifies() {
        let (router, notifications, sender, receiver) = setup(None);
        router.deliver_new(&whisper(&sender, &receiver), &sender).await;
        assert_eq!(
            notifications
                .list_for_user(&receiver.id, 10)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn preview_truncates_long_content() {
        let short = preview("hello");
        assert_eq!(short, "hello");

        let long = preview(&"x".repeat(200));
        assert_eq!(long.chars().count(), PREVIEW_CHARS + 1);
        assert!(long.ends_with('…'));
    }
}
