use serde::{Deserialize, Serialize};

use crate::ids::{ConnId, UserId, WhisperId};
use crate::notification::Notification;
use crate::rooms::RoomId;
use crate::whisper::Whisper;

/// Events pushed to connected clients over the live channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "whisper_new")]
    WhisperNew {
        whisper: Whisper,
        sender_alias: String,
        sender_glyph: String,
    },

    #[serde(rename = "whisper_read")]
    WhisperRead {
        whisper_id: WhisperId,
        reader_id: UserId,
    },

    #[serde(rename = "whisper_edited")]
    WhisperEdited {
        whisper_id: WhisperId,
        content: String,
    },

    #[serde(rename = "whisper_deleted")]
    WhisperDeleted { whisper_id: WhisperId },

    #[serde(rename = "presence_online")]
    PresenceOnline { user_id: UserId },

    #[serde(rename = "presence_offline")]
    PresenceOffline {
        user_id: UserId,
        last_seen: String,
    },

    #[serde(rename = "notification")]
    Notification { notification: Notification },

    #[serde(rename = "auth_rejected")]
    AuthRejected { reason: String },
}

impl ServerEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::WhisperNew { .. } => "whisper_new",
            Self::WhisperRead { .. } => "whisper_read",
            Self::WhisperEdited { .. } => "whisper_edited",
            Self::WhisperDeleted { .. } => "whisper_deleted",
            Self::PresenceOnline { .. } => "presence_online",
            Self::PresenceOffline { .. } => "presence_offline",
            Self::Notification { .. } => "notification",
            Self::AuthRejected { .. } => "auth_rejected",
        }
    }
}

/// Seam between components that produce live events and the socket layer
/// that owns connections. A single-process hub implements this today; a
/// pub/sub broker would slot in here for multi-node fan-out.
pub trait LiveChannel: Send + Sync {
    /// Join a connection onto a room. Unknown connections no-op.
    fn join(&self, conn: &ConnId, room: RoomId);

    /// Remove a connection from a room.
    fn leave(&self, conn: &ConnId, room: &RoomId);

    /// Emit an event to every connection joined to `room`.
    /// Rooms nobody has joined no-op.
    fn emit(&self, room: &RoomId, event: &ServerEvent);

    /// Emit an event to every connection, optionally excluding one.
    fn broadcast_all(&self, event: &ServerEvent, except: Option<&ConnId>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_tag_with_type() {
        let event = ServerEvent::PresenceOnline {
            user_id: UserId::from_raw("user_a"),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"presence_online\""));
    }

    #[test]
    fn offline_event_carries_last_seen() {
        let event = ServerEvent::PresenceOffline {
            user_id: UserId::from_raw("user_a"),
            last_seen: "2026-08-25T12:00:00Z".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("last_seen"));
        assert_eq!(event.event_type(), "presence_offline");
    }

    #[test]
    fn whisper_new_roundtrip() {
        let event = ServerEvent::WhisperNew {
            whisper: Whisper {
                id: WhisperId::new(),
                sender_id: UserId::from_raw("user_a"),
                receiver_id: UserId::from_raw("user_b"),
                content: "hey".into(),
                read: false,
                visibility_level: 1,
                created_at: "2026-08-25T12:00:00Z".into(),
            },
            sender_alias: "MidnightFox".into(),
            sender_glyph: "🦊".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let parsed: ServerEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.event_type(), "whisper_new");
    }
}
