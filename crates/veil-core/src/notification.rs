use serde::{Deserialize, Serialize};

use crate::ids::{NotificationId, UserId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Message,
    Comment,
    LikeSummary,
    General,
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Message => write!(f, "message"),
            Self::Comment => write!(f, "comment"),
            Self::LikeSummary => write!(f, "like_summary"),
            Self::General => write!(f, "general"),
        }
    }
}

impl std::str::FromStr for NotificationKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "message" => Ok(Self::Message),
            "comment" => Ok(Self::Comment),
            "like_summary" => Ok(Self::LikeSummary),
            "general" => Ok(Self::General),
            other => Err(format!("unknown notification kind: {other}")),
        }
    }
}

/// A durable notification record, unread by default.
/// Created by the fan-out pipeline, mutated only by its owner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub user_id: UserId,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub payload: serde_json::Value,
    pub read: bool,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_display_from_str_roundtrip() {
        for kind in [
            NotificationKind::Message,
            NotificationKind::Comment,
            NotificationKind::LikeSummary,
            NotificationKind::General,
        ] {
            let parsed: NotificationKind = kind.to_string().parse().unwrap();
            assert_eq!(kind, parsed);
        }
    }

    #[test]
    fn unknown_kind_rejected() {
        let parsed: Result<NotificationKind, _> = "poke".parse();
        assert!(parsed.is_err());
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&NotificationKind::LikeSummary).unwrap();
        assert_eq!(json, "\"like_summary\"");
    }
}
