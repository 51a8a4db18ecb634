use serde::{Deserialize, Serialize};

use crate::ids::{UserId, WhisperId};

/// Highest visibility tier a conversation can reach.
pub const MAX_VISIBILITY_TIER: u8 = 3;

/// A private, direction-bound message between two identities.
///
/// `visibility_level` is computed once at creation time from the prior
/// message volume between the pair and is never recalculated; early
/// messages keep their original tier even as the conversation grows.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Whisper {
    pub id: WhisperId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub read: bool,
    pub visibility_level: u8,
    pub created_at: String,
}

/// A whisper annotated for one viewer: partner pseudonym always, real
/// username only when the viewer has recognized the partner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WhisperView {
    #[serde(flatten)]
    pub whisper: Whisper,
    pub partner_alias: String,
    pub partner_glyph: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partner_username: Option<String>,
}

/// Visibility tier for a message given the count of prior messages
/// between the pair (both directions). One tier per ten messages, capped.
pub fn visibility_tier(prior_count: u64) -> u8 {
    let tier = prior_count / 10;
    tier.min(u64::from(MAX_VISIBILITY_TIER)) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_zero_for_young_conversations() {
        assert_eq!(visibility_tier(0), 0);
        assert_eq!(visibility_tier(9), 0);
    }

    #[test]
    fn tier_steps_every_ten_messages() {
        assert_eq!(visibility_tier(10), 1);
        assert_eq!(visibility_tier(19), 1);
        assert_eq!(visibility_tier(20), 2);
        assert_eq!(visibility_tier(29), 2);
        assert_eq!(visibility_tier(30), 3);
    }

    #[test]
    fn tier_caps_at_three() {
        assert_eq!(visibility_tier(40), 3);
        assert_eq!(visibility_tier(10_000), 3);
    }

    #[test]
    fn tier_is_monotonic() {
        let mut last = 0;
        for n in 0..100 {
            let t = visibility_tier(n);
            assert!(t >= last, "tier dropped at count {n}");
            last = t;
        }
    }

    #[test]
    fn view_omits_username_when_unrecognized() {
        let view = WhisperView {
            whisper: Whisper {
                id: WhisperId::new(),
                sender_id: UserId::from_raw("user_a"),
                receiver_id: UserId::from_raw("user_b"),
                content: "hi".into(),
                read: false,
                visibility_level: 0,
                created_at: "2026-08-25T00:00:00Z".into(),
            },
            partner_alias: "MidnightFox".into(),
            partner_glyph: "🦊".into(),
            partner_username: None,
        };
        let json = serde_json::to_string(&view).unwrap();
        assert!(!json.contains("partner_username"));
        assert!(json.contains("\"content\":\"hi\""));
    }
}
