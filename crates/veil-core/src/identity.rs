use serde::{Deserialize, Serialize};

use crate::ids::UserId;

/// Identity projection read from the user store.
///
/// This is the minimal field set the messaging subsystem needs; credential
/// material stays in the external identity store and is never selected.
/// The real `username` is only ever surfaced through the disclosure engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: UserId,
    pub username: String,
    pub alias: String,
    pub avatar_glyph: String,
    pub is_online: bool,
    pub last_seen: Option<String>,
    pub push_token: Option<String>,
    pub last_notified_at: Option<String>,
}

impl Identity {
    /// The anonymous face of this identity, safe to show anyone.
    pub fn anon_profile(&self) -> AnonProfile {
        AnonProfile {
            id: self.id.clone(),
            alias: self.alias.clone(),
            avatar_glyph: self.avatar_glyph.clone(),
            is_online: self.is_online,
        }
    }
}

/// Public projection: pseudonym and glyph only, never the real username.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnonProfile {
    pub id: UserId,
    pub alias: String,
    pub avatar_glyph: String,
    pub is_online: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Identity {
        Identity {
            id: UserId::from_raw("user_a"),
            username: "ada.lovelace".into(),
            alias: "MidnightFox".into(),
            avatar_glyph: "🦊".into(),
            is_online: true,
            last_seen: None,
            push_token: Some("tok_123".into()),
            last_notified_at: None,
        }
    }

    #[test]
    fn anon_profile_hides_username() {
        let identity = sample();
        let profile = identity.anon_profile();
        let json = serde_json::to_string(&profile).unwrap();
        assert!(!json.contains("ada.lovelace"));
        assert!(json.contains("MidnightFox"));
    }

    #[test]
    fn identity_serde_roundtrip() {
        let identity = sample();
        let json = serde_json::to_string(&identity).unwrap();
        let parsed: Identity = serde_json::from_str(&json).unwrap();
        assert_eq!(identity, parsed);
    }
}
