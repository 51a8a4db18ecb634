use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::UserId;

/// A routing room name. Rooms are cheap labels on the hub; emitting into a
/// room nobody has joined is a no-op.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn from_raw(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical conversation room: participant ids sorted lexicographically and
/// joined with `:`, so both sides compute the identical id regardless of who
/// is sender and who is receiver.
pub fn conversation_room(a: &UserId, b: &UserId) -> RoomId {
    let (lo, hi) = sorted_pair(a, b);
    RoomId(format!("{lo}:{hi}"))
}

/// Legacy conversation room kept for clients that predate the canonical
/// naming. Same sorted pair, `--` separator. Deprecated: the router still
/// emits into it during migration; remove once no client joins it.
pub fn conversation_room_alias(a: &UserId, b: &UserId) -> RoomId {
    let (lo, hi) = sorted_pair(a, b);
    RoomId(format!("{lo}--{hi}"))
}

/// Bare per-user room (legacy delivery path).
pub fn user_room(user: &UserId) -> RoomId {
    RoomId(user.as_str().to_owned())
}

/// Prefixed per-user room (current delivery path).
pub fn user_room_prefixed(user: &UserId) -> RoomId {
    RoomId(format!("user:{user}"))
}

fn sorted_pair<'a>(a: &'a UserId, b: &'a UserId) -> (&'a str, &'a str) {
    if a.as_str() <= b.as_str() {
        (a.as_str(), b.as_str())
    } else {
        (b.as_str(), a.as_str())
    }
}
