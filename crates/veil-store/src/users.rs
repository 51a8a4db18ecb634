use chrono::Utc;
use tracing::instrument;

use veil_core::identity::Identity;
use veil_core::ids::UserId;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Repository over the local projection of the identity store.
///
/// Reads select the minimal field set the messaging subsystem needs;
/// credential material never lives in this table.
#[derive(Clone)]
pub struct UserRepo {
    db: Database,
}

const IDENTITY_COLUMNS: &str =
    "id, username, alias, avatar_glyph, is_online, last_seen, push_token, last_notified_at";

impl UserRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert an identity projection (seeding and tests; the authoritative
    /// record lives in the external identity store).
    pub fn insert(&self, identity: &Identity) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, alias, avatar_glyph, is_online, last_seen, push_token, last_notified_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    identity.id.as_str(),
                    identity.username,
                    identity.alias,
                    identity.avatar_glyph,
                    identity.is_online as i64,
                    identity.last_seen,
                    identity.push_token,
                    identity.last_notified_at,
                    now,
                ],
            )?;
            Ok(())
        })
    }

    /// Fetch an identity projection by id.
    #[instrument(skip(self), fields(user_id = %id))]
    pub fn find_by_id(&self, id: &UserId) -> Result<Identity, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {IDENTITY_COLUMNS} FROM users WHERE id = ?1"
            ))?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_identity(row),
                None => Err(StoreError::NotFound(format!("user {id}"))),
            }
        })
    }

    /// Flip the online flag; `last_seen` is recorded on the offline edge.
    #[instrument(skip(self), fields(user_id = %id, online))]
    pub fn update_online_status(
        &self,
        id: &UserId,
        online: bool,
        last_seen: Option<&str>,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET is_online = ?1, last_seen = COALESCE(?2, last_seen) WHERE id = ?3",
                rusqlite::params![online as i64, last_seen, id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("user {id}")));
            }
            Ok(())
        })
    }

    /// Record the batch-notification watermark for like digests.
    pub fn update_last_notified_at(&self, id: &UserId, at: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET last_notified_at = ?1 WHERE id = ?2",
                rusqlite::params![at, id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("user {id}")));
            }
            Ok(())
        })
    }

    /// Register or clear a push-channel token.
    pub fn set_push_token(&self, id: &UserId, token: Option<&str>) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET push_token = ?1 WHERE id = ?2",
                rusqlite::params![token, id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("user {id}")));
            }
            Ok(())
        })
    }
}

fn row_to_identity(row: &rusqlite::Row<'_>) -> Result<Identity, StoreError> {
    let id: String = row_helpers::get(row, 0, "users", "id")?;
    let is_online: i64 = row_helpers::get(row, 4, "users", "is_online")?;
    Ok(Identity {
        id: UserId::from_raw(id),
        username: row_helpers::get(row, 1, "users", "username")?,
        alias: row_helpers::get(row, 2, "users", "alias")?,
        avatar_glyph: row_helpers::get(row, 3, "users", "avatar_glyph")?,
        is_online: is_online != 0,
        last_seen: row_helpers::get_opt(row, 5, "users", "last_seen")?,
        push_token: row_helpers::get_opt(row, 6, "users", "push_token")?,
        last_notified_at: row_helpers::get_opt(row, 7, "users", "last_notified_at")?,
    })
}

#[cfg(test)]
pub(crate) fn test_identity(id: &str, username: &str) -> Identity {
    Identity {
        id: UserId::from_raw(id),
        username: username.to_string(),
        alias: format!("anon-{id}"),
        avatar_glyph: "👻".into(),
        is_online: false,
        last_seen: None,
        push_token: None,
        last_notified_at: None,
    }
}
