use chrono::Utc;
use tracing::instrument;

use veil_core::ids::{NotificationId, UserId};
use veil_core::notification::{Notification, NotificationKind};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Durable notification records. Created by the fan-out pipeline; read and
/// delete are owner-only.
#[derive(Clone)]
pub struct NotificationRepo {
    db: Database,
}

const NOTIFICATION_COLUMNS: &str = "id, user_id, kind, title, body, payload, read, created_at";

impl NotificationRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert an unread notification.
    #[instrument(skip(self, title, body, payload), fields(user_id = %user, kind = %kind))]
    pub fn create(
        &self,
        user: &UserId,
        kind: NotificationKind,
        title: &str,
        body: &str,
        payload: &serde_json::Value,
    ) -> Result<Notification, StoreError> {
        let id = NotificationId::new();
        let now = Utc::now().to_rfc3339();
        let payload_json = serde_json::to_string(payload)?;

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notifications (id, user_id, kind, title, body, payload, read, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
                rusqlite::params![
                    id.as_str(),
                    user.as_str(),
                    kind.to_string(),
                    title,
                    body,
                    payload_json,
                    now,
                ],
            )?;

            Ok(Notification {
                id,
                user_id: user.clone(),
                kind,
                title: title.to_string(),
                body: body.to_string(),
                payload: payload.clone(),
                read: false,
                created_at: now,
            })
        })
    }

    /// Newest first.
    pub fn list_for_user(
        &self,
        user: &UserId,
        limit: u32,
    ) -> Result<Vec<Notification>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {NOTIFICATION_COLUMNS} FROM notifications
                 WHERE user_id = ?1 ORDER BY created_at DESC LIMIT ?2"
            ))?;
            let mut rows = stmt.query(rusqlite::params![user.as_str(), limit])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_notification(row)?);
            }
            Ok(out)
        })
    }

    pub fn unread_count(&self, user: &UserId) -> Result<u64, StoreError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND read = 0",
                [user.as_str()],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    /// Mark read. Owner-only.
    pub fn mark_read(&self, id: &NotificationId, owner: &UserId) -> Result<(), StoreError> {
        self.owner_guarded(
            id,
            "UPDATE notifications SET read = 1 WHERE id = ?1 AND user_id = ?2",
            owner,
        )
    }

    /// Hard delete. Owner-only.
    pub fn delete(&self, id: &NotificationId, owner: &UserId) -> Result<(), StoreError> {
        self.owner_guarded(
            id,
            "DELETE FROM notifications WHERE id = ?1 AND user_id = ?2",
            owner,
        )
    }

    fn owner_guarded(
        &self,
        id: &NotificationId,
        sql: &str,
        owner: &UserId,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(sql, rusqlite::params![id.as_str(), owner.as_str()])?;
            if changed == 1 {
                return Ok(());
            }
            let exists: bool = conn
                .query_row(
                    "SELECT 1 FROM notifications WHERE id = ?1",
                    [id.as_str()],
                    |_| Ok(true),
                )
                .unwrap_or(false);
            if exists {
                Err(StoreError::Forbidden(
                    "only the owner may mutate a notification".into(),
                ))
            } else {
                Err(StoreError::NotFound(format!("notification {id}")))
            }
        })
    }
}

fn row_to_notification(row: &rusqlite::Row<'_>) -> Result<Notification, StoreError> {
    let id: String = row_helpers::get(row, 0, "notifications", "id")?;
    let user: String = row_helpers::get(row, 1, "notifications", "user_id")?;
    let kind: String = row_helpers::get(row, 2, "notifications", "kind")?;
    let payload_raw: String = row_helpers::get(row, 5, "notifications", "payload")?;
    let read: i64 = row_helpers::get(row, 6, "notifications", "read")?;
    Ok(Notification {
        id: NotificationId::from_raw(id),
        user_id: UserId::from_raw(user),
        kind: row_helpers::parse_enum(&kind, "notifications", "kind")?,
        title: row_helpers::get(row, 3, "notifications", "title")?,
        body: row_helpers::get(row, 4, "notifications", "body")?,
        payload: row_helpers::parse_json(&payload_raw, "notifications", "payload")?,
        read: read != 0,
        created_at: row_helpers::get(row, 7, "notifications", "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::{test_identity, UserRepo};

    fn setup() -> (NotificationRepo, UserId, UserId) {
        let db = Database::in_memory().unwrap();
        let users = UserRepo::new(db.clone());
        users.insert(&test_identity("user_a", "ada")).unwrap();
        users.insert(&test_identity("user_b", "bob")).unwrap();
        (
            NotificationRepo::new(db),
            UserId::from_raw("user_a"),
            UserId::from_raw("user_b"),
        )
    }

    #[test]
    fn create_is_unread_with_payload() {
        let (repo, a, _) = setup();
        let n = repo
            .create(
                &a,
                NotificationKind::Message,
                "New whisper",
                "someone wrote to you",
                &serde_json::json!({"whisper_id": "whsp_1"}),
            )
            .unwrap();
        assert!(!n.read);

        let listed = repo.list_for_user(&a, 10).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].payload["whisper_id"], "whsp_1");
        assert_eq!(repo.unread_count(&a).unwrap(), 1);
    }

    #[test]
    fn mark_read_owner_only() {
        let (repo, a, b) = setup();
        let n = repo
            .create(&a, NotificationKind::General, "t", "b", &serde_json::json!({}))
            .unwrap();

        let err = repo.mark_read(&n.id, &b).unwrap_err();
        assert!(matches!(err, StoreError::Forbidden(_)));

        repo.mark_read(&n.id, &a).unwrap();
        assert_eq!(repo.unread_count(&a).unwrap(), 0);
    }

    #[test]
    fn delete_owner_only() {
        let (repo, a, b) = setup();
        let n = repo
            .create(&a, NotificationKind::General, "t", "b", &serde_json::json!({}))
            .unwrap();

        assert!(matches!(
            repo.delete(&n.id, &b),
            Err(StoreError::Forbidden(_))
        ));
        repo.delete(&n.id, &a).unwrap();
        assert!(repo.list_for_user(&a, 10).unwrap().is_empty());
    }

    #[test]
    fn missing_notification_is_not_found() {
        let (repo, a, _) = setup();
        let err = repo
            .mark_read(&NotificationId::from_raw("notif_nope"), &a)
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn list_newest_first() {
        let (repo, a, _) = setup();
        repo.create(&a, NotificationKind::General, "first", "b", &serde_json::json!({}))
            .unwrap();
        repo.create(&a, NotificationKind::General, "second", "b", &serde_json::json!({}))
            .unwrap();

        let listed = repo.list_for_user(&a, 10).unwrap();
        assert_eq!(listed[0].title, "second");
    }
}
