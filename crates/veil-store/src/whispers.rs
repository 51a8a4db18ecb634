use chrono::Utc;
use tracing::instrument;

use veil_core::ids::{UserId, WhisperId};
use veil_core::whisper::Whisper;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Whisper persistence. Ownership is enforced in SQL: the sender owns
/// edit/delete of content, the receiver owns the read flag, and either
/// side may hard-delete (no tombstones).
#[derive(Clone)]
pub struct WhisperRepo {
    db: Database,
}

const WHISPER_COLUMNS: &str =
    "id, sender_id, receiver_id, content, read, visibility_level, created_at";

impl WhisperRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a whisper. `visibility_level` is fixed here and never updated.
    #[instrument(skip(self, content), fields(sender = %sender, receiver = %receiver))]
    pub fn create(
        &self,
        sender: &UserId,
        receiver: &UserId,
        content: &str,
        visibility_level: u8,
    ) -> Result<Whisper, StoreError> {
        let id = WhisperId::new();
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO whispers (id, sender_id, receiver_id, content, read, visibility_level, created_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6)",
                rusqlite::params![
                    id.as_str(),
                    sender.as_str(),
                    receiver.as_str(),
                    content,
                    i64::from(visibility_level),
                    now,
                ],
            )?;

            Ok(Whisper {
                id,
                sender_id: sender.clone(),
                receiver_id: receiver.clone(),
                content: content.to_string(),
                read: false,
                visibility_level,
                created_at: now,
            })
        })
    }

    pub fn get(&self, id: &WhisperId) -> Result<Whisper, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {WHISPER_COLUMNS} FROM whispers WHERE id = ?1"
            ))?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_whisper(row),
                None => Err(StoreError::NotFound(format!("whisper {id}"))),
            }
        })
    }

    /// Count of messages between a pair, both directions. Drives the
    /// visibility tier at creation time.
    pub fn count_between(&self, a: &UserId, b: &UserId) -> Result<u64, StoreError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM whispers
                 WHERE (sender_id = ?1 AND receiver_id = ?2)
                    OR (sender_id = ?2 AND receiver_id = ?1)",
                rusqlite::params![a.as_str(), b.as_str()],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    /// Conversation history between a pair, oldest first.
    pub fn conversation(
        &self,
        a: &UserId,
        b: &UserId,
        limit: u32,
    ) -> Result<Vec<Whisper>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {WHISPER_COLUMNS} FROM whispers
                 WHERE (sender_id = ?1 AND receiver_id = ?2)
                    OR (sender_id = ?2 AND receiver_id = ?1)
                 ORDER BY created_at ASC LIMIT ?3"
            ))?;
            let rows = stmt.query_map(
                rusqlite::params![a.as_str(), b.as_str(), limit],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )?;

            let mut out = Vec::new();
            for row in rows {
                let (id, sender, receiver, content, read, level, created_at) = row?;
                out.push(Whisper {
                    id: WhisperId::from_raw(id),
                    sender_id: UserId::from_raw(sender),
                    receiver_id: UserId::from_raw(receiver),
                    content,
                    read: read != 0,
                    visibility_level: level as u8,
                    created_at,
                });
            }
            Ok(out)
        })
    }

    /// Set the read flag. Receiver-only.
    pub fn mark_read(&self, id: &WhisperId, reader: &UserId) -> Result<(), StoreError> {
        self.guarded_update(
            id,
            "UPDATE whispers SET read = 1 WHERE id = ?1 AND receiver_id = ?2",
            rusqlite::params![id.as_str(), reader.as_str()],
            "only the receiver may mark a whisper read",
        )
    }

    /// Replace the content. Sender-only.
    pub fn edit(&self, id: &WhisperId, sender: &UserId, content: &str) -> Result<(), StoreError> {
        self.guarded_update(
            id,
            "UPDATE whispers SET content = ?3 WHERE id = ?1 AND sender_id = ?2",
            rusqlite::params![id.as_str(), sender.as_str(), content],
            "only the sender may edit a whisper",
        )
    }

    /// Hard delete. Either participant may delete.
    pub fn delete(&self, id: &WhisperId, actor: &UserId) -> Result<(), StoreError> {
        self.guarded_update(
            id,
            "DELETE FROM whispers WHERE id = ?1 AND (sender_id = ?2 OR receiver_id = ?2)",
            rusqlite::params![id.as_str(), actor.as_str()],
            "only a participant may delete a whisper",
        )
    }

    /// Run an ownership-guarded mutation; zero affected rows means either
    /// the whisper is gone or the actor lacks the right, and the two are
    /// distinguished for the caller.
    fn guarded_update(
        &self,
        id: &WhisperId,
        sql: &str,
        params: impl rusqlite::Params,
        forbidden_msg: &str,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(sql, params)?;
            if changed == 1 {
                return Ok(());
            }
            let exists: bool = conn
                .query_row(
                    "SELECT 1 FROM whispers WHERE id = ?1",
                    [id.as_str()],
                    |_| Ok(true),
                )
                .unwrap_or(false);
            if exists {
                Err(StoreError::Forbidden(forbidden_msg.to_string()))
            } else {
                Err(StoreError::NotFound(format!("whisper {id}")))
            }
        })
    }
}

fn row_to_whisper(row: &rusqlite::Row<'_>) -> Result<Whisper, StoreError> {
    let id: String = row_helpers::get(row, 0, "whispers", "id")?;
    let sender: String = row_helpers::get(row, 1, "whispers", "sender_id")?;
    let receiver: String = row_helpers::get(row, 2, "whispers", "receiver_id")?;
    let read: i64 = row_helpers::get(row, 4, "whispers", "read")?;
    let level: i64 = row_helpers::get(row, 5, "whispers", "visibility_level")?;
    Ok(Whisper {
        id: WhisperId::from_raw(id),
        sender_id: UserId::from_raw(sender),
        receiver_id: UserId::from_raw(receiver),
        content: row_helpers::get(row, 3, "whispers", "content")?,
        read: read != 0,
        visibility_level: level as u8,
        created_at: row_helpers::get(row, 6, "whispers", "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::{test_identity, UserRepo};

    fn setup() -> (WhisperRepo, UserId, UserId) {
        let db = Database::in_memory().unwrap();
        let users = UserRepo::new(db.clone());
        users.insert(&test_identity("user_a", "ada")).unwrap();
        users.insert(&test_identity("user_b", "bob")).unwrap();
        (
            WhisperRepo::new(db),
            UserId::from_raw("user_a"),
            UserId::from_raw("user_b"),
        )
    }

    #[test]
    fn create_and_get() {
        let (repo, a, b) = setup();
        let w = repo.create(&a, &b, "hi", 0).unwrap();
        let got = repo.get(&w.id).unwrap();
        assert_eq!(got, w);
        assert!(!got.read);
    }

    #[test]
    fn count_is_bidirectional() {
        let (repo, a, b) = setup();
        repo.create(&a, &b, "one", 0).unwrap();
        repo.create(&b, &a, "two", 0).unwrap();
        assert_eq!(repo.count_between(&a, &b).unwrap(), 2);
        assert_eq!(repo.count_between(&b, &a).unwrap(), 2);
    }

    #[test]
    fn stored_tier_never_changes() {
        let (repo, a, b) = setup();
        let first = repo.create(&a, &b, "early", 0).unwrap();
        for i in 0..12 {
            repo.create(&a, &b, &format!("m{i}"), 1).unwrap();
        }
        // The early message keeps its original tier regardless of volume
        assert_eq!(repo.get(&first.id).unwrap().visibility_level, 0);
    }

    #[test]
    fn mark_read_is_receiver_only() {
        let (repo, a, b) = setup();
        let w = repo.create(&a, &b, "hi", 0).unwrap();

        let err = repo.mark_read(&w.id, &a).unwrap_err();
        assert!(matches!(err, StoreError::Forbidden(_)));

        repo.mark_read(&w.id, &b).unwrap();
        assert!(repo.get(&w.id).unwrap().read);
    }

    #[test]
    fn edit_is_sender_only() {
        let (repo, a, b) = setup();
        let w = repo.create(&a, &b, "hi", 0).unwrap();

        let err = repo.edit(&w.id, &b, "nope").unwrap_err();
        assert!(matches!(err, StoreError::Forbidden(_)));

        repo.edit(&w.id, &a, "edited").unwrap();
        assert_eq!(repo.get(&w.id).unwrap().content, "edited");
    }

    #[test]
    fn either_participant_deletes_hard() {
        let (repo, a, b) = setup();
        let w1 = repo.create(&a, &b, "one", 0).unwrap();
        let w2 = repo.create(&a, &b, "two", 0).unwrap();

        repo.delete(&w1.id, &b).unwrap();
        repo.delete(&w2.id, &a).unwrap();

        assert!(matches!(repo.get(&w1.id), Err(StoreError::NotFound(_))));
        assert!(matches!(repo.get(&w2.id), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn outsider_cannot_delete() {
        let (repo, a, b) = setup();
        let w = repo.create(&a, &b, "hi", 0).unwrap();
        let err = repo.delete(&w.id, &UserId::from_raw("user_c")).unwrap_err();
        assert!(matches!(err, StoreError::Forbidden(_)));
    }

    #[test]
    fn missing_whisper_is_not_found() {
        let (repo, a, _) = setup();
        let err = repo.mark_read(&WhisperId::from_raw("whsp_nope"), &a).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn conversation_orders_oldest_first() {
        let (repo, a, b) = setup();
        repo.create(&a, &b, "first", 0).unwrap();
        repo.create(&b, &a, "second", 0).unwrap();

        let convo = repo.conversation(&a, &b, 50).unwrap();
        assert_eq!(convo.len(), 2);
        assert_eq!(convo[0].content, "first");
        assert_eq!(convo[1].content, "second");
    }
}
