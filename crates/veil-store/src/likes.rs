use chrono::Utc;

use veil_core::ids::{LikeId, UserId};

use crate::database::Database;
use crate::error::StoreError;

/// One post owner's batch of likes not yet covered by a summary
/// notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LikeRollup {
    pub owner_id: UserId,
    pub new_likes: u64,
}

/// Like events, written by the post feature and read here only as the
/// digest aggregator's input.
#[derive(Clone)]
pub struct LikeRepo {
    db: Database,
}

impl LikeRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn record(&self, post_id: &str, owner: &UserId, liker: &UserId) -> Result<(), StoreError> {
        let id = LikeId::new();
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO likes (id, post_id, owner_id, liker_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id.as_str(), post_id, owner.as_str(), liker.as_str(), now],
            )?;
            Ok(())
        })
    }

    /// Per-owner counts of likes newer than the owner's last-notified
    /// watermark. The comparison is against the timestamp, not against the
    /// existence of any prior summary, so fresh bursts after an old summary
    /// still roll up.
    pub fn pending_rollups(&self) -> Result<Vec<LikeRollup>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT l.owner_id, COUNT(*)
                 FROM likes l
                 JOIN users u ON u.id = l.owner_id
                 WHERE u.last_notified_at IS NULL OR l.created_at > u.last_notified_at
                 GROUP BY l.owner_id
                 ORDER BY l.owner_id",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;

            let mut out = Vec::new();
            for row in rows {
                let (owner, count) = row?;
                out.push(LikeRollup {
                    owner_id: UserId::from_raw(owner),
                    new_likes: count as u64,
                });
            }
            Ok(out)
        })
    }
}
