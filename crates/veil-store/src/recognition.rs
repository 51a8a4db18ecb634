use chrono::Utc;
use tracing::instrument;

use veil_core::ids::UserId;

use crate::database::Database;
use crate::error::StoreError;

/// Recognition edges.
///
/// The forward edge ("guesser has recognized target") gates real-username
/// exposure and is the one removed by revoke. The reverse edge ("guesser
/// once recognized target", stored on the target's side) is a historical
/// record and survives revocation.
#[derive(Clone)]
pub struct RecognitionRepo {
    db: Database,
}

impl RecognitionRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Record a successful guess. The insert is a single conditional
    /// statement so concurrent guesses for the same pair cannot double-add;
    /// an existing edge surfaces as `Conflict`, not a silent success.
    #[instrument(skip(self), fields(guesser = %guesser, target = %target))]
    pub fn add(&self, guesser: &UserId, target: &UserId) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO recognized_edges (guesser_id, target_id, created_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (guesser_id, target_id) DO NOTHING",
                rusqlite::params![guesser.as_str(), target.as_str(), now],
            )?;
            if inserted == 0 {
                return Err(StoreError::Conflict(format!(
                    "{guesser} already recognized {target}"
                )));
            }
            // Historical reverse edge; idempotent because a revoke may have
            // cleared the forward edge while this one stayed behind.
            conn.execute(
                "INSERT INTO recognizer_edges (target_id, guesser_id, created_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (target_id, guesser_id) DO NOTHING",
                rusqlite::params![target.as_str(), guesser.as_str(), now],
            )?;
            Ok(())
        })
    }

    /// Remove the forward edge only; the reverse edge stays behind.
    #[instrument(skip(self), fields(guesser = %guesser, target = %target))]
    pub fn revoke(&self, guesser: &UserId, target: &UserId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM recognized_edges WHERE guesser_id = ?1 AND target_id = ?2",
                rusqlite::params![guesser.as_str(), target.as_str()],
            )?;
            if removed == 0 {
                return Err(StoreError::NotFound(format!(
                    "no recognition of {target} by {guesser}"
                )));
            }
            Ok(())
        })
    }

    /// Whether `viewer` currently has the right to see `target`'s real
    /// username. The sole authorization check for identity exposure.
    pub fn has_recognized(&self, viewer: &UserId, target: &UserId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM recognized_edges WHERE guesser_id = ?1 AND target_id = ?2",
                    rusqlite::params![viewer.as_str(), target.as_str()],
                    |_| Ok(true),
                )
                .unwrap_or(false);
            Ok(found)
        })
    }

    /// Everyone `user` currently recognizes.
    pub fn recognized_ids(&self, user: &UserId) -> Result<Vec<UserId>, StoreError> {
        self.id_list(
            "SELECT target_id FROM recognized_edges WHERE guesser_id = ?1 ORDER BY created_at",
            user,
        )
    }

    /// Everyone who has ever recognized `user` (historical, survives revoke).
    pub fn recognizer_ids(&self, user: &UserId) -> Result<Vec<UserId>, StoreError> {
        self.id_list(
            "SELECT guesser_id FROM recognizer_edges WHERE target_id = ?1 ORDER BY created_at",
            user,
        )
    }

    fn id_list(&self, sql: &str, user: &UserId) -> Result<Vec<UserId>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map([user.as_str()], |row| row.get::<_, String>(0))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(UserId::from_raw(row?));
            }
            Ok(out)
        })
    }
}
