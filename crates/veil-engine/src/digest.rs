use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, instrument, warn};

use veil_core::ids::UserId;
use veil_core::notification::NotificationKind;
use veil_store::likes::{LikeRepo, LikeRollup};
use veil_store::users::UserRepo;

use crate::error::EngineError;
use crate::notify::Notifier;

/// How often the like digest runs.
pub const DIGEST_INTERVAL: Duration = Duration::from_secs(2 * 60 * 60);

/// Counters from one digest pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DigestStats {
    pub owners_notified: usize,
    pub failures: usize,
}

/// Periodic like-summary aggregator.
///
/// Each pass rolls up likes newer than every owner's last-notified
/// watermark into one summary notification, then advances that owner's
/// watermark. Owners are processed independently: a failure for one is
/// counted and logged, and the rest of the batch continues with their
/// watermarks untouched by the failed one.
pub struct LikeDigest {
    likes: LikeRepo,
    users: UserRepo,
    notifier: Arc<Notifier>,
}

impl LikeDigest {
    pub fn new(likes: LikeRepo, users: UserRepo, notifier: Arc<Notifier>) -> Self {
        Self {
            likes,
            users,
            notifier,
        }
    }

    /// One digest pass over all owners with pending likes.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Result<DigestStats, EngineError> {
        let rollups = self.likes.pending_rollups()?;
        let mut stats = DigestStats::default();

        for rollup in rollups {
            match self.notify_owner(&rollup).await {
                Ok(()) => stats.owners_notified += 1,
                Err(e) => {
                    warn!(owner_id = %rollup.owner_id, error = %e, "like digest failed for owner");
                    stats.failures += 1;
                }
            }
        }

        if stats.owners_notified > 0 || stats.failures > 0 {
            info!(
                owners_notified = stats.owners_notified,
                failures = stats.failures,
                "like digest pass complete"
            );
        }
        Ok(stats)
    }

    async fn notify_owner(&self, rollup: &LikeRollup) -> Result<(), EngineError> {
        let body = if rollup.new_likes == 1 {
            "You received 1 new like".to_owned()
        } else {
            format!("You received {} new likes", rollup.new_likes)
        };
        self.notifier
            .notify(
                &rollup.owner_id,
                NotificationKind::LikeSummary,
                "New likes",
                &body,
                &serde_json::json!({ "count": rollup.new_likes }),
            )
            .await?;

        // Watermark moves only after the summary landed; a failed owner
        // stays pending for the next pass.
        self.advance_watermark(&rollup.owner_id)
    }

    fn advance_watermark(&self, owner: &UserId) -> Result<(), EngineError> {
        self.users
            .update_last_notified_at(owner, &Utc::now().to_rfc3339())?;
        Ok(())
    }

    /// Run the digest on a fixed interval until the task is aborted.
    /// The loop awaits each pass before sleeping again, so passes never
    /// overlap.
    pub fn start(self: Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(period);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                timer.tick().await;
                if let Err(e) = self.run_once().await {
                    warn!(error = %e, "like digest pass aborted");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use veil_core::identity::Identity;
    use veil_store::notifications::NotificationRepo;
    use veil_store::Database;

    fn seed_user(users: &UserRepo, id: &str) {
        users
            .insert(&Identity {
                id: UserId::from_raw(id),
                username: id.trim_start_matches("user_").to_owned(),
                alias: format!("anon-{id}"),
                avatar_glyph: "👻".into(),
                is_online: false,
                last_seen: None,
                push_token: None,
                last_notified_at: None,
            })
            .unwrap();
    }

    fn setup() -> (LikeDigest, LikeRepo, NotificationRepo, UserId, UserId) {
        let db = Database::in_memory().unwrap();
        let users = UserRepo::new(db.clone());
        seed_user(&users, "user_a");
        seed_user(&users, "user_b");

        let likes = LikeRepo::new(db.clone());
        let notifications = NotificationRepo::new(db.clone());
        let notifier = Arc::new(Notifier::new(
            notifications.clone(),
            users.clone(),
            None,
            None,
        ));
        (
            LikeDigest::new(likes.clone(), users, notifier),
            likes,
            notifications,
            UserId::from_raw("user_a"),
            UserId::from_raw("user_b"),
        )
    }

    #[tokio::test]
    async fn rollup_becomes_one_summary() {
        let (digest, likes, notifications, a, b) = setup();
        likes.record("post_1", &a, &b).unwrap();
        likes.record("post_1", &a, &b).unwrap();
        likes.record("post_2", &a, &b).unwrap();

        let stats = digest.run_once().await.unwrap();
        assert_eq!(stats.owners_notified, 1);
        assert_eq!(stats.failures, 0);

        let listed = notifications.list_for_user(&a, 10).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].kind, NotificationKind::LikeSummary);
        assert_eq!(listed[0].payload["count"], 3);
        assert!(listed[0].body.contains("3 new likes"));
    }

    #[tokio::test]
    async fn second_pass_without_new_likes_is_silent() {
        let (digest, likes, notifications, a, b) = setup();
        likes.record("post_1", &a, &b).unwrap();

        digest.run_once().await.unwrap();
        let stats = digest.run_once().await.unwrap();

        assert_eq!(stats, DigestStats::default());
        assert_eq!(notifications.list_for_user(&a, 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn fresh_burst_after_summary_rolls_up_again() {
        let (digest, likes, notifications, a, b) = setup();
        likes.record("post_1", &a, &b).unwrap();
        digest.run_once().await.unwrap();

        likes.record("post_1", &a, &b).unwrap();
        let stats = digest.run_once().await.unwrap();
        assert_eq!(stats.owners_notified, 1);

        let listed = notifications.list_for_user(&a, 10).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].payload["count"], 1);
    }

    #[tokio::test]
    async fn failed_owner_does_not_poison_the_batch() {
        // Likes and watermarks live in one database; the notifier writes
        // into a second one that only knows user_a, so every summary for
        // user_b fails its foreign key.
        let db = Database::in_memory().unwrap();
        let users = UserRepo::new(db.clone());
        seed_user(&users, "user_a");
        seed_user(&users, "user_b");
        let likes = LikeRepo::new(db);

        let notify_db = Database::in_memory().unwrap();
        seed_user(&UserRepo::new(notify_db.clone()), "user_a");
        let notifications = NotificationRepo::new(notify_db.clone());
        let notifier = Arc::new(Notifier::new(
            notifications.clone(),
            UserRepo::new(notify_db),
            None,
            None,
        ));

        let a = UserId::from_raw("user_a");
        let b = UserId::from_raw("user_b");
        likes.record("post_1", &a, &b).unwrap();
        likes.record("post_2", &b, &a).unwrap();

        let digest = LikeDigest::new(likes.clone(), users.clone(), notifier);
        let stats = digest.run_once().await.unwrap();
        assert_eq!(stats.owners_notified, 1);
        assert_eq!(stats.failures, 1);

        // user_a got its summary and watermark
        assert_eq!(notifications.list_for_user(&a, 10).unwrap().len(), 1);
        assert!(users.find_by_id(&a).unwrap().last_notified_at.is_some());

        // user_b's watermark was not advanced; it stays pending
        assert!(users.find_by_id(&b).unwrap().last_notified_at.is_none());
        let pending = likes.pending_rollups().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].owner_id, b);
    }
}
