use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use secrecy::SecretString;
use tracing::{debug, warn};

use veil_core::errors::AuthError;
use veil_core::identity::Identity;
use veil_core::ids::UserId;
use veil_store::users::UserRepo;
use veil_store::StoreError;

use crate::token::TokenVerifier;

/// How long a cached identity stays valid.
pub const SESSION_TTL: Duration = Duration::from_secs(300);

/// Bounded write retry: attempts and delay between them.
const WRITE_ATTEMPTS: u32 = 3;
const WRITE_RETRY_DELAY: Duration = Duration::from_millis(50);

/// The cache backend is an availability-optional dependency: every error
/// collapses to this, and the session cache treats it as a miss/no-op.
#[derive(Debug, thiserror::Error)]
#[error("cache backend unavailable: {0}")]
pub struct CacheError(pub String);

/// Key/value backend with TTL. The in-process store below is the default;
/// an external cache service would implement the same trait.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;
    fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// In-process TTL cache on dashmap.
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: DashMap<String, (String, Instant)>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        if let Some(entry) = self.entries.get(key) {
            let (value, deadline) = entry.value();
            if Instant::now() < *deadline {
                return Ok(Some(value.clone()));
            }
        }
        // Lazily drop expired entries
        self.entries
            .remove_if(key, |_, (_, deadline)| Instant::now() >= *deadline);
        Ok(None)
    }

    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.entries
            .insert(key.to_owned(), (value.to_owned(), Instant::now() + ttl));
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Read-through identity cache gating every authenticated connection.
///
/// Verifies the credential, then serves the identity from cache when it can
/// and from the user store when it must. Backend unavailability is never
/// surfaced; only authentication failures are.
pub struct SessionCache {
    store: Arc<dyn CacheStore>,
    users: UserRepo,
    verifier: TokenVerifier,
}

impl SessionCache {
    pub fn new(store: Arc<dyn CacheStore>, users: UserRepo, secret: &SecretString) -> Self {
        Self {
            store,
            users,
            verifier: TokenVerifier::new(secret),
        }
    }

    /// Verify a credential and resolve the subject's identity.
    pub async fn resolve(&self, token: Option<&str>) -> Result<Identity, AuthError> {
        let token = token.ok_or(AuthError::MissingToken)?;
        let user_id = self.verifier.verify(token)?;
        let key = cache_key(&user_id);

        if let Some(identity) = self.read_cached(&key) {
            return Ok(identity);
        }

        let identity = self.users.find_by_id(&user_id).map_err(|e| match e {
            StoreError::NotFound(_) => AuthError::SubjectNotFound,
            other => {
                warn!(user_id = %user_id, error = %other, "identity load failed");
                AuthError::SubjectNotFound
            }
        })?;

        self.write_through(&key, &identity).await;
        Ok(identity)
    }

    /// Drop the cached entry for a user. Call after mutating any identity
    /// field the cache serves. Backend outage makes this a no-op.
    pub fn invalidate(&self, user_id: &UserId) {
        if let Err(e) = self.store.delete(&cache_key(user_id)) {
            debug!(user_id = %user_id, error = %e, "cache invalidate skipped");
        }
    }

    fn read_cached(&self, key: &str) -> Option<Identity> {
        let raw = match self.store.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                debug!(error = %e, "cache read skipped");
                return None;
            }
        };

        match serde_json::from_str::<Identity>(&raw) {
            Ok(identity) => Some(identity),
            Err(e) => {
                // A value that does not validate is corruption (for example
                // a raw object stringified into the cache); purge it and
                // fall back to the source of truth.
                warn!(key, error = %e, "corrupt cache entry evicted");
                let _ = self.store.delete(key);
                None
            }
        }
    }

    /// Delete-then-set keeps a concurrent writer from merging our value
    /// with a stale one. Failures are retried a few times, then dropped;
    /// the cache is an optimization, not a dependency.
    async fn write_through(&self, key: &str, identity: &Identity) {
        let raw = match serde_json::to_string(identity) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key, error = %e, "identity serialize failed, skipping cache write");
                return;
            }
        };

        for attempt in 1..=WRITE_ATTEMPTS {
            let result = self
                .store
                .delete(key)
                .and_then(|()| self.store.set(key, &raw, SESSION_TTL));
            match result {
                Ok(()) => return,
                Err(e) if attempt < WRITE_ATTEMPTS => {
                    debug!(key, attempt, error = %e, "cache write retry");
                    tokio::time::sleep(WRITE_RETRY_DELAY).await;
                }
                Err(e) => {
                    warn!(key, error = %e, "cache write dropped after retries");
                }
            }
        }
    }
}

fn cache_key(user_id: &UserId) -> String {
    format!("identity:{user_id}")
}
