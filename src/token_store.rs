use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// One registered refresh token. At most one active entry exists per login
/// session chain: rotation revokes the consumed entry before registering the
/// replacement.
#[derive(Debug, Clone)]
pub struct RefreshEntry {
    pub jti: String,
    pub user_id: Uuid,
    pub created_at: i64,
    pub expires_at: i64,
    pub revoked: bool,
}

impl RefreshEntry {
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    pub fn is_active(&self, now: i64) -> bool {
        !self.revoked && !self.is_expired(now)
    }
}

/// Outcome of atomically consuming a refresh token during rotation.
#[derive(Debug)]
pub enum ConsumeOutcome {
    /// The entry was active and is now revoked.
    Consumed(RefreshEntry),
    /// The entry was already revoked: a rotation replay.
    AlreadyRevoked,
    /// No usable entry (never registered, swept, or past expiry).
    Missing,
}

/// Storage seam for the refresh-token registry and the access-token
/// blacklist. The in-memory implementation below serves tests and
/// single-instance deployments; multi-instance deployments substitute an
/// externalized store behind the same trait.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn register(&self, entry: RefreshEntry);

    async fn get(&self, jti: &str) -> Option<RefreshEntry>;

    /// Atomic single-use rotation step: checks the entry is active and marks
    /// it revoked in one operation.
    async fn consume(&self, jti: &str) -> ConsumeOutcome;

    /// Returns true if an entry existed and is now revoked.
    async fn revoke(&self, jti: &str) -> bool;

    /// Revokes every registry entry owned by the user. Returns the number of
    /// entries flipped.
    async fn revoke_all_for_user(&self, user_id: Uuid) -> usize;

    /// Force-invalidates an access token id until `expires_at`.
    async fn blacklist(&self, jti: &str, expires_at: i64);

    async fn is_blacklisted(&self, jti: &str) -> bool;

    /// Drops registry and blacklist entries whose expiry has passed,
    /// bounding memory growth. Returns the number of entries removed.
    async fn sweep_expired(&self, now: i64) -> usize;
}

#[derive(Default)]
pub struct InMemoryTokenStore {
    refresh: RwLock<HashMap<String, RefreshEntry>>,
    blacklist: RwLock<HashMap<String, i64>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn register(&self, entry: RefreshEntry) {
        self.refresh.write().await.insert(entry.jti.clone(), entry);
    }

    async fn get(&self, jti: &str) -> Option<RefreshEntry> {
        self.refresh.read().await.get(jti).cloned()
    }

    async fn consume(&self, jti: &str) -> ConsumeOutcome {
        let now = Utc::now().timestamp();
        let mut refresh = self.refresh.write().await;
        match refresh.get_mut(jti) {
            Some(entry) if entry.revoked => ConsumeOutcome::AlreadyRevoked,
            Some(entry) if entry.is_expired(now) => ConsumeOutcome::Missing,
            Some(entry) => {
                entry.revoked = true;
                ConsumeOutcome::Consumed(entry.clone())
            }
            None => ConsumeOutcome::Missing,
        }
    }

    async fn revoke(&self, jti: &str) -> bool {
        match self.refresh.write().await.get_mut(jti) {
            Some(entry) => {
                entry.revoked = true;
                true
            }
            None => false,
        }
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> usize {
        let mut refresh = self.refresh.write().await;
        let mut flipped = 0;
        for entry in refresh.values_mut() {
            if entry.user_id == user_id && !entry.revoked {
                entry.revoked = true;
                flipped += 1;
            }
        }
        flipped
    }

    async fn blacklist(&self, jti: &str, expires_at: i64) {
        self.blacklist
            .write()
            .await
            .insert(jti.to_string(), expires_at);
    }

    async fn is_blacklisted(&self, jti: &str) -> bool {
        self.blacklist.read().await.contains_key(jti)
    }

    async fn sweep_expired(&self, now: i64) -> usize {
        let mut removed = 0;

        {
            let mut refresh = self.refresh.write().await;
            let before = refresh.len();
            refresh.retain(|_, entry| !entry.is_expired(now));
            removed += before - refresh.len();
        }
        {
            let mut blacklist = self.blacklist.write().await;
            let before = blacklist.len();
            blacklist.retain(|_, expires_at| *expires_at > now);
            removed += before - blacklist.len();
        }

        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(jti: &str, user_id: Uuid, expires_at: i64) -> RefreshEntry {
        RefreshEntry {
            jti: jti.to_string(),
            user_id,
            created_at: Utc::now().timestamp(),
            expires_at,
            revoked: false,
        }
    }

    #[tokio::test]
    async fn consume_is_single_use() {
        let store = InMemoryTokenStore::new();
        let user = Uuid::new_v4();
        let far = Utc::now().timestamp() + 3600;
        store.register(entry("jti-1", user, far)).await;

        assert!(matches!(
            store.consume("jti-1").await,
            ConsumeOutcome::Consumed(_)
        ));
        assert!(matches!(
            store.consume("jti-1").await,
            ConsumeOutcome::AlreadyRevoked
        ));
        assert!(matches!(store.consume("nope").await, ConsumeOutcome::Missing));
    }

    #[tokio::test]
    async fn revoke_all_flips_only_that_user() {
        let store = InMemoryTokenStore::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let far = Utc::now().timestamp() + 3600;
        store.register(entry("a1", alice, far)).await;
        store.register(entry("a2", alice, far)).await;
        store.register(entry("b1", bob, far)).await;

        assert_eq!(store.revoke_all_for_user(alice).await, 2);
        assert!(store.get("b1").await.unwrap().is_active(Utc::now().timestamp()));
        assert!(store.get("a1").await.unwrap().revoked);
    }

    #[tokio::test]
    async fn sweep_prunes_expired_entries() {
        let store = InMemoryTokenStore::new();
        let user = Uuid::new_v4();
        let now = Utc::now().timestamp();
        store.register(entry("old", user, now - 10)).await;
        store.register(entry("new", user, now + 3600)).await;
        store.blacklist("old-access", now - 10).await;
        store.blacklist("new-access", now + 3600).await;

        assert_eq!(store.sweep_expired(now).await, 2);
        assert!(store.get("old").await.is_none());
        assert!(store.get("new").await.is_some());
        assert!(!store.is_blacklisted("old-access").await);
        assert!(store.is_blacklisted("new-access").await);
    }
}
