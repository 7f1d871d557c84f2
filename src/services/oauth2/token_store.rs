use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::repos::error::RepoResult;
use crate::services::authn::token::Authentication;

/// 32 bytes of entropy, URL-safe base64 without padding.
pub fn generate_opaque_token() -> String {
    let mut bytes = [0u8; 32];
    getrandom::fill(&mut bytes).expect("getrandom failed");

    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    URL_SAFE_NO_PAD.encode(bytes)
}

/// sha256(token) -> raw 32 bytes; only hashes are ever stored.
pub fn hash_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

#[derive(Debug, Clone)]
pub struct AccessTokenRecord {
    pub jti: String,
    pub client_id: String,
    pub realm: String,
    pub subject_id: Option<String>,
    pub username: Option<String>,
    pub scope: BTreeSet<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub not_before: Option<DateTime<Utc>>,
    /// Hash of the refresh token this access token was issued with, when any.
    pub refresh_hash: Option<Vec<u8>>,
}

impl AccessTokenRecord {
    pub fn new(client_id: &str, realm: &str, scope: BTreeSet<String>, ttl_seconds: i64) -> Self {
        let now = Utc::now();
        Self {
            jti: Uuid::new_v4().to_string(),
            client_id: client_id.to_string(),
            realm: realm.to_string(),
            subject_id: None,
            username: None,
            scope,
            issued_at: now,
            expires_at: now + chrono::Duration::seconds(ttl_seconds),
            not_before: None,
            refresh_hash: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone)]
pub struct RefreshTokenRecord {
    pub client_id: String,
    pub realm: String,
    pub subject_id: Option<String>,
    pub username: Option<String>,
    pub scope: BTreeSet<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Read/write access to issued tokens and the authentication bound to each.
/// Keys are always token hashes; raw token values never touch the store.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn store_access(
        &self,
        token: &str,
        record: AccessTokenRecord,
        authentication: Authentication,
    ) -> RepoResult<()>;

    async fn store_refresh(
        &self,
        token: &str,
        record: RefreshTokenRecord,
        authentication: Authentication,
    ) -> RepoResult<()>;

    async fn read_access(
        &self,
        token: &str,
    ) -> RepoResult<Option<(AccessTokenRecord, Authentication)>>;

    async fn read_refresh(
        &self,
        token: &str,
    ) -> RepoResult<Option<(RefreshTokenRecord, Authentication)>>;

    async fn remove_access(&self, token: &str) -> RepoResult<bool>;

    async fn remove_refresh(&self, token: &str) -> RepoResult<bool>;

    /// Remove every access token bound to the given refresh token hash.
    async fn remove_access_for_refresh(&self, refresh_hash: &[u8]) -> RepoResult<u64>;
}

/// In-memory token store. Hash-keyed maps behind an async RwLock; fine for a
/// single-process broker, swappable for a durable backend via the trait.
#[derive(Default)]
pub struct MemoryTokenStore {
    access: RwLock<HashMap<Vec<u8>, (AccessTokenRecord, Authentication)>>,
    refresh: RwLock<HashMap<Vec<u8>, (RefreshTokenRecord, Authentication)>>,
}

impl MemoryTokenStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn store_access(
        &self,
        token: &str,
        record: AccessTokenRecord,
        authentication: Authentication,
    ) -> RepoResult<()> {
        self.access
            .write()
            .await
            .insert(hash_token(token), (record, authentication));
        Ok(())
    }

    async fn store_refresh(
        &self,
        token: &str,
        record: RefreshTokenRecord,
        authentication: Authentication,
    ) -> RepoResult<()> {
        self.refresh
            .write()
            .await
            .insert(hash_token(token), (record, authentication));
        Ok(())
    }

    async fn read_access(
        &self,
        token: &str,
    ) -> RepoResult<Option<(AccessTokenRecord, Authentication)>> {
        Ok(self.access.read().await.get(&hash_token(token)).cloned())
    }

    async fn read_refresh(
        &self,
        token: &str,
    ) -> RepoResult<Option<(RefreshTokenRecord, Authentication)>> {
        Ok(self.refresh.read().await.get(&hash_token(token)).cloned())
    }

    async fn remove_access(&self, token: &str) -> RepoResult<bool> {
        Ok(self.access.write().await.remove(&hash_token(token)).is_some())
    }

    async fn remove_refresh(&self, token: &str) -> RepoResult<bool> {
        Ok(self
            .refresh
            .write()
            .await
            .remove(&hash_token(token))
            .is_some())
    }

    async fn remove_access_for_refresh(&self, refresh_hash: &[u8]) -> RepoResult<u64> {
        let mut map = self.access.write().await;
        let before = map.len();
        map.retain(|_, (record, _)| {
            record.refresh_hash.as_deref() != Some(refresh_hash)
        });
        Ok((before - map.len()) as u64)
    }
}
