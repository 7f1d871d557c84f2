use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::services::authn::token::UserAuthenticationToken;

/// Opaque session token for the composite authentication. Same shape as our
/// other opaque tokens: 32 bytes of entropy, URL-safe base64 without padding.
fn generate_session_id() -> String {
    let mut bytes = [0u8; 32];
    getrandom::fill(&mut bytes).expect("getrandom failed");

    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    URL_SAFE_NO_PAD.encode(bytes)
}

/// In-memory session registry: session id -> composite authentication.
///
/// The composite token itself guards its member set; this store only maps
/// ids to live sessions, so a plain RwLock map is enough.
#[derive(Default)]
pub struct SessionStore {
    inner: RwLock<HashMap<String, Arc<UserAuthenticationToken>>>,
}

impl SessionStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn create(&self, authentication: Arc<UserAuthenticationToken>) -> String {
        let session_id = generate_session_id();
        self.inner
            .write()
            .await
            .insert(session_id.clone(), authentication);
        session_id
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<UserAuthenticationToken>> {
        self.inner.read().await.get(session_id).cloned()
    }

    /// Remove a session, returning the authentication it held.
    pub async fn remove(&self, session_id: &str) -> Option<Arc<UserAuthenticationToken>> {
        self.inner.write().await.remove(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::services::authn::token::test_support::composite;

    #[tokio::test]
    async fn create_get_remove_roundtrip() {
        let store = SessionStore::new();
        let auth = composite("alpha", "alice");

        let sid = store.create(auth.clone()).await;
        assert!(!sid.is_empty());

        let found = store.get(&sid).await.unwrap();
        assert_eq!(found.subject().subject_id, auth.subject().subject_id);

        assert!(store.remove(&sid).await.is_some());
        assert!(store.get(&sid).await.is_none());
    }

    #[tokio::test]
    async fn session_ids_are_unique() {
        let store = SessionStore::new();
        let a = store.create(composite("alpha", "alice")).await;
        let b = store.create(composite("alpha", "alice")).await;
        assert_ne!(a, b);
    }
}
