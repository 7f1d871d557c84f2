use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::services::authn::token::ClientAuthenticationMethod;

/// Registered OAuth2 client record. Created through dynamic client
/// registration (or seeded at startup) and consumed by client authentication
/// at the token/introspection/revocation endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredClient {
    pub client_id: String,
    pub realm: String,
    pub client_name: Option<String>,
    /// sha256 of the client secret; `None` for public clients.
    pub secret_hash: Option<Vec<u8>>,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub scopes: BTreeSet<String>,
    pub auth_method: ClientAuthenticationMethod,
    pub created_at: DateTime<Utc>,
}

pub fn hash_client_secret(secret: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.finalize().to_vec()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAuthFailure {
    UnknownClient,
    BadSecret,
}

/// In-memory client registry guarded by an async RwLock. Reads dominate;
/// writes happen only through registration management calls.
#[derive(Debug, Default)]
pub struct ClientStore {
    inner: RwLock<HashMap<String, RegisteredClient>>,
}

impl ClientStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn insert(&self, client: RegisteredClient) {
        self.inner
            .write()
            .await
            .insert(client.client_id.clone(), client);
    }

    pub async fn get(&self, client_id: &str) -> Option<RegisteredClient> {
        self.inner.read().await.get(client_id).cloned()
    }

    pub async fn update(&self, client: RegisteredClient) -> bool {
        let mut map = self.inner.write().await;
        match map.get_mut(&client.client_id) {
            Some(existing) => {
                *existing = client;
                true
            }
            None => false,
        }
    }

    pub async fn delete(&self, client_id: &str) -> bool {
        self.inner.write().await.remove(client_id).is_some()
    }

    /// Constant-shape secret check: unknown client and wrong secret are
    /// distinguished internally but both surface as a 401 upstream.
    pub async fn authenticate(
        &self,
        client_id: &str,
        secret: &str,
    ) -> Result<RegisteredClient, ClientAuthFailure> {
        let client = self
            .get(client_id)
            .await
            .ok_or(ClientAuthFailure::UnknownClient)?;

        match &client.secret_hash {
            Some(hash) if *hash == hash_client_secret(secret) => Ok(client),
            _ => Err(ClientAuthFailure::BadSecret),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_client(client_id: &str, realm: &str) -> RegisteredClient {
    RegisteredClient {
        client_id: client_id.to_string(),
        realm: realm.to_string(),
        client_name: Some(client_id.to_string()),
        secret_hash: Some(hash_client_secret("secret")),
        redirect_uris: vec![],
        grant_types: vec!["client_credentials".to_string()],
        scopes: BTreeSet::from(["openid".to_string()]),
        auth_method: ClientAuthenticationMethod::SecretBasic,
        created_at: Utc::now(),
    }
}
