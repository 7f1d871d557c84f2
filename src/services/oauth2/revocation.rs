use std::sync::Arc;

use tracing::{debug, info};

use crate::error::AppError;
use crate::services::authn::token::ClientAuthenticationToken;
use crate::services::oauth2::token_store::{TokenStore, hash_token};

/// RFC 7009 token revocation.
///
/// Revoking a refresh token cascades to every access token issued with it;
/// revoking an access token leaves its refresh token usable.
#[derive(Clone)]
pub struct RevocationService {
    store: Arc<dyn TokenStore>,
}

impl RevocationService {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self { store }
    }

    /// Revoke a token presented by an authenticated client.
    ///
    /// Unknown or already-revoked tokens succeed silently, as required by the
    /// RFC. A known token owned by a different client is the one hard
    /// failure: that is an unauthorized client, not an idempotent no-op.
    pub async fn revoke(
        &self,
        token: &str,
        caller: &ClientAuthenticationToken,
    ) -> Result<(), AppError> {
        if !caller.is_authenticated() {
            return Err(AppError::Unauthorized);
        }

        // Refresh first: a refresh token revocation must cascade.
        if let Some((record, _)) = self.store.read_refresh(token).await? {
            if record.client_id != caller.client_id() {
                debug!(client = %caller.client_id(), "revocation attempted by foreign client");
                return Err(AppError::Forbidden);
            }
            let cascaded = self
                .store
                .remove_access_for_refresh(&hash_token(token))
                .await?;
            self.store.remove_refresh(token).await?;
            info!(
                client = %caller.client_id(),
                cascaded,
                "refresh token revoked"
            );
            return Ok(());
        }

        if let Some((record, _)) = self.store.read_access(token).await? {
            if record.client_id != caller.client_id() {
                debug!(client = %caller.client_id(), "revocation attempted by foreign client");
                return Err(AppError::Forbidden);
            }
            self.store.remove_access(token).await?;
            debug!(client = %caller.client_id(), jti = %record.jti, "access token revoked");
        }

        // Unknown token: nothing to do, nothing to report.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use crate::services::authn::token::test_support::composite;
    use crate::services::authn::token::ClientAuthenticationMethod;
    use crate::services::oauth2::client_store::test_client;
    use crate::services::oauth2::token_store::MemoryTokenStore;
    use crate::services::oauth2::tokens::TokenService;

    fn client(client_id: &str) -> ClientAuthenticationToken {
        ClientAuthenticationToken::authenticated(
            test_client(client_id, "alpha"),
            ClientAuthenticationMethod::SecretBasic,
            BTreeSet::new(),
        )
    }

    #[tokio::test]
    async fn refresh_revocation_cascades_to_access_tokens() {
        let store = MemoryTokenStore::new();
        let issuer = TokenService::new(store.clone(), 600, 3600);
        let revoker = RevocationService::new(store.clone());

        let issued = issuer
            .issue_for_user(composite("alpha", "alice"), client("c1"), None)
            .await
            .unwrap();
        let refresh = issued.refresh_token.unwrap();

        // A second access token minted from the same refresh token.
        let refreshed = issuer.refresh(&refresh, &client("c1")).await.unwrap();

        revoker.revoke(&refresh, &client("c1")).await.unwrap();

        assert!(store.read_refresh(&refresh).await.unwrap().is_none());
        assert!(store.read_access(&issued.access_token).await.unwrap().is_none());
        assert!(store.read_access(&refreshed.access_token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn access_revocation_leaves_refresh_token_usable() {
        let store = MemoryTokenStore::new();
        let issuer = TokenService::new(store.clone(), 600, 3600);
        let revoker = RevocationService::new(store.clone());

        let issued = issuer
            .issue_for_user(composite("alpha", "alice"), client("c1"), None)
            .await
            .unwrap();
        let refresh = issued.refresh_token.unwrap();

        revoker.revoke(&issued.access_token, &client("c1")).await.unwrap();

        assert!(store.read_access(&issued.access_token).await.unwrap().is_none());
        assert!(issuer.refresh(&refresh, &client("c1")).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_token_revocation_is_a_silent_success() {
        let store = MemoryTokenStore::new();
        let revoker = RevocationService::new(store);
        assert!(revoker.revoke("never-issued", &client("c1")).await.is_ok());
    }

    #[tokio::test]
    async fn foreign_client_cannot_revoke() {
        let store = MemoryTokenStore::new();
        let issuer = TokenService::new(store.clone(), 600, 3600);
        let revoker = RevocationService::new(store.clone());

        let issued = issuer
            .issue_for_client(client("c1"), None)
            .await
            .unwrap();

        let err = revoker
            .revoke(&issued.access_token, &client("c2"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden));
        // Token survives the failed attempt.
        assert!(store.read_access(&issued.access_token).await.unwrap().is_some());
    }
}
