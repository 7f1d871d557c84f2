use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::debug;

use crate::error::AppError;
use crate::services::authn::token::ClientAuthenticationToken;
use crate::services::oauth2::token_store::TokenStore;

/// RFC 7662 introspection response. Every field except `active` is omitted
/// when the token is not active, so callers cannot probe token metadata.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct IntrospectionResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

impl IntrospectionResponse {
    /// The single inactive shape, used for unknown, expired, not-yet-valid
    /// and foreign-realm tokens alike.
    pub fn inactive() -> Self {
        Self {
            active: false,
            scope: None,
            client_id: None,
            username: None,
            token_type: None,
            exp: None,
            iat: None,
            nbf: None,
            sub: None,
            aud: None,
            iss: None,
            jti: None,
        }
    }
}

/// RFC 7662 token introspection backed by the token store.
#[derive(Clone)]
pub struct IntrospectionService {
    store: Arc<dyn TokenStore>,
    issuer: String,
}

impl IntrospectionService {
    pub fn new(store: Arc<dyn TokenStore>, issuer: String) -> Self {
        Self { store, issuer }
    }

    /// Introspect an access token on behalf of an authenticated client.
    ///
    /// Only store failures surface as errors; every "no" answer (unknown
    /// token, expired, not yet valid, issued under another realm) collapses
    /// into the same inactive response.
    pub async fn introspect(
        &self,
        token: &str,
        caller: &ClientAuthenticationToken,
    ) -> Result<IntrospectionResponse, AppError> {
        if !caller.is_authenticated() {
            return Err(AppError::Unauthorized);
        }

        let Some((record, _)) = self.store.read_access(token).await? else {
            return Ok(IntrospectionResponse::inactive());
        };

        let now = Utc::now();
        if record.is_expired(now) {
            debug!(jti = %record.jti, "introspected token is expired");
            return Ok(IntrospectionResponse::inactive());
        }
        if let Some(nbf) = record.not_before
            && nbf > now
        {
            return Ok(IntrospectionResponse::inactive());
        }
        if record.realm != caller.realm() {
            // Cross-realm callers learn nothing about the token.
            return Ok(IntrospectionResponse::inactive());
        }

        let scope = if record.scope.is_empty() {
            None
        } else {
            Some(
                record
                    .scope
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(" "),
            )
        };

        Ok(IntrospectionResponse {
            active: true,
            scope,
            client_id: Some(record.client_id.clone()),
            username: record.username.clone(),
            token_type: Some("Bearer".to_string()),
            exp: Some(record.expires_at.timestamp()),
            iat: Some(record.issued_at.timestamp()),
            nbf: record.not_before.map(|t| t.timestamp()),
            sub: record.subject_id.clone(),
            aud: Some(record.client_id),
            iss: Some(self.issuer.clone()),
            jti: Some(record.jti),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use crate::services::authn::token::test_support::composite;
    use crate::services::authn::token::{Authentication, ClientAuthenticationMethod};
    use crate::services::oauth2::client_store::test_client;
    use crate::services::oauth2::token_store::{
        AccessTokenRecord, MemoryTokenStore, generate_opaque_token,
    };

    fn caller(realm: &str) -> ClientAuthenticationToken {
        ClientAuthenticationToken::authenticated(
            test_client("c1", realm),
            ClientAuthenticationMethod::SecretBasic,
            BTreeSet::new(),
        )
    }

    async fn seeded(realm: &str, ttl: i64) -> (Arc<MemoryTokenStore>, String) {
        let store = MemoryTokenStore::new();
        let token = generate_opaque_token();
        let mut record =
            AccessTokenRecord::new("c1", realm, BTreeSet::from(["openid".to_string()]), ttl);
        record.subject_id = Some("sub-alice".to_string());
        record.username = Some("alice".to_string());
        store
            .store_access(
                &token,
                record,
                Authentication::User(composite(realm, "alice")),
            )
            .await
            .unwrap();
        (store, token)
    }

    #[tokio::test]
    async fn active_token_reports_full_metadata() {
        let (store, token) = seeded("alpha", 600).await;
        let service = IntrospectionService::new(store, "https://idp.example".to_string());

        let response = service.introspect(&token, &caller("alpha")).await.unwrap();
        assert!(response.active);
        assert_eq!(response.client_id.as_deref(), Some("c1"));
        assert_eq!(response.sub.as_deref(), Some("sub-alice"));
        assert_eq!(response.username.as_deref(), Some("alice"));
        assert_eq!(response.scope.as_deref(), Some("openid"));
        assert_eq!(response.iss.as_deref(), Some("https://idp.example"));
        assert!(response.jti.is_some());
    }

    #[tokio::test]
    async fn unknown_and_expired_tokens_are_indistinguishable() {
        let (store, expired_token) = seeded("alpha", -60).await;
        let service = IntrospectionService::new(store, "https://idp.example".to_string());

        let for_expired = service
            .introspect(&expired_token, &caller("alpha"))
            .await
            .unwrap();
        let for_unknown = service
            .introspect("never-issued", &caller("alpha"))
            .await
            .unwrap();

        assert_eq!(for_expired, IntrospectionResponse::inactive());
        assert_eq!(for_unknown, IntrospectionResponse::inactive());
        assert_eq!(for_expired, for_unknown);
    }

    #[tokio::test]
    async fn cross_realm_caller_sees_inactive() {
        let (store, token) = seeded("alpha", 600).await;
        let service = IntrospectionService::new(store, "https://idp.example".to_string());

        let response = service.introspect(&token, &caller("beta")).await.unwrap();
        assert_eq!(response, IntrospectionResponse::inactive());
    }

    #[tokio::test]
    async fn unauthenticated_caller_is_rejected() {
        let (store, token) = seeded("alpha", 600).await;
        let service = IntrospectionService::new(store, "https://idp.example".to_string());

        let anon = ClientAuthenticationToken::unauthenticated(
            test_client("c1", "alpha"),
            ClientAuthenticationMethod::None,
        );
        let err = service.introspect(&token, &anon).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));
    }
}
