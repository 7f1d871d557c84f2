use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, error};

use crate::error::AppError;
use crate::services::authn::token::{
    Authentication, ClientAuthenticationToken, ComposedAuthenticationToken,
    UserAuthenticationToken,
};
use crate::services::oauth2::token_store::{
    AccessTokenRecord, RefreshTokenRecord, TokenStore, generate_opaque_token, hash_token,
};

/// Service-level return type to keep handlers thin; handlers map this into
/// the HTTP token response DTO.
#[derive(Clone, Debug)]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: &'static str,
    pub expires_in: u64,
    pub scope: BTreeSet<String>,
}

/// Orchestrates opaque access/refresh token issuance against the token
/// store. Tokens are always bound to the authentication they were issued
/// for; the endpoints read identities back from the store, never rebuild
/// them.
#[derive(Clone)]
pub struct TokenService {
    store: Arc<dyn TokenStore>,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
}

impl TokenService {
    pub fn new(store: Arc<dyn TokenStore>, access_ttl_seconds: i64, refresh_ttl_seconds: i64) -> Self {
        Self {
            store,
            access_ttl_seconds,
            refresh_ttl_seconds,
        }
    }

    fn granted_scope(
        requested: Option<&BTreeSet<String>>,
        client: &ClientAuthenticationToken,
    ) -> BTreeSet<String> {
        match requested {
            Some(scope) if !scope.is_empty() => scope
                .intersection(&client.client().scopes)
                .cloned()
                .collect(),
            _ => client.client().scopes.clone(),
        }
    }

    /// Issue an access + refresh token pair for a user session, on behalf of
    /// an authenticated client. The stored authentication is the composed
    /// pair, so introspection can report both parties.
    pub async fn issue_for_user(
        &self,
        user: Arc<UserAuthenticationToken>,
        client: ClientAuthenticationToken,
        requested_scope: Option<&BTreeSet<String>>,
    ) -> Result<IssuedTokens, AppError> {
        if !client.is_authenticated() {
            return Err(AppError::Unauthorized);
        }
        if user.realm() != client.realm() {
            return Err(AppError::Forbidden);
        }

        let scope = Self::granted_scope(requested_scope, &client);
        let subject = user.subject().clone();
        let username = user.details().username().map(str::to_string);

        let access_token = generate_opaque_token();
        let refresh_token = generate_opaque_token();
        let refresh_hash = hash_token(&refresh_token);

        let authentication =
            Authentication::Composed(ComposedAuthenticationToken::new(user, client.clone()));

        let now = Utc::now();
        self.store
            .store_refresh(
                &refresh_token,
                RefreshTokenRecord {
                    client_id: client.client_id().to_string(),
                    realm: client.realm().to_string(),
                    subject_id: Some(subject.subject_id.clone()),
                    username: username.clone(),
                    scope: scope.clone(),
                    issued_at: now,
                    expires_at: now + Duration::seconds(self.refresh_ttl_seconds),
                },
                authentication.clone(),
            )
            .await
            .map_err(|e| {
                error!(error = %e, "failed to store refresh token");
                AppError::Internal
            })?;

        let mut record = AccessTokenRecord::new(
            client.client_id(),
            client.realm(),
            scope.clone(),
            self.access_ttl_seconds,
        );
        record.subject_id = Some(subject.subject_id.clone());
        record.username = username;
        record.refresh_hash = Some(refresh_hash);

        self.store
            .store_access(&access_token, record, authentication)
            .await
            .map_err(|e| {
                error!(error = %e, "failed to store access token");
                AppError::Internal
            })?;

        debug!(subject = %subject.subject_id, client = %client.client_id(), "issued token pair");

        Ok(IssuedTokens {
            access_token,
            refresh_token: Some(refresh_token),
            token_type: "Bearer",
            expires_in: self.access_ttl_seconds as u64,
            scope,
        })
    }

    /// Client-credentials grant: access token only, bound to the client
    /// authentication.
    pub async fn issue_for_client(
        &self,
        client: ClientAuthenticationToken,
        requested_scope: Option<&BTreeSet<String>>,
    ) -> Result<IssuedTokens, AppError> {
        if !client.is_authenticated() {
            return Err(AppError::Unauthorized);
        }

        let scope = Self::granted_scope(requested_scope, &client);
        let access_token = generate_opaque_token();
        let record = AccessTokenRecord::new(
            client.client_id(),
            client.realm(),
            scope.clone(),
            self.access_ttl_seconds,
        );

        self.store
            .store_access(&access_token, record, Authentication::Client(client))
            .await
            .map_err(|e| {
                error!(error = %e, "failed to store access token");
                AppError::Internal
            })?;

        Ok(IssuedTokens {
            access_token,
            refresh_token: None,
            token_type: "Bearer",
            expires_in: self.access_ttl_seconds as u64,
            scope,
        })
    }

    /// Refresh grant: validate the presented refresh token, require the
    /// requesting client to be the one it was issued to, and mint a fresh
    /// access token bound to the stored authentication. The refresh token is
    /// returned unrotated.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        client: &ClientAuthenticationToken,
    ) -> Result<IssuedTokens, AppError> {
        let (record, authentication) = self
            .store
            .read_refresh(refresh_token)
            .await
            .map_err(|e| {
                error!(error = %e, "failed to read refresh token");
                AppError::Internal
            })?
            .ok_or(AppError::Unauthorized)?;

        if record.is_expired(Utc::now()) {
            debug!("refresh token expired");
            return Err(AppError::Unauthorized);
        }
        if record.client_id != client.client_id() {
            debug!(client = %client.client_id(), "refresh token presented by foreign client");
            return Err(AppError::Unauthorized);
        }

        let access_token = generate_opaque_token();
        let mut access = AccessTokenRecord::new(
            &record.client_id,
            &record.realm,
            record.scope.clone(),
            self.access_ttl_seconds,
        );
        access.subject_id = record.subject_id.clone();
        access.username = record.username.clone();
        access.refresh_hash = Some(hash_token(refresh_token));

        self.store
            .store_access(&access_token, access, authentication)
            .await
            .map_err(|e| {
                error!(error = %e, "failed to store refreshed access token");
                AppError::Internal
            })?;

        Ok(IssuedTokens {
            access_token,
            refresh_token: Some(refresh_token.to_string()),
            token_type: "Bearer",
            expires_in: self.access_ttl_seconds as u64,
            scope: record.scope,
        })
    }
}
