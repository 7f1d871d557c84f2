use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error};

use crate::repos::error::RepoError;
use crate::services::authn::provider::{Credential, IdentityProviderRegistry};
use crate::services::authn::token::{UserAuthenticationToken, WebAuthenticationDetails};
use crate::services::identity::principal::Authority;

#[derive(Debug, Error)]
pub enum AuthenticationError {
    /// Request shape this manager does not dispatch. Rejected before any
    /// provider code runs.
    #[error("invalid request: unsupported authentication type")]
    UnsupportedRequest,

    #[error("provider not found: {authority}/{provider_id}")]
    ProviderNotFound {
        authority: String,
        provider_id: String,
    },

    #[error("bad credentials: missing token")]
    MissingCredentials,

    #[error("bad credentials")]
    InvalidCredentials,

    /// Provider validated the login but produced no principal. A provider
    /// bug, not a user error.
    #[error("no principal")]
    MissingPrincipal,

    /// Identity conversion returned a record for a different user than the
    /// validated principal. Fatal provider misbehavior; never retried.
    #[error("error processing request: user id mismatch")]
    MismatchedUser { expected: String, actual: String },

    /// Principal validated and identity converted, yet no subject resolves.
    /// Signals provider/data corruption, not a user-correctable condition.
    #[error("error processing request: no subject for {user_id}")]
    SubjectUnresolved { user_id: String },

    #[error("account not found")]
    AccountNotFound,

    #[error("realm mismatch: expected {expected}, got {actual}")]
    RealmMismatch { expected: String, actual: String },

    /// A same-realm login resolved to a different durable subject. Linking
    /// it would put a second real user behind one session.
    #[error("subject mismatch: session holds {expected}, login resolved {actual}")]
    SubjectMismatch { expected: String, actual: String },

    /// The authenticated flag can never be raised after construction.
    #[error("authenticated state cannot be granted post-construction")]
    IllegalStateChange,

    #[error("storage error")]
    Storage(#[from] RepoError),
}

/// A provider-wrapped authentication request: the only shape the manager
/// dispatches.
#[derive(Debug, Clone)]
pub struct ProviderWrappedAuthRequest {
    pub authority: Authority,
    pub provider_id: String,
    pub credential: Option<Credential>,
    pub web_details: Option<WebAuthenticationDetails>,
}

/// Everything that can arrive at the authentication entry point. Client
/// credentials are handled by the OAuth2 client store, never by this
/// manager.
#[derive(Debug, Clone)]
pub enum AuthRequest {
    ProviderWrapped(ProviderWrappedAuthRequest),
    ClientSecret {
        client_id: String,
        client_secret: String,
    },
}

/// Single entry point turning a provider-wrapped request into a fully
/// resolved composite user authentication.
///
/// Stateless per call: the only shared state is the provider registry, which
/// is read-only after startup.
pub struct AuthenticationManager {
    registry: Arc<IdentityProviderRegistry>,
}

impl AuthenticationManager {
    pub fn new(registry: Arc<IdentityProviderRegistry>) -> Self {
        Self { registry }
    }

    pub fn supports(request: &AuthRequest) -> bool {
        matches!(request, AuthRequest::ProviderWrapped(_))
    }

    /// Dispatch, validate, resolve and assemble — strictly in that order, so
    /// a failure at any stage never contacts a later one and no partial
    /// identity is committed before all fallible work is done.
    pub async fn authenticate(
        &self,
        request: AuthRequest,
    ) -> Result<Arc<UserAuthenticationToken>, AuthenticationError> {
        let AuthRequest::ProviderWrapped(request) = request else {
            return Err(AuthenticationError::UnsupportedRequest);
        };

        // Two-level lookup: the authority must be known before the provider
        // within it is resolved.
        if request.provider_id.trim().is_empty()
            || !self.registry.has_authority(request.authority)
        {
            return Err(AuthenticationError::ProviderNotFound {
                authority: request.authority.to_string(),
                provider_id: request.provider_id,
            });
        }
        let provider = self
            .registry
            .provider(request.authority, &request.provider_id)
            .ok_or_else(|| AuthenticationError::ProviderNotFound {
                authority: request.authority.to_string(),
                provider_id: request.provider_id.clone(),
            })?;

        let credential = request
            .credential
            .ok_or(AuthenticationError::MissingCredentials)?;

        // Protocol validation happens inside the provider; everything after
        // this point works on the validated principal.
        let mut token = provider.authenticate(credential).await?;

        if token.user_id().trim().is_empty() {
            error!(
                provider = %provider.config().provider_id,
                "provider produced a token without a principal"
            );
            return Err(AuthenticationError::MissingPrincipal);
        }

        let mut identity = provider.convert_identity(token.principal()).await?;

        if identity.user_id() != token.user_id() {
            error!(
                provider = %provider.config().provider_id,
                expected = %token.user_id(),
                actual = %identity.user_id(),
                "identity conversion returned a different user; provider misbehavior"
            );
            return Err(AuthenticationError::MismatchedUser {
                expected: token.user_id().to_string(),
                actual: identity.user_id().to_string(),
            });
        }

        let subject = provider
            .resolver()
            .resolve_by_user_id(token.user_id())
            .await?
            .ok_or_else(|| {
                error!(
                    provider = %provider.config().provider_id,
                    user_id = %token.user_id(),
                    "no subject resolved after successful identity conversion"
                );
                AuthenticationError::SubjectUnresolved {
                    user_id: token.user_id().to_string(),
                }
            })?;

        // Credentials never reach the composite token.
        token.erase_credentials();
        identity.erase_credentials();

        debug!(
            subject = %subject.subject_id,
            realm = %subject.realm,
            provider = %provider.config().provider_id,
            "authenticated"
        );

        let attribute_sets = identity.attribute_sets.clone();
        UserAuthenticationToken::new(subject, token, identity, attribute_sets, request.web_details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::repos::account_store::{AccountStore, MemoryAccountStore};
    use crate::repos::subject_store::{MemorySubjectStore, SubjectStore};
    use crate::services::authn::provider::{
        AssertionValidator, IdentityProvider, InternalPasswordValidator, ProviderConfig,
        seed_internal_user,
    };

    struct Fixture {
        manager: AuthenticationManager,
        accounts: Arc<dyn AccountStore>,
    }

    async fn fixture() -> Fixture {
        let accounts: Arc<dyn AccountStore> = MemoryAccountStore::new();
        let subjects: Arc<dyn SubjectStore> = MemorySubjectStore::new();

        let mut registry = IdentityProviderRegistry::new();
        registry.register(IdentityProvider::new(
            ProviderConfig::for_authority(Authority::Internal, "alpha-password", "alpha"),
            Arc::new(InternalPasswordValidator::new(accounts.clone(), 600)),
            accounts.clone(),
            subjects.clone(),
        ));
        registry.register(IdentityProvider::new(
            ProviderConfig::for_authority(Authority::Saml, "alpha-saml", "alpha"),
            Arc::new(AssertionValidator),
            accounts.clone(),
            subjects.clone(),
        ));

        seed_internal_user(&accounts, "alpha-password", "alpha", "alice", "pw123", None)
            .await
            .unwrap();

        Fixture {
            manager: AuthenticationManager::new(Arc::new(registry)),
            accounts,
        }
    }

    fn password_request(username: &str, password: &str) -> AuthRequest {
        AuthRequest::ProviderWrapped(ProviderWrappedAuthRequest {
            authority: Authority::Internal,
            provider_id: "alpha-password".to_string(),
            credential: Some(Credential::Password {
                username: username.to_string(),
                password: password.to_string(),
            }),
            web_details: None,
        })
    }

    #[tokio::test]
    async fn non_wrapped_request_fails_before_provider_code() {
        let f = fixture().await;
        let err = f
            .manager
            .authenticate(AuthRequest::ClientSecret {
                client_id: "c1".to_string(),
                client_secret: "s".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AuthenticationError::UnsupportedRequest));
    }

    #[tokio::test]
    async fn blank_provider_id_is_provider_not_found() {
        let f = fixture().await;
        let err = f
            .manager
            .authenticate(AuthRequest::ProviderWrapped(ProviderWrappedAuthRequest {
                authority: Authority::Internal,
                provider_id: "  ".to_string(),
                credential: None,
                web_details: None,
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthenticationError::ProviderNotFound { .. }));
    }

    #[tokio::test]
    async fn unregistered_provider_is_provider_not_found() {
        let f = fixture().await;
        let err = f
            .manager
            .authenticate(AuthRequest::ProviderWrapped(ProviderWrappedAuthRequest {
                authority: Authority::Oidc,
                provider_id: "nowhere".to_string(),
                credential: None,
                web_details: None,
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthenticationError::ProviderNotFound { .. }));
    }

    #[tokio::test]
    async fn missing_inner_token_is_bad_credentials() {
        let f = fixture().await;
        let err = f
            .manager
            .authenticate(AuthRequest::ProviderWrapped(ProviderWrappedAuthRequest {
                authority: Authority::Internal,
                provider_id: "alpha-password".to_string(),
                credential: None,
                web_details: None,
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthenticationError::MissingCredentials));
    }

    #[tokio::test]
    async fn assertion_without_subject_claim_is_missing_principal() {
        let f = fixture().await;
        let err = f
            .manager
            .authenticate(AuthRequest::ProviderWrapped(ProviderWrappedAuthRequest {
                authority: Authority::Saml,
                provider_id: "alpha-saml".to_string(),
                credential: Some(Credential::Assertion {
                    claims: HashMap::from([("name".to_string(), "Alice".to_string())]),
                    expires_at: None,
                }),
                web_details: None,
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthenticationError::MissingPrincipal));
    }

    #[tokio::test]
    async fn successful_login_builds_composite_with_erased_credentials() {
        let f = fixture().await;
        let auth = f
            .manager
            .authenticate(password_request("alice", "pw123"))
            .await
            .unwrap();

        assert!(auth.is_authenticated());
        assert_eq!(auth.realm(), "alpha");
        assert!(auth.credentials().is_none());
        for token in auth.authentications() {
            assert!(token.credentials().is_none());
            assert!(token.principal().attributes.get("password").is_none());
        }
        let details = auth.details();
        assert_eq!(details.identities.len(), 1);
        assert!(!details.attribute_sets.is_empty());
    }

    #[tokio::test]
    async fn repeated_logins_resolve_the_same_subject() {
        let f = fixture().await;
        let first = f
            .manager
            .authenticate(password_request("alice", "pw123"))
            .await
            .unwrap();
        let second = f
            .manager
            .authenticate(password_request("alice", "pw123"))
            .await
            .unwrap();

        assert_eq!(
            first.subject().subject_id,
            second.subject().subject_id
        );
    }

    #[tokio::test]
    async fn wrong_password_is_invalid_credentials() {
        let f = fixture().await;
        let err = f
            .manager
            .authenticate(password_request("alice", "nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthenticationError::InvalidCredentials));
        // No partial state: the seeded account still has no subject binding.
        let account = f
            .accounts
            .find_by_user_id("alpha-password", "alice")
            .await
            .unwrap()
            .unwrap();
        assert!(account.subject_id.is_empty());
    }
}
