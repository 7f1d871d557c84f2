use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::repos::account_store::AccountStore;
use crate::repos::subject_store::SubjectStore;
use crate::services::authn::manager::AuthenticationError;
use crate::services::authn::resolver::{IdentifyingAttribute, SubjectResolver};
use crate::services::authn::token::ExtendedAuthenticationToken;
use crate::services::identity::attributes::convert_attributes;
use crate::services::identity::identity::{Account, UserIdentity};
use crate::services::identity::principal::{
    Authority, UserAuthenticatedPrincipal, account_uuid,
};
use crate::services::identity::subject::Subject;

/// Inner credential of a provider-wrapped authentication request.
///
/// Protocol cryptography (SAML/SPID XML signatures, upstream OIDC token
/// verification) happens outside this subsystem; assertions arrive here as
/// pre-verified claim maps and are validated at the claim level only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credential {
    Password {
        username: String,
        password: String,
    },
    Assertion {
        #[serde(default)]
        claims: HashMap<String, String>,
        expires_at: Option<DateTime<Utc>>,
    },
}

/// Static configuration of one registered identity provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub authority: Authority,
    pub provider_id: String,
    pub realm: String,
    pub name: String,
    pub linkable: bool,
    pub identifying: IdentifyingAttribute,
    /// Claim carrying the provider-scoped user id (assertion authorities).
    pub subject_claim: String,
    pub name_claim: Option<String>,
}

impl ProviderConfig {
    /// Default wiring per authority: identifying attribute, linkability and
    /// claim mapping follow the authority's conventions.
    pub fn for_authority(authority: Authority, provider_id: &str, realm: &str) -> Self {
        let (linkable, identifying, subject_claim) = match authority {
            Authority::Internal => (true, IdentifyingAttribute::VerifiedEmail, "username"),
            Authority::Saml => (true, IdentifyingAttribute::VerifiedEmail, "name_id"),
            Authority::Spid => (true, IdentifyingAttribute::FiscalNumber, "fiscal_number"),
            Authority::Oidc => (true, IdentifyingAttribute::VerifiedEmail, "sub"),
        };
        Self {
            authority,
            provider_id: provider_id.to_string(),
            realm: realm.to_string(),
            name: format!("{} ({authority})", provider_id),
            linkable,
            identifying,
            subject_claim: subject_claim.to_string(),
            name_claim: Some("name".to_string()),
        }
    }
}

/// A validated upstream login, before subject resolution.
#[derive(Debug, Clone)]
pub struct ValidatedLogin {
    pub principal: UserAuthenticatedPrincipal,
    pub authorities: BTreeSet<String>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Inner credential retained only until the manager erases it.
    pub credentials: Option<String>,
}

/// Protocol-specific credential validation behind a common seam.
#[async_trait]
pub trait CredentialValidator: Send + Sync {
    async fn validate(
        &self,
        config: &ProviderConfig,
        credential: Credential,
    ) -> Result<ValidatedLogin, AuthenticationError>;
}

pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

fn default_authorities(authority: Authority) -> BTreeSet<String> {
    let mut set = BTreeSet::from(["ROLE_USER".to_string()]);
    match authority {
        Authority::Internal => {}
        Authority::Saml => {
            set.insert("ROLE_SAML".to_string());
        }
        Authority::Spid => {
            set.insert("ROLE_SPID".to_string());
        }
        Authority::Oidc => {
            set.insert("ROLE_OIDC".to_string());
        }
    }
    set
}

/// Password check against the account store. Accounts carry a sha256 password
/// hash in their attribute snapshot; internal users must exist before they
/// can log in.
pub struct InternalPasswordValidator {
    accounts: Arc<dyn AccountStore>,
    login_ttl: Duration,
}

impl InternalPasswordValidator {
    pub fn new(accounts: Arc<dyn AccountStore>, login_ttl_seconds: i64) -> Self {
        Self {
            accounts,
            login_ttl: Duration::seconds(login_ttl_seconds),
        }
    }
}

#[async_trait]
impl CredentialValidator for InternalPasswordValidator {
    async fn validate(
        &self,
        config: &ProviderConfig,
        credential: Credential,
    ) -> Result<ValidatedLogin, AuthenticationError> {
        let Credential::Password { username, password } = credential else {
            return Err(AuthenticationError::InvalidCredentials);
        };

        // Unknown account and wrong password both surface as a 401 upstream,
        // but are distinct conditions internally.
        let account = self
            .accounts
            .find_by_user_id(&config.provider_id, &username)
            .await?
            .ok_or(AuthenticationError::AccountNotFound)?;

        let stored = account
            .attributes
            .get("password_hash")
            .ok_or(AuthenticationError::InvalidCredentials)?;
        if *stored != hash_password(&password) {
            debug!(provider = %config.provider_id, "password mismatch");
            return Err(AuthenticationError::InvalidCredentials);
        }

        let mut attributes = HashMap::from([("username".to_string(), username.clone())]);
        if let Some(email) = &account.email {
            attributes.insert("email".to_string(), email.clone());
            attributes.insert(
                "email_verified".to_string(),
                account.email_verified.to_string(),
            );
        }

        Ok(ValidatedLogin {
            principal: UserAuthenticatedPrincipal {
                authority: config.authority,
                provider_id: config.provider_id.clone(),
                realm: config.realm.clone(),
                user_id: username,
                name: account.username.clone(),
                attributes,
            },
            authorities: default_authorities(config.authority),
            expires_at: Some(Utc::now() + self.login_ttl),
            credentials: Some(password),
        })
    }
}

/// Claim-level validation for SAML/SPID/OIDC assertions whose cryptographic
/// verification already happened at the protocol edge.
pub struct AssertionValidator;

#[async_trait]
impl CredentialValidator for AssertionValidator {
    async fn validate(
        &self,
        config: &ProviderConfig,
        credential: Credential,
    ) -> Result<ValidatedLogin, AuthenticationError> {
        let Credential::Assertion { claims, expires_at } = credential else {
            return Err(AuthenticationError::InvalidCredentials);
        };

        if let Some(exp) = expires_at
            && exp <= Utc::now()
        {
            debug!(provider = %config.provider_id, "assertion already expired");
            return Err(AuthenticationError::InvalidCredentials);
        }

        // The subject claim may legitimately be absent here; the manager
        // performs the missing-principal check after validation.
        let user_id = claims.get(&config.subject_claim).cloned().unwrap_or_default();
        let name = config
            .name_claim
            .as_ref()
            .and_then(|c| claims.get(c))
            .cloned();

        Ok(ValidatedLogin {
            principal: UserAuthenticatedPrincipal {
                authority: config.authority,
                provider_id: config.provider_id.clone(),
                realm: config.realm.clone(),
                user_id,
                name,
                attributes: claims,
            },
            authorities: default_authorities(config.authority),
            expires_at,
            credentials: None,
        })
    }
}

/// Per-authority orchestrator: validates raw credentials into extended
/// tokens and converts principals into persisted identities bound to a
/// durable subject.
pub struct IdentityProvider {
    config: ProviderConfig,
    validator: Arc<dyn CredentialValidator>,
    resolver: SubjectResolver,
    accounts: Arc<dyn AccountStore>,
    subjects: Arc<dyn SubjectStore>,
}

impl IdentityProvider {
    pub fn new(
        config: ProviderConfig,
        validator: Arc<dyn CredentialValidator>,
        accounts: Arc<dyn AccountStore>,
        subjects: Arc<dyn SubjectStore>,
    ) -> Self {
        let resolver = SubjectResolver::new(
            config.provider_id.clone(),
            config.realm.clone(),
            config.linkable,
            config.identifying,
            accounts.clone(),
            subjects.clone(),
        );
        Self {
            config,
            validator,
            resolver,
            accounts,
            subjects,
        }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn resolver(&self) -> &SubjectResolver {
        &self.resolver
    }

    /// Run the protocol validation and wrap the result.
    pub async fn authenticate(
        &self,
        credential: Credential,
    ) -> Result<ExtendedAuthenticationToken, AuthenticationError> {
        let login = self.validator.validate(&self.config, credential).await?;
        Ok(ExtendedAuthenticationToken::authenticated(
            login.principal,
            login.credentials,
            login.expires_at,
            login.authorities,
        ))
    }

    /// Upsert the account for this login and bind it to a subject: the
    /// account's existing subject if known, a cross-provider linked subject
    /// when the conservative attribute export matches one, or a freshly
    /// minted subject otherwise.
    pub async fn convert_identity(
        &self,
        principal: &UserAuthenticatedPrincipal,
    ) -> Result<UserIdentity, AuthenticationError> {
        let existing = self
            .accounts
            .find_by_user_id(&self.config.provider_id, &principal.user_id)
            .await?;

        let subject_id = match existing.as_ref().filter(|a| !a.subject_id.is_empty()) {
            Some(a) => a.subject_id.clone(),
            None => match self.linked_subject(principal).await? {
                Some(subject) => {
                    debug!(
                        provider = %self.config.provider_id,
                        subject = %subject.subject_id,
                        "linked login to existing subject"
                    );
                    subject.subject_id
                }
                None => {
                    let subject = Subject::user(Uuid::new_v4().to_string(), &principal.realm)
                        .with_name(principal.name.clone());
                    self.subjects.insert(subject.clone()).await?;
                    subject.subject_id
                }
            },
        };

        let now = Utc::now();
        let mut attributes = principal.attributes.clone();
        attributes.remove("password");
        attributes.remove("credentials");
        attributes.remove("secret");
        // Preserve server-side account state across upserts.
        if let Some(prev) = existing.as_ref() {
            for key in ["password_hash"] {
                if let Some(v) = prev.attributes.get(key) {
                    attributes.insert(key.to_string(), v.clone());
                }
            }
        }

        let account = self
            .accounts
            .upsert(Account {
                uuid: account_uuid(&self.config.provider_id, &principal.user_id),
                provider_id: self.config.provider_id.clone(),
                user_id: principal.user_id.clone(),
                subject_id,
                realm: principal.realm.clone(),
                username: principal
                    .attributes
                    .get("username")
                    .cloned()
                    .or_else(|| existing.as_ref().and_then(|a| a.username.clone())),
                email: principal.email().map(str::to_string),
                email_verified: principal.email_verified(),
                attributes,
                created_at: existing.as_ref().map(|a| a.created_at).unwrap_or(now),
                updated_at: now,
            })
            .await?;

        Ok(UserIdentity {
            principal: principal.clone(),
            attribute_sets: convert_attributes(principal),
            account,
        })
    }

    async fn linked_subject(
        &self,
        principal: &UserAuthenticatedPrincipal,
    ) -> Result<Option<Subject>, AuthenticationError> {
        let Some(attrs) = self.resolver.link_attributes(principal) else {
            return Ok(None);
        };
        Ok(self.resolver.resolve_by_attributes(&attrs).await?)
    }
}

/// Provider registry, built at startup and read-only afterwards.
#[derive(Default)]
pub struct IdentityProviderRegistry {
    providers: HashMap<String, Arc<IdentityProvider>>,
}

impl IdentityProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: IdentityProvider) {
        self.providers
            .insert(provider.config().provider_id.clone(), Arc::new(provider));
    }

    pub fn has_authority(&self, authority: Authority) -> bool {
        self.providers
            .values()
            .any(|p| p.config().authority == authority)
    }

    /// Lookup by provider id, constrained to the claimed authority.
    pub fn provider(
        &self,
        authority: Authority,
        provider_id: &str,
    ) -> Option<Arc<IdentityProvider>> {
        self.providers
            .get(provider_id)
            .filter(|p| p.config().authority == authority)
            .cloned()
    }

    pub fn providers(&self) -> impl Iterator<Item = &Arc<IdentityProvider>> {
        self.providers.values()
    }
}

/// Create an internal account that can log in with a password. Used for
/// seeding development users and by tests.
pub async fn seed_internal_user(
    accounts: &Arc<dyn AccountStore>,
    provider_id: &str,
    realm: &str,
    username: &str,
    password: &str,
    email: Option<&str>,
) -> Result<(), AuthenticationError> {
    let now = Utc::now();
    let mut attributes = HashMap::from([(
        "password_hash".to_string(),
        hash_password(password),
    )]);
    attributes.insert("username".to_string(), username.to_string());

    accounts
        .upsert(Account {
            uuid: account_uuid(provider_id, username),
            provider_id: provider_id.to_string(),
            user_id: username.to_string(),
            // Assigned on first login during identity conversion.
            subject_id: String::new(),
            realm: realm.to_string(),
            username: Some(username.to_string()),
            email: email.map(str::to_string),
            email_verified: email.is_some(),
            attributes,
            created_at: now,
            updated_at: now,
        })
        .await?;
    Ok(())
}
