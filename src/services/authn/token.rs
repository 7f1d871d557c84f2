use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::services::authn::manager::AuthenticationError;
use crate::services::identity::attributes::UserAttributes;
use crate::services::identity::identity::UserIdentity;
use crate::services::identity::principal::{Authority, UserAuthenticatedPrincipal};
use crate::services::identity::subject::Subject;
use crate::services::oauth2::client_store::RegisteredClient;

/// Request-level context captured when a login arrives over HTTP.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebAuthenticationDetails {
    pub remote_address: Option<String>,
    pub user_agent: Option<String>,
}

/// One completed login at one upstream provider.
///
/// Wraps the validated principal together with authority/provider/realm
/// metadata and an issue timestamp. Immutable after construction except for
/// the erase-credentials side effect.
#[derive(Debug, Clone)]
pub struct ExtendedAuthenticationToken {
    authority: Authority,
    provider_id: String,
    realm: String,
    principal: UserAuthenticatedPrincipal,
    credentials: Option<String>,
    issued_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    authorities: BTreeSet<String>,
    authenticated: bool,
}

impl ExtendedAuthenticationToken {
    /// The only path to an authenticated token: the authorities-bearing
    /// constructor.
    pub fn authenticated(
        principal: UserAuthenticatedPrincipal,
        credentials: Option<String>,
        expires_at: Option<DateTime<Utc>>,
        authorities: BTreeSet<String>,
    ) -> Self {
        Self {
            authority: principal.authority,
            provider_id: principal.provider_id.clone(),
            realm: principal.realm.clone(),
            principal,
            credentials,
            issued_at: Utc::now(),
            expires_at,
            authorities,
            authenticated: true,
        }
    }

    pub fn authority(&self) -> Authority {
        self.authority
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    pub fn principal(&self) -> &UserAuthenticatedPrincipal {
        &self.principal
    }

    pub fn user_id(&self) -> &str {
        &self.principal.user_id
    }

    pub fn credentials(&self) -> Option<&str> {
        self.credentials.as_deref()
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn authorities(&self) -> &BTreeSet<String> {
        &self.authorities
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|e| e <= now).unwrap_or(false)
    }

    /// The trust flag can only be cleared, never set. Forged elevation of an
    /// existing token must be impossible.
    pub fn set_authenticated(&mut self, value: bool) -> Result<(), AuthenticationError> {
        if value {
            return Err(AuthenticationError::IllegalStateChange);
        }
        self.authenticated = false;
        Ok(())
    }

    /// Drops the inner credential and anything credential-shaped the
    /// principal still carries. Never fails.
    pub fn erase_credentials(&mut self) {
        self.credentials = None;
        self.principal.erase_credentials();
    }
}

/// Aggregated view over all linked identities of one session.
#[derive(Debug, Clone, Default)]
pub struct UserDetails {
    pub identities: Vec<UserIdentity>,
    pub attribute_sets: Vec<UserAttributes>,
}

impl UserDetails {
    fn merge(&mut self, identity: UserIdentity, attribute_sets: Vec<UserAttributes>) {
        // One identity per provider; a repeat login replaces the old snapshot.
        self.identities
            .retain(|i| i.account.provider_id != identity.account.provider_id);
        self.attribute_sets
            .retain(|s| s.provider_id != identity.account.provider_id);
        self.identities.push(identity);
        self.attribute_sets.extend(attribute_sets);
    }

    pub fn username(&self) -> Option<&str> {
        self.identities
            .iter()
            .find_map(|i| i.account.username.as_deref())
    }
}

struct UserAuthInner {
    tokens: Vec<ExtendedAuthenticationToken>,
    details: UserDetails,
}

/// Composite, session-scoped authentication: one subject, one token per
/// linked provider, aggregated details and authorities.
///
/// The member set is shared by every concurrent request of the session, so
/// all mutation goes through the per-instance mutex. The lock is only held
/// for in-memory work, never across await points.
pub struct UserAuthenticationToken {
    subject: Subject,
    realm: String,
    created_at: DateTime<Utc>,
    web_details: Option<WebAuthenticationDetails>,
    inner: Mutex<UserAuthInner>,
}

impl std::fmt::Debug for UserAuthenticationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserAuthenticationToken")
            .field("subject", &self.subject.subject_id)
            .field("realm", &self.realm)
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl UserAuthenticationToken {
    /// Build an authenticated composite from the first completed login.
    /// The initial token must belong to the subject's realm.
    pub fn new(
        subject: Subject,
        token: ExtendedAuthenticationToken,
        identity: UserIdentity,
        attribute_sets: Vec<UserAttributes>,
        web_details: Option<WebAuthenticationDetails>,
    ) -> Result<Arc<Self>, AuthenticationError> {
        if token.realm() != subject.realm {
            return Err(AuthenticationError::RealmMismatch {
                expected: subject.realm.clone(),
                actual: token.realm().to_string(),
            });
        }

        let mut details = UserDetails::default();
        details.merge(identity, attribute_sets);

        let realm = subject.realm.clone();
        Ok(Arc::new(Self {
            subject,
            realm,
            created_at: Utc::now(),
            web_details,
            inner: Mutex::new(UserAuthInner {
                tokens: vec![token],
                details,
            }),
        }))
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn web_details(&self) -> Option<&WebAuthenticationDetails> {
        self.web_details.as_ref()
    }

    /// Link a further provider login into this session. Fails without
    /// touching the set when the token belongs to another realm.
    pub fn add_authentication(
        &self,
        token: ExtendedAuthenticationToken,
    ) -> Result<(), AuthenticationError> {
        if token.realm() != self.realm {
            return Err(AuthenticationError::RealmMismatch {
                expected: self.realm.clone(),
                actual: token.realm().to_string(),
            });
        }

        let mut inner = self.inner.lock().expect("token set lock poisoned");
        // Re-login at the same provider replaces the previous token.
        inner.tokens.retain(|t| {
            !(t.authority() == token.authority()
                && t.provider_id() == token.provider_id()
                && t.user_id() == token.user_id())
        });
        inner.tokens.push(token);
        Ok(())
    }

    /// Fold another composite's member tokens and identities into this one,
    /// for linking a further provider login into a live session.
    ///
    /// Both composites must resolve to the same durable subject: a valid
    /// same-realm login that resolved to a different subject belongs to a
    /// different real user and must never be absorbed. On any failure this
    /// composite is left unchanged.
    pub fn merge_from(&self, other: &UserAuthenticationToken) -> Result<(), AuthenticationError> {
        if other.realm() != self.realm {
            return Err(AuthenticationError::RealmMismatch {
                expected: self.realm.clone(),
                actual: other.realm().to_string(),
            });
        }
        if other.subject().subject_id != self.subject.subject_id {
            return Err(AuthenticationError::SubjectMismatch {
                expected: self.subject.subject_id.clone(),
                actual: other.subject().subject_id.clone(),
            });
        }

        // Both guards passed, so every member below is realm-compatible and
        // the per-token add cannot fail partway.
        for token in other.authentications() {
            self.add_authentication(token)?;
        }
        for identity in other.details().identities {
            let sets = identity.attribute_sets.clone();
            self.merge_identity(identity, sets);
        }
        Ok(())
    }

    /// First exact match on (authority, provider, user id), if any.
    pub fn get_authentication(
        &self,
        authority: Authority,
        provider_id: &str,
        user_id: &str,
    ) -> Option<ExtendedAuthenticationToken> {
        let inner = self.inner.lock().expect("token set lock poisoned");
        inner
            .tokens
            .iter()
            .find(|t| {
                t.authority() == authority
                    && t.provider_id() == provider_id
                    && t.user_id() == user_id
            })
            .cloned()
    }

    /// Remove one member token (expiry pruning, per-provider logout).
    pub fn erase_authentication(
        &self,
        authority: Authority,
        provider_id: &str,
        user_id: &str,
    ) -> bool {
        let mut inner = self.inner.lock().expect("token set lock poisoned");
        let before = inner.tokens.len();
        inner.tokens.retain(|t| {
            !(t.authority() == authority
                && t.provider_id() == provider_id
                && t.user_id() == user_id)
        });
        inner.tokens.len() < before
    }

    /// Snapshot of the current member tokens.
    pub fn authentications(&self) -> Vec<ExtendedAuthenticationToken> {
        let inner = self.inner.lock().expect("token set lock poisoned");
        inner.tokens.clone()
    }

    /// Snapshot of the aggregated details.
    pub fn details(&self) -> UserDetails {
        let inner = self.inner.lock().expect("token set lock poisoned");
        inner.details.clone()
    }

    /// Merge a linked identity's details into the aggregate.
    pub fn merge_identity(&self, identity: UserIdentity, attribute_sets: Vec<UserAttributes>) {
        let mut inner = self.inner.lock().expect("token set lock poisoned");
        inner.details.merge(identity, attribute_sets);
    }

    /// Union of authorities over all authenticated member tokens.
    pub fn authorities(&self) -> BTreeSet<String> {
        let inner = self.inner.lock().expect("token set lock poisoned");
        inner
            .tokens
            .iter()
            .filter(|t| t.is_authenticated())
            .flat_map(|t| t.authorities().iter().cloned())
            .collect()
    }

    /// Authenticated while at least one member token is live.
    pub fn is_authenticated(&self) -> bool {
        let inner = self.inner.lock().expect("token set lock poisoned");
        inner.tokens.iter().any(|t| t.is_authenticated())
    }

    /// The composite is expired once no member token remains valid.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let inner = self.inner.lock().expect("token set lock poisoned");
        inner.tokens.iter().all(|t| t.is_expired(now))
    }

    /// Drop individually expired member tokens; returns (removed, remaining).
    pub fn prune_expired(&self, now: DateTime<Utc>) -> (usize, usize) {
        let mut inner = self.inner.lock().expect("token set lock poisoned");
        let before = inner.tokens.len();
        inner.tokens.retain(|t| !t.is_expired(now));
        let remaining = inner.tokens.len();
        (before - remaining, remaining)
    }

    /// Always fails for `true`; an existing composite can only be demoted.
    pub fn set_authenticated(&self, value: bool) -> Result<(), AuthenticationError> {
        if value {
            return Err(AuthenticationError::IllegalStateChange);
        }
        let mut inner = self.inner.lock().expect("token set lock poisoned");
        for token in &mut inner.tokens {
            // Clearing is always permitted.
            let _ = token.set_authenticated(false);
        }
        Ok(())
    }

    /// Credentials never survive composite construction.
    pub fn credentials(&self) -> Option<String> {
        None
    }

    /// Best-effort hygiene over every member token and identity.
    pub fn erase_credentials(&self) {
        let mut inner = self.inner.lock().expect("token set lock poisoned");
        for token in &mut inner.tokens {
            token.erase_credentials();
        }
        for identity in &mut inner.details.identities {
            identity.erase_credentials();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAuthenticationMethod {
    SecretBasic,
    SecretPost,
    None,
}

impl ClientAuthenticationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientAuthenticationMethod::SecretBasic => "client_secret_basic",
            ClientAuthenticationMethod::SecretPost => "client_secret_post",
            ClientAuthenticationMethod::None => "none",
        }
    }
}

/// Authenticated (or anonymous) OAuth2 client, mirroring the per-provider
/// principal pattern. The trust flag is fixed at construction.
#[derive(Debug, Clone)]
pub struct ClientAuthenticationToken {
    client_id: String,
    realm: String,
    client: RegisteredClient,
    method: ClientAuthenticationMethod,
    authorities: BTreeSet<String>,
    authenticated: bool,
    web_details: Option<WebAuthenticationDetails>,
}

impl ClientAuthenticationToken {
    pub fn authenticated(
        client: RegisteredClient,
        method: ClientAuthenticationMethod,
        authorities: BTreeSet<String>,
    ) -> Self {
        Self {
            client_id: client.client_id.clone(),
            realm: client.realm.clone(),
            client,
            method,
            authorities,
            authenticated: true,
            web_details: None,
        }
    }

    pub fn unauthenticated(client: RegisteredClient, method: ClientAuthenticationMethod) -> Self {
        Self {
            client_id: client.client_id.clone(),
            realm: client.realm.clone(),
            client,
            method,
            authorities: BTreeSet::new(),
            authenticated: false,
            web_details: None,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    pub fn client(&self) -> &RegisteredClient {
        &self.client
    }

    pub fn method(&self) -> ClientAuthenticationMethod {
        self.method
    }

    pub fn authorities(&self) -> &BTreeSet<String> {
        &self.authorities
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn set_authenticated(&mut self, value: bool) -> Result<(), AuthenticationError> {
        if value {
            return Err(AuthenticationError::IllegalStateChange);
        }
        self.authenticated = false;
        Ok(())
    }

    pub fn with_web_details(mut self, details: WebAuthenticationDetails) -> Self {
        self.web_details = Some(details);
        self
    }

    pub fn web_details(&self) -> Option<&WebAuthenticationDetails> {
        self.web_details.as_ref()
    }
}

/// Exactly one user authentication paired with exactly one client
/// authentication, for flows acting on behalf of a user via a client.
#[derive(Debug, Clone)]
pub struct ComposedAuthenticationToken {
    pub user: Arc<UserAuthenticationToken>,
    pub client: ClientAuthenticationToken,
}

impl ComposedAuthenticationToken {
    pub fn new(user: Arc<UserAuthenticationToken>, client: ClientAuthenticationToken) -> Self {
        Self { user, client }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_authenticated() && self.client.is_authenticated()
    }

    /// Dedup union of both parties' authorities.
    pub fn authorities(&self) -> BTreeSet<String> {
        let mut set = self.user.authorities();
        set.extend(self.client.authorities().iter().cloned());
        set
    }
}

/// The one authentication shape the rest of the system consumes, dispatched
/// by match instead of downcasts.
#[derive(Debug, Clone)]
pub enum Authentication {
    User(Arc<UserAuthenticationToken>),
    Client(ClientAuthenticationToken),
    Composed(ComposedAuthenticationToken),
}

impl Authentication {
    pub fn is_authenticated(&self) -> bool {
        match self {
            Authentication::User(u) => u.is_authenticated(),
            Authentication::Client(c) => c.is_authenticated(),
            Authentication::Composed(t) => t.is_authenticated(),
        }
    }

    pub fn authorities(&self) -> BTreeSet<String> {
        match self {
            Authentication::User(u) => u.authorities(),
            Authentication::Client(c) => c.authorities().clone(),
            Authentication::Composed(t) => t.authorities(),
        }
    }

    pub fn realm(&self) -> &str {
        match self {
            Authentication::User(u) => u.realm(),
            Authentication::Client(c) => c.realm(),
            Authentication::Composed(t) => t.user.realm(),
        }
    }

    /// Subject id for user-bearing variants.
    pub fn subject_id(&self) -> Option<&str> {
        match self {
            Authentication::User(u) => Some(&u.subject().subject_id),
            Authentication::Client(_) => None,
            Authentication::Composed(t) => Some(&t.user.subject().subject_id),
        }
    }

    pub fn client_id(&self) -> Option<&str> {
        match self {
            Authentication::User(_) => None,
            Authentication::Client(c) => Some(c.client_id()),
            Authentication::Composed(t) => Some(t.client.client_id()),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::collections::HashMap;

    use crate::services::identity::attributes::convert_attributes;
    use crate::services::identity::identity::Account;
    use crate::services::identity::principal::account_uuid;

    pub fn principal(
        authority: Authority,
        provider_id: &str,
        realm: &str,
        user_id: &str,
    ) -> UserAuthenticatedPrincipal {
        UserAuthenticatedPrincipal {
            authority,
            provider_id: provider_id.to_string(),
            realm: realm.to_string(),
            user_id: user_id.to_string(),
            name: Some(user_id.to_string()),
            attributes: HashMap::new(),
        }
    }

    pub fn token(
        authority: Authority,
        provider_id: &str,
        realm: &str,
        user_id: &str,
        authorities: &[&str],
        expires_at: Option<DateTime<Utc>>,
    ) -> ExtendedAuthenticationToken {
        ExtendedAuthenticationToken::authenticated(
            principal(authority, provider_id, realm, user_id),
            Some("s3cr3t".to_string()),
            expires_at,
            authorities.iter().map(|a| a.to_string()).collect(),
        )
    }

    pub fn identity(authority: Authority, provider_id: &str, realm: &str, user_id: &str) -> UserIdentity {
        let principal = principal(authority, provider_id, realm, user_id);
        let now = Utc::now();
        UserIdentity {
            account: Account {
                uuid: account_uuid(provider_id, user_id),
                provider_id: provider_id.to_string(),
                user_id: user_id.to_string(),
                subject_id: format!("sub-{user_id}"),
                realm: realm.to_string(),
                username: Some(user_id.to_string()),
                email: None,
                email_verified: false,
                attributes: HashMap::new(),
                created_at: now,
                updated_at: now,
            },
            attribute_sets: convert_attributes(&principal),
            principal,
        }
    }

    pub fn composite(realm: &str, user_id: &str) -> Arc<UserAuthenticationToken> {
        let subject = Subject::user(format!("sub-{user_id}"), realm);
        let token = token(
            Authority::Internal,
            "pw",
            realm,
            user_id,
            &["ROLE_USER"],
            None,
        );
        let identity = identity(Authority::Internal, "pw", realm, user_id);
        let sets = identity.attribute_sets.clone();
        UserAuthenticationToken::new(subject, token, identity, sets, None).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use chrono::Duration;

    use crate::services::oauth2::client_store::test_client;

    #[test]
    fn erase_credentials_propagates_to_wrapped_token() {
        let composite = composite("alpha", "alice");
        composite.erase_credentials();
        assert!(composite.credentials().is_none());
        for t in composite.authentications() {
            assert!(t.credentials().is_none());
            assert!(t.principal().attributes.get("password").is_none());
        }
    }

    #[test]
    fn composite_credentials_are_never_exposed() {
        let composite = composite("alpha", "alice");
        // Even before erasure the composite never surfaces member credentials.
        assert!(composite.credentials().is_none());
    }

    #[test]
    fn set_authenticated_true_always_fails() {
        let composite = composite("alpha", "alice");
        assert!(matches!(
            composite.set_authenticated(true),
            Err(AuthenticationError::IllegalStateChange)
        ));

        let mut member = token(Authority::Saml, "idp", "alpha", "alice", &[], None);
        assert!(member.set_authenticated(true).is_err());
        assert!(member.set_authenticated(false).is_ok());
        assert!(!member.is_authenticated());

        let mut client =
            ClientAuthenticationToken::unauthenticated(test_client("c1", "alpha"), ClientAuthenticationMethod::SecretBasic);
        assert!(client.set_authenticated(true).is_err());
        assert!(!client.is_authenticated());
    }

    #[test]
    fn add_authentication_rejects_foreign_realm_and_leaves_set_unchanged() {
        let composite = composite("alpha", "alice");
        let foreign = token(Authority::Saml, "idp", "beta", "alice", &["ROLE_SAML"], None);

        let err = composite.add_authentication(foreign).unwrap_err();
        assert!(matches!(err, AuthenticationError::RealmMismatch { .. }));
        assert_eq!(composite.authentications().len(), 1);
        assert_eq!(
            composite.authorities(),
            BTreeSet::from(["ROLE_USER".to_string()])
        );
    }

    #[test]
    fn linking_second_provider_unions_authorities() {
        let composite = composite("alpha", "alice");
        let saml = token(
            Authority::Saml,
            "idp",
            "alpha",
            "alice@idp",
            &["ROLE_SAML"],
            None,
        );
        composite.add_authentication(saml).unwrap();

        assert_eq!(composite.authentications().len(), 2);
        assert_eq!(
            composite.authorities(),
            BTreeSet::from(["ROLE_SAML".to_string(), "ROLE_USER".to_string()])
        );
        assert!(
            composite
                .get_authentication(Authority::Saml, "idp", "alice@idp")
                .is_some()
        );
    }

    #[test]
    fn relogin_at_same_provider_replaces_token() {
        let composite = composite("alpha", "alice");
        let again = token(Authority::Internal, "pw", "alpha", "alice", &["ROLE_X"], None);
        composite.add_authentication(again).unwrap();
        assert_eq!(composite.authentications().len(), 1);
        assert_eq!(composite.authorities(), BTreeSet::from(["ROLE_X".to_string()]));
    }

    #[test]
    fn merge_refuses_a_foreign_subject_and_leaves_session_untouched() {
        let session = composite("alpha", "alice");

        // A valid same-realm SAML login that resolved to another real user.
        let foreign = {
            let subject = Subject::user("sub-bob", "alpha");
            let token = token(Authority::Saml, "idp", "alpha", "bob@idp", &["ROLE_SAML"], None);
            let identity = identity(Authority::Saml, "idp", "alpha", "bob@idp");
            let sets = identity.attribute_sets.clone();
            UserAuthenticationToken::new(subject, token, identity, sets, None).unwrap()
        };

        let err = session.merge_from(&foreign).unwrap_err();
        assert!(matches!(err, AuthenticationError::SubjectMismatch { .. }));

        // No member token and no identity of the other subject leaked in.
        assert_eq!(session.authentications().len(), 1);
        let details = session.details();
        assert_eq!(details.identities.len(), 1);
        assert!(
            details
                .identities
                .iter()
                .all(|i| i.account.subject_id == "sub-alice")
        );
    }

    #[test]
    fn merge_links_a_same_subject_login() {
        let session = composite("alpha", "alice");

        let saml = {
            let subject = Subject::user("sub-alice", "alpha");
            let token = token(
                Authority::Saml,
                "idp",
                "alpha",
                "alice@idp",
                &["ROLE_SAML"],
                None,
            );
            let mut identity = identity(Authority::Saml, "idp", "alpha", "alice@idp");
            identity.account.subject_id = "sub-alice".to_string();
            let sets = identity.attribute_sets.clone();
            UserAuthenticationToken::new(subject, token, identity, sets, None).unwrap()
        };

        session.merge_from(&saml).unwrap();
        assert_eq!(session.authentications().len(), 2);
        assert_eq!(session.details().identities.len(), 2);
        assert_eq!(
            session.authorities(),
            BTreeSet::from(["ROLE_SAML".to_string(), "ROLE_USER".to_string()])
        );
    }

    #[test]
    fn erase_authentication_removes_exactly_the_named_member() {
        let session = composite("alpha", "alice");
        session
            .add_authentication(token(
                Authority::Saml,
                "idp",
                "alpha",
                "alice@idp",
                &["ROLE_SAML"],
                None,
            ))
            .unwrap();

        assert!(session.erase_authentication(Authority::Saml, "idp", "alice@idp"));
        assert_eq!(session.authentications().len(), 1);
        assert!(
            session
                .get_authentication(Authority::Saml, "idp", "alice@idp")
                .is_none()
        );

        // Already gone: the second erase reports nothing removed.
        assert!(!session.erase_authentication(Authority::Saml, "idp", "alice@idp"));
        assert!(session.is_authenticated());
    }

    #[test]
    fn client_token_carries_web_details() {
        let details = WebAuthenticationDetails {
            remote_address: Some("203.0.113.9".to_string()),
            user_agent: Some("curl/8".to_string()),
        };
        let client = ClientAuthenticationToken::authenticated(
            test_client("c1", "alpha"),
            ClientAuthenticationMethod::SecretBasic,
            BTreeSet::new(),
        )
        .with_web_details(details.clone());

        assert_eq!(client.web_details(), Some(&details));
    }

    #[test]
    fn prune_drops_only_expired_members() {
        let now = Utc::now();
        let composite = composite("alpha", "alice");
        composite
            .add_authentication(token(
                Authority::Saml,
                "idp",
                "alpha",
                "alice@idp",
                &[],
                Some(now - Duration::minutes(1)),
            ))
            .unwrap();

        let (removed, remaining) = composite.prune_expired(now);
        assert_eq!((removed, remaining), (1, 1));
        assert!(!composite.is_expired(now));
        assert!(composite.is_authenticated());
    }

    #[test]
    fn composite_expired_when_all_members_expired() {
        let now = Utc::now();
        let subject = Subject::user("sub-alice", "alpha");
        let expired = token(
            Authority::Internal,
            "pw",
            "alpha",
            "alice",
            &[],
            Some(now - Duration::minutes(5)),
        );
        let identity = identity(Authority::Internal, "pw", "alpha", "alice");
        let sets = identity.attribute_sets.clone();
        let composite = UserAuthenticationToken::new(subject, expired, identity, sets, None).unwrap();

        assert!(composite.is_expired(now));
        let (_, remaining) = composite.prune_expired(now);
        assert_eq!(remaining, 0);
        assert!(!composite.is_authenticated());
    }

    #[test]
    fn composed_token_requires_both_parties() {
        let user = composite("alpha", "alice");
        let client = ClientAuthenticationToken::authenticated(
            test_client("c1", "alpha"),
            ClientAuthenticationMethod::SecretBasic,
            BTreeSet::from(["ROLE_CLIENT".to_string()]),
        );
        let composed = ComposedAuthenticationToken::new(user.clone(), client);
        assert!(composed.is_authenticated());
        assert_eq!(
            composed.authorities(),
            BTreeSet::from(["ROLE_CLIENT".to_string(), "ROLE_USER".to_string()])
        );

        let anon = ClientAuthenticationToken::unauthenticated(
            test_client("c1", "alpha"),
            ClientAuthenticationMethod::None,
        );
        let composed = ComposedAuthenticationToken::new(user, anon);
        assert!(!composed.is_authenticated());
    }
}
