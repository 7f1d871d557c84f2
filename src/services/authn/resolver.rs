use std::collections::HashMap;
use std::sync::Arc;

use crate::repos::account_store::AccountStore;
use crate::repos::error::RepoResult;
use crate::repos::subject_store::SubjectStore;
use crate::services::identity::principal::UserAuthenticatedPrincipal;
use crate::services::identity::subject::Subject;

/// The single attribute a provider is allowed to link accounts on.
///
/// Linking is deliberately conservative: one configured attribute, scoped to
/// the resolver's realm, gated on upstream verification where the attribute
/// is user-assertable (email).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifyingAttribute {
    Username,
    VerifiedEmail,
    FiscalNumber,
    SpidCode,
}

impl IdentifyingAttribute {
    pub fn key(&self) -> &'static str {
        match self {
            IdentifyingAttribute::Username => "username",
            IdentifyingAttribute::VerifiedEmail => "email",
            IdentifyingAttribute::FiscalNumber => "fiscal_number",
            IdentifyingAttribute::SpidCode => "spid_code",
        }
    }

    /// Whether the upstream provider must have marked the value as verified
    /// before it may be used for linking.
    pub fn requires_verification(&self) -> bool {
        matches!(self, IdentifyingAttribute::VerifiedEmail)
    }
}

/// Deterministic mapping from provider principals/accounts back to durable
/// subjects, and the conservative attribute export used for cross-provider
/// linking. One instance per identity provider.
#[derive(Clone)]
pub struct SubjectResolver {
    provider_id: String,
    realm: String,
    linkable: bool,
    identifying: IdentifyingAttribute,
    accounts: Arc<dyn AccountStore>,
    subjects: Arc<dyn SubjectStore>,
}

impl SubjectResolver {
    pub fn new(
        provider_id: String,
        realm: String,
        linkable: bool,
        identifying: IdentifyingAttribute,
        accounts: Arc<dyn AccountStore>,
        subjects: Arc<dyn SubjectStore>,
    ) -> Self {
        Self {
            provider_id,
            realm,
            linkable,
            identifying,
            accounts,
            subjects,
        }
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    /// Resolve by the provider-scoped user id. Absence is a normal "new
    /// login", not an error.
    pub async fn resolve_by_user_id(&self, user_id: &str) -> RepoResult<Option<Subject>> {
        let account = self
            .accounts
            .find_by_user_id(&self.provider_id, user_id)
            .await?;

        match account {
            Some(a) if !a.subject_id.is_empty() => self.subjects.find(&a.subject_id).await,
            _ => Ok(None),
        }
    }

    /// Resolve by the derived account uuid. Routes to the same underlying
    /// account lookup as the other keys.
    pub async fn resolve_by_account_uuid(&self, uuid: &str) -> RepoResult<Option<Subject>> {
        let account = self.accounts.find_by_uuid(&self.provider_id, uuid).await?;

        match account {
            Some(a) if !a.subject_id.is_empty() => self.subjects.find(&a.subject_id).await,
            _ => Ok(None),
        }
    }

    /// Principal ids and identity ids are both the provider-scoped user id.
    pub async fn resolve_by_principal_id(&self, id: &str) -> RepoResult<Option<Subject>> {
        self.resolve_by_user_id(id).await
    }

    pub async fn resolve_by_identity_id(&self, id: &str) -> RepoResult<Option<Subject>> {
        self.resolve_by_user_id(id).await
    }

    /// Realm-scoped cross-provider linking.
    ///
    /// Returns `Ok(None)` unless the provider is linkable, the attribute
    /// map's realm tag matches this resolver's realm, and the single
    /// configured identifying attribute matches an account in this realm.
    /// The realm gate is what prevents cross-realm account takeover via
    /// attribute collision.
    pub async fn resolve_by_attributes(
        &self,
        attributes: &HashMap<String, String>,
    ) -> RepoResult<Option<Subject>> {
        if !self.linkable {
            return Ok(None);
        }
        if attributes.get("realm").map(String::as_str) != Some(self.realm.as_str()) {
            return Ok(None);
        }

        let key = self.identifying.key();
        let Some(value) = attributes.get(key).filter(|v| !v.is_empty()) else {
            return Ok(None);
        };

        let matches = self
            .accounts
            .find_by_attribute(&self.realm, key, value)
            .await?;

        for account in matches {
            if account.subject_id.is_empty() {
                continue;
            }
            if let Some(subject) = self.subjects.find(&account.subject_id).await? {
                return Ok(Some(subject));
            }
        }
        Ok(None)
    }

    /// Export the minimal attribute map usable for linking this principal to
    /// subjects created by other providers: the configured identifying
    /// attribute (only if verified upstream where required) plus user id and
    /// realm. Never exports unrelated upstream claims.
    pub fn link_attributes(
        &self,
        principal: &UserAuthenticatedPrincipal,
    ) -> Option<HashMap<String, String>> {
        if !self.linkable {
            return None;
        }

        let key = self.identifying.key();
        let value = match self.identifying {
            IdentifyingAttribute::VerifiedEmail => {
                if !principal.email_verified() {
                    return None;
                }
                principal.email()?.to_string()
            }
            _ => principal.attributes.get(key).filter(|v| !v.is_empty())?.clone(),
        };

        Some(HashMap::from([
            ("user_id".to_string(), principal.user_id.clone()),
            ("realm".to_string(), self.realm.clone()),
            (key.to_string(), value),
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use chrono::Utc;

    use crate::repos::account_store::MemoryAccountStore;
    use crate::repos::subject_store::MemorySubjectStore;
    use crate::services::identity::identity::Account;
    use crate::services::identity::principal::{Authority, account_uuid};

    async fn seed(
        accounts: &Arc<MemoryAccountStore>,
        subjects: &Arc<MemorySubjectStore>,
        provider_id: &str,
        realm: &str,
        user_id: &str,
        email: Option<&str>,
    ) -> Subject {
        let subject = Subject::user(format!("sub-{realm}-{user_id}"), realm);
        subjects.insert(subject.clone()).await.unwrap();

        let now = Utc::now();
        accounts
            .upsert(Account {
                uuid: account_uuid(provider_id, user_id),
                provider_id: provider_id.to_string(),
                user_id: user_id.to_string(),
                subject_id: subject.subject_id.clone(),
                realm: realm.to_string(),
                username: Some(user_id.to_string()),
                email: email.map(str::to_string),
                email_verified: email.is_some(),
                attributes: HashMap::new(),
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        subject
    }

    fn resolver(
        provider_id: &str,
        realm: &str,
        accounts: Arc<MemoryAccountStore>,
        subjects: Arc<MemorySubjectStore>,
    ) -> SubjectResolver {
        SubjectResolver::new(
            provider_id.to_string(),
            realm.to_string(),
            true,
            IdentifyingAttribute::VerifiedEmail,
            accounts,
            subjects,
        )
    }

    #[tokio::test]
    async fn all_resolve_keys_route_to_same_subject() {
        let accounts = MemoryAccountStore::new();
        let subjects = MemorySubjectStore::new();
        let seeded = seed(&accounts, &subjects, "pw", "alpha", "alice", None).await;
        let r = resolver("pw", "alpha", accounts, subjects);

        let by_user = r.resolve_by_user_id("alice").await.unwrap().unwrap();
        let by_uuid = r
            .resolve_by_account_uuid(&account_uuid("pw", "alice"))
            .await
            .unwrap()
            .unwrap();
        let by_principal = r.resolve_by_principal_id("alice").await.unwrap().unwrap();

        assert_eq!(by_user.subject_id, seeded.subject_id);
        assert_eq!(by_uuid.subject_id, seeded.subject_id);
        assert_eq!(by_principal.subject_id, seeded.subject_id);
    }

    #[tokio::test]
    async fn absence_is_none_not_error() {
        let accounts = MemoryAccountStore::new();
        let subjects = MemorySubjectStore::new();
        let r = resolver("pw", "alpha", accounts, subjects);

        assert!(r.resolve_by_user_id("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn resolve_by_attributes_rejects_foreign_realm() {
        let accounts = MemoryAccountStore::new();
        let subjects = MemorySubjectStore::new();
        seed(
            &accounts,
            &subjects,
            "pw",
            "alpha",
            "alice",
            Some("alice@example.org"),
        )
        .await;
        let r = resolver("pw", "alpha", accounts, subjects);

        // Same email value, but the attribute map is tagged for another realm.
        let attrs = HashMap::from([
            ("realm".to_string(), "beta".to_string()),
            ("email".to_string(), "alice@example.org".to_string()),
        ]);
        assert!(r.resolve_by_attributes(&attrs).await.unwrap().is_none());

        let attrs = HashMap::from([
            ("realm".to_string(), "alpha".to_string()),
            ("email".to_string(), "alice@example.org".to_string()),
        ]);
        assert!(r.resolve_by_attributes(&attrs).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn link_attributes_requires_verified_email() {
        let accounts = MemoryAccountStore::new();
        let subjects = MemorySubjectStore::new();
        let r = resolver("idp", "alpha", accounts, subjects);

        let mut principal = UserAuthenticatedPrincipal {
            authority: Authority::Saml,
            provider_id: "idp".to_string(),
            realm: "alpha".to_string(),
            user_id: "alice@idp".to_string(),
            name: None,
            attributes: HashMap::from([(
                "email".to_string(),
                "alice@example.org".to_string(),
            )]),
        };

        // Present but unverified: must not be exported for linking.
        assert!(r.link_attributes(&principal).is_none());

        principal
            .attributes
            .insert("email_verified".to_string(), "true".to_string());
        let attrs = r.link_attributes(&principal).unwrap();
        assert_eq!(attrs.get("email").unwrap(), "alice@example.org");
        assert_eq!(attrs.get("realm").unwrap(), "alpha");
        // Nothing beyond the identifying attribute, user id and realm.
        assert_eq!(attrs.len(), 3);
    }

    #[tokio::test]
    async fn non_linkable_provider_never_links() {
        let accounts = MemoryAccountStore::new();
        let subjects = MemorySubjectStore::new();
        seed(
            &accounts,
            &subjects,
            "pw",
            "alpha",
            "alice",
            Some("alice@example.org"),
        )
        .await;

        let r = SubjectResolver::new(
            "pw".to_string(),
            "alpha".to_string(),
            false,
            IdentifyingAttribute::VerifiedEmail,
            accounts,
            subjects,
        );

        let attrs = HashMap::from([
            ("realm".to_string(), "alpha".to_string()),
            ("email".to_string(), "alice@example.org".to_string()),
        ]);
        assert!(r.resolve_by_attributes(&attrs).await.unwrap().is_none());
    }
}
