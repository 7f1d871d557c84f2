use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::services::identity::attributes::UserAttributes;
use crate::services::identity::principal::UserAuthenticatedPrincipal;

/// Persisted per-provider account record, bound to a durable subject.
///
/// Upserted on every successful login (the upstream assertion is the source
/// of truth for mutable fields like name and email); deleted only by explicit
/// account-deletion operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    /// Stable derived id, see `principal::account_uuid`.
    pub uuid: String,
    pub provider_id: String,
    /// Provider-scoped user id as asserted by the upstream source.
    pub user_id: String,
    pub subject_id: String,
    pub realm: String,
    pub username: Option<String>,
    pub email: Option<String>,
    pub email_verified: bool,
    /// Snapshot of non-credential upstream attributes from the last login.
    pub attributes: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Durable per-provider identity: the fresh principal from this login, the
/// persisted account it maps to, and the normalized attribute sets.
#[derive(Debug, Clone)]
pub struct UserIdentity {
    pub principal: UserAuthenticatedPrincipal,
    pub account: Account,
    pub attribute_sets: Vec<UserAttributes>,
}

impl UserIdentity {
    pub fn user_id(&self) -> &str {
        &self.account.user_id
    }

    pub fn subject_id(&self) -> &str {
        &self.account.subject_id
    }

    /// Best-effort hygiene before the identity is attached to a session.
    pub fn erase_credentials(&mut self) {
        self.principal.erase_credentials();
        self.account.attributes.remove("password_hash");
    }
}
