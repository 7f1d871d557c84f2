use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Upstream authentication authorities supported by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Authority {
    Internal,
    Saml,
    Spid,
    Oidc,
}

impl Authority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Authority::Internal => "internal",
            Authority::Saml => "saml",
            Authority::Spid => "spid",
            Authority::Oidc => "oidc",
        }
    }
}

impl std::str::FromStr for Authority {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "internal" => Ok(Authority::Internal),
            "saml" => Ok(Authority::Saml),
            "spid" => Ok(Authority::Spid),
            "oidc" => Ok(Authority::Oidc),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for Authority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ephemeral, provider-scoped principal.
///
/// Produced fresh on every authentication attempt; carries only what the
/// upstream provider asserted this time. Long-lived identity lives in
/// `Subject` and `Account`, never here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAuthenticatedPrincipal {
    pub authority: Authority,
    pub provider_id: String,
    pub realm: String,
    pub user_id: String,
    pub name: Option<String>,
    pub attributes: HashMap<String, String>,
}

impl UserAuthenticatedPrincipal {
    pub fn email(&self) -> Option<&str> {
        self.attributes.get("email").map(String::as_str)
    }

    pub fn email_verified(&self) -> bool {
        self.attributes
            .get("email_verified")
            .map(|v| v == "true")
            .unwrap_or(false)
    }

    /// Best-effort removal of anything credential-shaped that an upstream
    /// adapter may have left in the raw attribute map. Never fails.
    pub fn erase_credentials(&mut self) {
        self.attributes.remove("password");
        self.attributes.remove("credentials");
        self.attributes.remove("secret");
    }
}

/// Stable id for a per-provider account, derived from the provider id and the
/// provider-scoped user id. Deterministic so that repeat logins map to the
/// same account record.
pub fn account_uuid(provider_id: &str, user_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(provider_id.as_bytes());
    hasher.update(b"|");
    hasher.update(user_id.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_uuid_is_stable() {
        let a = account_uuid("realm-password", "alice");
        let b = account_uuid("realm-password", "alice");
        assert_eq!(a, b);
    }

    #[test]
    fn account_uuid_changes_with_inputs() {
        let a = account_uuid("realm-password", "alice");
        let b = account_uuid("realm-password", "bob");
        assert_ne!(a, b);
    }

    #[test]
    fn erase_credentials_strips_secret_attributes() {
        let mut p = UserAuthenticatedPrincipal {
            authority: Authority::Internal,
            provider_id: "p".into(),
            realm: "r".into(),
            user_id: "alice".into(),
            name: None,
            attributes: HashMap::from([
                ("password".to_string(), "hunter2".to_string()),
                ("email".to_string(), "a@example.org".to_string()),
            ]),
        };
        p.erase_credentials();
        assert!(p.attributes.get("password").is_none());
        assert_eq!(p.email(), Some("a@example.org"));
    }
}
