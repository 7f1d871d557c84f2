use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::services::identity::principal::{Authority, UserAuthenticatedPrincipal};

// Normalized attribute-set vocabulary shared by every authority.
pub const SET_OPENID: &str = "openid";
pub const SET_EMAIL: &str = "email";
pub const SET_ACCOUNT: &str = "account";
pub const SET_BASIC: &str = "basic";
pub const SET_SAML: &str = "saml";
pub const SET_SPID: &str = "spid";

/// One named, normalized attribute set asserted for a principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAttributes {
    pub set_id: String,
    pub provider_id: String,
    pub realm: String,
    pub attributes: HashMap<String, String>,
}

impl UserAttributes {
    fn new(set_id: &str, principal: &UserAuthenticatedPrincipal) -> Self {
        Self {
            set_id: set_id.to_string(),
            provider_id: principal.provider_id.clone(),
            realm: principal.realm.clone(),
            attributes: HashMap::new(),
        }
    }

    fn put(&mut self, key: &str, value: impl Into<String>) {
        self.attributes.insert(key.to_string(), value.into());
    }

    fn put_opt(&mut self, key: &str, value: Option<&str>) {
        if let Some(v) = value {
            self.put(key, v);
        }
    }
}

/// Map upstream claims onto the platform's normalized attribute sets.
///
/// Every authority produces the common `openid`, `account` and (when an email
/// was asserted) `email` sets; SAML and SPID additionally export their raw
/// claim snapshot under a protocol-named set so relying applications can get
/// at protocol-specific fields without the broker re-interpreting them.
pub fn convert_attributes(principal: &UserAuthenticatedPrincipal) -> Vec<UserAttributes> {
    let mut sets = Vec::new();

    let mut openid = UserAttributes::new(SET_OPENID, principal);
    openid.put("sub", principal.user_id.clone());
    openid.put_opt("name", principal.name.as_deref());
    openid.put_opt(
        "preferred_username",
        principal.attributes.get("username").map(String::as_str),
    );
    sets.push(openid);

    if let Some(email) = principal.email() {
        let mut set = UserAttributes::new(SET_EMAIL, principal);
        set.put("email", email);
        set.put("email_verified", principal.email_verified().to_string());
        sets.push(set);
    }

    let mut account = UserAttributes::new(SET_ACCOUNT, principal);
    account.put("user_id", principal.user_id.clone());
    account.put("realm", principal.realm.clone());
    account.put("provider", principal.provider_id.clone());
    account.put("authority", principal.authority.as_str());
    sets.push(account);

    match principal.authority {
        Authority::Saml => sets.push(raw_snapshot(SET_SAML, principal)),
        Authority::Spid => sets.push(raw_snapshot(SET_SPID, principal)),
        Authority::Internal | Authority::Oidc => {}
    }

    sets
}

fn raw_snapshot(set_id: &str, principal: &UserAuthenticatedPrincipal) -> UserAttributes {
    let mut set = UserAttributes::new(set_id, principal);
    for (k, v) in &principal.attributes {
        // Credential-shaped keys never leave the principal.
        if k == "password" || k == "credentials" || k == "secret" {
            continue;
        }
        set.put(k, v.clone());
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn principal(authority: Authority) -> UserAuthenticatedPrincipal {
        UserAuthenticatedPrincipal {
            authority,
            provider_id: "alpha-saml".into(),
            realm: "alpha".into(),
            user_id: "u-1".into(),
            name: Some("Alice".into()),
            attributes: HashMap::from([
                ("email".to_string(), "alice@example.org".to_string()),
                ("email_verified".to_string(), "true".to_string()),
                ("password".to_string(), "nope".to_string()),
            ]),
        }
    }

    #[test]
    fn produces_openid_email_and_account_sets() {
        let sets = convert_attributes(&principal(Authority::Oidc));
        let ids: Vec<&str> = sets.iter().map(|s| s.set_id.as_str()).collect();
        assert_eq!(ids, vec![SET_OPENID, SET_EMAIL, SET_ACCOUNT]);
    }

    #[test]
    fn saml_adds_raw_snapshot_without_credentials() {
        let sets = convert_attributes(&principal(Authority::Saml));
        let saml = sets.iter().find(|s| s.set_id == SET_SAML).unwrap();
        assert!(saml.attributes.contains_key("email"));
        assert!(!saml.attributes.contains_key("password"));
    }

    #[test]
    fn email_set_omitted_when_not_asserted() {
        let mut p = principal(Authority::Internal);
        p.attributes.remove("email");
        let sets = convert_attributes(&p);
        assert!(sets.iter().all(|s| s.set_id != SET_EMAIL));
    }
}
