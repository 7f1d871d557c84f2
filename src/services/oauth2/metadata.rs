use serde::Serialize;

use crate::services::oauth2::registration::{RealmPolicy, RealmRegistry};

/// OAuth2 Authorization Server Metadata (RFC 8414), layered on the OIDC
/// discovery field set. Built once per realm at request time; all values
/// derive from the issuer URL and the realm's registration policy.
#[derive(Debug, Clone, Serialize)]
pub struct ServerMetadata {
    pub issuer: String,
    pub token_endpoint: String,
    pub introspection_endpoint: String,
    pub revocation_endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_endpoint: Option<String>,
    pub grant_types_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
    pub scopes_supported: Vec<String>,
    pub response_types_supported: Vec<String>,
    pub subject_types_supported: Vec<String>,
}

impl ServerMetadata {
    pub fn for_realm(issuer: &str, realm: &str, realms: &RealmRegistry) -> Option<Self> {
        let policy = realms.policy(realm)?;
        let base = format!("{issuer}/api/v1");

        let registration_endpoint = match policy {
            RealmPolicy::Disabled => None,
            _ => Some(format!("{base}/realms/{realm}/register")),
        };

        Some(Self {
            issuer: format!("{issuer}/realms/{realm}"),
            token_endpoint: format!("{base}/oauth2/token"),
            introspection_endpoint: format!("{base}/oauth2/introspect"),
            revocation_endpoint: format!("{base}/oauth2/revoke"),
            registration_endpoint,
            grant_types_supported: vec![
                "client_credentials".to_string(),
                "refresh_token".to_string(),
            ],
            token_endpoint_auth_methods_supported: vec![
                "client_secret_basic".to_string(),
                "client_secret_post".to_string(),
            ],
            scopes_supported: vec!["openid".to_string(), "email".to_string(), "dcr".to_string()],
            response_types_supported: vec!["token".to_string()],
            subject_types_supported: vec!["public".to_string()],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_realm_hides_registration_endpoint() {
        let realms = RealmRegistry::parse("alpha:open,gamma:disabled").unwrap();

        let open = ServerMetadata::for_realm("https://idp.example", "alpha", &realms).unwrap();
        assert_eq!(
            open.registration_endpoint.as_deref(),
            Some("https://idp.example/api/v1/realms/alpha/register")
        );
        assert_eq!(open.issuer, "https://idp.example/realms/alpha");

        let closed = ServerMetadata::for_realm("https://idp.example", "gamma", &realms).unwrap();
        assert!(closed.registration_endpoint.is_none());

        assert!(ServerMetadata::for_realm("https://idp.example", "nowhere", &realms).is_none());
    }
}
