use serde::Deserialize;

/// Form body for `/oauth2/introspect` (RFC 7662) and `/oauth2/revoke`
/// (RFC 7009). The hint is accepted and ignored; both endpoints try refresh
/// and access interpretations as needed.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenTypeRequest {
    pub token: String,
    #[allow(dead_code)]
    pub token_type_hint: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}
