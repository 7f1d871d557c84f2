use serde::Deserialize;

/// Form body for `/oauth2/token`, branched by `grant_type`.
///
/// - `session`: exchanges a live login session for a token pair; requires
///   `session_token` plus client authentication.
/// - `client_credentials`: client-only access token.
/// - `refresh_token`: requires `refresh_token` plus client authentication.
///
/// Client credentials arrive either via HTTP Basic or as
/// `client_id`/`client_secret` form fields (client_secret_post).
#[derive(Debug, Clone, Deserialize)]
pub struct TokenRequest {
    pub grant_type: String,
    pub scope: Option<String>,
    pub session_token: Option<String>,
    pub refresh_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}
