use serde::Deserialize;

use crate::services::authn::provider::Credential;

/// Request body for `/login/{authority}/{provider}` and its `/link` variant.
///
/// The inner credential is the provider-wrapped payload as produced by the
/// protocol adapter: a username/password pair for internal providers, a
/// pre-verified claim map for assertion-based ones.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub credential: Credential,
}
