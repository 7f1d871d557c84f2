use std::sync::Arc;

use crate::services::authn::manager::AuthenticationManager;
use crate::services::authn::session::SessionStore;
use crate::services::oauth2::client_store::ClientStore;
use crate::services::oauth2::introspection::IntrospectionService;
use crate::services::oauth2::registration::{RealmRegistry, RegistrationService};
use crate::services::oauth2::revocation::RevocationService;
use crate::services::oauth2::token_store::TokenStore;
use crate::services::oauth2::tokens::TokenService;

/// Shared application state; everything here is built once in `app.rs` and
/// cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub issuer: String,
    pub realms: RealmRegistry,
    pub manager: Arc<AuthenticationManager>,
    pub sessions: Arc<SessionStore>,
    pub clients: Arc<ClientStore>,
    pub token_store: Arc<dyn TokenStore>,
    pub tokens: TokenService,
    pub introspection: IntrospectionService,
    pub revocation: RevocationService,
    pub registration: RegistrationService,
}
