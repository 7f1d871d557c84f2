use axum::{
    Router,
    routing::{delete, get, post},
};

use crate::api::v1::handlers::{login, oauth2, registration};
use crate::state::AppState;

pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/login/{authority}/{provider}", post(login::login))
        .route("/login/{authority}/{provider}/link", post(login::link))
        .route("/session", get(login::whoami).delete(login::logout))
        .route(
            "/session/providers/{authority}/{provider}",
            delete(login::unlink),
        )
        .route("/oauth2/token", post(oauth2::token))
        .route("/oauth2/introspect", post(oauth2::introspect))
        .route("/oauth2/revoke", post(oauth2::revoke))
        .route("/realms/{realm}/register", post(registration::register))
        .route(
            "/realms/{realm}/register/{client_id}",
            get(registration::get_client)
                .put(registration::update_client)
                .delete(registration::delete_client),
        )
        .route(
            "/realms/{realm}/.well-known/oauth-authorization-server",
            get(oauth2::metadata),
        )
        .with_state(state)
}
