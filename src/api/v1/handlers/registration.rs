use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
};

use crate::error::AppError;
use crate::services::oauth2::registration::{
    ClientRegistrationRequest, ClientRegistrationResponse,
};
use crate::state::AppState;

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// `POST /realms/{realm}/register` (RFC 7591).
///
/// For realms with an `authenticated` policy the caller's bearer access
/// token must carry the dcr scope; its scope set is looked up from the token
/// store and handed to the policy check.
pub async fn register(
    State(state): State<AppState>,
    Path(realm): Path<String>,
    headers: HeaderMap,
    Json(req): Json<ClientRegistrationRequest>,
) -> Result<(StatusCode, Json<ClientRegistrationResponse>), AppError> {
    let caller_scopes = match bearer_token(&headers) {
        Some(token) => state
            .token_store
            .read_access(token)
            .await?
            .filter(|(record, _)| !record.is_expired(chrono::Utc::now()))
            .map(|(record, _)| record.scope),
        None => None,
    };

    let response = state
        .registration
        .register(&realm, req, caller_scopes.as_ref())
        .await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// `GET /realms/{realm}/register/{client_id}` (RFC 7592).
pub async fn get_client(
    State(state): State<AppState>,
    Path((realm, client_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<ClientRegistrationResponse>, AppError> {
    let token = bearer_token(&headers).ok_or(AppError::Unauthorized)?;
    let response = state.registration.get(&realm, &client_id, token).await?;
    Ok(Json(response))
}

/// `PUT /realms/{realm}/register/{client_id}` (RFC 7592).
pub async fn update_client(
    State(state): State<AppState>,
    Path((realm, client_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(req): Json<ClientRegistrationRequest>,
) -> Result<Json<ClientRegistrationResponse>, AppError> {
    let token = bearer_token(&headers).ok_or(AppError::Unauthorized)?;
    let response = state
        .registration
        .update(&realm, &client_id, token, req)
        .await?;
    Ok(Json(response))
}

/// `DELETE /realms/{realm}/register/{client_id}` (RFC 7592).
pub async fn delete_client(
    State(state): State<AppState>,
    Path((realm, client_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let token = bearer_token(&headers).ok_or(AppError::Unauthorized)?;
    state.registration.delete(&realm, &client_id, token).await?;
    Ok(StatusCode::NO_CONTENT)
}
