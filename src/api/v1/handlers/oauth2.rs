use std::collections::BTreeSet;

use axum::{
    Form, Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::debug;

use crate::api::v1::dto::{
    introspect_request::TokenTypeRequest, token_request::TokenRequest,
    token_response::TokenResponse,
};
use crate::error::AppError;
use crate::middleware::expiry::{SweepOutcome, sweep};
use crate::services::authn::token::{ClientAuthenticationMethod, ClientAuthenticationToken};
use crate::services::oauth2::introspection::IntrospectionResponse;
use crate::services::oauth2::metadata::ServerMetadata;
use crate::state::AppState;

fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get("authorization")?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded).ok()?;
    let pair = String::from_utf8(decoded).ok()?;
    let (id, secret) = pair.split_once(':')?;
    Some((id.to_string(), secret.to_string()))
}

/// Authenticate the calling client from HTTP Basic or post-body credentials.
/// Unknown client and wrong secret collapse into the same 401.
async fn authenticate_client(
    state: &AppState,
    headers: &HeaderMap,
    form_client_id: Option<&str>,
    form_client_secret: Option<&str>,
) -> Result<ClientAuthenticationToken, AppError> {
    let (client_id, client_secret, method) = match basic_credentials(headers) {
        Some((id, secret)) => (id, secret, ClientAuthenticationMethod::SecretBasic),
        None => match (form_client_id, form_client_secret) {
            (Some(id), Some(secret)) => (
                id.to_string(),
                secret.to_string(),
                ClientAuthenticationMethod::SecretPost,
            ),
            _ => return Err(AppError::Unauthorized),
        },
    };

    let client = state
        .clients
        .authenticate(&client_id, &client_secret)
        .await
        .map_err(|failure| {
            debug!(client = %client_id, ?failure, "client authentication failed");
            AppError::Unauthorized
        })?;

    Ok(ClientAuthenticationToken::authenticated(
        client,
        method,
        BTreeSet::from(["ROLE_CLIENT".to_string()]),
    )
    .with_web_details(crate::api::v1::handlers::login::web_details(headers)))
}

fn parse_scope(scope: Option<&str>) -> Option<BTreeSet<String>> {
    scope.map(|s| s.split_whitespace().map(str::to_string).collect())
}

/// `POST /oauth2/token` — single endpoint, branched by `grant_type`.
pub async fn token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(req): Form<TokenRequest>,
) -> Result<(StatusCode, Json<TokenResponse>), AppError> {
    let client = authenticate_client(
        &state,
        &headers,
        req.client_id.as_deref(),
        req.client_secret.as_deref(),
    )
    .await?;
    let scope = parse_scope(req.scope.as_deref());

    let issued = match req.grant_type.as_str() {
        "session" => {
            let session_token = req.session_token.ok_or_else(|| {
                AppError::InvalidRequest("session grant requires session_token".to_string())
            })?;
            // The sweep keeps the token endpoint honest about expiry even
            // when the session header never passed through the middleware.
            let authentication =
                match sweep(&state.sessions, &session_token, chrono::Utc::now()).await {
                    SweepOutcome::Active(authentication) => authentication,
                    SweepOutcome::Cleared { .. } | SweepOutcome::NotFound => {
                        return Err(AppError::Unauthorized);
                    }
                };
            state
                .tokens
                .issue_for_user(authentication, client, scope.as_ref())
                .await?
        }
        "client_credentials" => state.tokens.issue_for_client(client, scope.as_ref()).await?,
        "refresh_token" => {
            let refresh_token = req.refresh_token.ok_or_else(|| {
                AppError::InvalidRequest("refresh grant requires refresh_token".to_string())
            })?;
            state.tokens.refresh(&refresh_token, &client).await?
        }
        other => {
            return Err(AppError::InvalidRequest(format!(
                "unsupported grant_type '{other}'"
            )));
        }
    };

    Ok((StatusCode::OK, Json(TokenResponse::from(issued))))
}

/// `POST /oauth2/introspect` (RFC 7662).
pub async fn introspect(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(req): Form<TokenTypeRequest>,
) -> Result<Json<IntrospectionResponse>, AppError> {
    let client = authenticate_client(
        &state,
        &headers,
        req.client_id.as_deref(),
        req.client_secret.as_deref(),
    )
    .await?;

    // Storage failures aside, every negative answer is the uniform inactive
    // body; the handler never distinguishes them.
    let response = state
        .introspection
        .introspect(&req.token, &client)
        .await
        .unwrap_or_else(|_| IntrospectionResponse::inactive());
    Ok(Json(response))
}

/// `POST /oauth2/revoke` (RFC 7009). 200 with empty body on success,
/// including for unknown tokens.
pub async fn revoke(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(req): Form<TokenTypeRequest>,
) -> Result<StatusCode, AppError> {
    let client = authenticate_client(
        &state,
        &headers,
        req.client_id.as_deref(),
        req.client_secret.as_deref(),
    )
    .await?;

    state.revocation.revoke(&req.token, &client).await?;
    Ok(StatusCode::OK)
}

/// `GET /realms/{realm}/.well-known/oauth-authorization-server` (RFC 8414).
pub async fn metadata(
    State(state): State<AppState>,
    Path(realm): Path<String>,
) -> Result<Json<ServerMetadata>, AppError> {
    ServerMetadata::for_realm(&state.issuer, &realm, &state.realms)
        .map(Json)
        .ok_or(AppError::NotFound)
}
