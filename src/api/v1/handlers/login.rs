use axum::{
    Extension, Json,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::info;

use crate::api::v1::dto::{login_request::LoginRequest, session_response::SessionResponse};
use crate::error::AppError;
use crate::middleware::expiry::{CurrentSession, ExpiredSessionRealm};
use crate::services::authn::manager::{AuthRequest, ProviderWrappedAuthRequest};
use crate::services::authn::token::WebAuthenticationDetails;
use crate::services::identity::principal::Authority;
use crate::state::AppState;

fn parse_authority(authority: &str) -> Result<Authority, AppError> {
    authority
        .parse()
        .map_err(|_| AppError::InvalidRequest(format!("unknown authority '{authority}'")))
}

pub(crate) fn web_details(headers: &HeaderMap) -> WebAuthenticationDetails {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    WebAuthenticationDetails {
        remote_address: header("x-forwarded-for"),
        user_agent: header("user-agent"),
    }
}

/// `POST /login/{authority}/{provider}` — run a provider-wrapped login and
/// open a session for the resulting composite authentication.
pub async fn login(
    State(state): State<AppState>,
    Path((authority, provider_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> Result<(StatusCode, Json<SessionResponse>), AppError> {
    let authority = parse_authority(&authority)?;

    let authentication = state
        .manager
        .authenticate(AuthRequest::ProviderWrapped(ProviderWrappedAuthRequest {
            authority,
            provider_id,
            credential: Some(req.credential),
            web_details: Some(web_details(&headers)),
        }))
        .await?;

    let session_token = state.sessions.create(authentication.clone()).await;
    info!(
        subject = %authentication.subject().subject_id,
        realm = %authentication.realm(),
        "session opened"
    );

    Ok((
        StatusCode::CREATED,
        Json(SessionResponse::from_authentication(
            &authentication,
            Some(session_token),
        )),
    ))
}

/// `POST /login/{authority}/{provider}/link` — run a further provider login
/// and fold it into the current session's composite token. Realm equality is
/// enforced by the composite itself.
pub async fn link(
    State(state): State<AppState>,
    Path((authority, provider_id)): Path<(String, String)>,
    session: Option<Extension<CurrentSession>>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> Result<Json<SessionResponse>, AppError> {
    let Some(Extension(session)) = session else {
        return Err(AppError::Unauthorized);
    };
    let authority = parse_authority(&authority)?;

    // The manager always produces a standalone composite; linking folds it
    // into the live session. The merge refuses a login that resolved to a
    // different subject, so one session never mixes two real users.
    let linked = state
        .manager
        .authenticate(AuthRequest::ProviderWrapped(ProviderWrappedAuthRequest {
            authority,
            provider_id,
            credential: Some(req.credential),
            web_details: Some(web_details(&headers)),
        }))
        .await?;

    session.authentication.merge_from(&linked)?;

    info!(
        subject = %session.authentication.subject().subject_id,
        "linked provider login into session"
    );
    Ok(Json(SessionResponse::from_authentication(
        &session.authentication,
        None,
    )))
}

/// `DELETE /session/providers/{authority}/{provider}` — drop one provider's
/// login from the session without logging out. Emptying the member set
/// destroys the session, forcing re-authentication.
pub async fn unlink(
    State(state): State<AppState>,
    Path((authority, provider_id)): Path<(String, String)>,
    session: Option<Extension<CurrentSession>>,
) -> Result<StatusCode, AppError> {
    let Some(Extension(session)) = session else {
        return Err(AppError::Unauthorized);
    };
    let authority = parse_authority(&authority)?;

    let mut removed = false;
    for token in session.authentication.authentications() {
        if token.authority() == authority && token.provider_id() == provider_id {
            removed |= session.authentication.erase_authentication(
                authority,
                &provider_id,
                token.user_id(),
            );
        }
    }
    if !removed {
        return Err(AppError::NotFound);
    }

    if session.authentication.authentications().is_empty() {
        state.sessions.remove(&session.session_id).await;
        info!(
            subject = %session.authentication.subject().subject_id,
            "last provider unlinked, session destroyed"
        );
    } else {
        info!(
            subject = %session.authentication.subject().subject_id,
            provider = %provider_id,
            "provider login unlinked from session"
        );
    }
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /session` — the caller's own session view. An expired session gets a
/// 401 carrying the realm to re-authenticate against.
pub async fn whoami(
    session: Option<Extension<CurrentSession>>,
    expired: Option<Extension<ExpiredSessionRealm>>,
) -> Response {
    if let Some(Extension(session)) = session {
        return Json(SessionResponse::from_authentication(
            &session.authentication,
            None,
        ))
        .into_response();
    }

    let mut response = AppError::Unauthorized.into_response();
    if let Some(Extension(ExpiredSessionRealm(realm))) = expired
        && let Ok(value) = HeaderValue::from_str(&realm)
    {
        response.headers_mut().insert("x-login-realm", value);
    }
    response
}

/// `DELETE /session` — logout. Demotes the composite before dropping it so
/// any concurrently held reference stops being authenticated.
pub async fn logout(
    State(state): State<AppState>,
    session: Option<Extension<CurrentSession>>,
) -> Result<StatusCode, AppError> {
    let Some(Extension(session)) = session else {
        return Err(AppError::Unauthorized);
    };

    if let Some(authentication) = state.sessions.remove(&session.session_id).await {
        let _ = authentication.set_authenticated(false);
        info!(subject = %authentication.subject().subject_id, "session closed");
    }
    Ok(StatusCode::NO_CONTENT)
}
