use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::State,
    http::Request,
    middleware::{self, Next},
    response::Response,
};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::services::authn::session::SessionStore;
use crate::services::authn::token::UserAuthenticationToken;
use crate::state::AppState;

pub const SESSION_HEADER: &str = "x-session-token";

/// Live session resolved for this request, handed from the middleware to
/// handlers through request extensions — no ambient security context.
#[derive(Clone)]
pub struct CurrentSession {
    pub session_id: String,
    pub authentication: Arc<UserAuthenticationToken>,
}

/// Set when the request presented a session that just expired; carries the
/// realm so the entry point can point the client at the right realm's login.
#[derive(Clone)]
pub struct ExpiredSessionRealm(pub String);

/// Attach session resolution + expiry pruning to a router.
pub fn apply(router: Router<AppState>, state: AppState) -> Router<AppState> {
    router.layer(middleware::from_fn_with_state(state, session_middleware))
}

pub enum SweepOutcome {
    Active(Arc<UserAuthenticationToken>),
    Cleared { realm: String },
    NotFound,
}

/// The only place token expiry is evaluated.
///
/// Prunes individually expired member tokens from the composite; clears the
/// whole session when no valid member remains (or the composite itself is
/// expired), forcing re-authentication.
pub async fn sweep(
    sessions: &SessionStore,
    session_id: &str,
    now: DateTime<Utc>,
) -> SweepOutcome {
    let Some(authentication) = sessions.get(session_id).await else {
        return SweepOutcome::NotFound;
    };

    let (removed, remaining) = authentication.prune_expired(now);
    if removed > 0 {
        debug!(
            subject = %authentication.subject().subject_id,
            removed,
            remaining,
            "pruned expired provider tokens"
        );
    }

    if remaining == 0 || authentication.is_expired(now) {
        let realm = authentication.realm().to_string();
        sessions.remove(session_id).await;
        debug!(realm = %realm, "session expired, cleared");
        return SweepOutcome::Cleared { realm };
    }

    SweepOutcome::Active(authentication)
}

async fn session_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let session_id = req
        .headers()
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    // Expiry handling must never block unrelated request processing; the
    // chain always continues, authenticated or not.
    if let Some(session_id) = session_id {
        match sweep(&state.sessions, &session_id, Utc::now()).await {
            SweepOutcome::Active(authentication) => {
                req.extensions_mut().insert(CurrentSession {
                    session_id,
                    authentication,
                });
            }
            SweepOutcome::Cleared { realm } => {
                req.extensions_mut().insert(ExpiredSessionRealm(realm));
            }
            SweepOutcome::NotFound => {}
        }
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    use crate::services::authn::token::test_support::{composite, token};
    use crate::services::identity::principal::Authority;

    #[tokio::test]
    async fn partial_expiry_prunes_and_keeps_session() {
        let now = Utc::now();
        let sessions = SessionStore::new();
        let auth = composite("alpha", "alice");
        auth.add_authentication(token(
            Authority::Saml,
            "idp",
            "alpha",
            "alice@idp",
            &["ROLE_SAML"],
            Some(now - Duration::minutes(1)),
        ))
        .unwrap();
        auth.add_authentication(token(
            Authority::Oidc,
            "social",
            "alpha",
            "alice@social",
            &["ROLE_OIDC"],
            Some(now + Duration::hours(1)),
        ))
        .unwrap();
        let sid = sessions.create(auth.clone()).await;

        match sweep(&sessions, &sid, now).await {
            SweepOutcome::Active(a) => {
                // 3 members, 1 expired: exactly 2 remain.
                assert_eq!(a.authentications().len(), 2);
            }
            _ => panic!("session should survive partial expiry"),
        }
        assert!(sessions.get(&sid).await.is_some());
    }

    #[tokio::test]
    async fn full_expiry_clears_the_session() {
        let now = Utc::now();
        let sessions = SessionStore::new();
        let auth = composite("alpha", "alice");
        // Replace the sole live token with an expired one from the same provider.
        auth.add_authentication(token(
            Authority::Internal,
            "pw",
            "alpha",
            "alice",
            &[],
            Some(now - Duration::minutes(1)),
        ))
        .unwrap();
        let sid = sessions.create(auth).await;

        match sweep(&sessions, &sid, now).await {
            SweepOutcome::Cleared { realm } => assert_eq!(realm, "alpha"),
            _ => panic!("fully expired session must be cleared"),
        }
        assert!(sessions.get(&sid).await.is_none());
    }

    #[tokio::test]
    async fn unknown_session_is_not_an_error() {
        let sessions = SessionStore::new();
        assert!(matches!(
            sweep(&sessions, "ghost", Utc::now()).await,
            SweepOutcome::NotFound
        ));
    }
}
