use serde::Serialize;

use crate::services::authn::token::UserAuthenticationToken;

/// What a caller learns about their own session: the durable subject, the
/// linked providers and the aggregated authorities. Never credentials.
#[derive(Debug, Clone, Serialize)]
pub struct SessionResponse {
    /// Present only in login responses; whoami omits it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    pub subject_id: String,
    pub realm: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub authorities: Vec<String>,
    pub providers: Vec<String>,
}

impl SessionResponse {
    pub fn from_authentication(
        authentication: &UserAuthenticationToken,
        session_token: Option<String>,
    ) -> Self {
        let subject = authentication.subject();
        Self {
            session_token,
            subject_id: subject.subject_id.clone(),
            realm: subject.realm.clone(),
            name: subject.name.clone(),
            authorities: authentication.authorities().into_iter().collect(),
            providers: authentication
                .authentications()
                .iter()
                .map(|t| t.provider_id().to_string())
                .collect(),
        }
    }
}
