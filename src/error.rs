use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::repos::error::RepoError;
use crate::services::authn::manager::AuthenticationError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("internal server error")]
    Internal,
}

#[derive(Serialize)]
struct ErrorResponseBody {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            AppError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::Conflict => (StatusCode::CONFLICT, "CONFLICT"),
            AppError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
        };

        let body = ErrorResponseBody {
            error: ErrorBody {
                code,
                message: self.to_string(),
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<RepoError> for AppError {
    fn from(_: RepoError) -> Self {
        AppError::Internal
    }
}

impl From<AuthenticationError> for AppError {
    fn from(e: AuthenticationError) -> Self {
        match e {
            // Caller errors: rejected before any provider work runs.
            AuthenticationError::UnsupportedRequest
            | AuthenticationError::ProviderNotFound { .. }
            | AuthenticationError::MissingCredentials
            | AuthenticationError::IllegalStateChange
            | AuthenticationError::RealmMismatch { .. } => AppError::InvalidRequest(e.to_string()),

            // User-correctable: wrong password, expired assertion, unknown account.
            AuthenticationError::InvalidCredentials | AuthenticationError::AccountNotFound => {
                AppError::Unauthorized
            }

            // A valid login for somebody else: refused, the session is unchanged.
            AuthenticationError::SubjectMismatch { .. } => AppError::Conflict,

            // Provider misbehavior / data corruption. Logged at error level
            // where detected; never retried.
            AuthenticationError::MissingPrincipal
            | AuthenticationError::MismatchedUser { .. }
            | AuthenticationError::SubjectUnresolved { .. }
            | AuthenticationError::Storage(_) => AppError::Internal,
        }
    }
}
