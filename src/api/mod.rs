//! HTTP surface: session endpoints, guarded views and the crew data API

pub mod handlers;
pub mod routes;

pub use routes::build_router;

use crate::crew::CrewStore;
use crate::error::{AuthError, DataError};
use crate::guard::AccessGuard;
use crate::session::SessionStore;
use axum::{http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shared state for every handler
#[derive(Clone)]
pub struct AppState {
    pub crew: Arc<CrewStore>,
    pub sessions: Arc<SessionStore>,
    pub guard: Arc<AccessGuard>,
}

/// API error details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

pub type ApiFailure = (StatusCode, Json<ApiError>);
pub type ApiResult<T> = Result<T, ApiFailure>;

pub fn failure(status: StatusCode, code: &str, message: impl Into<String>) -> ApiFailure {
    (status, Json(ApiError::new(code, message)))
}

pub mod error_codes {
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const FORBIDDEN: &str = "FORBIDDEN";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const INVALID_CREDENTIALS: &str = "INVALID_CREDENTIALS";
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const UPSTREAM_ERROR: &str = "UPSTREAM_ERROR";
    pub const SESSION_LOADING: &str = "SESSION_LOADING";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

impl From<DataError> for ApiError {
    fn from(e: DataError) -> Self {
        let code = if e.is_not_found() {
            error_codes::NOT_FOUND
        } else {
            error_codes::VALIDATION_ERROR
        };
        ApiError::new(code, e.to_string())
    }
}

/// Status and body for a crew store failure
pub fn data_failure(e: DataError) -> ApiFailure {
    let status = if e.is_not_found() {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::BAD_REQUEST
    };
    (status, Json(ApiError::from(e)))
}

/// Status and body for a login or logout failure
pub fn auth_failure(e: AuthError) -> ApiFailure {
    let (status, code) = match &e {
        AuthError::InvalidCredentials => (StatusCode::UNAUTHORIZED, error_codes::INVALID_CREDENTIALS),
        AuthError::UnknownCrewMember(_) => (StatusCode::BAD_REQUEST, error_codes::VALIDATION_ERROR),
        AuthError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, error_codes::TIMEOUT),
        AuthError::Provider(_) | AuthError::SignOutFailed(_) => {
            (StatusCode::BAD_GATEWAY, error_codes::UPSTREAM_ERROR)
        }
        AuthError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, error_codes::INTERNAL_ERROR),
    };
    failure(status, code, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_data_failure_status() {
        let (status, body) = data_failure(DataError::CrewNotFound("ast-999".to_string()));
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.code, error_codes::NOT_FOUND);

        let (status, body) = data_failure(DataError::EmptyTitle);
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.message, "Task title cannot be empty");
    }

    #[test]
    fn test_auth_failure_status() {
        assert_eq!(auth_failure(AuthError::InvalidCredentials).0, StatusCode::UNAUTHORIZED);
        assert_eq!(
            auth_failure(AuthError::Timeout(Duration::from_secs(1))).0,
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            auth_failure(AuthError::Provider("down".to_string())).0,
            StatusCode::BAD_GATEWAY
        );
    }
}
