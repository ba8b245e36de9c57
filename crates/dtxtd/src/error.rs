//! HTTP error responses
//!
//! Every handler error funnels through [`ApiError`]. Authentication failures
//! collapse into one opaque answer; the specific cause only reaches the log.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dtxt_core::DtxtError;
use serde_json::json;

#[derive(Debug)]
pub enum ApiError {
    /// Plain-text body
    Text(StatusCode, String),
    /// `{"error": ...}` body
    Json(StatusCode, String),
}

impl ApiError {
    pub fn text(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Text(status, message.into())
    }

    pub fn unauthorized() -> Self {
        Self::text(StatusCode::UNAUTHORIZED, "Unauthorized")
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::text(StatusCode::BAD_REQUEST, message)
    }

    pub fn internal() -> Self {
        Self::text(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
    }
}

impl From<DtxtError> for ApiError {
    fn from(err: DtxtError) -> Self {
        use DtxtError::*;
        match err {
            Unauthorized(reason) => {
                tracing::debug!(reason = %reason, "request not authorized");
                Self::unauthorized()
            }
            UserNotFound => Self::unauthorized(),
            RegistrationDisabled => Self::text(StatusCode::FORBIDDEN, "Registration is not allowed"),
            UsernameTaken => Self::bad_request("Username already taken"),
            MigrationInProgress => Self::Json(
                StatusCode::CONFLICT,
                "Migration already in progress for this user. Please wait until it completes."
                    .into(),
            ),
            EmailNotAllowed => Self::text(StatusCode::FORBIDDEN, "Email not allowed"),
            InvalidCode => Self::text(StatusCode::FORBIDDEN, "Invalid or expired verification code"),
            VerificationRequired => Self::text(StatusCode::FORBIDDEN, "Verification required"),
            VerificationNotConfigured => {
                Self::bad_request("Share verification is not configured")
            }
            InvalidEmail => Self::bad_request("Invalid email address"),
            InvalidInput(message) => Self::bad_request(message),
            other => {
                tracing::error!("request failed: {other}");
                Self::internal()
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Text(status, message) => (status, message).into_response(),
            Self::Json(status, message) => (status, Json(json!({ "error": message }))).into_response(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
