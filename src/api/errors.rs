use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire shape of every error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    RateLimit,
    ActivationRequired,
    Offline,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::ActivationRequired => "activation_required",
            ErrorKind::Offline => "offline",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::ActivationRequired => StatusCode::PAYMENT_REQUIRED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Offline => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AppError {
    kind: ErrorKind,
    message: String,
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    // Convenience constructors for common errors
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(ErrorKind::Unauthorized, "Authentication required")
    }

    pub fn forbidden(message: &str) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    pub fn not_found(resource: &str) -> Self {
        Self::new(ErrorKind::NotFound, format!("{} not found", resource))
    }

    pub fn rate_limited() -> Self {
        Self::new(
            ErrorKind::RateLimit,
            "Daily message limit reached. Try again later",
        )
    }

    pub fn activation_required() -> Self {
        Self::new(
            ErrorKind::ActivationRequired,
            "The model gateway rejected the request. Activate billing for your gateway account",
        )
    }

    pub fn offline() -> Self {
        Self::new(
            ErrorKind::Offline,
            "Something went wrong. Please try again later",
        )
    }

    pub fn database_error(err: impl std::error::Error) -> Self {
        Self::new(ErrorKind::Offline, format!("Database error: {}", err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(ApiError {
            kind: self.kind.as_str().to_string(),
            message: self.message,
        });

        (self.kind.status_code(), body).into_response()
    }
}

pub type ApiResult<T> = Result<T, AppError>;

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::not_found("Resource"),
            _ => AppError::database_error(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_status_codes() {
        assert_eq!(ErrorKind::BadRequest.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ErrorKind::Unauthorized.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ErrorKind::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorKind::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ErrorKind::RateLimit.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ErrorKind::ActivationRequired.status_code(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            ErrorKind::Offline.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_stable_wire_codes() {
        assert_eq!(ErrorKind::RateLimit.as_str(), "rate_limit");
        assert_eq!(ErrorKind::ActivationRequired.as_str(), "activation_required");
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err: AppError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
