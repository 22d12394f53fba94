use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt::Display;

use crate::{
    auth::SessionError,
    cache::CacheError,
    drivers::DriverError,
    pagination::InvalidCursor,
    policy::PolicyError,
    rate_limit::RateLimitError,
    retention::RetentionError,
    sequence::SequenceError,
    sheets::SheetError,
    users::UserError,
};

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized")
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "resource not found")
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    pub fn internal<E: Display>(error: E) -> Self {
        tracing::error!(error = %error, "request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
        });
        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl From<diesel::result::Error> for AppError {
    fn from(value: diesel::result::Error) -> Self {
        match value {
            diesel::result::Error::NotFound => AppError::not_found(),
            _ => AppError::internal(value),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        AppError::internal(value)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        AppError::internal(value)
    }
}

impl From<SequenceError> for AppError {
    fn from(value: SequenceError) -> Self {
        AppError::internal(value)
    }
}

impl From<RetentionError> for AppError {
    fn from(value: RetentionError) -> Self {
        match value {
            RetentionError::AlreadyRunning => {
                AppError::conflict("retention job already running, try again later")
            }
            other => AppError::internal(other),
        }
    }
}

impl From<CacheError> for AppError {
    fn from(value: CacheError) -> Self {
        AppError::internal(value)
    }
}

impl From<SessionError> for AppError {
    fn from(value: SessionError) -> Self {
        match value {
            SessionError::Invalid => AppError::new(StatusCode::UNAUTHORIZED, value.to_string()),
            SessionError::Database(err) => AppError::internal(err),
        }
    }
}

impl From<RateLimitError> for AppError {
    fn from(value: RateLimitError) -> Self {
        match value {
            RateLimitError::Exceeded { .. } => AppError::too_many_requests(value.to_string()),
            RateLimitError::Database(err) => AppError::internal(err),
        }
    }
}

impl From<PolicyError> for AppError {
    fn from(value: PolicyError) -> Self {
        match value {
            PolicyError::InvalidRetentionWindow { .. } | PolicyError::OutOfRange { .. } => {
                AppError::bad_request(value.to_string())
            }
            other => AppError::internal(other),
        }
    }
}

impl From<InvalidCursor> for AppError {
    fn from(value: InvalidCursor) -> Self {
        AppError::bad_request(value.to_string())
    }
}

impl From<DriverError> for AppError {
    fn from(value: DriverError) -> Self {
        match value {
            DriverError::NotFound => AppError::not_found(),
            DriverError::Validation(message) => AppError::bad_request(message),
            DriverError::Database(err) => AppError::internal(err),
        }
    }
}

impl From<SheetError> for AppError {
    fn from(value: SheetError) -> Self {
        match value {
            SheetError::NotFound => AppError::not_found(),
            SheetError::AlreadyAnnulled => AppError::conflict(value.to_string()),
            SheetError::Validation(message) => AppError::bad_request(message),
            SheetError::Policy(err) => err.into(),
            SheetError::Sequence(err) => err.into(),
            SheetError::Driver(err) => err.into(),
            SheetError::Cursor(err) => err.into(),
            other => AppError::internal(other),
        }
    }
}

impl From<UserError> for AppError {
    fn from(value: UserError) -> Self {
        match value {
            UserError::NotFound => AppError::not_found(),
            UserError::EmailTaken | UserError::AlreadyApproved => {
                AppError::conflict(value.to_string())
            }
            UserError::Validation(message) => AppError::bad_request(message),
            UserError::Driver(err) => err.into(),
            UserError::Session(err) => err.into(),
            UserError::Cursor(err) => err.into(),
            other => AppError::internal(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contention_maps_to_conflict() {
        let err: AppError = RetentionError::AlreadyRunning.into();
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn invalid_session_maps_to_unauthorized() {
        let err: AppError = SessionError::Invalid.into();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn rate_limit_maps_to_too_many_requests() {
        let err: AppError = RateLimitError::Exceeded {
            limit: 10,
            window_minutes: 10,
        }
        .into();
        assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn bad_cursor_and_unknown_driver_map_to_client_errors() {
        let err: AppError = SheetError::Cursor(InvalidCursor).into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        let err: AppError = UserError::Driver(DriverError::NotFound).into();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn bad_window_maps_to_bad_request() {
        let err: AppError = PolicyError::InvalidRetentionWindow { hide: 12, purge: 12 }.into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
