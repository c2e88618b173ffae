use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use doclist_core::CoreError;
use serde_json::{json, Value};
use thiserror::Error;
use validator::ValidationErrors;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Permission(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Permission(_) => StatusCode::FORBIDDEN,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Validation(_) => StatusCode::EXPECTATION_FAILED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Database(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Exception class name reported to clients.
    pub fn exc_type(&self) -> &'static str {
        match self {
            ApiError::Permission(_) => "PermissionError",
            ApiError::Unauthorized(_) => "AuthenticationError",
            ApiError::Validation(_) | ApiError::BadRequest(_) => "ValidationError",
            ApiError::NotFound(_) => "DoesNotExistError",
            ApiError::Database(_) => "DatabaseError",
            ApiError::Internal(_) => "InternalServerError",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ApiError::Permission(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::Validation(msg)
            | ApiError::BadRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::Database(msg)
            | ApiError::Internal(msg) => msg,
        }
    }
}

/// Translates an error into its status code and client-facing body.
///
/// Used both for whole responses and for the per-request entries of a batch.
pub fn handle_exception(err: &ApiError) -> (StatusCode, Value) {
    let status = err.status();

    if status.is_server_error() {
        tracing::error!(exc_type = err.exc_type(), "Request failed: {}", err);
    } else {
        tracing::debug!(exc_type = err.exc_type(), "Request rejected: {}", err);
    }

    let body = json!({
        "exc_type": err.exc_type(),
        "message": err.message(),
        "http_status_code": status.as_u16(),
    });
    (status, body)
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::PermissionDenied(msg) => ApiError::Permission(msg),
            CoreError::Validation(msg) | CoreError::Serialization(msg) => ApiError::Validation(msg),
            CoreError::NotFound(msg) => ApiError::NotFound(msg),
            CoreError::Database(msg) => ApiError::Database(msg),
            CoreError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        ApiError::Validation(format!("Validation failed: {}", errors))
    }
}

impl From<jsonwebtoken::errors::Error> for ApiError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        ApiError::Unauthorized(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = handle_exception(&self);
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_permission_error_body() {
        let err = ApiError::from(CoreError::insufficient_permission("Note"));
        let (status, body) = handle_exception(&err);

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(
            body,
            json!({
                "exc_type": "PermissionError",
                "message": "Insufficient Permission for Note",
                "http_status_code": 403,
            })
        );
    }

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ApiError::Unauthorized("x".into()), 401, "AuthenticationError"),
            (ApiError::Validation("x".into()), 417, "ValidationError"),
            (ApiError::BadRequest("x".into()), 400, "ValidationError"),
            (ApiError::NotFound("x".into()), 404, "DoesNotExistError"),
            (ApiError::Database("x".into()), 500, "DatabaseError"),
            (ApiError::Internal("x".into()), 500, "InternalServerError"),
        ];
        for (err, status, exc_type) in cases {
            assert_eq!(err.status().as_u16(), status);
            assert_eq!(err.exc_type(), exc_type);
        }
    }
}
