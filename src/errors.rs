use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::{collections::BTreeMap, fmt};

/// Field name -> list of validation messages, rendered as-is to the client.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

pub const AUTHENTICATION_REQUIRED: &str = "Authentication credentials required.";
pub const INVALID_TOKEN: &str = "Invalid token.";
pub const PERMISSION_DENIED: &str = "You do not have permission to perform this action.";
pub const NOT_FOUND: &str = "Not found.";

/// Body of an error response: either a single message or per-field errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorBody {
    Message(String),
    Fields(FieldErrors),
}

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody::Message(msg.into()),
        }
    }

    /// 400 with a field -> errors mapping.
    pub fn fields(errors: FieldErrors) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorBody::Fields(errors),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Missing credentials on an endpoint that needs a user.
    pub fn authentication_required() -> Self {
        Self::bad_request(AUTHENTICATION_REQUIRED)
    }

    pub fn invalid_token() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, INVALID_TOKEN)
    }

    pub fn permission_denied() -> Self {
        Self::new(StatusCode::FORBIDDEN, PERMISSION_DENIED)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.body {
            ErrorBody::Message(message) => write!(f, "{}", message),
            ErrorBody::Fields(errors) => write!(f, "{:?}", errors),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = self.status.as_u16(), "request failed: {}", self);
        }

        let body = match self.body {
            ErrorBody::Message(message) => Json(json!({
                "error": message,
                "status": self.status.as_u16()
            })),
            ErrorBody::Fields(errors) => Json(json!({
                "errors": errors,
                "status": self.status.as_u16()
            })),
        };

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.is_unique_violation()
            || db_err.message().to_ascii_lowercase().contains("unique")
    )
}

/// Add `message` to the error list of `field`.
pub fn push_field_error(errors: &mut FieldErrors, field: &str, message: impl Into<String>) {
    errors
        .entry(field.to_string())
        .or_default()
        .push(message.into());
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn message_errors_render_error_and_status() {
        let (status, body) = body_json(AppError::not_found(NOT_FOUND)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({"error": "Not found.", "status": 404}));
    }

    #[tokio::test]
    async fn field_errors_render_under_errors_key() {
        let mut errors = FieldErrors::new();
        push_field_error(&mut errors, "object_id", "A valid integer is required.");
        push_field_error(&mut errors, "name", "This field is required.");
        let (status, body) = body_json(AppError::fields(errors)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["errors"],
            json!({
                "name": ["This field is required."],
                "object_id": ["A valid integer is required."]
            })
        );
    }
}
