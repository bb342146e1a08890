use std::sync::atomic::{AtomicBool, Ordering};

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::Value;

use crate::auth::AuthError;
use crate::lifecycle::BookingError;

static EXPOSE_INTERNAL_DETAILS: AtomicBool = AtomicBool::new(false);

/// Include internal error detail in 500 bodies (development only).
pub fn expose_internal_details(enabled: bool) {
    EXPOSE_INTERNAL_DETAILS.store(enabled, Ordering::Relaxed);
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    details: Option<Value>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(rename = "detalles", skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<BookingError> for ApiError {
    fn from(e: BookingError) -> Self {
        match e {
            BookingError::Validation(errors) => {
                let details = serde_json::to_value(errors.fields()).unwrap_or(Value::Null);
                ApiError::bad_request("validation failed").with_details(details)
            }
            BookingError::InvalidToken(msg) => ApiError::bad_request(msg),
            BookingError::NotFound(msg) => ApiError::not_found(msg),
            BookingError::Conflict(msg) => ApiError::new(StatusCode::CONFLICT, msg),
            BookingError::Forbidden(msg) => ApiError::forbidden(msg),
            BookingError::Upstream(msg) => ApiError::new(StatusCode::BAD_GATEWAY, msg),
            BookingError::Internal(msg) => {
                tracing::error!("internal error: {msg}");
                let err = ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal server error");
                if EXPOSE_INTERNAL_DETAILS.load(Ordering::Relaxed) {
                    err.with_details(Value::String(msg))
                } else {
                    err
                }
            }
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        let reason = match &e {
            AuthError::MissingCredential => "missing",
            AuthError::InvalidCredential(_) => "invalid",
            AuthError::Forbidden(_) => "forbidden",
        };
        metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL, "reason" => reason).increment(1);
        match e {
            AuthError::MissingCredential => {
                ApiError::new(StatusCode::UNAUTHORIZED, "authentication required")
            }
            AuthError::InvalidCredential(_) => ApiError::forbidden("invalid or expired session"),
            AuthError::Forbidden(msg) => ApiError::forbidden(msg),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::bad_request("malformed JSON body").with_details(Value::String(e.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(e: QueryRejection) -> Self {
        ApiError::bad_request("malformed query").with_details(Value::String(e.body_text()))
    }
}

impl From<PathRejection> for ApiError {
    fn from(e: PathRejection) -> Self {
        ApiError::bad_request("malformed path").with_details(Value::String(e.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
            details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}
