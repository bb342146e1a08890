use crate::schedule::ScheduleError;
use crate::store::{ConflictKind, StoreError};
use crate::tenant::TenantError;
use crate::token::TokenError;
use crate::validate::ValidationErrors;

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    InvalidToken(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Upstream(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl BookingError {
    pub fn field(field: &'static str, message: impl Into<String>) -> Self {
        BookingError::Validation(ValidationErrors::single(field, message))
    }
}

impl From<StoreError> for BookingError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(ConflictKind::SlotTaken(_)) => {
                BookingError::Conflict("slot already taken".into())
            }
            StoreError::Conflict(kind) => BookingError::Conflict(kind.to_string()),
            StoreError::Invalid(msg) | StoreError::LimitExceeded(msg) => {
                BookingError::field("reserva", msg)
            }
            StoreError::Wal(msg) => BookingError::Internal(msg),
        }
    }
}

impl From<TokenError> for BookingError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Expired => BookingError::InvalidToken("confirmation link expired".into()),
            TokenError::Invalid(_) => BookingError::InvalidToken("invalid confirmation token".into()),
            TokenError::Signing(msg) => BookingError::Internal(msg),
        }
    }
}

impl From<ScheduleError> for BookingError {
    fn from(e: ScheduleError) -> Self {
        match e {
            ScheduleError::InvalidDate(_) => {
                BookingError::field("fecha", "invalid date format (YYYY-MM-DD)")
            }
            ScheduleError::LimitExceeded(msg) => BookingError::field("fecha", msg),
        }
    }
}

impl From<TenantError> for BookingError {
    fn from(e: TenantError) -> Self {
        match e {
            TenantError::InvalidId(_) => BookingError::field("idNegocio", e.to_string()),
            TenantError::InvalidEmail => BookingError::field("emailContacto", e.to_string()),
            TenantError::LimitExceeded => BookingError::Conflict(e.to_string()),
        }
    }
}
