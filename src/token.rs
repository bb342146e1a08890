//! Booking credentials.
//!
//! Customer bookings carry a signed confirmation token (HS256 JWT binding
//! `{idNegocio, email, startAt, serviceId}`) and an opaque high-entropy cancellation
//! token. Admin-created bookings get an internal unique token instead of a
//! signed one.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::{HOUR_MS, Ms};

const CONFIRMATION_TYPE: &str = "confirmacion";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationClaims {
    pub jti: String,
    /// Absent for global bookings.
    #[serde(rename = "idNegocio", default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    pub email: String,
    /// Booking start, unix ms.
    #[serde(rename = "inicio")]
    pub start_at: Ms,
    #[serde(rename = "servicio")]
    pub service_id: String,
    #[serde(rename = "typ")]
    pub token_type: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("invalid token: {0}")]
    Invalid(String),
    #[error("token signing failed: {0}")]
    Signing(String),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Invalid(e.to_string()),
        }
    }
}

/// Issues and verifies signed confirmation tokens.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl_ms: Ms,
}

impl TokenIssuer {
    pub fn new(secret: &[u8], ttl_hours: u32) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            ttl_ms: ttl_hours as Ms * HOUR_MS,
        }
    }

    pub fn issue_confirmation(
        &self,
        tenant_id: Option<&str>,
        email: &str,
        start_at: Ms,
        service_id: &str,
        now: Ms,
    ) -> Result<String, TokenError> {
        let claims = ConfirmationClaims {
            jti: Ulid::new().to_string(),
            tenant_id: tenant_id.map(str::to_string),
            email: email.to_string(),
            start_at,
            service_id: service_id.to_string(),
            token_type: CONFIRMATION_TYPE.to_string(),
            iat: now / 1000,
            exp: (now + self.ttl_ms) / 1000,
        };
        jsonwebtoken::encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Check signature and expiry. Tokens of another type are `Invalid`.
    pub fn verify_confirmation(&self, token: &str) -> Result<ConfirmationClaims, TokenError> {
        let data = jsonwebtoken::decode::<ConfirmationClaims>(
            token,
            &self.decoding_key,
            &Validation::default(),
        )?;
        if data.claims.token_type != CONFIRMATION_TYPE {
            return Err(TokenError::Invalid("not a confirmation token".into()));
        }
        Ok(data.claims)
    }
}

/// 32 random bytes, hex encoded.
pub fn cancellation_token() -> String {
    hex::encode(rand::random::<[u8; 32]>())
}

/// Stand-in confirmation token for bookings that skip the email flow.
pub fn internal_confirmation_token() -> String {
    format!("admin-generated-{}", hex::encode(rand::random::<[u8; 8]>()))
}
