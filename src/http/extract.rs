use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use crate::auth::AdminSession;

use super::AppState;
use super::error::ApiError;

/// Privileged handlers take an `AdminSession` argument; requests without a
/// valid `Authorization: Bearer` session never reach them.
#[async_trait]
impl FromRequestParts<AppState> for AdminSession {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts.headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
        let session = state.auth.verify(header).inspect_err(|e| {
            tracing::debug!("rejected admin request to {}: {e}", parts.uri.path());
        })?;
        Ok(session)
    }
}
