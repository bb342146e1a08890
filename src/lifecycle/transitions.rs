use tracing::info;
use ulid::Ulid;

use crate::auth::{AdminSession, Role};
use crate::model::*;
use crate::store::{Selector, Transition};

use super::{BookingError, BookingService, log_transition};

const CONFIRM: Transition<'static> = Transition::new(
    &[BookingStatus::AwaitingEmailConfirmation],
    BookingStatus::Confirmed,
);
const ADMIN_CONFIRM: Transition<'static> =
    Transition::new(&BookingStatus::NOT_CANCELLED, BookingStatus::Confirmed);
const CANCEL: Transition<'static> =
    Transition::new(&BookingStatus::NOT_CANCELLED, BookingStatus::Cancelled);

impl BookingService {
    /// Follow a signed confirmation link. A bad signature or an expired link
    /// is `InvalidToken`; no matching unconfirmed booking is `NotFound`.
    pub async fn confirm_with_signed_token(
        &self,
        token: &str,
        now: Ms,
    ) -> Result<Booking, BookingError> {
        let claims = self.tokens.verify_confirmation(token)?;
        let scope = TenantScope::from_option(claims.tenant_id.as_deref());
        let selector = Selector::Identity {
            scope: &scope,
            email: &claims.email,
            start_at: claims.start_at,
            service_id: &claims.service_id,
        };
        let booking = self
            .store
            .update_status(selector, CONFIRM, now)
            .await?
            .ok_or_else(|| BookingError::NotFound("booking not found or already confirmed".into()))?;
        log_transition(&booking, "signed_token");
        Ok(booking)
    }

    /// Confirm by the stored confirmation token while the hold is still live.
    pub async fn confirm_with_stored_token(
        &self,
        token: &str,
        now: Ms,
    ) -> Result<Booking, BookingError> {
        let booking = self
            .store
            .update_status(Selector::ConfirmationToken(token), CONFIRM.unexpired(), now)
            .await?
            .ok_or_else(|| {
                BookingError::NotFound("booking not found, expired or already confirmed".into())
            })?;
        log_transition(&booking, "stored_token");
        Ok(booking)
    }

    /// Customer self-cancellation. A second call reports `NotFound`.
    pub async fn cancel_with_token(&self, token: &str, now: Ms) -> Result<Booking, BookingError> {
        let booking = self
            .store
            .update_status(Selector::CancellationToken(token), CANCEL, now)
            .await?
            .ok_or_else(|| BookingError::NotFound("booking not found or already cancelled".into()))?;
        log_transition(&booking, "cancellation_token");
        Ok(booking)
    }

    pub async fn admin_confirm(
        &self,
        session: &AdminSession,
        id: Ulid,
        now: Ms,
    ) -> Result<Booking, BookingError> {
        self.admin_transition(session, id, ADMIN_CONFIRM, now).await
    }

    pub async fn admin_cancel(
        &self,
        session: &AdminSession,
        id: Ulid,
        now: Ms,
    ) -> Result<Booking, BookingError> {
        self.admin_transition(session, id, CANCEL, now).await
    }

    /// Bookings outside the session's reach are invisible, not forbidden.
    async fn admin_transition(
        &self,
        session: &AdminSession,
        id: Ulid,
        transition: Transition<'static>,
        now: Ms,
    ) -> Result<Booking, BookingError> {
        let scope = session.scope();
        let visible = match session.role {
            Role::SuperAdmin => None,
            Role::Owner => Some(&scope),
        };
        let booking = self
            .store
            .update_status(Selector::Id { id, scope: visible }, transition, now)
            .await?
            .ok_or_else(|| BookingError::NotFound("booking not found or already cancelled".into()))?;
        log_transition(&booking, "admin");
        Ok(booking)
    }

    /// Hard delete, limited to one tenant scope: the one requested, else the
    /// session's own.
    pub async fn delete(
        &self,
        session: &AdminSession,
        id: Ulid,
        tenant_id: Option<&str>,
    ) -> Result<Booking, BookingError> {
        let scope = Self::admin_scope(session, tenant_id)?;
        let booking = self
            .store
            .delete(id, &scope)
            .await?
            .ok_or_else(|| BookingError::NotFound("booking not found".into()))?;
        info!(
            id = %booking.id,
            tenant = booking.tenant_id.as_deref().unwrap_or("-"),
            "booking deleted"
        );
        Ok(booking)
    }
}
