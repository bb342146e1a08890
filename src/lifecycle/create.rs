use tracing::info;
use ulid::Ulid;

use crate::auth::AdminSession;
use crate::availability::SlotRequest;
use crate::model::*;
use crate::notify::Notification;
use crate::token::{cancellation_token, internal_confirmation_token};
use crate::validate::{BookingRequest, ValidBooking, validate_booking};

use super::{BookingError, BookingService, describe};

/// What a customer gets back: credentials only, never the stored booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedBooking {
    pub id: Ulid,
    pub confirmation_token: String,
    pub cancellation_token: String,
    /// Tenant contact address, when the booking belongs to a tenant.
    pub contact_email: Option<String>,
}

fn new_booking(
    valid: ValidBooking,
    tenant_id: Option<String>,
    status: BookingStatus,
    confirmation_token: String,
    expires_at: Option<Ms>,
    now: Ms,
) -> Booking {
    Booking {
        id: Ulid::new(),
        tenant_id,
        customer: valid.customer,
        service_id: valid.service_id,
        start_at: valid.start_at,
        end_at: valid.end_at,
        duration_minutes: valid.duration_minutes,
        status,
        confirmation_token,
        cancellation_token: cancellation_token(),
        expires_at,
        notes: valid.notes,
        created_at: now,
        updated_at: now,
    }
}

impl BookingService {
    /// Public booking request. The booking waits for its emailed confirmation
    /// link and holds the slot until `now + hold`.
    pub async fn create_customer_booking(
        &self,
        req: &BookingRequest,
        now: Ms,
    ) -> Result<CreatedBooking, BookingError> {
        let valid = validate_booking(req)?;
        let tenant = self.resolve_tenant(valid.tenant_id.as_deref()).await?;
        let tenant_id = tenant.as_ref().map(|t| t.id.clone());
        let scope = TenantScope::from_option(tenant_id.as_deref());

        let slot = SlotRequest {
            start_at: valid.start_at,
            end_at: valid.end_at,
            duration_minutes: valid.duration_minutes,
        };
        let guard = match self.availability.admit(&scope, &slot, now).await {
            Ok(guard) => guard,
            Err(reason) => {
                metrics::counter!(crate::observability::SLOT_REJECTIONS_TOTAL).increment(1);
                return Err(BookingError::Conflict(reason.to_string()));
            }
        };

        let confirmation_token = self.tokens.issue_confirmation(
            tenant_id.as_deref(),
            &valid.customer.email,
            valid.start_at,
            &valid.service_id,
            now,
        )?;
        let booking = new_booking(
            valid,
            tenant_id,
            BookingStatus::AwaitingEmailConfirmation,
            confirmation_token,
            Some(now + self.settings.hold_ms),
            now,
        );
        let booking = self.store.insert_within(booking, guard).await.inspect_err(|e| {
            if matches!(e, crate::store::StoreError::Conflict(_)) {
                metrics::counter!(crate::observability::SLOT_REJECTIONS_TOTAL).increment(1);
            }
        })?;

        info!(
            id = %booking.id,
            tenant = booking.tenant_id.as_deref().unwrap_or("-"),
            service = %booking.service_id,
            "booking requested, awaiting email confirmation"
        );
        metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL, "path" => "customer")
            .increment(1);

        let appointment = describe(self.schedules.as_ref(), &booking).await;
        self.notifier.publish(Notification::ConfirmationRequest {
            to: booking.customer.email.clone(),
            customer_name: booking.customer.name.clone(),
            appointment: appointment.clone(),
            confirm_url: self.confirm_url(&booking.confirmation_token),
            cancel_url: self.cancel_url(&booking.cancellation_token),
        });
        if let Some(tenant) = &tenant {
            self.notifier.publish(Notification::NewBookingAlert {
                to: tenant.contact_email.clone(),
                customer_name: booking.customer.name.clone(),
                appointment,
            });
        }

        Ok(CreatedBooking {
            id: booking.id,
            confirmation_token: booking.confirmation_token,
            cancellation_token: booking.cancellation_token,
            contact_email: tenant.map(|t| t.contact_email),
        })
    }

    /// Manual booking by an administrator: confirmed at once, no email flow,
    /// no opening-hours or capacity check. Slot uniqueness still applies.
    pub async fn create_admin_booking(
        &self,
        session: &AdminSession,
        req: &BookingRequest,
        now: Ms,
    ) -> Result<Booking, BookingError> {
        let valid = validate_booking(req)?;
        let scope = Self::admin_scope(session, valid.tenant_id.as_deref())?;
        let tenant_id = scope.tenant_id().map(str::to_string);

        let booking = new_booking(
            valid,
            tenant_id,
            BookingStatus::Confirmed,
            internal_confirmation_token(),
            None,
            now,
        );
        let booking = self.store.insert(booking).await?;

        info!(
            id = %booking.id,
            tenant = booking.tenant_id.as_deref().unwrap_or("-"),
            "booking created by admin"
        );
        metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL, "path" => "admin")
            .increment(1);
        Ok(booking)
    }
}
