//! Booking lifecycle: creation, confirmation, cancellation and deletion.
//!
//! ```text
//! [AwaitingEmailConfirmation] --confirm by token (before expiry)--> Confirmed
//! [AwaitingEmailConfirmation] --admin confirm--------------------> Confirmed
//! [AwaitingEmailConfirmation] --expiry sweep---------------------> Cancelled
//! any non-Cancelled           --admin cancel / cancel by token---> Cancelled
//! any                         --admin delete---------------------> removed
//! ```
//!
//! Every transition is a single conditional write in the store; losing a
//! race shows up as `NotFound`.

mod create;
mod error;
mod transitions;

pub use create::CreatedBooking;
pub use error::BookingError;

use std::sync::Arc;

use tracing::info;

use crate::auth::AdminSession;
use crate::availability::{Availability, AvailabilityChecker, HoldPolicy, SlotRequest, local_day_span};
use crate::limits::{MAX_DURATION_MINUTES, MIN_DURATION_MINUTES};
use crate::model::*;
use crate::notify::{Appointment, NotifyHub};
use crate::schedule::{DEFAULT_BUSINESS_NAME, ScheduleProvider};
use crate::store::BookingStore;
use crate::tenant::{Tenant, TenantDirectory};
use crate::token::TokenIssuer;
use crate::validate::{normalize_tenant_id, parse_instant, parse_ymd};

#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    /// How long an unconfirmed booking holds its slot.
    pub hold_ms: Ms,
    pub hold_policy: HoldPolicy,
    /// Base for the confirmation and cancellation links sent to customers.
    pub frontend_url: String,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            hold_ms: 48 * HOUR_MS,
            hold_policy: HoldPolicy::Reserve,
            frontend_url: "http://localhost:5173".into(),
        }
    }
}

pub struct BookingService {
    store: Arc<BookingStore>,
    tenants: Arc<dyn TenantDirectory>,
    schedules: Arc<dyn ScheduleProvider>,
    notifier: Arc<NotifyHub>,
    tokens: TokenIssuer,
    availability: AvailabilityChecker,
    settings: LifecycleSettings,
}

impl BookingService {
    pub fn new(
        store: Arc<BookingStore>,
        tenants: Arc<dyn TenantDirectory>,
        schedules: Arc<dyn ScheduleProvider>,
        notifier: Arc<NotifyHub>,
        tokens: TokenIssuer,
        settings: LifecycleSettings,
    ) -> Self {
        let availability =
            AvailabilityChecker::new(store.clone(), schedules.clone(), settings.hold_policy);
        Self {
            store,
            tenants,
            schedules,
            notifier,
            tokens,
            availability,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<BookingStore> {
        &self.store
    }

    pub fn schedules(&self) -> &Arc<dyn ScheduleProvider> {
        &self.schedules
    }

    pub fn tenants(&self) -> &Arc<dyn TenantDirectory> {
        &self.tenants
    }

    fn confirm_url(&self, token: &str) -> String {
        format!("{}/confirmar/{token}", self.settings.frontend_url.trim_end_matches('/'))
    }

    fn cancel_url(&self, token: &str) -> String {
        format!("{}/cancelar/{token}", self.settings.frontend_url.trim_end_matches('/'))
    }

    /// Registered tenant for an explicit id; `None` addresses the global scope.
    async fn resolve_tenant(&self, tenant_id: Option<&str>) -> Result<Option<Tenant>, BookingError> {
        let Some(id) = tenant_id else {
            return Ok(None);
        };
        self.tenants
            .lookup(id)
            .await
            .map(Some)
            .ok_or_else(|| BookingError::NotFound(format!("business {id} not found")))
    }

    /// Scope a privileged request acts on: the one it names, else the session's own.
    pub(crate) fn admin_scope(
        session: &AdminSession,
        requested: Option<&str>,
    ) -> Result<TenantScope, BookingError> {
        let scope = match normalize_tenant_id(requested)? {
            Some(id) => TenantScope::Tenant(id),
            None => session.scope(),
        };
        if !session.can_act_on(&scope) {
            return Err(BookingError::Forbidden("not allowed for this business".into()));
        }
        Ok(scope)
    }

    /// Bookings matching the list filters, ordered by start.
    ///
    /// `fecha` selects `[startOfDay, startOfNextDay)` of that date in the
    /// tenant's local time.
    pub async fn list(
        &self,
        tenant_id: Option<&str>,
        estado: Option<&str>,
        fecha: Option<&str>,
    ) -> Result<Vec<Booking>, BookingError> {
        let scope = TenantScope::from_option(normalize_tenant_id(tenant_id)?.as_deref());
        let mut filter = BookingFilter::scoped(scope);

        if let Some(label) = estado.map(str::trim).filter(|s| !s.is_empty()) {
            let status = BookingStatus::from_label(label)
                .ok_or_else(|| BookingError::field("estado", format!("unknown status {label}")))?;
            filter.statuses.push(status);
        }
        if let Some(raw) = fecha.map(str::trim).filter(|s| !s.is_empty()) {
            let date = parse_ymd(raw)
                .ok_or_else(|| BookingError::field("fecha", "invalid date format (YYYY-MM-DD)"))?;
            let config = self.schedules.config(&filter.scope).await;
            filter.window = Some(local_day_span(date, config.offset_ms()));
        }
        Ok(self.store.find_many(&filter).await)
    }

    /// Probe whether a slot would accept a booking right now. Without an
    /// explicit duration the service's catalog duration applies, then the
    /// tenant's base duration.
    pub async fn check_availability(
        &self,
        tenant_id: Option<&str>,
        service_id: &str,
        start: &str,
        duration_minutes: Option<u32>,
        now: Ms,
    ) -> Result<Availability, BookingError> {
        let tenant_id = normalize_tenant_id(tenant_id)?;
        let tenant = self.resolve_tenant(tenant_id.as_deref()).await?;
        let scope = TenantScope::from_option(tenant.as_ref().map(|t| t.id.as_str()));
        let start_at = parse_instant(start)
            .ok_or_else(|| BookingError::field("fechaInicio", "not a valid date"))?;

        let duration_minutes = match duration_minutes {
            Some(d) if (MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&d) => d,
            Some(_) => return Err(BookingError::field("duracion", "out of range")),
            None => {
                let config = self.schedules.config(&scope).await;
                config
                    .service(service_id)
                    .map(|s| s.duration_minutes)
                    .unwrap_or(config.base_duration)
                    .max(MIN_DURATION_MINUTES)
            }
        };
        let slot = SlotRequest {
            start_at,
            end_at: None,
            duration_minutes,
        };
        Ok(self.availability.check(&scope, &slot, now).await)
    }
}

/// Display names for a booking's messages, falling back to the raw service
/// id and a generic business label when the schedule cannot resolve them.
pub(crate) async fn describe(schedules: &dyn ScheduleProvider, booking: &Booking) -> Appointment {
    let config = schedules.config(&booking.scope()).await;
    let business_name = if config.name.trim().is_empty() {
        DEFAULT_BUSINESS_NAME.to_string()
    } else {
        config.name.clone()
    };
    let service_name = config
        .service(&booking.service_id)
        .map(|s| s.name.clone())
        .unwrap_or_else(|| booking.service_id.clone());
    Appointment {
        business_name,
        service_name,
        start_at: booking.start_at,
        offset_ms: config.offset_ms(),
    }
}

fn log_transition(booking: &Booking, via: &'static str) {
    info!(
        id = %booking.id,
        tenant = booking.tenant_id.as_deref().unwrap_or("-"),
        "booking {} via {via}",
        booking.status.label()
    );
    metrics::counter!(
        crate::observability::STATUS_TRANSITIONS_TOTAL,
        "to" => booking.status.label(),
        "via" => via
    )
    .increment(1);
}
