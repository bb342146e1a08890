use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;
pub const DAY_MS: Ms = 24 * HOUR_MS;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Where a booking sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    /// Created by a customer, waiting for the emailed link to be followed.
    AwaitingEmailConfirmation,
    Pending,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 4] = [
        BookingStatus::AwaitingEmailConfirmation,
        BookingStatus::Pending,
        BookingStatus::Confirmed,
        BookingStatus::Cancelled,
    ];

    pub const NOT_CANCELLED: [BookingStatus; 3] = [
        BookingStatus::AwaitingEmailConfirmation,
        BookingStatus::Pending,
        BookingStatus::Confirmed,
    ];

    /// Wire label used by the HTTP surface (`estado`).
    pub fn label(self) -> &'static str {
        match self {
            BookingStatus::AwaitingEmailConfirmation => "pendiente_email",
            BookingStatus::Pending => "pendiente",
            BookingStatus::Confirmed => "confirmada",
            BookingStatus::Cancelled => "cancelada",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.label() == label)
    }

    pub fn is_terminal(self) -> bool {
        self == BookingStatus::Cancelled
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub name: String,
    /// Trimmed and lower-cased.
    pub email: String,
    pub phone: Option<String>,
}

/// Tenant filter. `Global` addresses legacy bookings created before tenants existed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TenantScope {
    Global,
    Tenant(String),
}

impl TenantScope {
    pub fn from_option(tenant_id: Option<&str>) -> Self {
        match tenant_id {
            Some(t) => TenantScope::Tenant(t.to_string()),
            None => TenantScope::Global,
        }
    }

    pub fn matches(&self, tenant_id: Option<&str>) -> bool {
        match (self, tenant_id) {
            (TenantScope::Global, None) => true,
            (TenantScope::Tenant(a), Some(b)) => a == b,
            _ => false,
        }
    }

    pub fn tenant_id(&self) -> Option<&str> {
        match self {
            TenantScope::Global => None,
            TenantScope::Tenant(t) => Some(t),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub tenant_id: Option<String>,
    pub customer: Customer,
    /// Opaque reference into the tenant's service catalog.
    pub service_id: String,
    pub start_at: Ms,
    pub end_at: Option<Ms>,
    pub duration_minutes: u32,
    pub status: BookingStatus,
    pub confirmation_token: String,
    pub cancellation_token: String,
    /// Present iff `status == AwaitingEmailConfirmation`.
    pub expires_at: Option<Ms>,
    pub notes: Option<String>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Booking {
    pub fn scope(&self) -> TenantScope {
        TenantScope::from_option(self.tenant_id.as_deref())
    }

    /// Key of the `(tenant, startAt, serviceId)` uniqueness constraint.
    pub fn slot_key(&self) -> SlotKey {
        SlotKey {
            tenant_id: self.tenant_id.clone(),
            start_at: self.start_at,
            service_id: self.service_id.clone(),
        }
    }

    /// Interval the booking occupies, or `None` when it has no explicit end
    /// and must be treated as an instant.
    pub fn occupied_span(&self) -> Option<Span> {
        self.end_at.map(|end| Span::new(self.start_at, end))
    }

    /// Whether the booking takes up any part of `span`. A booking without an
    /// explicit end is an instant.
    pub fn occupies(&self, span: &Span) -> bool {
        match self.occupied_span() {
            Some(own) => own.overlaps(span),
            None => span.contains_instant(self.start_at),
        }
    }

    /// Not cancelled, and if still unconfirmed, not past its hold.
    pub fn is_live(&self, now: Ms) -> bool {
        match self.status {
            BookingStatus::Cancelled => false,
            BookingStatus::AwaitingEmailConfirmation => self.expires_at.is_some_and(|exp| exp > now),
            _ => true,
        }
    }

    /// Checks the shape invariants the store refuses to persist without.
    pub fn check_shape(&self) -> Result<(), &'static str> {
        if let Some(end) = self.end_at
            && end <= self.start_at
        {
            return Err("end must be after start");
        }
        match (self.status, self.expires_at) {
            (BookingStatus::AwaitingEmailConfirmation, None) => {
                Err("unconfirmed booking without expiry")
            }
            (BookingStatus::AwaitingEmailConfirmation, Some(_)) => Ok(()),
            (_, Some(_)) => Err("expiry on a settled booking"),
            (_, None) => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub tenant_id: Option<String>,
    pub start_at: Ms,
    pub service_id: String,
}

/// Filter for `find_many`.
#[derive(Debug, Clone)]
pub struct BookingFilter {
    pub scope: TenantScope,
    /// Accepted statuses; empty means all.
    pub statuses: Vec<BookingStatus>,
    /// Half-open window on `start_at`.
    pub window: Option<Span>,
}

impl BookingFilter {
    pub fn scoped(scope: TenantScope) -> Self {
        Self {
            scope,
            statuses: Vec::new(),
            window: None,
        }
    }

    pub fn matches(&self, b: &Booking) -> bool {
        self.scope.matches(b.tenant_id.as_deref())
            && (self.statuses.is_empty() || self.statuses.contains(&b.status))
            && self.window.is_none_or(|w| w.contains_instant(b.start_at))
    }
}

/// WAL record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BookingCreated(Booking),
    StatusChanged {
        id: Ulid,
        status: BookingStatus,
        expires_at: Option<Ms>,
        updated_at: Ms,
    },
    BookingDeleted {
        id: Ulid,
    },
}
