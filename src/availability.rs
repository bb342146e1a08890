use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Timelike};

use crate::model::*;
use crate::schedule::{BusinessConfig, ScheduleProvider};
use crate::store::{BookingStore, CapacityGuard};

/// Whether an unconfirmed, unexpired hold reserves capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HoldPolicy {
    #[default]
    Reserve,
    Ignore,
}

impl FromStr for HoldPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reserve" => Ok(HoldPolicy::Reserve),
            "ignore" => Ok(HoldPolicy::Ignore),
            other => Err(format!("unknown hold policy {other:?} (expected reserve|ignore)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unavailable {
    BlockedDate,
    OutsideOpeningHours,
    Full { booked: u32, capacity: u32 },
}

impl fmt::Display for Unavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unavailable::BlockedDate => write!(f, "date is blocked"),
            Unavailable::OutsideOpeningHours => write!(f, "outside opening hours"),
            Unavailable::Full { booked, capacity } => {
                write!(f, "slot is full ({booked}/{capacity})")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Available,
    Unavailable(Unavailable),
}

impl Availability {
    pub fn is_available(&self) -> bool {
        matches!(self, Availability::Available)
    }
}

/// A requested slot: explicit end if given, otherwise start + duration.
#[derive(Debug, Clone, Copy)]
pub struct SlotRequest {
    pub start_at: Ms,
    pub end_at: Option<Ms>,
    pub duration_minutes: u32,
}

impl SlotRequest {
    pub fn span(&self) -> Span {
        let end = self
            .end_at
            .unwrap_or(self.start_at + self.duration_minutes as Ms * MINUTE_MS);
        Span::new(self.start_at, end)
    }
}

/// Local calendar date and minute-of-day of an instant.
pub(crate) fn local_date_minute(t: Ms, offset_ms: Ms) -> Option<(NaiveDate, u32)> {
    let local = DateTime::from_timestamp_millis(t + offset_ms)?.naive_utc();
    Some((local.date(), local.hour() * 60 + local.minute()))
}

/// `[startOfDay, startOfNextDay)` of a local date, in UTC ms.
pub(crate) fn local_day_span(date: NaiveDate, offset_ms: Ms) -> Span {
    let start = date.and_time(chrono::NaiveTime::MIN).and_utc().timestamp_millis() - offset_ms;
    Span::new(start, start + DAY_MS)
}

fn within_opening_hours(config: &BusinessConfig, span: &Span) -> bool {
    let offset = config.offset_ms();
    let Some((date, start_min)) = local_date_minute(span.start, offset) else {
        return false;
    };
    // Partial minutes round up.
    let length = (span.duration_ms() + MINUTE_MS - 1) / MINUTE_MS;
    let Ok(length) = u32::try_from(length) else {
        return false;
    };
    let end_min = start_min + length;
    config
        .opening_windows(date)
        .iter()
        .any(|&(open, close)| open <= start_min && end_min <= close)
}

pub struct AvailabilityChecker {
    store: Arc<BookingStore>,
    schedules: Arc<dyn ScheduleProvider>,
    policy: HoldPolicy,
}

impl AvailabilityChecker {
    pub fn new(
        store: Arc<BookingStore>,
        schedules: Arc<dyn ScheduleProvider>,
        policy: HoldPolicy,
    ) -> Self {
        Self {
            store,
            schedules,
            policy,
        }
    }

    /// Statuses that take up capacity under the configured hold policy.
    fn counted(&self) -> &'static [BookingStatus] {
        match self.policy {
            HoldPolicy::Reserve => &BookingStatus::NOT_CANCELLED,
            HoldPolicy::Ignore => &[BookingStatus::Pending, BookingStatus::Confirmed],
        }
    }

    /// Bookings in `scope` that hold capacity over `span` at `now`.
    pub async fn occupancy(&self, scope: &TenantScope, span: &Span, now: Ms) -> u32 {
        let candidates = self.store.find_near(scope, self.counted(), span).await;
        candidates
            .iter()
            .filter(|b| b.is_live(now) && b.occupies(span))
            .count() as u32
    }

    /// Blocked dates and opening hours come first; a closed slot is never
    /// available whatever its count. On success, returns the capacity
    /// condition the insert has to satisfy again under the store lock.
    pub async fn admit(
        &self,
        scope: &TenantScope,
        slot: &SlotRequest,
        now: Ms,
    ) -> Result<CapacityGuard<'static>, Unavailable> {
        let span = slot.span();
        let config = self.schedules.config(scope).await;

        let Some((date, _)) = local_date_minute(span.start, config.offset_ms()) else {
            return Err(Unavailable::OutsideOpeningHours);
        };
        if self.schedules.is_blocked(scope, date).await {
            return Err(Unavailable::BlockedDate);
        }
        if !within_opening_hours(&config, &span) {
            return Err(Unavailable::OutsideOpeningHours);
        }

        let capacity = config.max_per_slot.max(1);
        let booked = self.occupancy(scope, &span, now).await;
        if booked >= capacity {
            return Err(Unavailable::Full { booked, capacity });
        }
        Ok(CapacityGuard {
            span,
            counted: self.counted(),
            limit: capacity,
            now,
        })
    }

    pub async fn check(&self, scope: &TenantScope, slot: &SlotRequest, now: Ms) -> Availability {
        match self.admit(scope, slot, now).await {
            Ok(_) => Availability::Available,
            Err(reason) => Availability::Unavailable(reason),
        }
    }
}
