use crate::model::{DAY_MS, Ms};

pub const MAX_TENANTS: usize = 10_000;
pub const MAX_TENANT_ID_LEN: usize = 64;
pub const MAX_BOOKINGS: usize = 1_000_000;

pub const MAX_NAME_LEN: usize = 120;
pub const MIN_NAME_LEN: usize = 2;
pub const MAX_EMAIL_LEN: usize = 254;
pub const MAX_PHONE_LEN: usize = 32;
pub const MAX_SERVICE_ID_LEN: usize = 64;
pub const MAX_NOTES_LEN: usize = 500;
pub const MAX_SLOGAN_LEN: usize = 150;

pub const MIN_DURATION_MINUTES: u32 = 5;
pub const DEFAULT_DURATION_MINUTES: u32 = 30;
pub const MAX_DURATION_MINUTES: u32 = 24 * 60;

pub const MAX_SERVICES_PER_TENANT: usize = 200;
pub const MAX_SPECIAL_HOURS: usize = 1_000;
pub const MAX_BLOCKED_DATES: usize = 5_000;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Explicit end times may not stretch a booking past a day.
pub const MAX_SPAN_DURATION_MS: Ms = DAY_MS;
