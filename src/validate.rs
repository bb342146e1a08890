//! Typed validation for booking and business-configuration input.
//!
//! Every check records a [`FieldError`] instead of stopping at the first
//! failure, so a client gets all field problems in one response.

use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::limits::*;
use crate::model::{Customer, Ms};
use crate::schedule::BusinessConfig;
use crate::tenant::{TenantError, canonical_tenant_id};

static HHMM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([01]?[0-9]|2[0-3]):[0-5][0-9]$").unwrap_or_else(|_| unreachable!()));
static YMD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap_or_else(|_| unreachable!()));
static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap_or_else(|_| unreachable!()));
static PHONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9+\-\s]+$").unwrap_or_else(|_| unreachable!()));

// ── Named validators ─────────────────────────────────────

/// `HH:MM`, 24-hour clock; the hour may be a single digit.
pub fn is_hhmm(s: &str) -> bool {
    HHMM.is_match(s)
}

/// `YYYY-MM-DD` shape only; see [`parse_ymd`] for calendar validity.
pub fn is_ymd(s: &str) -> bool {
    YMD.is_match(s)
}

pub fn is_email(s: &str) -> bool {
    s.len() <= MAX_EMAIL_LEN && EMAIL.is_match(s)
}

/// Digits, `+`, `-` and spaces.
pub fn is_phone(s: &str) -> bool {
    s.len() <= MAX_PHONE_LEN && PHONE.is_match(s)
}

/// Minutes since midnight.
pub fn parse_hhmm(s: &str) -> Option<u32> {
    if !is_hhmm(s) {
        return None;
    }
    let (h, m) = s.split_once(':')?;
    Some(h.parse::<u32>().ok()? * 60 + m.parse::<u32>().ok()?)
}

pub fn parse_ymd(s: &str) -> Option<NaiveDate> {
    if !is_ymd(s) {
        return None;
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

/// RFC 3339 timestamps; offset-less `YYYY-MM-DDTHH:MM[:SS[.fff]]` is read as UTC.
pub fn parse_instant(s: &str) -> Option<Ms> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc().timestamp_millis())
}

// ── Error collection ─────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, thiserror::Error)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    pub fn single(field: &'static str, message: impl Into<String>) -> Self {
        let mut errors = Self::default();
        errors.push(field, message);
        errors
    }

    pub fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.push(FieldError {
            field,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> &[FieldError] {
        &self.0
    }

    pub fn has(&self, field: &str) -> bool {
        self.0.iter().any(|e| e.field == field)
    }

    fn finish<T>(self, value: T) -> Result<T, Self> {
        if self.is_empty() { Ok(value) } else { Err(self) }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", e.field, e.message)?;
        }
        Ok(())
    }
}

// ── Booking requests ─────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomerInput {
    #[serde(rename = "nombre")]
    pub name: Option<String>,
    pub email: Option<String>,
    #[serde(rename = "telefono")]
    pub phone: Option<String>,
}

/// Booking request as a client sends it. All fields optional so that missing
/// ones surface as field errors rather than a decode failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookingRequest {
    #[serde(rename = "idNegocio")]
    pub tenant_id: Option<String>,
    #[serde(rename = "usuario")]
    pub customer: Option<CustomerInput>,
    #[serde(rename = "fechaInicio")]
    pub start_at: Option<String>,
    #[serde(rename = "fechaFin")]
    pub end_at: Option<String>,
    #[serde(rename = "servicio")]
    pub service_id: Option<String>,
    #[serde(rename = "duracion")]
    pub duration_minutes: Option<i64>,
    #[serde(rename = "notas")]
    pub notes: Option<String>,
}

/// A booking request that passed [`validate_booking`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidBooking {
    pub tenant_id: Option<String>,
    pub customer: Customer,
    pub service_id: String,
    pub start_at: Ms,
    pub end_at: Option<Ms>,
    pub duration_minutes: u32,
    pub notes: Option<String>,
}

fn trimmed(value: Option<&String>) -> Option<&str> {
    value.map(|s| s.trim()).filter(|s| !s.is_empty())
}

/// Canonical tenant id of an optional request field; `None` for absent or blank.
pub fn normalize_tenant_id(raw: Option<&str>) -> Result<Option<String>, TenantError> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(canonical_tenant_id)
        .transpose()
}

pub fn validate_booking(req: &BookingRequest) -> Result<ValidBooking, ValidationErrors> {
    let mut errors = ValidationErrors::default();
    let customer = req.customer.clone().unwrap_or_default();

    let name = trimmed(customer.name.as_ref()).unwrap_or_default();
    let name_chars = name.chars().count();
    if name.is_empty() {
        errors.push("usuario.nombre", "required");
    } else if name_chars < MIN_NAME_LEN {
        errors.push("usuario.nombre", format!("must have at least {MIN_NAME_LEN} characters"));
    } else if name_chars > MAX_NAME_LEN {
        errors.push("usuario.nombre", "too long");
    }

    let email = trimmed(customer.email.as_ref())
        .map(str::to_lowercase)
        .unwrap_or_default();
    if email.is_empty() {
        errors.push("usuario.email", "required");
    } else if !is_email(&email) {
        errors.push("usuario.email", "not a valid email address");
    }

    let phone = trimmed(customer.phone.as_ref()).map(str::to_string);
    if let Some(p) = &phone
        && !is_phone(p)
    {
        errors.push("usuario.telefono", "only digits, +, - and spaces are allowed");
    }

    let service_id = trimmed(req.service_id.as_ref()).unwrap_or_default();
    if service_id.is_empty() {
        errors.push("servicio", "required");
    } else if service_id.len() > MAX_SERVICE_ID_LEN {
        errors.push("servicio", "too long");
    }

    let start_at = match trimmed(req.start_at.as_ref()) {
        None => {
            errors.push("fechaInicio", "required");
            None
        }
        Some(raw) => match parse_instant(raw) {
            Some(ms) if (MIN_VALID_TIMESTAMP_MS..MAX_VALID_TIMESTAMP_MS).contains(&ms) => Some(ms),
            Some(_) => {
                errors.push("fechaInicio", "out of range");
                None
            }
            None => {
                errors.push("fechaInicio", "not a valid date");
                None
            }
        },
    };

    let end_at = match trimmed(req.end_at.as_ref()) {
        None => None,
        Some(raw) => match (parse_instant(raw), start_at) {
            (None, _) => {
                errors.push("fechaFin", "not a valid date");
                None
            }
            (Some(end), Some(start)) if end <= start => {
                errors.push("fechaFin", "must be after fechaInicio");
                None
            }
            (Some(end), Some(start)) if end - start > MAX_SPAN_DURATION_MS => {
                errors.push("fechaFin", "booking may not exceed a day");
                None
            }
            (Some(end), _) => Some(end),
        },
    };

    let duration_minutes = match req.duration_minutes {
        None => DEFAULT_DURATION_MINUTES,
        Some(d) => match u32::try_from(d) {
            Ok(d) if (MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&d) => d,
            _ => {
                errors.push(
                    "duracion",
                    format!("must be between {MIN_DURATION_MINUTES} and {MAX_DURATION_MINUTES} minutes"),
                );
                DEFAULT_DURATION_MINUTES
            }
        },
    };

    let notes = trimmed(req.notes.as_ref()).map(str::to_string);
    if notes.as_ref().is_some_and(|n| n.chars().count() > MAX_NOTES_LEN) {
        errors.push("notas", format!("may not exceed {MAX_NOTES_LEN} characters"));
    }

    let tenant_id = normalize_tenant_id(req.tenant_id.as_deref()).unwrap_or_else(|e| {
        errors.push("idNegocio", e.to_string());
        None
    });

    let Some(start_at) = start_at else {
        return Err(errors);
    };
    errors.finish(ValidBooking {
        tenant_id,
        customer: Customer {
            name: name.to_string(),
            email,
            phone,
        },
        service_id: service_id.to_string(),
        start_at,
        end_at,
        duration_minutes,
        notes,
    })
}

// ── Business configuration ───────────────────────────────

fn check_window(errors: &mut ValidationErrors, field: &'static str, start: &str, end: &str) {
    match (parse_hhmm(start), parse_hhmm(end)) {
        (Some(s), Some(e)) if s < e => {}
        (Some(_), Some(_)) => errors.push(field, "horaFin must be after horaInicio"),
        _ => errors.push(field, "invalid time format (HH:MM)"),
    }
}

pub fn validate_config(config: &BusinessConfig) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();

    if config.name.trim().is_empty() {
        errors.push("nombre", "required");
    }
    if config
        .slogan
        .as_ref()
        .is_some_and(|s| s.chars().count() > MAX_SLOGAN_LEN)
    {
        errors.push("slogan", format!("may not exceed {MAX_SLOGAN_LEN} characters"));
    }
    if config.base_duration < MIN_DURATION_MINUTES {
        errors.push("duracionBase", format!("minimum is {MIN_DURATION_MINUTES} minutes"));
    }
    if config.max_per_slot < 1 {
        errors.push("maxReservasPorSlot", "must allow at least 1 booking per slot");
    }
    if config.utc_offset_minutes.abs() > 14 * 60 {
        errors.push("utcOffsetMinutos", "out of range");
    }

    if config.services.len() > MAX_SERVICES_PER_TENANT {
        errors.push("servicios", "too many services");
    }
    let mut seen = HashSet::new();
    for service in &config.services {
        if service.id.trim().is_empty() || service.id.len() > MAX_SERVICE_ID_LEN {
            errors.push("servicios.id", "required");
        } else if !seen.insert(service.id.as_str()) {
            errors.push("servicios.id", format!("duplicate service id {}", service.id));
        }
        if service.name.trim().is_empty() {
            errors.push("servicios.nombre", "required");
        }
        if service.duration_minutes < MIN_DURATION_MINUTES {
            errors.push("servicios.duracion", format!("minimum is {MIN_DURATION_MINUTES} minutes"));
        }
    }

    for day in &config.weekly_hours {
        if day.weekday > 6 {
            errors.push("horariosNormales.dia", "must be between 0 and 6");
        }
        for window in &day.windows {
            check_window(&mut errors, "horariosNormales.tramos", &window.start, &window.end);
        }
    }

    if config.special_hours.len() > MAX_SPECIAL_HOURS {
        errors.push("horariosEspeciales", "too many entries");
    }
    for special in &config.special_hours {
        if parse_ymd(&special.date).is_none() {
            errors.push("horariosEspeciales.fecha", "invalid date format (YYYY-MM-DD)");
        }
        check_window(&mut errors, "horariosEspeciales", &special.start, &special.end);
    }

    errors.finish(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::default_schedule_for;
    use crate::model::TenantScope;

    fn request() -> BookingRequest {
        BookingRequest {
            tenant_id: Some("  Salon-X ".into()),
            customer: Some(CustomerInput {
                name: Some("  Ana Pérez ".into()),
                email: Some(" Ana@Example.COM ".into()),
                phone: Some("+34 600-000-000".into()),
            }),
            start_at: Some("2024-06-10T09:00:00Z".into()),
            end_at: None,
            service_id: Some("corte".into()),
            duration_minutes: None,
            notes: None,
        }
    }

    #[test]
    fn named_validators() {
        assert!(is_hhmm("09:00"));
        assert!(is_hhmm("9:30"));
        assert!(is_hhmm("23:59"));
        assert!(!is_hhmm("24:00"));
        assert!(!is_hhmm("12:60"));
        assert!(!is_hhmm("1200"));

        assert!(is_ymd("2024-06-10"));
        assert!(!is_ymd("2024-6-10"));
        assert!(!is_ymd("10/06/2024"));
        assert!(is_ymd("2024-13-40"));
        assert_eq!(parse_ymd("2024-13-40"), None);

        assert!(is_email("a@b.co"));
        assert!(!is_email("a@b"));
        assert!(!is_email("a b@c.de"));

        assert!(is_phone("+34 600-123-456"));
        assert!(!is_phone("600abc"));
    }

    #[test]
    fn name_length_counts_characters() {
        let mut req = request();
        req.customer.as_mut().unwrap().name = Some("ñ".repeat(MAX_NAME_LEN));
        assert!(validate_booking(&req).is_ok());

        req.customer.as_mut().unwrap().name = Some("ñ".repeat(MAX_NAME_LEN + 1));
        assert!(validate_booking(&req).unwrap_err().has("usuario.nombre"));
    }

    #[test]
    fn tenant_ids_are_canonical_or_rejected() {
        assert_eq!(normalize_tenant_id(Some("  Salon-X ")).unwrap().as_deref(), Some("salon-x"));
        assert_eq!(normalize_tenant_id(Some("   ")).unwrap(), None);
        assert_eq!(normalize_tenant_id(None).unwrap(), None);
        assert!(normalize_tenant_id(Some("salon.y")).is_err());

        let mut req = request();
        req.tenant_id = Some("salon.y".into());
        let errors = validate_booking(&req).unwrap_err();
        assert!(errors.has("idNegocio"));
    }

    #[test]
    fn parse_helpers() {
        assert_eq!(parse_hhmm("09:30"), Some(570));
        assert_eq!(parse_hhmm("0:05"), Some(5));
        assert_eq!(parse_instant("2024-06-10T09:00:00Z"), Some(1_718_010_000_000));
        assert_eq!(parse_instant("2024-06-10T11:00:00+02:00"), Some(1_718_010_000_000));
        assert_eq!(parse_instant("2024-06-10T09:00"), Some(1_718_010_000_000));
        assert_eq!(parse_instant("mañana"), None);
    }

    #[test]
    fn booking_is_normalized() {
        let valid = validate_booking(&request()).unwrap();
        assert_eq!(valid.tenant_id.as_deref(), Some("salon-x"));
        assert_eq!(valid.customer.name, "Ana Pérez");
        assert_eq!(valid.customer.email, "ana@example.com");
        assert_eq!(valid.start_at, 1_718_010_000_000);
        assert_eq!(valid.duration_minutes, 30);
        assert_eq!(valid.end_at, None);
    }

    #[test]
    fn missing_fields_reported_together() {
        let errors = validate_booking(&BookingRequest::default()).unwrap_err();
        assert!(errors.has("usuario.nombre"));
        assert!(errors.has("usuario.email"));
        assert!(errors.has("fechaInicio"));
        assert!(errors.has("servicio"));
        assert!(!errors.has("duracion"));
    }

    #[test]
    fn blank_strings_count_as_missing() {
        let mut req = request();
        req.service_id = Some("   ".into());
        req.customer = Some(CustomerInput {
            name: Some(" ".into()),
            email: Some("ana@example.com".into()),
            phone: None,
        });
        let errors = validate_booking(&req).unwrap_err();
        assert!(errors.has("servicio"));
        assert!(errors.has("usuario.nombre"));
        assert_eq!(errors.fields().len(), 2);
    }

    #[test]
    fn end_must_follow_start() {
        let mut req = request();
        req.end_at = Some("2024-06-10T09:00:00Z".into());
        assert!(validate_booking(&req).unwrap_err().has("fechaFin"));

        req.end_at = Some("2024-06-10T09:45:00Z".into());
        assert_eq!(validate_booking(&req).unwrap().end_at, Some(1_718_012_700_000));

        req.end_at = Some("not a date".into());
        assert!(validate_booking(&req).unwrap_err().has("fechaFin"));
    }

    #[test]
    fn duration_bounds() {
        let mut req = request();
        req.duration_minutes = Some(4);
        assert!(validate_booking(&req).unwrap_err().has("duracion"));
        req.duration_minutes = Some(-30);
        assert!(validate_booking(&req).unwrap_err().has("duracion"));
        req.duration_minutes = Some(5);
        assert_eq!(validate_booking(&req).unwrap().duration_minutes, 5);
    }

    #[test]
    fn notes_are_bounded() {
        let mut req = request();
        req.notes = Some("x".repeat(MAX_NOTES_LEN + 1));
        assert!(validate_booking(&req).unwrap_err().has("notas"));
        req.notes = Some("x".repeat(MAX_NOTES_LEN));
        assert!(validate_booking(&req).is_ok());
    }

    #[test]
    fn invalid_phone_and_email() {
        let mut req = request();
        req.customer = Some(CustomerInput {
            name: Some("Ana".into()),
            email: Some("ana-at-example".into()),
            phone: Some("call me".into()),
        });
        let errors = validate_booking(&req).unwrap_err();
        assert!(errors.has("usuario.email"));
        assert!(errors.has("usuario.telefono"));
        assert_eq!(
            errors.to_string(),
            "usuario.email: not a valid email address; usuario.telefono: only digits, +, - and spaces are allowed"
        );
    }

    #[test]
    fn default_config_is_valid() {
        let config = default_schedule_for(&TenantScope::Tenant("salon-x".into()));
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn config_time_formats_checked() {
        let mut config = default_schedule_for(&TenantScope::Global);
        config.weekly_hours[0].windows[0].start = "9h".into();
        config.weekly_hours[1].windows[0].end = "08:00".into();
        config.special_hours.push(crate::schedule::SpecialHours {
            date: "10-06-2024".into(),
            start: "10:00".into(),
            end: "12:00".into(),
            active: true,
        });
        config.max_per_slot = 0;

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.has("horariosNormales.tramos"));
        assert!(errors.has("horariosEspeciales.fecha"));
        assert!(errors.has("maxReservasPorSlot"));
    }
}
