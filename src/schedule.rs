use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::limits::*;
use crate::model::{MINUTE_MS, Ms, TenantScope};
use crate::validate::{parse_hhmm, parse_ymd};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "duracion")]
    pub duration_minutes: u32,
}

/// Opening window in local `HH:MM`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    #[serde(rename = "horaInicio")]
    pub start: String,
    #[serde(rename = "horaFin")]
    pub end: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyHours {
    /// 0 = Sunday … 6 = Saturday.
    #[serde(rename = "dia")]
    pub weekday: u8,
    #[serde(rename = "tramos", default)]
    pub windows: Vec<TimeWindow>,
}

/// Date-specific override. Active entries replace the weekly windows for
/// their date; a date with only inactive entries is closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialHours {
    #[serde(rename = "fecha")]
    pub date: String,
    #[serde(rename = "horaInicio")]
    pub start: String,
    #[serde(rename = "horaFin")]
    pub end: String,
    #[serde(rename = "activo", default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessConfig {
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slogan: Option<String>,
    #[serde(rename = "duracionBase")]
    pub base_duration: u32,
    #[serde(rename = "maxReservasPorSlot")]
    pub max_per_slot: u32,
    #[serde(rename = "servicios", default)]
    pub services: Vec<Service>,
    #[serde(rename = "horariosNormales", default)]
    pub weekly_hours: Vec<WeeklyHours>,
    #[serde(rename = "horariosEspeciales", default)]
    pub special_hours: Vec<SpecialHours>,
    /// Offset of the tenant's local day from UTC.
    #[serde(rename = "utcOffsetMinutos", default)]
    pub utc_offset_minutes: i32,
}

impl BusinessConfig {
    pub fn service(&self, id: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.id == id)
    }

    pub fn offset_ms(&self) -> Ms {
        self.utc_offset_minutes as Ms * MINUTE_MS
    }

    /// Opening windows for a local date as minute-of-day ranges.
    /// Malformed `HH:MM` entries are skipped.
    pub fn opening_windows(&self, date: NaiveDate) -> Vec<(u32, u32)> {
        let key = date.format("%Y-%m-%d").to_string();
        let specials: Vec<&SpecialHours> =
            self.special_hours.iter().filter(|s| s.date == key).collect();

        let raw: Vec<(&str, &str)> = if specials.is_empty() {
            let weekday = date.weekday().num_days_from_sunday() as u8;
            self.weekly_hours
                .iter()
                .filter(|d| d.weekday == weekday)
                .flat_map(|d| d.windows.iter().map(|w| (w.start.as_str(), w.end.as_str())))
                .collect()
        } else {
            specials
                .iter()
                .filter(|s| s.active)
                .map(|s| (s.start.as_str(), s.end.as_str()))
                .collect()
        };

        raw.into_iter()
            .filter_map(|(s, e)| Some((parse_hhmm(s)?, parse_hhmm(e)?)))
            .filter(|(s, e)| s < e)
            .collect()
    }
}

/// Display name used when a tenant has not configured one.
pub const DEFAULT_BUSINESS_NAME: &str = "Tu Negocio";

/// Schedule used for a tenant that has never stored one: 09:00–13:00 and
/// 15:00–19:00 every day, 30-minute base, one booking per slot.
pub fn default_schedule_for(_scope: &TenantScope) -> BusinessConfig {
    let windows = vec![
        TimeWindow {
            start: "09:00".into(),
            end: "13:00".into(),
        },
        TimeWindow {
            start: "15:00".into(),
            end: "19:00".into(),
        },
    ];
    BusinessConfig {
        name: DEFAULT_BUSINESS_NAME.to_string(),
        slogan: None,
        base_duration: DEFAULT_DURATION_MINUTES,
        max_per_slot: 1,
        services: Vec::new(),
        weekly_hours: (0..7)
            .map(|weekday| WeeklyHours {
                weekday,
                windows: windows.clone(),
            })
            .collect(),
        special_hours: Vec::new(),
        utc_offset_minutes: 0,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("invalid date: {0}")]
    InvalidDate(String),
    #[error("{0}")]
    LimitExceeded(&'static str),
}

/// Read side consumed by availability and the sweeper, plus the writes
/// behind the configuration endpoints.
#[async_trait]
pub trait ScheduleProvider: Send + Sync {
    /// Stored config, or [`default_schedule_for`] when none is stored.
    async fn config(&self, scope: &TenantScope) -> BusinessConfig;
    async fn is_blocked(&self, scope: &TenantScope, date: NaiveDate) -> bool;
    async fn blocked_dates(&self, scope: &TenantScope) -> Vec<NaiveDate>;
    async fn put_config(&self, scope: &TenantScope, config: BusinessConfig);
    /// Returns false if the date was already blocked.
    async fn block_date(&self, scope: &TenantScope, date: &str) -> Result<bool, ScheduleError>;
    /// Returns false if the date was not blocked.
    async fn unblock_date(&self, scope: &TenantScope, date: &str) -> Result<bool, ScheduleError>;
}

#[derive(Default)]
pub struct InMemorySchedules {
    configs: DashMap<TenantScope, BusinessConfig>,
    blocked: DashMap<TenantScope, BTreeSet<NaiveDate>>,
}

impl InMemorySchedules {
    pub fn new() -> Self {
        Self::default()
    }
}

fn date_arg(date: &str) -> Result<NaiveDate, ScheduleError> {
    parse_ymd(date.trim()).ok_or_else(|| ScheduleError::InvalidDate(date.to_string()))
}

#[async_trait]
impl ScheduleProvider for InMemorySchedules {
    async fn config(&self, scope: &TenantScope) -> BusinessConfig {
        match self.configs.get(scope) {
            Some(c) => c.value().clone(),
            None => default_schedule_for(scope),
        }
    }

    async fn is_blocked(&self, scope: &TenantScope, date: NaiveDate) -> bool {
        self.blocked
            .get(scope)
            .is_some_and(|dates| dates.contains(&date))
    }

    async fn blocked_dates(&self, scope: &TenantScope) -> Vec<NaiveDate> {
        self.blocked
            .get(scope)
            .map(|dates| dates.iter().copied().collect())
            .unwrap_or_default()
    }

    async fn put_config(&self, scope: &TenantScope, config: BusinessConfig) {
        self.configs.insert(scope.clone(), config);
    }

    async fn block_date(&self, scope: &TenantScope, date: &str) -> Result<bool, ScheduleError> {
        let date = date_arg(date)?;
        let mut dates = self.blocked.entry(scope.clone()).or_default();
        if dates.len() >= MAX_BLOCKED_DATES && !dates.contains(&date) {
            return Err(ScheduleError::LimitExceeded("too many blocked dates"));
        }
        Ok(dates.insert(date))
    }

    async fn unblock_date(&self, scope: &TenantScope, date: &str) -> Result<bool, ScheduleError> {
        let date = date_arg(date)?;
        Ok(self
            .blocked
            .get_mut(scope)
            .is_some_and(|mut dates| dates.remove(&date)))
    }
}
