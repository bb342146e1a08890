use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use tracing::info;

use crate::availability::HoldPolicy;
use crate::model::{HOUR_MS, TenantScope};
use crate::notify::SmtpSettings;
use crate::schedule::{BusinessConfig, ScheduleProvider, default_schedule_for};
use crate::tenant::{InMemoryDirectory, Tenant, TenantError, TenantStatus};
use crate::validate::validate_config;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
    #[error("cannot read seed file {path}: {reason}")]
    Seed { path: String, reason: String },
}

/// Process configuration, read from `TURNERO_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub jwt_secret: String,
    pub confirmation_ttl_hours: u32,
    pub session_ttl_hours: u32,
    pub hold_hours: u32,
    pub sweep_interval_secs: u64,
    pub compact_threshold: u64,
    pub hold_policy: HoldPolicy,
    pub frontend_url: String,
    pub seed_file: Option<PathBuf>,
    pub metrics_port: Option<u16>,
    /// `TURNERO_ENV=development` exposes internal error detail in responses.
    pub development: bool,
    pub json_logs: bool,
    pub smtp: Option<SmtpSettings>,
}

impl Config {
    /// Load `.env` if present, then read the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let jwt_secret = var("TURNERO_JWT_SECRET").ok_or(ConfigError::Missing("TURNERO_JWT_SECRET"))?;
        if jwt_secret.len() < 16 {
            return Err(ConfigError::Invalid {
                name: "TURNERO_JWT_SECRET",
                reason: "must be at least 16 characters".into(),
            });
        }

        let smtp = match var("TURNERO_SMTP_HOST") {
            None => None,
            Some(host) => Some(SmtpSettings {
                host,
                port: parsed(var("TURNERO_SMTP_PORT"), "TURNERO_SMTP_PORT", 587)?,
                username: var("TURNERO_SMTP_USER").unwrap_or_default(),
                password: var("TURNERO_SMTP_PASS").unwrap_or_default(),
                from: var("TURNERO_SMTP_FROM").ok_or(ConfigError::Missing("TURNERO_SMTP_FROM"))?,
            }),
        };

        Ok(Self {
            bind: var("TURNERO_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed(var("TURNERO_PORT"), "TURNERO_PORT", 3000)?,
            data_dir: PathBuf::from(var("TURNERO_DATA_DIR").unwrap_or_else(|| "./data".into())),
            jwt_secret,
            confirmation_ttl_hours: positive(
                var("TURNERO_CONFIRMATION_TTL_HOURS"),
                "TURNERO_CONFIRMATION_TTL_HOURS",
                4,
            )?,
            session_ttl_hours: positive(var("TURNERO_SESSION_TTL_HOURS"), "TURNERO_SESSION_TTL_HOURS", 8)?,
            hold_hours: positive(var("TURNERO_HOLD_HOURS"), "TURNERO_HOLD_HOURS", 48)?,
            sweep_interval_secs: positive(
                var("TURNERO_SWEEP_INTERVAL_SECS"),
                "TURNERO_SWEEP_INTERVAL_SECS",
                60,
            )?,
            compact_threshold: positive(var("TURNERO_COMPACT_THRESHOLD"), "TURNERO_COMPACT_THRESHOLD", 1000)?,
            hold_policy: parsed(var("TURNERO_HOLD_POLICY"), "TURNERO_HOLD_POLICY", HoldPolicy::Reserve)?,
            frontend_url: var("TURNERO_FRONTEND_URL").unwrap_or_else(|| "http://localhost:5173".into()),
            seed_file: var("TURNERO_SEED_FILE").map(PathBuf::from),
            metrics_port: var("TURNERO_METRICS_PORT")
                .map(|v| parse_value(&v, "TURNERO_METRICS_PORT"))
                .transpose()?,
            development: var("TURNERO_ENV").is_some_and(|v| v.eq_ignore_ascii_case("development")),
            json_logs: var("TURNERO_LOG_FORMAT").is_some_and(|v| v.eq_ignore_ascii_case("json")),
            smtp,
        })
    }

    pub fn hold_ms(&self) -> i64 {
        self.hold_hours as i64 * HOUR_MS
    }
}

fn parse_value<T: FromStr>(raw: &str, name: &'static str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}

fn parsed<T: FromStr>(raw: Option<String>, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.map_or(Ok(default), |v| parse_value(&v, name))
}

fn positive<T>(raw: Option<String>, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    let value = parsed(raw, name, default)?;
    if value <= T::default() {
        return Err(ConfigError::Invalid {
            name,
            reason: "must be greater than zero".into(),
        });
    }
    Ok(value)
}

// ── Seed data ────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SeedFile {
    #[serde(rename = "negocios", default)]
    pub tenants: Vec<SeedTenant>,
}

#[derive(Debug, Deserialize)]
pub struct SeedTenant {
    #[serde(rename = "idNegocio")]
    pub id: String,
    #[serde(rename = "emailContacto")]
    pub contact_email: String,
    #[serde(rename = "estado", default = "active")]
    pub status: TenantStatus,
    #[serde(default)]
    pub config: Option<BusinessConfig>,
}

fn active() -> TenantStatus {
    TenantStatus::Activo
}

pub fn load_seed(path: &Path) -> Result<SeedFile, ConfigError> {
    let seed_error = |reason: String| ConfigError::Seed {
        path: path.display().to_string(),
        reason,
    };
    let raw = std::fs::read_to_string(path).map_err(|e| seed_error(e.to_string()))?;
    serde_json::from_str(&raw).map_err(|e| seed_error(e.to_string()))
}

/// Register seeded tenants and store their schedules. Tenants without a
/// config get the default one.
pub async fn apply_seed(
    seed: SeedFile,
    tenants: &InMemoryDirectory,
    schedules: &dyn ScheduleProvider,
    now: i64,
) -> Result<usize, ConfigError> {
    let count = seed.tenants.len();
    for entry in seed.tenants {
        let invalid = |e: TenantError| ConfigError::Invalid {
            name: "TURNERO_SEED_FILE",
            reason: format!("{}: {e}", entry.id),
        };
        let id = crate::tenant::canonical_tenant_id(&entry.id).map_err(invalid)?;
        tenants
            .register(Tenant {
                id: id.clone(),
                contact_email: entry.contact_email.trim().to_lowercase(),
                status: entry.status,
                created_at: now,
            })
            .map_err(invalid)?;

        let scope = TenantScope::Tenant(id.clone());
        let config = match entry.config {
            Some(config) => {
                validate_config(&config).map_err(|e| ConfigError::Invalid {
                    name: "TURNERO_SEED_FILE",
                    reason: format!("{id}: {e}"),
                })?;
                config
            }
            None => default_schedule_for(&scope),
        };
        schedules.put_config(&scope, config).await;
    }
    info!("seeded {count} tenants");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::schedule::InMemorySchedules;
    use crate::tenant::TenantDirectory;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const SECRET: (&str, &str) = ("TURNERO_JWT_SECRET", "0123456789abcdef0123");

    #[test]
    fn defaults() {
        let config = Config::from_lookup(lookup(&[SECRET])).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.hold_hours, 48);
        assert_eq!(config.hold_ms(), 48 * HOUR_MS);
        assert_eq!(config.confirmation_ttl_hours, 4);
        assert_eq!(config.sweep_interval_secs, 60);
        assert_eq!(config.hold_policy, HoldPolicy::Reserve);
        assert!(config.smtp.is_none());
        assert!(!config.development);
        assert_eq!(config.metrics_port, None);
    }

    #[test]
    fn secret_required() {
        assert!(matches!(
            Config::from_lookup(lookup(&[])),
            Err(ConfigError::Missing("TURNERO_JWT_SECRET"))
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[("TURNERO_JWT_SECRET", "short")])),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn overrides_and_bad_values() {
        let config = Config::from_lookup(lookup(&[
            SECRET,
            ("TURNERO_PORT", "8080"),
            ("TURNERO_HOLD_POLICY", "ignore"),
            ("TURNERO_ENV", "Development"),
            ("TURNERO_SMTP_HOST", "smtp.example.com"),
            ("TURNERO_SMTP_FROM", "Reservas <reservas@example.com>"),
        ]))
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.hold_policy, HoldPolicy::Ignore);
        assert!(config.development);
        assert_eq!(config.smtp.unwrap().port, 587);

        for (key, value) in [
            ("TURNERO_PORT", "http"),
            ("TURNERO_HOLD_HOURS", "0"),
            ("TURNERO_HOLD_POLICY", "maybe"),
        ] {
            let err = Config::from_lookup(lookup(&[SECRET, (key, value)])).unwrap_err();
            assert!(err.to_string().contains(key), "{err}");
        }
    }

    #[tokio::test]
    async fn seed_registers_tenants_and_schedules() {
        let seed: SeedFile = serde_json::from_str(
            r#"{"negocios": [
                {"idNegocio": " Salon-X ", "emailContacto": "Owner@Salon.com",
                 "config": {"nombre": "Salón X", "duracionBase": 30, "maxReservasPorSlot": 2}},
                {"idNegocio": "nuevo", "emailContacto": "a@b.co", "estado": "pendiente"}
            ]}"#,
        )
        .unwrap();
        let tenants = InMemoryDirectory::new();
        let schedules = InMemorySchedules::new();
        assert_eq!(apply_seed(seed, &tenants, &schedules, 0).await.unwrap(), 2);

        let salon = tenants.lookup("salon-x").await.unwrap();
        assert_eq!(salon.contact_email, "owner@salon.com");
        assert!(tenants.lookup("nuevo").await.is_none());
        let config = schedules.config(&TenantScope::Tenant("salon-x".into())).await;
        assert_eq!(config.max_per_slot, 2);
    }

    #[tokio::test]
    async fn seed_with_invalid_config_fails() {
        let seed: SeedFile = serde_json::from_str(
            r#"{"negocios": [{"idNegocio": "x", "emailContacto": "a@b.co",
                "config": {"nombre": "X", "duracionBase": 1, "maxReservasPorSlot": 1}}]}"#,
        )
        .unwrap();
        let err = apply_seed(seed, &InMemoryDirectory::new(), &InMemorySchedules::new(), 0)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("duracionBase"));
    }
}
