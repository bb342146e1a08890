use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::limits::*;
use crate::model::Ms;
use crate::validate::is_email;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Pendiente,
    Activo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    #[serde(rename = "idNegocio")]
    pub id: String,
    #[serde(rename = "emailContacto")]
    pub contact_email: String,
    #[serde(rename = "estado")]
    pub status: TenantStatus,
    #[serde(rename = "fechaAlta")]
    pub created_at: Ms,
}

impl Tenant {
    pub fn accepts_bookings(&self) -> bool {
        self.status == TenantStatus::Activo
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TenantError {
    #[error("invalid tenant id: {0}")]
    InvalidId(&'static str),
    #[error("invalid contact email")]
    InvalidEmail,
    #[error("too many tenants")]
    LimitExceeded,
}

/// Canonical form of a tenant id: trimmed and lower-cased. Ids with
/// characters other than alphanumerics, `_` and `-` are rejected, never
/// rewritten, so every lookup of the same raw id lands on the same tenant.
pub fn canonical_tenant_id(raw: &str) -> Result<String, TenantError> {
    let id = raw.trim().to_lowercase();
    if id.is_empty() {
        return Err(TenantError::InvalidId("empty"));
    }
    if id.len() > MAX_TENANT_ID_LEN {
        return Err(TenantError::InvalidId("too long"));
    }
    if !id.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-') {
        return Err(TenantError::InvalidId(
            "only letters, digits, '_' and '-' are allowed",
        ));
    }
    Ok(id)
}

/// Registered businesses. The lifecycle only asks "is this tenant allowed";
/// `provision` is the hook a subscription checkout calls once paid.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// The tenant if it exists and may take bookings.
    async fn lookup(&self, tenant_id: &str) -> Option<Tenant>;
    /// Register or reactivate a tenant. Returns the stored record and whether
    /// it was newly created.
    async fn provision(&self, tenant_id: &str, contact_email: &str, now: Ms)
    -> Result<(Tenant, bool), TenantError>;
}

#[derive(Default)]
pub struct InMemoryDirectory {
    tenants: DashMap<String, Tenant>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a tenant record as-is (seeding).
    pub fn register(&self, tenant: Tenant) -> Result<(), TenantError> {
        let id = canonical_tenant_id(&tenant.id)?;
        if !self.tenants.contains_key(&id) && self.tenants.len() >= MAX_TENANTS {
            return Err(TenantError::LimitExceeded);
        }
        self.tenants.insert(id.clone(), Tenant { id, ..tenant });
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.tenants.len() as f64);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }
}

#[async_trait]
impl TenantDirectory for InMemoryDirectory {
    async fn lookup(&self, tenant_id: &str) -> Option<Tenant> {
        let id = canonical_tenant_id(tenant_id).ok()?;
        self.tenants
            .get(&id)
            .map(|t| t.value().clone())
            .filter(Tenant::accepts_bookings)
    }

    async fn provision(
        &self,
        tenant_id: &str,
        contact_email: &str,
        now: Ms,
    ) -> Result<(Tenant, bool), TenantError> {
        let id = canonical_tenant_id(tenant_id)?;
        let email = contact_email.trim().to_lowercase();
        if !is_email(&email) {
            return Err(TenantError::InvalidEmail);
        }

        if let Some(mut existing) = self.tenants.get_mut(&id) {
            existing.status = TenantStatus::Activo;
            existing.contact_email = email;
            return Ok((existing.clone(), false));
        }
        if self.tenants.len() >= MAX_TENANTS {
            return Err(TenantError::LimitExceeded);
        }
        let tenant = Tenant {
            id: id.clone(),
            contact_email: email,
            status: TenantStatus::Activo,
            created_at: now,
        };
        self.tenants.insert(id, tenant.clone());
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.tenants.len() as f64);
        Ok((tenant, true))
    }
}
