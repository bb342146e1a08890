//! Wire shapes. Field names follow the Spanish JSON the frontend speaks;
//! instants go out as RFC 3339 in UTC.

use chrono::{DateTime, SecondsFormat};
use serde::{Deserialize, Serialize};

use crate::availability::Availability;
use crate::lifecycle::CreatedBooking;
use crate::model::{Booking, Customer, Ms};
use crate::schedule::BusinessConfig;

pub fn rfc3339(ms: Ms) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default()
}

// ── Responses ────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct CustomerView {
    pub nombre: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telefono: Option<String>,
}

impl From<&Customer> for CustomerView {
    fn from(c: &Customer) -> Self {
        Self {
            nombre: c.name.clone(),
            email: c.email.clone(),
            telefono: c.phone.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingView {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_negocio: Option<String>,
    pub usuario: CustomerView,
    pub fecha_inicio: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fecha_fin: Option<String>,
    pub servicio: String,
    pub duracion: u32,
    pub estado: &'static str,
    pub confirmacion_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notas: Option<String>,
    pub created_at: String,
}

impl From<&Booking> for BookingView {
    fn from(b: &Booking) -> Self {
        Self {
            id: b.id.to_string(),
            id_negocio: b.tenant_id.clone(),
            usuario: CustomerView::from(&b.customer),
            fecha_inicio: rfc3339(b.start_at),
            fecha_fin: b.end_at.map(rfc3339),
            servicio: b.service_id.clone(),
            duracion: b.duration_minutes,
            estado: b.status.label(),
            confirmacion_token: b.confirmation_token.clone(),
            expires_at: b.expires_at.map(rfc3339),
            notas: b.notes.clone(),
            created_at: rfc3339(b.created_at),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedView {
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_contacto: Option<String>,
    pub cancellation_token: String,
}

impl From<CreatedBooking> for CreatedView {
    fn from(c: CreatedBooking) -> Self {
        Self {
            token: c.confirmation_token,
            email_contacto: c.contact_email,
            cancellation_token: c.cancellation_token,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ConfirmedView {
    pub success: bool,
    pub reserva: BookingView,
}

#[derive(Debug, Serialize)]
pub struct MessageView {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl MessageView {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    pub fn with(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AvailabilityView {
    pub disponible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub motivo: Option<String>,
}

impl From<Availability> for AvailabilityView {
    fn from(a: Availability) -> Self {
        match a {
            Availability::Available => Self {
                disponible: true,
                motivo: None,
            },
            Availability::Unavailable(reason) => Self {
                disponible: false,
                motivo: Some(reason.to_string()),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BlockedDateView {
    pub fecha: String,
}

// ── Requests ─────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct TenantQuery {
    #[serde(rename = "idNegocio")]
    pub tenant_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(rename = "idNegocio")]
    pub tenant_id: Option<String>,
    pub estado: Option<String>,
    pub fecha: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    #[serde(rename = "idNegocio")]
    pub tenant_id: Option<String>,
    #[serde(rename = "servicio")]
    pub service_id: String,
    #[serde(rename = "fechaInicio")]
    pub start: String,
    #[serde(rename = "duracion")]
    pub duration_minutes: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ConfigUpdate {
    #[serde(rename = "idNegocio")]
    pub tenant_id: Option<String>,
    #[serde(flatten)]
    pub config: BusinessConfig,
}

#[derive(Debug, Deserialize)]
pub struct BlockRequest {
    #[serde(rename = "idNegocio")]
    pub tenant_id: Option<String>,
    pub fecha: String,
}

#[derive(Debug, Deserialize)]
pub struct ProvisionRequest {
    #[serde(rename = "idNegocio")]
    pub tenant_id: String,
    #[serde(rename = "emailContacto")]
    pub contact_email: String,
}
