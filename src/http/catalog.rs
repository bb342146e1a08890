//! Business configuration, blocked dates and tenant provisioning.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use tracing::info;

use crate::auth::{AdminSession, Role};
use crate::lifecycle::{BookingError, BookingService};
use crate::model::TenantScope;
use crate::schedule::{BusinessConfig, Service, default_schedule_for};
use crate::store::now_ms;
use crate::tenant::Tenant;
use crate::validate::{normalize_tenant_id, validate_config};

use super::AppState;
use super::dto::*;
use super::error::ApiError;

type ApiResult<T> = Result<T, ApiError>;

fn public_scope(tenant_id: Option<&str>) -> Result<TenantScope, BookingError> {
    Ok(TenantScope::from_option(normalize_tenant_id(tenant_id)?.as_deref()))
}

pub async fn get_config(
    State(state): State<AppState>,
    query: Result<Query<TenantQuery>, QueryRejection>,
) -> ApiResult<Json<BusinessConfig>> {
    let Query(q) = query?;
    let scope = public_scope(q.tenant_id.as_deref())?;
    Ok(Json(state.bookings.schedules().config(&scope).await))
}

pub async fn put_config(
    State(state): State<AppState>,
    session: AdminSession,
    body: Result<Json<ConfigUpdate>, JsonRejection>,
) -> ApiResult<Json<BusinessConfig>> {
    let Json(update) = body?;
    let scope = BookingService::admin_scope(&session, update.tenant_id.as_deref())?;
    validate_config(&update.config).map_err(BookingError::from)?;

    state
        .bookings
        .schedules()
        .put_config(&scope, update.config.clone())
        .await;
    info!(tenant = scope.tenant_id().unwrap_or("-"), "business config updated");
    Ok(Json(update.config))
}

pub async fn services(
    State(state): State<AppState>,
    query: Result<Query<TenantQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<Service>>> {
    let Query(q) = query?;
    let scope = public_scope(q.tenant_id.as_deref())?;
    Ok(Json(state.bookings.schedules().config(&scope).await.services))
}

pub async fn blocked_dates(
    State(state): State<AppState>,
    query: Result<Query<TenantQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<BlockedDateView>>> {
    let Query(q) = query?;
    let scope = public_scope(q.tenant_id.as_deref())?;
    let dates = state.bookings.schedules().blocked_dates(&scope).await;
    Ok(Json(
        dates
            .into_iter()
            .map(|d| BlockedDateView {
                fecha: d.format("%Y-%m-%d").to_string(),
            })
            .collect(),
    ))
}

pub async fn block_date(
    State(state): State<AppState>,
    session: AdminSession,
    body: Result<Json<BlockRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<BlockedDateView>)> {
    let Json(req) = body?;
    let scope = BookingService::admin_scope(&session, req.tenant_id.as_deref())?;
    let fecha = req.fecha.trim().to_string();
    let added = state
        .bookings
        .schedules()
        .block_date(&scope, &fecha)
        .await
        .map_err(BookingError::from)?;
    let status = if added {
        info!(tenant = scope.tenant_id().unwrap_or("-"), "date {fecha} blocked");
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(BlockedDateView { fecha })))
}

pub async fn unblock_date(
    State(state): State<AppState>,
    session: AdminSession,
    Path(fecha): Path<String>,
    query: Result<Query<TenantQuery>, QueryRejection>,
) -> ApiResult<Json<MessageView>> {
    let Query(q) = query?;
    let scope = BookingService::admin_scope(&session, q.tenant_id.as_deref())?;
    let removed = state
        .bookings
        .schedules()
        .unblock_date(&scope, &fecha)
        .await
        .map_err(BookingError::from)?;
    if !removed {
        return Err(ApiError::not_found(format!("date {fecha} is not blocked")));
    }
    info!(tenant = scope.tenant_id().unwrap_or("-"), "date {fecha} unblocked");
    Ok(Json(MessageView::ok()))
}

/// Activate a business once its subscription is paid. New tenants start
/// from the default schedule.
pub async fn provision(
    State(state): State<AppState>,
    session: AdminSession,
    body: Result<Json<ProvisionRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Tenant>)> {
    if session.role != Role::SuperAdmin {
        return Err(ApiError::forbidden("only a super administrator can provision businesses"));
    }
    let Json(req) = body?;
    let (tenant, created) = state
        .bookings
        .tenants()
        .provision(&req.tenant_id, &req.contact_email, now_ms())
        .await
        .map_err(BookingError::from)?;

    if created {
        let scope = TenantScope::Tenant(tenant.id.clone());
        state
            .bookings
            .schedules()
            .put_config(&scope, default_schedule_for(&scope))
            .await;
        info!(tenant = %tenant.id, "business provisioned");
        Ok((StatusCode::CREATED, Json(tenant)))
    } else {
        info!(tenant = %tenant.id, "business reactivated");
        Ok((StatusCode::OK, Json(tenant)))
    }
}
