use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use ulid::Ulid;

use crate::auth::AdminSession;
use crate::store::now_ms;
use crate::validate::BookingRequest;

use super::AppState;
use super::dto::*;
use super::error::ApiError;

type ApiResult<T> = Result<T, ApiError>;

/// Malformed ids can never name a stored booking.
fn booking_id(raw: &str) -> Result<Ulid, ApiError> {
    Ulid::from_string(raw).map_err(|_| ApiError::not_found("booking not found"))
}

pub async fn create(
    State(state): State<AppState>,
    body: Result<Json<BookingRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<CreatedView>)> {
    let Json(req) = body?;
    let created = state.bookings.create_customer_booking(&req, now_ms()).await?;
    Ok((StatusCode::CREATED, Json(created.into())))
}

pub async fn create_admin(
    State(state): State<AppState>,
    session: AdminSession,
    body: Result<Json<BookingRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<BookingView>)> {
    let Json(req) = body?;
    let booking = state.bookings.create_admin_booking(&session, &req, now_ms()).await?;
    Ok((StatusCode::CREATED, Json(BookingView::from(&booking))))
}

pub async fn list(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<BookingView>>> {
    let Query(q) = query?;
    let bookings = state
        .bookings
        .list(q.tenant_id.as_deref(), q.estado.as_deref(), q.fecha.as_deref())
        .await?;
    Ok(Json(bookings.iter().map(BookingView::from).collect()))
}

pub async fn availability(
    State(state): State<AppState>,
    query: Result<Query<AvailabilityQuery>, QueryRejection>,
) -> ApiResult<Json<AvailabilityView>> {
    let Query(q) = query?;
    let result = state
        .bookings
        .check_availability(
            q.tenant_id.as_deref(),
            &q.service_id,
            &q.start,
            q.duration_minutes,
            now_ms(),
        )
        .await?;
    Ok(Json(result.into()))
}

pub async fn confirm_signed(
    State(state): State<AppState>,
    token: Result<Path<String>, PathRejection>,
) -> ApiResult<Json<ConfirmedView>> {
    let Path(token) = token?;
    let booking = state.bookings.confirm_with_signed_token(&token, now_ms()).await?;
    Ok(Json(ConfirmedView {
        success: true,
        reserva: BookingView::from(&booking),
    }))
}

pub async fn confirm_stored(
    State(state): State<AppState>,
    token: Result<Path<String>, PathRejection>,
) -> ApiResult<Json<ConfirmedView>> {
    let Path(token) = token?;
    let booking = state.bookings.confirm_with_stored_token(&token, now_ms()).await?;
    Ok(Json(ConfirmedView {
        success: true,
        reserva: BookingView::from(&booking),
    }))
}

pub async fn cancel_by_token(
    State(state): State<AppState>,
    token: Result<Path<String>, PathRejection>,
) -> ApiResult<Json<MessageView>> {
    let Path(token) = token?;
    state.bookings.cancel_with_token(&token, now_ms()).await?;
    Ok(Json(MessageView::with("Reserva cancelada")))
}

pub async fn admin_confirm(
    State(state): State<AppState>,
    session: AdminSession,
    Path(id): Path<String>,
) -> ApiResult<Json<BookingView>> {
    let booking = state
        .bookings
        .admin_confirm(&session, booking_id(&id)?, now_ms())
        .await?;
    Ok(Json(BookingView::from(&booking)))
}

pub async fn admin_cancel(
    State(state): State<AppState>,
    session: AdminSession,
    Path(id): Path<String>,
) -> ApiResult<Json<BookingView>> {
    let booking = state
        .bookings
        .admin_cancel(&session, booking_id(&id)?, now_ms())
        .await?;
    Ok(Json(BookingView::from(&booking)))
}

pub async fn delete(
    State(state): State<AppState>,
    session: AdminSession,
    Path(id): Path<String>,
    query: Result<Query<TenantQuery>, QueryRejection>,
) -> ApiResult<Json<MessageView>> {
    let Query(q) = query?;
    state
        .bookings
        .delete(&session, booking_id(&id)?, q.tenant_id.as_deref())
        .await?;
    Ok(Json(MessageView::ok()))
}
