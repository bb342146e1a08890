//! HTTP surface over the booking lifecycle.

mod bookings;
mod catalog;
pub mod dto;
pub mod error;
mod extract;

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::{MatchedPath, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, patch, post, put};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::AdminAuth;
use crate::lifecycle::BookingService;
use crate::observability::{HTTP_REQUEST_DURATION_SECONDS, HTTP_REQUESTS_TOTAL};

pub use error::{ApiError, expose_internal_details};

#[derive(Clone)]
pub struct AppState {
    pub bookings: Arc<BookingService>,
    pub auth: Arc<AdminAuth>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/reservas", post(bookings::create).get(bookings::list))
        .route("/reservas/admin", post(bookings::create_admin))
        .route("/reservas/disponibilidad", get(bookings::availability))
        .route("/reservas/confirmar/:token", get(bookings::confirm_signed))
        .route(
            "/reservas/confirmar-definitiva/:token",
            post(bookings::confirm_stored),
        )
        .route(
            "/reservas/cancelar-por-token/:token",
            post(bookings::cancel_by_token),
        )
        .route("/reservas/:id/confirm", put(bookings::admin_confirm))
        .route("/reservas/:id/cancelar", patch(bookings::admin_cancel))
        .route("/reservas/:id", delete(bookings::delete))
        .route("/servicios", get(catalog::services))
        .route("/config", get(catalog::get_config).put(catalog::put_config))
        .route("/bloqueos", get(catalog::blocked_dates).post(catalog::block_date))
        .route("/bloqueos/:fecha", delete(catalog::unblock_date))
        .route("/negocios", post(catalog::provision))
        .route_layer(middleware::from_fn(track_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn track_metrics(req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".into());
    let method = req.method().to_string();
    let started = Instant::now();

    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    metrics::counter!(
        HTTP_REQUESTS_TOTAL,
        "method" => method.clone(),
        "route" => route.clone(),
        "status" => status
    )
    .increment(1);
    metrics::histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "route" => route)
        .record(started.elapsed().as_secs_f64());
    response
}

/// Serve until `shutdown` resolves, then let in-flight requests finish.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
