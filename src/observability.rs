use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: HTTP requests served. Labels: route, method, status.
pub const HTTP_REQUESTS_TOTAL: &str = "turnero_http_requests_total";

/// Histogram: HTTP request latency in seconds. Labels: route, method.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "turnero_http_request_duration_seconds";

/// Counter: auth failures on privileged routes. Labels: reason.
pub const AUTH_FAILURES_TOTAL: &str = "turnero_auth_failures_total";

// ── Booking lifecycle ───────────────────────────────────────────

/// Counter: bookings created. Labels: path (customer, admin).
pub const BOOKINGS_CREATED_TOTAL: &str = "turnero_bookings_created_total";

/// Counter: creations rejected because the slot was full or taken.
pub const SLOT_REJECTIONS_TOTAL: &str = "turnero_slot_rejections_total";

/// Counter: status transitions applied. Labels: to, via.
pub const STATUS_TRANSITIONS_TOTAL: &str = "turnero_status_transitions_total";

/// Counter: unconfirmed bookings cancelled by the expiry sweep.
pub const SWEEP_CANCELLATIONS_TOTAL: &str = "turnero_sweep_cancellations_total";

// ── Notifications ───────────────────────────────────────────────

/// Counter: notifications delivered. Labels: kind.
pub const NOTIFICATIONS_SENT_TOTAL: &str = "turnero_notifications_sent_total";

/// Counter: notifications that failed or were dropped. Labels: kind.
pub const NOTIFICATIONS_FAILED_TOTAL: &str = "turnero_notifications_failed_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: number of registered tenants.
pub const TENANTS_ACTIVE: &str = "turnero_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "turnero_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "turnero_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
