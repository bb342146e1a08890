use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::lifecycle::describe;
use crate::model::*;
use crate::notify::{Notification, NotifyHub};
use crate::schedule::ScheduleProvider;
use crate::store::{BookingStore, Selector, Transition, now_ms};

const EXPIRE: Transition<'static> = Transition::new(
    &[BookingStatus::AwaitingEmailConfirmation],
    BookingStatus::Cancelled,
);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub cancelled: usize,
    /// Resolved by a confirmation or cancellation between scan and write.
    pub lost_races: usize,
    pub errors: usize,
}

/// Cancels unconfirmed bookings whose hold has run out and tells the customer.
pub struct Sweeper {
    store: Arc<BookingStore>,
    schedules: Arc<dyn ScheduleProvider>,
    notifier: Arc<NotifyHub>,
    interval: Duration,
}

impl Sweeper {
    pub fn new(
        store: Arc<BookingStore>,
        schedules: Arc<dyn ScheduleProvider>,
        notifier: Arc<NotifyHub>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            schedules,
            notifier,
            interval,
        }
    }

    /// One pass. Each booking is handled on its own; a failure on one does
    /// not stop the rest.
    pub async fn sweep_once(&self, now: Ms) -> SweepReport {
        let expired = self.store.collect_expired(now).await;
        let mut report = SweepReport {
            expired: expired.len(),
            ..Default::default()
        };

        for id in expired {
            let selector = Selector::Id { id, scope: None };
            match self.store.update_status(selector, EXPIRE, now).await {
                Ok(Some(booking)) => {
                    report.cancelled += 1;
                    metrics::counter!(crate::observability::SWEEP_CANCELLATIONS_TOTAL).increment(1);
                    info!(
                        id = %booking.id,
                        tenant = booking.tenant_id.as_deref().unwrap_or("-"),
                        "unconfirmed booking expired, cancelled"
                    );
                    let appointment = describe(self.schedules.as_ref(), &booking).await;
                    self.notifier.publish(Notification::BookingCancelled {
                        to: booking.customer.email.clone(),
                        customer_name: booking.customer.name.clone(),
                        appointment,
                    });
                }
                Ok(None) => {
                    report.lost_races += 1;
                    debug!("sweep skip {id}: already resolved");
                }
                Err(e) => {
                    report.errors += 1;
                    warn!("sweep failed for {id}: {e}");
                }
            }
        }
        report
    }

    /// Sweep on a fixed interval until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            let report = self.sweep_once(now_ms()).await;
            if report.expired > 0 {
                info!(
                    "sweep: {} expired, {} cancelled, {} already resolved, {} errors",
                    report.expired, report.cancelled, report.lost_races, report.errors
                );
            }
        }
        debug!("sweeper stopped");
    }
}

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(store: Arc<BookingStore>, threshold: u64, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }
        let appends = store.wal_appends_since_compact().await;
        if appends >= threshold {
            match store.compact_wal().await {
                Ok(()) => info!("compacted WAL after {appends} appends"),
                Err(e) => tracing::error!("WAL compaction failed: {e}"),
            }
        }
    }
}
