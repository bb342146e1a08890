//! Notification sink.
//!
//! State-changing code publishes onto a [`NotifyHub`] and returns at once.
//! A delivery task drains the hub into a [`Notifier`] (SMTP or log) and
//! records failures; they never reach the operation that published.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::model::Ms;

const CHANNEL_CAPACITY: usize = 1024;

/// Appointment details shared by every message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Appointment {
    pub business_name: String,
    pub service_name: String,
    pub start_at: Ms,
    /// Tenant's UTC offset, for rendering local date and time.
    pub offset_ms: Ms,
}

impl Appointment {
    /// `(dd/mm/yyyy, HH:MM)` in the tenant's local time.
    pub fn local_date_time(&self) -> (String, String) {
        match DateTime::from_timestamp_millis(self.start_at + self.offset_ms) {
            Some(dt) => (dt.format("%d/%m/%Y").to_string(), dt.format("%H:%M").to_string()),
            None => (String::new(), String::new()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// To the customer: follow the link to confirm, or cancel.
    ConfirmationRequest {
        to: String,
        customer_name: String,
        appointment: Appointment,
        confirm_url: String,
        cancel_url: String,
    },
    /// To the tenant's contact address.
    NewBookingAlert {
        to: String,
        customer_name: String,
        appointment: Appointment,
    },
    /// To the customer, after an unconfirmed booking expired.
    BookingCancelled {
        to: String,
        customer_name: String,
        appointment: Appointment,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::ConfirmationRequest { .. } => "confirmation_request",
            Notification::NewBookingAlert { .. } => "new_booking_alert",
            Notification::BookingCancelled { .. } => "booking_cancelled",
        }
    }

    pub fn recipient(&self) -> &str {
        match self {
            Notification::ConfirmationRequest { to, .. }
            | Notification::NewBookingAlert { to, .. }
            | Notification::BookingCancelled { to, .. } => to,
        }
    }

    pub fn render(&self) -> RenderedEmail {
        let (to, subject, body) = match self {
            Notification::ConfirmationRequest {
                to,
                customer_name,
                appointment: a,
                confirm_url,
                cancel_url,
            } => {
                let (date, time) = a.local_date_time();
                (
                    to,
                    format!("Confirma tu reserva en {}", a.business_name),
                    format!(
                        "Hola {customer_name},\n\n\
                         Has solicitado una reserva de {} en {} el {date} a las {time}.\n\
                         Confírmala aquí: {confirm_url}\n\n\
                         Si no confirmas la reserva, se cancelará automáticamente. \
                         Si deseas cancelarla: {cancel_url}\n",
                        a.service_name, a.business_name
                    ),
                )
            }
            Notification::NewBookingAlert {
                to,
                customer_name,
                appointment: a,
            } => {
                let (date, time) = a.local_date_time();
                (
                    to,
                    format!("Nueva solicitud de reserva de {customer_name}"),
                    format!(
                        "Has recibido una nueva solicitud de reserva en {}.\n\n\
                         Cliente: {customer_name}\nServicio: {}\nFecha: {date}\nHora: {time}\n\n\
                         La reserva está pendiente de la confirmación del cliente.\n",
                        a.business_name, a.service_name
                    ),
                )
            }
            Notification::BookingCancelled {
                to,
                customer_name,
                appointment: a,
            } => {
                let (date, time) = a.local_date_time();
                (
                    to,
                    format!("Reserva cancelada en {}", a.business_name),
                    format!(
                        "Hola {customer_name},\n\n\
                         Tu reserva para el servicio {} ha sido cancelada porque no fue \
                         verificada en el tiempo establecido.\n\
                         La cita estaba programada para el {date} a las {time}.\n",
                        a.service_name
                    ),
                )
            }
        };
        RenderedEmail {
            to: to.clone(),
            subject,
            body,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("invalid address: {0}")]
    Address(String),
    #[error("message build failed: {0}")]
    Build(String),
    #[error("transport failed: {0}")]
    Transport(String),
}

/// Delivers one notification.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError>;
}

// ── Hub ──────────────────────────────────────────────────

/// Broadcast hub between publishers and delivery.
pub struct NotifyHub {
    sender: broadcast::Sender<Notification>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            sender: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// Queue a notification. Never blocks; dropped if nothing is subscribed.
    pub fn publish(&self, notification: Notification) {
        debug!(kind = notification.kind(), "notification queued");
        if self.sender.send(notification).is_err() {
            debug!("no notification subscriber, message dropped");
        }
    }
}

/// Drain the hub into `sink` until cancelled. Each delivery runs on its own
/// task so a slow mail server never holds up the queue.
///
/// On cancellation whatever is still queued is handed to the sink, and the
/// call returns only after every delivery it started has finished.
pub async fn run_delivery(
    mut rx: broadcast::Receiver<Notification>,
    sink: Arc<dyn Notifier>,
    cancel: CancellationToken,
) {
    let tracker = TaskTracker::new();
    loop {
        let notification = tokio::select! {
            _ = cancel.cancelled() => break,
            received = rx.recv() => match received {
                Ok(n) => n,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    record_lag(skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };
        spawn_delivery(&tracker, &sink, notification);
    }

    let mut queued = 0usize;
    loop {
        match rx.try_recv() {
            Ok(notification) => {
                queued += 1;
                spawn_delivery(&tracker, &sink, notification);
            }
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => record_lag(skipped),
            Err(_) => break,
        }
    }
    tracker.close();
    if queued > 0 || !tracker.is_empty() {
        info!(queued, in_flight = tracker.len(), "flushing notifications before exit");
    }
    tracker.wait().await;
}

fn spawn_delivery(tracker: &TaskTracker, sink: &Arc<dyn Notifier>, notification: Notification) {
    let sink = sink.clone();
    tracker.spawn(async move {
        deliver_logged(sink.as_ref(), &notification).await;
    });
}

fn record_lag(skipped: u64) {
    warn!("notification delivery lagged, {skipped} messages dropped");
    metrics::counter!(crate::observability::NOTIFICATIONS_FAILED_TOTAL, "kind" => "lagged")
        .increment(skipped);
}

pub(crate) async fn deliver_logged(sink: &dyn Notifier, notification: &Notification) -> bool {
    match sink.deliver(notification).await {
        Ok(()) => {
            metrics::counter!(crate::observability::NOTIFICATIONS_SENT_TOTAL, "kind" => notification.kind())
                .increment(1);
            true
        }
        Err(e) => {
            warn!(
                kind = notification.kind(),
                to = notification.recipient(),
                "notification delivery failed: {e}"
            );
            metrics::counter!(crate::observability::NOTIFICATIONS_FAILED_TOTAL, "kind" => notification.kind())
                .increment(1);
            false
        }
    }
}

// ── Sinks ────────────────────────────────────────────────

/// Logs instead of sending; used when SMTP is not configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        let email = notification.render();
        info!(to = %email.to, subject = %email.subject, "email (smtp disabled)");
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpNotifier {
    pub fn new(settings: &SmtpSettings) -> Result<Self, NotifyError> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
            .map_err(|e| NotifyError::Transport(format!("SMTP relay error: {e}")))?
            .port(settings.port)
            .credentials(Credentials::new(
                settings.username.clone(),
                settings.password.clone(),
            ))
            .build();
        Ok(Self {
            transport,
            from: settings.from.clone(),
        })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        let email = notification.render();
        let message = Message::builder()
            .from(
                self.from
                    .parse()
                    .map_err(|e| NotifyError::Address(format!("from: {e}")))?,
            )
            .to(email
                .to
                .parse()
                .map_err(|e| NotifyError::Address(format!("to: {e}")))?)
            .subject(email.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(email.body)
            .map_err(|e| NotifyError::Build(e.to_string()))?;
        self.transport
            .send(message)
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::testing::RecordingNotifier;
    use super::*;

    fn appointment() -> Appointment {
        Appointment {
            business_name: "Salón X".into(),
            service_name: "Corte".into(),
            start_at: 1_718_010_000_000, // 2024-06-10T09:00:00Z
            offset_ms: 2 * 3_600_000,
        }
    }

    fn cancelled(to: &str) -> Notification {
        Notification::BookingCancelled {
            to: to.into(),
            customer_name: "Ana".into(),
            appointment: appointment(),
        }
    }

    #[test]
    fn renders_local_time() {
        let email = Notification::ConfirmationRequest {
            to: "ana@example.com".into(),
            customer_name: "Ana".into(),
            appointment: appointment(),
            confirm_url: "https://app/confirmar/abc".into(),
            cancel_url: "https://app/cancelar/def".into(),
        }
        .render();
        assert_eq!(email.subject, "Confirma tu reserva en Salón X");
        assert!(email.body.contains("10/06/2024 a las 11:00"));
        assert!(email.body.contains("https://app/confirmar/abc"));
        assert!(email.body.contains("https://app/cancelar/def"));
    }

    #[test]
    fn alert_subject_names_customer() {
        let email = Notification::NewBookingAlert {
            to: "owner@salon.com".into(),
            customer_name: "Ana".into(),
            appointment: appointment(),
        }
        .render();
        assert_eq!(email.to, "owner@salon.com");
        assert_eq!(email.subject, "Nueva solicitud de reserva de Ana");
    }

    #[tokio::test]
    async fn publish_and_receive() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe();
        hub.publish(cancelled("ana@example.com"));
        assert_eq!(rx.recv().await.unwrap(), cancelled("ana@example.com"));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.publish(cancelled("ana@example.com"));
    }

    #[tokio::test]
    async fn delivery_survives_failures() {
        let hub = NotifyHub::new();
        let sink = Arc::new(RecordingNotifier {
            fail_for: vec!["bad@example.com".into()],
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_delivery(hub.subscribe(), sink.clone(), cancel.clone()));

        hub.publish(cancelled("bad@example.com"));
        hub.publish(cancelled("ana@example.com"));

        for _ in 0..100 {
            if sink.attempts.load(Ordering::SeqCst) == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(
            sink.delivered.lock().unwrap().as_slice(),
            &[cancelled("ana@example.com")]
        );

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn cancel_flushes_queued_and_in_flight_deliveries() {
        let hub = NotifyHub::new();
        let sink = Arc::new(RecordingNotifier {
            latency: Some(Duration::from_millis(50)),
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_delivery(hub.subscribe(), sink.clone(), cancel.clone()));

        hub.publish(cancelled("ana@example.com"));
        // Let the first one start so it is in flight when we cancel.
        tokio::time::sleep(Duration::from_millis(10)).await;
        hub.publish(cancelled("bea@example.com"));
        hub.publish(cancelled("carla@example.com"));
        cancel.cancel();
        task.await.unwrap();

        let mut delivered: Vec<_> = sink
            .delivered
            .lock()
            .unwrap()
            .iter()
            .map(|n| n.recipient().to_string())
            .collect();
        delivered.sort();
        assert_eq!(
            delivered,
            ["ana@example.com", "bea@example.com", "carla@example.com"]
        );
    }
}
