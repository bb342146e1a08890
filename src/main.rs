use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use turnero::auth::{AdminAuth, SessionRequest};
use turnero::config::{Config, apply_seed, load_seed};
use turnero::http::{self, AppState};
use turnero::lifecycle::{BookingService, LifecycleSettings};
use turnero::notify::{LogNotifier, Notifier, NotifyHub, SmtpNotifier, run_delivery};
use turnero::schedule::{InMemorySchedules, ScheduleProvider};
use turnero::store::{BookingStore, now_ms};
use turnero::sweeper::{Sweeper, run_compactor};
use turnero::tenant::InMemoryDirectory;
use turnero::token::TokenIssuer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        None | Some("serve") => {}
        Some("token") => {
            let request = SessionRequest::parse(args)?;
            let auth = AdminAuth::new(config.jwt_secret.as_bytes(), config.session_ttl_hours);
            println!("{}", auth.issue_for(&request, now_ms())?);
            return Ok(());
        }
        Some(other) => {
            return Err(format!("unknown command {other:?} (expected serve or token)").into());
        }
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    turnero::observability::init(config.metrics_port)?;
    http::expose_internal_details(config.development);

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;
    let store = Arc::new(BookingStore::open(config.data_dir.join("bookings.wal"))?);

    let tenants = Arc::new(InMemoryDirectory::new());
    let schedules: Arc<dyn ScheduleProvider> = Arc::new(InMemorySchedules::new());
    if let Some(path) = &config.seed_file {
        apply_seed(load_seed(path)?, &tenants, schedules.as_ref(), now_ms()).await?;
    }

    let notifier: Arc<dyn Notifier> = match &config.smtp {
        Some(smtp) => Arc::new(SmtpNotifier::new(smtp)?),
        None => Arc::new(LogNotifier),
    };
    let hub = Arc::new(NotifyHub::new());

    let secret = config.jwt_secret.as_bytes();
    let bookings = Arc::new(BookingService::new(
        store.clone(),
        tenants.clone(),
        schedules.clone(),
        hub.clone(),
        TokenIssuer::new(secret, config.confirmation_ttl_hours),
        LifecycleSettings {
            hold_ms: config.hold_ms(),
            hold_policy: config.hold_policy,
            frontend_url: config.frontend_url.clone(),
        },
    ));
    let state = AppState {
        bookings,
        auth: Arc::new(AdminAuth::new(secret, config.session_ttl_hours)),
    };

    // Background tasks stop once the server is down. Delivery stops last so
    // whatever the sweeper publishes on its way out still goes out.
    let cancel = CancellationToken::new();
    let delivery_cancel = CancellationToken::new();
    let delivery = tokio::spawn(run_delivery(
        hub.subscribe(),
        notifier,
        delivery_cancel.clone(),
    ));
    let mut tasks = Vec::new();
    let sweeper = Sweeper::new(
        store.clone(),
        schedules.clone(),
        hub.clone(),
        Duration::from_secs(config.sweep_interval_secs),
    );
    tasks.push(tokio::spawn(sweeper.run(cancel.clone())));
    tasks.push(tokio::spawn(run_compactor(
        store.clone(),
        config.compact_threshold,
        cancel.clone(),
    )));

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("turnero listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  bookings: {}", store.len().await);
    info!("  tenants: {}", tenants.len());
    info!("  hold: {}h ({:?} policy)", config.hold_hours, config.hold_policy);
    info!("  mail: {}", if config.smtp.is_some() { "smtp" } else { "log only" });
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    http::serve(listener, state, shutdown_signal()).await?;

    info!("draining background tasks...");
    cancel.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            tracing::warn!("background task ended abnormally: {e}");
        }
    }
    delivery_cancel.cancel();
    if let Err(e) = delivery.await {
        tracing::warn!("notification delivery ended abnormally: {e}");
    }

    info!("turnero stopped");
    Ok(())
}

/// Resolves on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("cannot listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("cannot register SIGTERM handler: {e}");
                ctrl_c.await;
            }
        }
    }
    #[cfg(not(unix))]
    ctrl_c.await;
    info!("shutdown signal received, stopping server");
}
