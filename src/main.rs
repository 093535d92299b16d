//! Abuse guard service
//!
//! This is the main entry point for the abuse guard service.
//! It initializes the application components and starts the web server.

use std::sync::Arc;
use std::time::Duration;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Context;
use dotenv::dotenv;
use log::{info, warn};
use metrics_exporter_prometheus::PrometheusBuilder;

use vacant_room_guard::api::{self, ApiState};
use vacant_room_guard::config;
use vacant_room_guard::core::alerts::{run_alert_worker, AlertSink, EmailNotifier, LogAlertSink, QueuedAlertSink};
use vacant_room_guard::core::audit::{run_audit_writer, AuditSink, FileAuditLog, MemoryAuditLog};
use vacant_room_guard::core::{start_maintenance, AbuseGuard, QueryLogThrottle};

const ALERT_RETRY_DELAY: Duration = Duration::from_secs(5);

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    env_logger::init();

    info!("Starting abuse guard service...");

    // Load configuration
    let config = config::load_config().context("Failed to load configuration")?;
    let config = Arc::new(config);

    let metrics = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Prometheus recorder not installed: {}", e);
            None
        }
    };

    // Alert delivery
    let alerts: Arc<dyn AlertSink> = if config.alerts.enabled {
        let notifier = EmailNotifier::new(&config.alerts).context("Failed to create alert notifier")?;
        let (sink, receiver) = QueuedAlertSink::new(config.alerts.queue_capacity);
        actix_rt::spawn(run_alert_worker(
            receiver,
            notifier,
            config.alerts.max_attempts,
            ALERT_RETRY_DELAY,
        ));
        Arc::new(sink)
    } else {
        info!("Alert delivery disabled, alerts go to the log only");
        Arc::new(LogAlertSink)
    };

    // Audit log
    let audit: Arc<dyn AuditSink> = if config.audit.enabled {
        let (log, receiver) = FileAuditLog::new(&config.audit.directory);
        actix_rt::spawn(run_audit_writer(log.directory().to_path_buf(), receiver));
        Arc::new(log)
    } else {
        Arc::new(MemoryAuditLog::default())
    };

    // Initialize the guard
    let guard = AbuseGuard::new(config.guard.clone(), &config.alerts, alerts)
        .context("Invalid guard configuration")?
        .with_audit_sink(audit.clone());
    let guard = Arc::new(guard);
    let query_log = Arc::new(QueryLogThrottle::new(&config.audit, audit.clone()));

    actix_rt::spawn(start_maintenance(
        guard.clone(),
        query_log.clone(),
        config.maintenance.clone(),
    ));

    // Create API state
    let state = web::Data::new(ApiState {
        guard,
        query_log,
        audit,
        metrics,
        config: config.clone(),
    });

    info!("Listening on {}:{}", config.server.host, config.server.port);

    // Start HTTP server
    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(state.clone())
            .configure(api::config)
    })
    .bind((config.server.host.as_str(), config.server.port))?
    .run()
    .await?;

    Ok(())
}
