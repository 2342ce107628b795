//! workforce-audit-worker: audit trail consumer
//!
//! Drains the audit work queue and writes one audit record per domain event.
//!
//! ## Architecture
//! ```text
//! [domain services] --> [workforce.events.<EventType>] --> [workforce.audit]
//!                                                              |
//!                                     +------------------------+
//!                                     v                        v
//!                                [MongoDB]       [workforce.audit.retry | .dlq]
//! ```
//!
//! ## Configuration
//! - WORKFORCE_CONFIG: Path to a YAML config file (optional)
//! - WORKFORCE__AMQP__*, WORKFORCE__STORAGE__MONGODB__*: Field overrides
//! - WORKFORCE_LOG: Log filter (default: info)
//! - WORKFORCE_LOG_FORMAT: `json` for JSON lines

use std::net::SocketAddr;
use std::sync::Arc;

use lapin::Connection;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tonic_health::server::health_reporter;
use tonic_health::ServingStatus;
use tracing::{error, info};

use workforce_audit::bus::amqp::connection_properties;
use workforce_audit::config::Config;
use workforce_audit::consumer::AuditWorker;
use workforce_audit::storage::{init_audit_store, AuditStore};
use workforce_audit::utils::bootstrap::{connect_with_retry, init_tracing, shutdown_signal};

/// Health service name reported alongside the overall ("") status.
const HEALTH_SERVICE: &str = "workforce.audit.Worker";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = Config::load(None)?;
    config.validate()?;

    let storage = &config.storage;
    let store = connect_with_retry("mongodb", &storage.mongodb.database, move || {
        init_audit_store(storage)
    })
    .await?;
    let store: Arc<dyn AuditStore> = Arc::new(store);

    let amqp = &config.amqp;
    let url = amqp.url();
    let url = url.as_str();
    let connection = connect_with_retry("rabbitmq", &amqp.redacted_url(), move || {
        Connection::connect(url, connection_properties(amqp))
    })
    .await?;

    // Reports NOT_SERVING until the consumer is registered.
    let (mut reporter, health_service) = health_reporter();
    reporter
        .set_service_status(HEALTH_SERVICE, ServingStatus::NotServing)
        .await;
    reporter
        .set_service_status("", ServingStatus::NotServing)
        .await;

    let shutdown = CancellationToken::new();

    let addr: SocketAddr = format!("0.0.0.0:{}", config.health.port).parse()?;
    let health_shutdown = shutdown.clone();
    let health_server = tokio::spawn(async move {
        Server::builder()
            .add_service(health_service)
            .serve_with_shutdown(addr, health_shutdown.cancelled_owned())
            .await
    });

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    let worker = AuditWorker::new(amqp, store);
    let result = match worker.start(&connection).await {
        Ok(session) => {
            reporter
                .set_service_status(HEALTH_SERVICE, ServingStatus::Serving)
                .await;
            reporter
                .set_service_status("", ServingStatus::Serving)
                .await;
            info!(
                health_port = config.health.port,
                queue = session.queue(),
                "workforce-audit-worker started"
            );
            session.drain(shutdown.clone()).await
        }
        Err(e) => Err(e),
    };

    reporter
        .set_service_status(HEALTH_SERVICE, ServingStatus::NotServing)
        .await;
    reporter
        .set_service_status("", ServingStatus::NotServing)
        .await;
    shutdown.cancel();

    if let Err(e) = connection.close(200, "Bye").await {
        error!(error = %e, "Failed to close AMQP connection");
    }

    match health_server.await {
        Ok(Err(e)) => error!(error = %e, "Health server failed"),
        Err(e) => error!(error = %e, "Health server task panicked"),
        Ok(Ok(())) => {}
    }

    result?;
    info!("workforce-audit-worker stopped");
    Ok(())
}
