//! Bootstrap utilities for the worker binary.
//!
//! Tracing setup, connect-with-retry and shutdown signal handling.

use std::future::Future;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LOG_ENV_VAR, LOG_FORMAT_ENV_VAR};

/// Initialize tracing with WORKFORCE_LOG environment variable.
///
/// Defaults to "info" level if WORKFORCE_LOG is not set. Setting
/// WORKFORCE_LOG_FORMAT=json switches to JSON lines.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if json_log_format() {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn json_log_format() -> bool {
    std::env::var(LOG_FORMAT_ENV_VAR)
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

const MAX_RETRIES: usize = 30;
const INITIAL_DELAY: Duration = Duration::from_millis(100);
const MAX_DELAY: Duration = Duration::from_secs(5);

/// Connect to a dependency with exponential backoff retry.
///
/// # Arguments
/// * `service_name` - Human-readable name for logging (e.g., "rabbitmq", "mongodb")
/// * `address` - Address to log; must not carry credentials
/// * `connect` - Async function that attempts to establish a connection
///
/// # Returns
/// The connection on success, or the last error after max retries.
pub async fn connect_with_retry<T, E, F, Fut>(
    service_name: &str,
    address: &str,
    connect: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut backoff = ExponentialBuilder::default()
        .with_min_delay(INITIAL_DELAY)
        .with_max_delay(MAX_DELAY)
        .with_max_times(MAX_RETRIES)
        .with_jitter()
        .build();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match connect().await {
            Ok(connection) => {
                info!(service = service_name, address, "Connected");
                return Ok(connection);
            }
            Err(e) => match backoff.next() {
                Some(delay) => {
                    warn!(
                        service = service_name,
                        attempt,
                        error = %e,
                        delay_ms = %delay.as_millis(),
                        "Connect failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    error!(
                        service = service_name,
                        attempts = attempt,
                        error = %e,
                        "Connect failed, giving up"
                    );
                    return Err(e);
                }
            },
        }
    }
}

/// Resolve on SIGINT (Ctrl+C) or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
