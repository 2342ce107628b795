//! Long-running consume loop.

use std::fmt::Display;
use std::sync::{Arc, OnceLock};

use futures::{Stream, StreamExt};
use lapin::{
    options::{BasicConsumeOptions, BasicQosOptions},
    types::FieldTable,
    Connection,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::AuditConsumer;
use crate::bus::{AmqpChannel, BusError, Delivery, Result, Topology};
use crate::config::AmqpConfig;
use crate::storage::AuditStore;

/// Consumer tag announced to the broker.
pub const CONSUMER_TAG: &str = "workforce-audit";

/// Feed `deliveries` through `consumer`, at most `concurrency` at a time.
///
/// Stops pulling new deliveries once `shutdown` is cancelled or the stream
/// yields an error, then waits for in-flight deliveries to settle. Returns
/// the first stream error, if any.
pub async fn drain_deliveries<S, E>(
    consumer: &AuditConsumer,
    deliveries: S,
    concurrency: usize,
    shutdown: &CancellationToken,
) -> std::result::Result<(), String>
where
    S: Stream<Item = std::result::Result<Delivery, E>>,
    E: Display,
{
    let stop = shutdown.child_token();
    let stream_error = OnceLock::new();

    deliveries
        .take_until(stop.cancelled())
        .for_each_concurrent(concurrency.max(1), |delivery| {
            let stop = &stop;
            let stream_error = &stream_error;
            async move {
                match delivery {
                    Ok(delivery) => {
                        consumer.handle(&delivery).await;
                    }
                    Err(e) => {
                        error!(error = %e, "Delivery stream failed");
                        let _ = stream_error.set(e.to_string());
                        stop.cancel();
                    }
                }
            }
        })
        .await;

    match stream_error.into_inner() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Runs the audit consumer against RabbitMQ until shutdown.
pub struct AuditWorker {
    config: AmqpConfig,
    topology: Topology,
    store: Arc<dyn AuditStore>,
}

impl AuditWorker {
    pub fn new(config: &AmqpConfig, store: Arc<dyn AuditStore>) -> Self {
        Self {
            config: config.clone(),
            topology: Topology::from_config(config),
            store,
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Declare topology, consume until `shutdown` is cancelled, then close
    /// the channel once in-flight deliveries have settled.
    ///
    /// Returns an error if the delivery stream fails or ends while not
    /// shutting down.
    pub async fn run(&self, connection: &Connection, shutdown: CancellationToken) -> Result<()> {
        self.start(connection).await?.drain(shutdown).await
    }

    /// Open a channel, declare topology and register the consumer.
    ///
    /// Deliveries are not handled until [`ConsumerSession::drain`] runs.
    pub async fn start(&self, connection: &Connection) -> Result<ConsumerSession> {
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| BusError::Connection(format!("Failed to create channel: {}", e)))?;

        self.topology.declare(&channel).await?;

        channel
            .basic_qos(self.config.prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| BusError::Connection(format!("Failed to set prefetch: {}", e)))?;

        let deliveries = channel
            .basic_consume(
                self.topology.audit_queue(),
                CONSUMER_TAG,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Connection(format!("Failed to start consumer: {}", e)))?;

        let channel = Arc::new(AmqpChannel::new(channel));
        let consumer = AuditConsumer::from_config(channel.clone(), self.store.clone(), &self.config);

        info!(
            queue = %self.topology.audit_queue(),
            prefetch = self.config.prefetch,
            max_retries = self.config.max_retries,
            "Audit consumer started"
        );

        Ok(ConsumerSession {
            queue: self.topology.audit_queue().to_string(),
            prefetch: self.config.prefetch,
            channel,
            consumer,
            deliveries,
        })
    }
}

/// A registered consumer whose deliveries have not been drained yet.
pub struct ConsumerSession {
    queue: String,
    prefetch: u16,
    channel: Arc<AmqpChannel>,
    consumer: AuditConsumer,
    deliveries: lapin::Consumer,
}

impl ConsumerSession {
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Consume until `shutdown` is cancelled, then close the channel once
    /// in-flight deliveries have settled.
    pub async fn drain(self, shutdown: CancellationToken) -> Result<()> {
        let drained = drain_deliveries(
            &self.consumer,
            self.deliveries.map(|delivery| delivery.map(Delivery::from)),
            usize::from(self.prefetch),
            &shutdown,
        )
        .await;

        if let Err(e) = self.channel.close().await {
            warn!(error = %e, "Failed to close consumer channel");
        }

        match drained {
            Err(e) => Err(BusError::Connection(format!("Delivery stream failed: {}", e))),
            Ok(()) if !shutdown.is_cancelled() => Err(BusError::Connection(
                "Delivery stream ended unexpectedly".to_string(),
            )),
            Ok(()) => {
                info!(queue = %self.queue, "Audit consumer stopped");
                Ok(())
            }
        }
    }
}
