//! RabbitMQ pipeline integration tests using testcontainers.
//!
//! Run with: cargo test --test bus_amqp -- --ignored --nocapture
//!
//! These tests spin up RabbitMQ in a container using testcontainers-rs.
//! No manual RabbitMQ setup required.

use std::sync::Arc;
use std::time::Duration;

use lapin::options::{BasicGetOptions, BasicPublishOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Connection, ConnectionProperties};
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    GenericImage, ImageExt,
};
use tokio_util::sync::CancellationToken;

use workforce_audit::audit::{content_id, EntityType};
use workforce_audit::bus::{AmqpEventPublisher, EventPublisher};
use workforce_audit::config::AmqpConfig;
use workforce_audit::consumer::{read_retry_count, AuditWorker};
use workforce_audit::events::{DomainEvent, EventEnvelope, EventKind};
use workforce_audit::storage::MockAuditStore;

/// Start RabbitMQ container.
///
/// Returns (container, host, port).
async fn start_rabbitmq() -> (testcontainers::ContainerAsync<GenericImage>, String, u16) {
    let image = GenericImage::new("rabbitmq", "3-management")
        .with_exposed_port(5672.tcp())
        .with_wait_for(WaitFor::message_on_stdout("Server startup complete"));

    let container = image
        .with_startup_timeout(Duration::from_secs(60))
        .start()
        .await
        .expect("Failed to start rabbitmq container");

    // Brief delay to ensure RabbitMQ is fully ready
    tokio::time::sleep(Duration::from_secs(2)).await;

    let port = container
        .get_host_port_ipv4(5672)
        .await
        .expect("Failed to get mapped port");

    let host = container
        .get_host()
        .await
        .expect("Failed to get container host")
        .to_string();

    println!("RabbitMQ available at: {}:{}", host, port);

    (container, host, port)
}

/// Config with per-test queue and exchange names.
fn test_config(host: &str, port: u16) -> AmqpConfig {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    AmqpConfig {
        host: host.to_string(),
        port,
        exchange_prefix: format!("test-{}", suffix),
        audit_queue: format!("audit-{}", suffix),
        retry_queue: format!("audit-{}.retry", suffix),
        dead_letter_queue: format!("audit-{}.dlq", suffix),
        retry_base_delay_secs: 1,
        ..Default::default()
    }
}

async fn connect(config: &AmqpConfig) -> Connection {
    Connection::connect(&config.url(), ConnectionProperties::default())
        .await
        .expect("Failed to connect to RabbitMQ")
}

/// Poll `check` until it returns true or `limit` passes.
async fn wait_until<F, Fut>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

async fn queue_depth(connection: &Connection, queue: &str) -> u32 {
    passive_declare(connection, queue).await.message_count()
}

async fn passive_declare(connection: &Connection, queue: &str) -> lapin::Queue {
    let channel = connection.create_channel().await.unwrap();
    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                passive: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .unwrap()
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_published_event_is_audited() {
    println!("=== AMQP Publish and Audit Test ===");

    let (_container, host, port) = start_rabbitmq().await;
    let config = test_config(&host, port);
    let connection = connect(&config).await;
    let store = Arc::new(MockAuditStore::new());
    let worker = AuditWorker::new(&config, store.clone());
    let shutdown = CancellationToken::new();

    let event = DomainEvent::new(EventKind::TaskAssigned {
        task_id: 7,
        assigned_employee_id: Some(3),
    })
    .with_actor("alice");

    let scenario = async {
        // Topology must exist before the publisher routes into it.
        tokio::time::sleep(Duration::from_secs(1)).await;

        let publisher = AmqpEventPublisher::new(&config).expect("Failed to create publisher");
        publisher.publish(&event).await.expect("Failed to publish");

        let store = &store;
        let stored = wait_until(Duration::from_secs(10), move || async move {
            store.record_count().await == 1
        })
        .await;
        shutdown.cancel();
        stored
    };

    let (run, stored) = tokio::join!(worker.run(&connection, shutdown.clone()), scenario);

    run.expect("Worker failed");
    assert!(stored, "Timed out waiting for audit record");

    let record = store.records().await.remove(0);
    assert_eq!(record.event_type, "TaskAssigned");
    // AssignedEmployeeId is not an entity id field.
    assert_eq!(record.entity_type, EntityType::Task);
    assert_eq!(record.entity_id, "7");
    assert_eq!(record.actor, "alice");

    let envelope = EventEnvelope::from_event(&event).unwrap();
    assert_eq!(record.id, content_id(&envelope.to_bytes().unwrap()));

    println!("=== AMQP Publish and Audit Test PASSED ===");
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_failing_store_retries_then_dead_letters() {
    println!("=== AMQP Retry and Dead-letter Test ===");

    let (_container, host, port) = start_rabbitmq().await;
    let config = AmqpConfig {
        max_retries: 2,
        ..test_config(&host, port)
    };
    let connection = connect(&config).await;
    let store = Arc::new(MockAuditStore::new());
    store.set_fail_on_upsert(true).await;
    let worker = AuditWorker::new(&config, store.clone());
    let shutdown = CancellationToken::new();

    let scenario = async {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let publisher = AmqpEventPublisher::new(&config).expect("Failed to create publisher");
        publisher
            .publish(&DomainEvent::new(EventKind::EmployeeCreated {
                employee_id: 11,
            }))
            .await
            .expect("Failed to publish");

        // Retries wait 1s then 2s in the retry queue before dead-lettering.
        let (connection, queue) = (&connection, config.dead_letter_queue.as_str());
        let dead_lettered = wait_until(Duration::from_secs(20), move || async move {
            queue_depth(connection, queue).await == 1
        })
        .await;
        shutdown.cancel();
        dead_lettered
    };

    let (run, dead_lettered) = tokio::join!(worker.run(&connection, shutdown.clone()), scenario);

    run.expect("Worker failed");
    assert!(dead_lettered, "Timed out waiting for dead-letter");
    assert_eq!(queue_depth(&connection, &config.retry_queue).await, 0);
    assert_eq!(queue_depth(&connection, &config.audit_queue).await, 0);

    let channel = connection.create_channel().await.unwrap();
    let message = channel
        .basic_get(&config.dead_letter_queue, BasicGetOptions { no_ack: true })
        .await
        .unwrap()
        .expect("Dead-letter queue is empty");
    let headers = message.delivery.properties.headers().clone().unwrap_or_default();
    assert_eq!(read_retry_count(&headers), 2);
    assert_eq!(store.record_count().await, 0);

    println!("=== AMQP Retry and Dead-letter Test PASSED ===");
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_malformed_message_is_discarded() {
    println!("=== AMQP Malformed Message Test ===");

    let (_container, host, port) = start_rabbitmq().await;
    let config = test_config(&host, port);
    let connection = connect(&config).await;
    let store = Arc::new(MockAuditStore::new());
    let worker = AuditWorker::new(&config, store.clone());
    let shutdown = CancellationToken::new();

    let scenario = async {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let channel = connection.create_channel().await.unwrap();
        channel
            .basic_publish(
                "",
                &config.audit_queue,
                BasicPublishOptions::default(),
                b"definitely not json",
                BasicProperties::default(),
            )
            .await
            .unwrap()
            .await
            .unwrap();

        let (connection, queue) = (&connection, config.audit_queue.as_str());
        let drained = wait_until(Duration::from_secs(10), move || async move {
            queue_depth(connection, queue).await == 0
        })
        .await;
        // Give the consumer time to settle the delivery.
        tokio::time::sleep(Duration::from_millis(500)).await;
        shutdown.cancel();
        drained
    };

    let (run, drained) = tokio::join!(worker.run(&connection, shutdown.clone()), scenario);

    run.expect("Worker failed");
    assert!(drained);
    assert_eq!(store.write_count(), 0);
    assert_eq!(queue_depth(&connection, &config.retry_queue).await, 0);
    assert_eq!(queue_depth(&connection, &config.dead_letter_queue).await, 0);
    assert_eq!(queue_depth(&connection, &config.audit_queue).await, 0);

    println!("=== AMQP Malformed Message Test PASSED ===");
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_topology_declaration_is_idempotent() {
    let (_container, host, port) = start_rabbitmq().await;
    let config = test_config(&host, port);
    let connection = connect(&config).await;
    let worker = AuditWorker::new(&config, Arc::new(MockAuditStore::new()));

    let channel = connection.create_channel().await.unwrap();
    worker.topology().declare(&channel).await.unwrap();
    worker.topology().declare(&channel).await.unwrap();

    assert_eq!(queue_depth(&connection, &config.audit_queue).await, 0);
    assert_eq!(queue_depth(&connection, &config.retry_queue).await, 0);
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_start_registers_consumer_before_draining() {
    println!("=== AMQP Consumer Start Test ===");

    let (_container, host, port) = start_rabbitmq().await;
    let config = test_config(&host, port);
    let connection = connect(&config).await;
    let store = Arc::new(MockAuditStore::new());
    let worker = AuditWorker::new(&config, store.clone());

    let session = worker.start(&connection).await.expect("Failed to start consumer");

    assert_eq!(session.queue(), config.audit_queue);
    let queue = passive_declare(&connection, &config.audit_queue).await;
    assert_eq!(queue.consumer_count(), 1);
    assert_eq!(queue_depth(&connection, &config.retry_queue).await, 0);
    assert_eq!(queue_depth(&connection, &config.dead_letter_queue).await, 0);

    let publisher = AmqpEventPublisher::new(&config).expect("Failed to create publisher");
    publisher
        .publish(&DomainEvent::new(EventKind::ProjectCreated { project_id: 5 }))
        .await
        .expect("Failed to publish");

    let shutdown = CancellationToken::new();
    let scenario = async {
        let store = &store;
        let stored = wait_until(Duration::from_secs(10), move || async move {
            store.record_count().await == 1
        })
        .await;
        shutdown.cancel();
        stored
    };

    let (run, stored) = tokio::join!(session.drain(shutdown.clone()), scenario);

    run.expect("Consumer failed");
    assert!(stored, "Timed out waiting for audit record");
    assert_eq!(store.records().await[0].entity_type, EntityType::Project);

    println!("=== AMQP Consumer Start Test PASSED ===");
}
