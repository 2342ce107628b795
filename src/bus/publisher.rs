//! Event publishing seam for domain services.

use async_trait::async_trait;
use tracing::warn;

use super::Result;
use crate::events::DomainEvent;

/// Publishes one domain event after its state change has been committed.
///
/// Implementations:
/// - `AmqpEventPublisher`: RabbitMQ, one exchange per event type
/// - `MockEventPublisher`: records envelopes for testing
/// - `TolerantPublisher`: wraps another publisher with a failure policy
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &DomainEvent) -> Result<()>;
}

/// What a domain service does when publishing fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PublishFailurePolicy {
    /// Log the failure and report success; the committed change stands.
    #[default]
    LogAndContinue,
    /// Return the failure to the caller.
    Propagate,
}

/// Applies a [`PublishFailurePolicy`] to an inner publisher.
pub struct TolerantPublisher<P> {
    inner: P,
    policy: PublishFailurePolicy,
}

impl<P: EventPublisher> TolerantPublisher<P> {
    pub fn new(inner: P, policy: PublishFailurePolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

#[async_trait]
impl<P: EventPublisher> EventPublisher for TolerantPublisher<P> {
    async fn publish(&self, event: &DomainEvent) -> Result<()> {
        match self.inner.publish(event).await {
            Ok(()) => Ok(()),
            Err(e) if self.policy == PublishFailurePolicy::LogAndContinue => {
                warn!(
                    event_type = %event.event_type(),
                    error = %e,
                    "Publish failed, continuing without audit event"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusError, MockEventPublisher};
    use crate::events::EventKind;

    fn event() -> DomainEvent {
        DomainEvent::new(EventKind::EmployeeCreated { employee_id: 1 })
    }

    #[test]
    fn test_default_policy_is_log_and_continue() {
        assert_eq!(
            PublishFailurePolicy::default(),
            PublishFailurePolicy::LogAndContinue
        );
    }

    #[tokio::test]
    async fn test_log_and_continue_swallows_failure() {
        let inner = MockEventPublisher::new();
        inner.set_fail_on_publish(true).await;
        let publisher = TolerantPublisher::new(inner, PublishFailurePolicy::LogAndContinue);

        publisher.publish(&event()).await.unwrap();

        assert_eq!(publisher.inner().published_count().await, 0);
    }

    #[tokio::test]
    async fn test_propagate_returns_failure() {
        let inner = MockEventPublisher::new();
        inner.set_fail_on_publish(true).await;
        let publisher = TolerantPublisher::new(inner, PublishFailurePolicy::Propagate);

        let result = publisher.publish(&event()).await;

        assert!(matches!(result, Err(BusError::Connection(_))));
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let publisher =
            TolerantPublisher::new(MockEventPublisher::new(), PublishFailurePolicy::Propagate);

        publisher.publish(&event()).await.unwrap();

        assert_eq!(publisher.inner().published_count().await, 1);
    }
}
