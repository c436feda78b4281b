//! Event publisher: the producing half of the pipeline.
//!
//! [`EventPublisher`] turns an [`Envelope`] into one broker message on a named
//! topic. It reports failure to its caller instead of swallowing it: a
//! mutation whose event never reached the broker will never reach the store
//! either, so the caller has to know.
//!
//! Every message is keyed by the envelope's record id, which pins all events
//! for a record to one partition and keeps them in publish order.

use crate::envelope::Envelope;
use crate::event_bus::{EventBus, EventBusError, OutboundMessage};
use crate::retry::{RetryPolicy, retry_with_predicate};
use std::sync::Arc;

/// Publishes envelopes to the event bus.
///
/// Cheap to clone; clones share the same bus.
#[derive(Clone)]
pub struct EventPublisher {
    bus: Arc<dyn EventBus>,
    retry: RetryPolicy,
}

impl EventPublisher {
    /// Create a publisher that makes a single attempt per message.
    #[must_use]
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self {
            bus,
            retry: RetryPolicy::none(),
        }
    }

    /// Retry transient broker failures according to `policy`.
    #[must_use]
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Publish one envelope to `topic`.
    ///
    /// # Errors
    ///
    /// - [`EventBusError::InvalidTopic`] if `topic` is empty
    /// - [`EventBusError::SerializationFailed`] if the envelope cannot be encoded
    /// - whatever the bus reports once retries (if any) are exhausted
    pub async fn publish(&self, topic: &str, envelope: &Envelope) -> Result<(), EventBusError> {
        if topic.trim().is_empty() {
            return Err(EventBusError::InvalidTopic(topic.to_string()));
        }

        let action = envelope.kind();
        let record_id = envelope.record_id();
        let payload = envelope
            .encode()
            .map_err(|e| EventBusError::SerializationFailed(e.to_string()))?;
        let message = OutboundMessage::keyed(record_id.as_str(), payload);

        tracing::info!(
            topic = %topic,
            action = %action,
            record_id = %record_id,
            "Preparing to send message"
        );

        let result = retry_with_predicate(
            &self.retry,
            || self.bus.publish(topic, &message),
            EventBusError::is_retryable,
        )
        .await;

        match result {
            Ok(()) => {
                tracing::info!(topic = %topic, action = %action, "Message sent");
                metrics::counter!("todo_events.publisher.published", "action" => action.as_str())
                    .increment(1);
                Ok(())
            },
            Err(e) => {
                tracing::error!(
                    topic = %topic,
                    action = %action,
                    record_id = %record_id,
                    error = %e,
                    "Failed to send message"
                );
                metrics::counter!("todo_events.publisher.failed", "action" => action.as_str())
                    .increment(1);
                Err(e)
            },
        }
    }
}
