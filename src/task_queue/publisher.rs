use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::task_queue::broker::Broker;
use crate::task_queue::envelope::Envelope;
use crate::task_queue::error::Result;

/// Per-call publish options
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Target queue; the publisher's default queue when `None`
    pub queue: Option<String>,

    /// 0-9
    pub priority: u8,

    /// Caller-chosen message id; a fresh v4 UUID when `None`
    pub message_id: Option<Uuid>,
}

impl PublishOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the target queue (builder pattern)
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    /// Set the priority (builder pattern)
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Use a caller-supplied message id (builder pattern)
    pub fn with_message_id(mut self, message_id: Uuid) -> Self {
        self.message_id = Some(message_id);
        self
    }
}

/// Enqueues task payloads on the broker
///
/// `publish` is not idempotent: two calls with the same payload create two
/// messages with distinct ids. Callers that need deduplication embed their
/// own idempotency key in the payload.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use chatq::task_queue::broker::MemoryBroker;
/// use chatq::task_queue::publisher::Publisher;
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let broker = Arc::new(MemoryBroker::new());
/// let publisher = Publisher::new(broker.clone(), "llm_requests");
///
/// let message_id = publisher
///     .publish(&json!({"conversation_id": "c1", "content": "hi"}))
///     .await
///     .unwrap();
///
/// assert_eq!(broker.messages("llm_requests")[0].message_id, message_id);
/// # });
/// ```
#[derive(Clone)]
pub struct Publisher {
    broker: Arc<dyn Broker>,
    default_queue: String,
}

impl Publisher {
    pub fn new(broker: Arc<dyn Broker>, default_queue: impl Into<String>) -> Self {
        Self {
            broker,
            default_queue: default_queue.into(),
        }
    }

    pub fn default_queue(&self) -> &str {
        &self.default_queue
    }

    /// Publish to the default queue with priority 0
    ///
    /// Returns the message id once the broker has durably stored the message.
    pub async fn publish<T: Serialize + ?Sized>(&self, payload: &T) -> Result<Uuid> {
        self.publish_with(payload, PublishOptions::default()).await
    }

    /// Publish with explicit queue, priority or message id
    ///
    /// # Errors
    ///
    /// * `QueueError::SerializationError` - payload is not representable as JSON
    /// * `QueueError::ValidationError` - priority outside 0-9
    /// * `QueueError::BrokerUnavailable` - connection lost; nothing was written
    /// * `QueueError::PublishRejected` - broker refused the message (e.g. too large)
    pub async fn publish_with<T: Serialize + ?Sized>(
        &self,
        payload: &T,
        options: PublishOptions,
    ) -> Result<Uuid> {
        let payload = serde_json::to_value(payload)?;
        let message_id = options.message_id.unwrap_or_else(Uuid::new_v4);
        let queue = options.queue.as_deref().unwrap_or(&self.default_queue);

        let envelope = Envelope::new(message_id, payload).with_priority(options.priority);
        self.publish_envelope(queue, &envelope, None).await?;

        Ok(message_id)
    }

    /// Publish an already-built envelope, optionally invisible until `not_before`
    pub async fn publish_envelope(
        &self,
        queue: &str,
        envelope: &Envelope,
        not_before: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut message = envelope.to_message()?;
        message.not_before = not_before;

        match self.broker.publish(queue, message).await {
            Ok(()) => {
                debug!(
                    queue = %queue,
                    message_id = %envelope.id(),
                    retry_count = envelope.retry_count(),
                    "Published message"
                );
                Ok(())
            }
            Err(e) => {
                warn!(queue = %queue, message_id = %envelope.id(), error = %e, "Publish failed");
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("default_queue", &self.default_queue)
            .finish_non_exhaustive()
    }
}
