use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::task_queue::broker::{
    Broker, Delivery, OutgoingMessage, QueueTopology, DEATH_REASON_HEADER,
    FIRST_DEATH_QUEUE_HEADER,
};
use crate::task_queue::envelope::RETRY_COUNT_HEADER;
use crate::task_queue::error::{QueueError, Result};

/// A broker operation, recorded in order for inspection
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerOp {
    Publish {
        queue: String,
        message_id: Uuid,
        retry_count: Option<u64>,
    },
    Ack {
        message_id: Uuid,
    },
    Reject {
        message_id: Uuid,
        requeue: bool,
    },
    DeadLettered {
        from: String,
        to: String,
        message_id: Uuid,
        reason: String,
    },
}

/// A message currently sitting ready in a queue
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    pub message_id: Uuid,
    pub body: Vec<u8>,
    pub headers: Map<String, Value>,
    pub priority: u8,
}

#[derive(Debug, Clone)]
struct Stored {
    seq: u64,
    message: OutgoingMessage,
    enqueued_at: DateTime<Utc>,
    delivery_count: u32,
}

#[derive(Debug)]
struct Leased {
    queue: String,
    consumer_tag: String,
    stored: Stored,
}

#[derive(Debug, Default)]
struct State {
    ready: HashMap<String, Vec<Stored>>,
    topology: HashMap<String, QueueTopology>,
    unacked: HashMap<u64, Leased>,
    ops: Vec<BrokerOp>,
    next_seq: u64,
    next_tag: u64,
}

impl State {
    fn enqueue(&mut self, queue: &str, message: OutgoingMessage, enqueued_at: DateTime<Utc>) {
        self.next_seq += 1;
        let stored = Stored {
            seq: self.next_seq,
            message,
            enqueued_at,
            delivery_count: 0,
        };
        self.ready.entry(queue.to_string()).or_default().push(stored);
    }

    /// Move a message to the dead-letter queue of `from`, or drop it if none is declared
    fn dead_letter(&mut self, from: &str, mut stored: Stored, reason: &str) {
        let target = self
            .topology
            .get(from)
            .and_then(|t| t.dead_letter_queue.clone());

        let Some(target) = target else {
            warn!(queue = %from, message_id = %stored.message.message_id, "No dead-letter queue declared, dropping message");
            return;
        };

        stored
            .message
            .headers
            .insert(DEATH_REASON_HEADER.to_string(), Value::from(reason));
        stored
            .message
            .headers
            .entry(FIRST_DEATH_QUEUE_HEADER.to_string())
            .or_insert_with(|| Value::from(from));
        stored.message.not_before = None;

        self.ops.push(BrokerOp::DeadLettered {
            from: from.to_string(),
            to: target.clone(),
            message_id: stored.message.message_id,
            reason: reason.to_string(),
        });
        self.enqueue(&target, stored.message, Utc::now());
    }

    fn expire(&mut self, queue: &str, now: DateTime<Utc>) {
        let Some(ttl) = self
            .topology
            .get(queue)
            .and_then(|t| t.message_ttl)
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
        else {
            return;
        };

        let Some(ready) = self.ready.get_mut(queue) else {
            return;
        };

        let (expired, alive): (Vec<_>, Vec<_>) = ready
            .drain(..)
            .partition(|s| s.enqueued_at + ttl <= now);
        *ready = alive;

        for stored in expired {
            self.dead_letter(queue, stored, "expired");
        }
    }
}

/// In-process broker
///
/// Queues live in memory for the lifetime of the value. Dead-letter routing,
/// priorities, delayed visibility, message TTL and per-consumer recovery
/// behave as in [`PgBroker`](super::PgBroker). Every operation is appended to
/// an operation log that tests can assert against.
///
/// # Example
///
/// ```
/// use chatq::task_queue::broker::{Broker, MemoryBroker, QueueTopology};
/// use chatq::task_queue::envelope::Envelope;
/// use serde_json::json;
/// use uuid::Uuid;
///
/// # tokio_test::block_on(async {
/// let broker = MemoryBroker::new();
/// broker.declare(&QueueTopology::new("work", "work_dlq")).await.unwrap();
///
/// let msg = Envelope::new(Uuid::new_v4(), json!({"n": 1})).to_message().unwrap();
/// broker.publish("work", msg).await.unwrap();
/// assert_eq!(broker.queue_len("work"), 1);
/// # });
/// ```
#[derive(Debug)]
pub struct MemoryBroker {
    state: Mutex<State>,
    available: AtomicBool,
    max_message_bytes: Option<usize>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            available: AtomicBool::new(true),
            max_message_bytes: None,
        }
    }

    /// Reject published bodies larger than `limit` bytes (builder pattern)
    pub fn with_max_message_bytes(mut self, limit: usize) -> Self {
        self.max_message_bytes = Some(limit);
        self
    }

    /// Simulate losing (or regaining) the broker connection
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of ready messages in a queue
    pub fn queue_len(&self, queue: &str) -> usize {
        self.lock().ready.get(queue).map(Vec::len).unwrap_or(0)
    }

    /// Ready messages in a queue, in delivery order
    pub fn messages(&self, queue: &str) -> Vec<QueuedMessage> {
        let state = self.lock();
        let mut ready: Vec<&Stored> = state
            .ready
            .get(queue)
            .map(|v| v.iter().collect())
            .unwrap_or_default();
        ready.sort_by_key(|s| (std::cmp::Reverse(s.message.priority), s.seq));

        ready
            .into_iter()
            .map(|s| QueuedMessage {
                message_id: s.message.message_id,
                body: s.message.body.clone(),
                headers: s.message.headers.clone(),
                priority: s.message.priority,
            })
            .collect()
    }

    /// Number of deliveries handed out and not yet acked, rejected or recovered
    pub fn unacked_count(&self) -> usize {
        self.lock().unacked.len()
    }

    /// Every operation performed so far, in order
    pub fn operations(&self) -> Vec<BrokerOp> {
        self.lock().ops.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock leaves plain data behind; keep serving it
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(QueueError::BrokerUnavailable(
                "in-memory broker marked unavailable".to_string(),
            ))
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn declare(&self, topology: &QueueTopology) -> Result<()> {
        self.ensure_available()?;
        let mut state = self.lock();

        state.ready.entry(topology.queue.clone()).or_default();
        if let Some(dlq) = &topology.dead_letter_queue {
            state.ready.entry(dlq.clone()).or_default();
        }
        state
            .topology
            .insert(topology.queue.clone(), topology.clone());

        debug!(queue = %topology.queue, dead_letter_queue = ?topology.dead_letter_queue, "Declared queue");
        Ok(())
    }

    async fn publish(&self, queue: &str, message: OutgoingMessage) -> Result<()> {
        self.ensure_available()?;

        if let Some(limit) = self.max_message_bytes {
            if message.body.len() > limit {
                return Err(QueueError::PublishRejected(format!(
                    "message body of {} bytes exceeds limit of {} bytes",
                    message.body.len(),
                    limit
                )));
            }
        }

        let mut state = self.lock();
        state.ops.push(BrokerOp::Publish {
            queue: queue.to_string(),
            message_id: message.message_id,
            retry_count: message
                .headers
                .get(RETRY_COUNT_HEADER)
                .and_then(|v| v.as_u64()),
        });
        state.enqueue(queue, message, Utc::now());
        Ok(())
    }

    async fn fetch(&self, queue: &str, consumer_tag: &str, max: usize) -> Result<Vec<Delivery>> {
        self.ensure_available()?;
        if max == 0 {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let mut state = self.lock();
        state.expire(queue, now);

        let Some(ready) = state.ready.get_mut(queue) else {
            return Ok(Vec::new());
        };

        ready.sort_by_key(|s| (std::cmp::Reverse(s.message.priority), s.seq));

        let mut taken = Vec::new();
        let mut remaining = Vec::with_capacity(ready.len());
        for stored in ready.drain(..) {
            let visible = stored.message.not_before.map_or(true, |t| t <= now);
            if visible && taken.len() < max {
                taken.push(stored);
            } else {
                remaining.push(stored);
            }
        }
        *ready = remaining;

        let mut deliveries = Vec::with_capacity(taken.len());
        for mut stored in taken {
            state.next_tag += 1;
            let tag = state.next_tag;
            stored.delivery_count += 1;

            deliveries.push(Delivery {
                delivery_tag: tag,
                queue: queue.to_string(),
                consumer_tag: consumer_tag.to_string(),
                message_id: stored.message.message_id,
                body: stored.message.body.clone(),
                headers: stored.message.headers.clone(),
                priority: stored.message.priority,
                delivery_count: stored.delivery_count,
            });

            state.unacked.insert(
                tag,
                Leased {
                    queue: queue.to_string(),
                    consumer_tag: consumer_tag.to_string(),
                    stored,
                },
            );
        }

        Ok(deliveries)
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.ensure_available()?;
        let mut state = self.lock();

        let leased = state
            .unacked
            .remove(&delivery.delivery_tag)
            .ok_or(QueueError::UnknownDelivery(delivery.delivery_tag))?;

        state.ops.push(BrokerOp::Ack {
            message_id: leased.stored.message.message_id,
        });
        Ok(())
    }

    async fn reject(&self, delivery: &Delivery, requeue: bool) -> Result<()> {
        self.ensure_available()?;
        let mut state = self.lock();

        let leased = state
            .unacked
            .remove(&delivery.delivery_tag)
            .ok_or(QueueError::UnknownDelivery(delivery.delivery_tag))?;

        state.ops.push(BrokerOp::Reject {
            message_id: leased.stored.message.message_id,
            requeue,
        });

        if requeue {
            state
                .ready
                .entry(leased.queue)
                .or_default()
                .push(leased.stored);
        } else {
            state.dead_letter(&leased.queue, leased.stored, "rejected");
        }
        Ok(())
    }

    async fn recover(&self, consumer_tag: &str) -> Result<u64> {
        let mut state = self.lock();

        let tags: Vec<u64> = state
            .unacked
            .iter()
            .filter(|(_, leased)| leased.consumer_tag == consumer_tag)
            .map(|(tag, _)| *tag)
            .collect();

        for tag in &tags {
            if let Some(leased) = state.unacked.remove(tag) {
                state
                    .ready
                    .entry(leased.queue)
                    .or_default()
                    .push(leased.stored);
            }
        }

        Ok(tags.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task_queue::envelope::Envelope;
    use serde_json::json;
    use std::time::Duration;

    fn message(priority: u8) -> OutgoingMessage {
        Envelope::new(Uuid::new_v4(), json!({"p": priority}))
            .with_priority(priority)
            .to_message()
            .unwrap()
    }

    async fn declared() -> MemoryBroker {
        let broker = MemoryBroker::new();
        broker
            .declare(&QueueTopology::new("work", "work_dlq"))
            .await
            .unwrap();
        broker
    }

    #[tokio::test]
    async fn test_fetch_respects_max_and_priority() {
        let broker = declared().await;
        let low = message(0);
        let high = message(7);
        broker.publish("work", low.clone()).await.unwrap();
        broker.publish("work", high.clone()).await.unwrap();
        broker.publish("work", message(0)).await.unwrap();

        let batch = broker.fetch("work", "c1", 2).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].message_id, high.message_id);
        assert_eq!(batch[1].message_id, low.message_id);
        assert_eq!(broker.queue_len("work"), 1);
        assert_eq!(broker.unacked_count(), 2);
    }

    #[tokio::test]
    async fn test_ack_removes_permanently() {
        let broker = declared().await;
        broker.publish("work", message(0)).await.unwrap();

        let delivery = broker.fetch("work", "c1", 10).await.unwrap().remove(0);
        broker.ack(&delivery).await.unwrap();

        assert_eq!(broker.unacked_count(), 0);
        assert_eq!(broker.queue_len("work"), 0);
        assert!(matches!(
            broker.ack(&delivery).await,
            Err(QueueError::UnknownDelivery(_))
        ));
    }

    #[tokio::test]
    async fn test_reject_without_requeue_routes_to_dead_letter() {
        let broker = declared().await;
        let msg = message(0);
        broker.publish("work", msg.clone()).await.unwrap();

        let delivery = broker.fetch("work", "c1", 1).await.unwrap().remove(0);
        broker.reject(&delivery, false).await.unwrap();

        assert_eq!(broker.queue_len("work"), 0);
        let dead = broker.messages("work_dlq");
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].message_id, msg.message_id);
        assert_eq!(dead[0].headers[DEATH_REASON_HEADER], "rejected");
        assert_eq!(dead[0].headers[FIRST_DEATH_QUEUE_HEADER], "work");
        assert_eq!(dead[0].headers[RETRY_COUNT_HEADER], 0);
    }

    #[tokio::test]
    async fn test_reject_with_requeue_redelivers() {
        let broker = declared().await;
        broker.publish("work", message(0)).await.unwrap();

        let first = broker.fetch("work", "c1", 1).await.unwrap().remove(0);
        broker.reject(&first, true).await.unwrap();

        let second = broker.fetch("work", "c1", 1).await.unwrap().remove(0);
        assert_eq!(second.message_id, first.message_id);
        assert_eq!(second.delivery_count, 2);
        assert!(second.redelivered());
    }

    #[tokio::test]
    async fn test_recover_releases_only_that_consumer() {
        let broker = declared().await;
        broker.publish("work", message(0)).await.unwrap();
        broker.publish("work", message(0)).await.unwrap();

        broker.fetch("work", "c1", 1).await.unwrap();
        broker.fetch("work", "c2", 1).await.unwrap();

        assert_eq!(broker.recover("c1").await.unwrap(), 1);
        assert_eq!(broker.queue_len("work"), 1);
        assert_eq!(broker.unacked_count(), 1);
    }

    #[tokio::test]
    async fn test_delayed_message_invisible_until_due() {
        let broker = declared().await;
        let delayed = message(0).with_not_before(Utc::now() + chrono::Duration::seconds(60));
        broker.publish("work", delayed).await.unwrap();

        assert!(broker.fetch("work", "c1", 10).await.unwrap().is_empty());
        assert_eq!(broker.queue_len("work"), 1);
    }

    #[tokio::test]
    async fn test_expired_messages_dead_lettered() {
        let broker = MemoryBroker::new();
        broker
            .declare(
                &QueueTopology::new("work", "work_dlq")
                    .with_message_ttl(Some(Duration::from_millis(10))),
            )
            .await
            .unwrap();
        broker.publish("work", message(0)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(broker.fetch("work", "c1", 10).await.unwrap().is_empty());
        let dead = broker.messages("work_dlq");
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].headers[DEATH_REASON_HEADER], "expired");
    }

    #[tokio::test]
    async fn test_oversized_publish_rejected() {
        let broker = MemoryBroker::new().with_max_message_bytes(16);
        let err = broker.publish("work", message(0)).await.unwrap_err();
        assert!(matches!(err, QueueError::PublishRejected(_)));
        assert_eq!(broker.queue_len("work"), 0);
    }

    #[tokio::test]
    async fn test_unavailable_broker_writes_nothing() {
        let broker = declared().await;
        broker.set_available(false);

        let err = broker.publish("work", message(0)).await.unwrap_err();
        assert!(err.is_connection_error());
        assert!(broker.operations().is_empty());

        broker.set_available(true);
        broker.publish("work", message(0)).await.unwrap();
        assert_eq!(broker.queue_len("work"), 1);
    }
}
