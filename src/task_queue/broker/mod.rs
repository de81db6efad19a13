//! Durable queue broker seam
//!
//! The broker owns delivery and durability. This module defines the contract
//! the publisher and consumer rely on, and two implementations:
//!
//! - [`MemoryBroker`]: in-process queues with dead-letter routing and an
//!   operation log, for tests and single-process development
//! - [`PgBroker`]: PostgreSQL-backed durable queues using row leases and
//!   `FOR UPDATE SKIP LOCKED`

pub mod memory;
pub mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::task_queue::envelope::RETRY_COUNT_HEADER;
use crate::task_queue::error::Result;

pub use memory::{BrokerOp, MemoryBroker};
pub use postgres::PgBroker;

/// Header set on dead-lettered messages describing why they were moved
pub const DEATH_REASON_HEADER: &str = "x-death-reason";

/// Header set on dead-lettered messages naming the queue they came from
pub const FIRST_DEATH_QUEUE_HEADER: &str = "x-first-death-queue";

/// Default time a ready message may wait before it is dead-lettered (24h)
pub const DEFAULT_MESSAGE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Main queue declaration with its dead-letter routing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueTopology {
    /// Main work queue
    pub queue: String,

    /// Where rejected-without-requeue and expired messages are routed
    pub dead_letter_queue: Option<String>,

    /// Maximum time a message may sit ready in the main queue
    pub message_ttl: Option<Duration>,
}

impl QueueTopology {
    /// Declare a main queue routed to the given dead-letter queue, with the default TTL
    ///
    /// # Example
    ///
    /// ```
    /// use chatq::task_queue::broker::QueueTopology;
    ///
    /// let topology = QueueTopology::new("llm_requests", "llm_dead_letter");
    /// assert_eq!(topology.dead_letter_queue.as_deref(), Some("llm_dead_letter"));
    /// ```
    pub fn new(queue: impl Into<String>, dead_letter_queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            dead_letter_queue: Some(dead_letter_queue.into()),
            message_ttl: Some(DEFAULT_MESSAGE_TTL),
        }
    }

    /// Set the ready-message TTL (builder pattern)
    pub fn with_message_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.message_ttl = ttl;
        self
    }
}

/// A message handed to the broker for durable storage
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub message_id: Uuid,

    /// Encoded envelope (JSON)
    pub body: Vec<u8>,

    pub headers: Map<String, Value>,

    /// 0-9, higher is delivered first
    pub priority: u8,

    /// Survives broker restart
    pub persistent: bool,

    /// Message is invisible to consumers until this instant
    pub not_before: Option<DateTime<Utc>>,
}

impl OutgoingMessage {
    /// Delay visibility until `not_before` (builder pattern)
    pub fn with_not_before(mut self, not_before: DateTime<Utc>) -> Self {
        self.not_before = Some(not_before);
        self
    }
}

/// A message handed out to a consumer, unacknowledged until acked or rejected
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Broker-assigned handle for ack/reject
    pub delivery_tag: u64,

    /// Queue the message was fetched from
    pub queue: String,

    /// Consumer holding the lease
    pub consumer_tag: String,

    pub message_id: Uuid,

    pub body: Vec<u8>,

    pub headers: Map<String, Value>,

    pub priority: u8,

    /// Number of times this message has been handed out, including this one
    pub delivery_count: u32,
}

impl Delivery {
    /// Retry count as carried in the broker headers (the envelope is authoritative)
    pub fn retry_count_header(&self) -> Option<u64> {
        self.headers.get(RETRY_COUNT_HEADER).and_then(|v| v.as_u64())
    }

    /// True when the broker has handed this message out before
    pub fn redelivered(&self) -> bool {
        self.delivery_count > 1
    }
}

/// Durable message broker
///
/// Implementations must make `publish` durable before returning, and must
/// never hand a leased delivery to a second consumer until it is rejected
/// with requeue, recovered, or its lease expires.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Declare a main queue and its dead-letter queue. Idempotent.
    async fn declare(&self, topology: &QueueTopology) -> Result<()>;

    /// Durably store a message on a queue
    async fn publish(&self, queue: &str, message: OutgoingMessage) -> Result<()>;

    /// Take up to `max` ready messages, highest priority first, then enqueue order
    async fn fetch(&self, queue: &str, consumer_tag: &str, max: usize) -> Result<Vec<Delivery>>;

    /// Permanently remove a delivered message
    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Return a delivery to its queue (`requeue = true`) or route it to the
    /// dead-letter queue declared for that queue (`requeue = false`)
    async fn reject(&self, delivery: &Delivery, requeue: bool) -> Result<()>;

    /// Return every delivery still held by `consumer_tag` to ready.
    /// Returns the number of messages released.
    async fn recover(&self, consumer_tag: &str) -> Result<u64>;
}
