//! Durable task queue for out-of-process LLM work
//!
//! A producer enqueues task payloads wrapped in an [`Envelope`]; a consumer
//! dequeues them with bounded retry and dead-lettering. Delivery is
//! at-least-once: handlers must tolerate seeing the same message id twice.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use chatq::task_queue::{Broker, MemoryBroker, Publisher, QueueTopology};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let broker = Arc::new(MemoryBroker::new());
//! broker.declare(&QueueTopology::new("llm_requests", "llm_dead_letter")).await.unwrap();
//!
//! let publisher = Publisher::new(broker.clone(), "llm_requests");
//! let request_id = publisher
//!     .publish(&json!({"conversation_id": "c1", "content": "hi"}))
//!     .await
//!     .unwrap();
//! # let _ = request_id;
//! # });
//! ```

pub mod broker;
pub mod connection;
pub mod consumer;
pub mod envelope;
pub mod error;
pub mod publisher;

// Re-export main types for convenience
pub use broker::{Broker, Delivery, MemoryBroker, OutgoingMessage, PgBroker, QueueTopology};
pub use connection::BrokerConfig;
pub use consumer::{Backoff, Consumer, ConsumerConfig, Outcome, RetryPolicy};
pub use envelope::{decode, encode, Envelope, RETRY_COUNT_HEADER};
pub use error::{HandlerError, QueueError, Result};
pub use publisher::{PublishOptions, Publisher};
