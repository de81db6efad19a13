//! Task envelope and its wire codec
//!
//! An envelope is the unit that travels through the broker: the opaque JSON
//! payload plus delivery metadata (message id, retry count, priority). The
//! encoded form is a single JSON object:
//!
//! ```text
//! {"id":"<uuid>","x-retry-count":0,"priority":0,"payload":{...}, ...extra}
//! ```
//!
//! Unknown top-level fields are kept in `extra` and written back on encode, so
//! envelopes produced by newer publishers survive a trip through older consumers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::task_queue::broker::OutgoingMessage;
use crate::task_queue::error::{QueueError, Result};

/// Header carrying the number of failed delivery attempts
pub const RETRY_COUNT_HEADER: &str = "x-retry-count";

/// Highest priority accepted by the broker
pub const MAX_PRIORITY: u8 = 9;

const RESERVED_FIELDS: [&str; 4] = ["id", RETRY_COUNT_HEADER, "priority", "payload"];

/// A task payload with its delivery metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    id: Uuid,

    #[serde(rename = "x-retry-count", default)]
    retry_count: u32,

    #[serde(default)]
    priority: u8,

    /// Business payload, opaque to the queue
    #[serde(default)]
    pub payload: Value,

    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl Envelope {
    /// Create a fresh envelope with retry count 0 and priority 0
    pub fn new(id: Uuid, payload: Value) -> Self {
        Self {
            id,
            retry_count: 0,
            priority: 0,
            payload,
            extra: Map::new(),
        }
    }

    /// Set the priority (builder pattern). Values above 9 are rejected at publish time.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Attach an extra top-level field (builder pattern).
    ///
    /// Reserved names (`id`, `x-retry-count`, `priority`, `payload`) are ignored.
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        let key = key.into();
        if !RESERVED_FIELDS.contains(&key.as_str()) {
            self.extra.insert(key, value);
        }
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }

    /// The envelope for the next delivery attempt: same id and body, retry count + 1
    pub fn next_attempt(&self) -> Self {
        Self {
            retry_count: self.retry_count.saturating_add(1),
            ..self.clone()
        }
    }

    /// Build the broker message for this envelope: persistent, JSON body,
    /// `x-retry-count` header mirrored from the envelope
    pub fn to_message(&self) -> Result<OutgoingMessage> {
        if self.priority > MAX_PRIORITY {
            return Err(QueueError::ValidationError(format!(
                "priority {} out of range 0-{}",
                self.priority, MAX_PRIORITY
            )));
        }

        let mut headers = Map::new();
        headers.insert(RETRY_COUNT_HEADER.to_string(), Value::from(self.retry_count));

        Ok(OutgoingMessage {
            message_id: self.id,
            body: encode(self)?,
            headers,
            priority: self.priority,
            persistent: true,
            not_before: None,
        })
    }
}

/// Serialize an envelope to its wire form
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(envelope)?)
}

/// Parse an envelope from its wire form
///
/// # Errors
///
/// `QueueError::MalformedEnvelope` when the bytes are not a JSON object, the
/// `id` field is missing or not a UUID, or a header field has the wrong type.
pub fn decode(bytes: &[u8]) -> Result<Envelope> {
    let envelope: Envelope = serde_json::from_slice(bytes)
        .map_err(|e| QueueError::MalformedEnvelope(e.to_string()))?;

    if envelope.priority > MAX_PRIORITY {
        return Err(QueueError::MalformedEnvelope(format!(
            "priority {} out of range 0-{}",
            envelope.priority, MAX_PRIORITY
        )));
    }

    Ok(envelope)
}
