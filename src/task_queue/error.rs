//! Error types for the task queue

use thiserror::Error;

/// Result type for task queue operations
pub type Result<T> = std::result::Result<T, QueueError>;

/// Errors raised by the publisher, the broker implementations and the consumer
#[derive(Debug, Error)]
pub enum QueueError {
    /// Envelope is not valid JSON or lacks a required header field.
    /// Never retried: a parse error cannot be fixed by redelivery.
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Broker connection is unavailable; fatal to the current publish/consume call
    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// Broker refused the write (e.g. message exceeds its size limit)
    #[error("Publish rejected: {0}")]
    PublishRejected(String),

    /// Invalid input data
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Payload could not be represented as a JSON document
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Broker-side command failure that is not a connectivity problem
    #[error("Broker error: {0}")]
    BrokerError(String),

    /// Delivery is unknown to the broker (already acked, rejected or recovered)
    #[error("Unknown delivery tag {0}")]
    UnknownDelivery(u64),
}

impl QueueError {
    /// Whether a consume loop should tear down and reconnect
    pub fn is_connection_error(&self) -> bool {
        matches!(self, QueueError::BrokerUnavailable(_))
    }
}

/// Error returned by a task handler. Always considered retryable.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::new(format!("invalid task payload: {}", err))
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::SerializationError(err.to_string())
    }
}

/// Convert tokio-postgres errors, separating lost connections from SQL failures
impl From<tokio_postgres::Error> for QueueError {
    fn from(err: tokio_postgres::Error) -> Self {
        if let Some(db_error) = err.as_db_error() {
            return QueueError::BrokerError(format!(
                "{}: {}",
                db_error.code().code(),
                db_error.message()
            ));
        }

        // No server-side error attached: the socket closed or the I/O failed
        QueueError::BrokerUnavailable(err.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for QueueError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        QueueError::BrokerUnavailable(err.to_string())
    }
}

impl From<deadpool_postgres::BuildError> for QueueError {
    fn from(err: deadpool_postgres::BuildError) -> Self {
        QueueError::BrokerUnavailable(err.to_string())
    }
}

impl From<uuid::Error> for QueueError {
    fn from(err: uuid::Error) -> Self {
        QueueError::ValidationError(format!("Invalid UUID: {}", err))
    }
}
