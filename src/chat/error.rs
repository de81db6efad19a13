//! Error types for the chat service

use thiserror::Error;
use uuid::Uuid;

use crate::task_queue::error::QueueError;

/// Primary store failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store error: {0}")]
    Other(String),
}

/// Errors surfaced by [`ChatService`](super::ChatService) operations
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Conversation {0} not found")]
    ConversationNotFound(Uuid),

    #[error("Message {0} not found")]
    MessageNotFound(Uuid),

    /// Caller does not own the conversation
    #[error("Access denied to this conversation")]
    Forbidden,

    #[error("Validation error: {0}")]
    Validation(String),

    /// Message was stored but could not be queued for processing
    #[error("Failed to queue message: {0}")]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ChatError {
    /// HTTP status for this error
    pub fn status_code(&self) -> u16 {
        match self {
            ChatError::ConversationNotFound(_) | ChatError::MessageNotFound(_) => 404,
            ChatError::Forbidden => 403,
            ChatError::Validation(_) => 400,
            ChatError::Queue(QueueError::PublishRejected(_)) => 413,
            ChatError::Queue(_) => 503,
            ChatError::Store(StoreError::Unavailable(_)) => 503,
            ChatError::Store(_) => 500,
        }
    }

    /// Stable error code for API clients
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::ConversationNotFound(_) => "conversation_not_found",
            ChatError::MessageNotFound(_) => "message_not_found",
            ChatError::Forbidden => "access_denied",
            ChatError::Validation(_) => "validation_error",
            ChatError::Queue(QueueError::PublishRejected(_)) => "message_rejected",
            ChatError::Queue(_) => "queue_unavailable",
            ChatError::Store(_) => "storage_error",
        }
    }
}
