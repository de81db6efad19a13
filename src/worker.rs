//! Queue handler that answers user messages and writes the reply back

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::chat::{ChatError, ChatService};
use crate::models::{AssistantReply, LlmTask};
use crate::task_queue::envelope::Envelope;
use crate::task_queue::error::HandlerError;

/// Produces the assistant reply for a task
///
/// Implementations wrap the actual model provider. Any error is treated as
/// transient and the task is retried by the queue.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(&self, task: &LlmTask) -> Result<AssistantReply, HandlerError>;
}

/// Development responder that echoes the user's message back
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoResponder;

#[async_trait]
impl Responder for EchoResponder {
    async fn respond(&self, task: &LlmTask) -> Result<AssistantReply, HandlerError> {
        Ok(AssistantReply {
            content: task.content.clone(),
            model_used: Some("echo".to_string()),
            ..Default::default()
        })
    }
}

/// Consumes [`LlmTask`] envelopes: generate a reply, store it as an
/// assistant message tagged with the envelope id
///
/// Redeliveries of an already answered envelope are acknowledged without
/// generating again.
pub struct LlmWorker {
    chat: Arc<ChatService>,
    responder: Arc<dyn Responder>,
}

impl LlmWorker {
    pub fn new(chat: Arc<ChatService>, responder: Arc<dyn Responder>) -> Self {
        Self { chat, responder }
    }

    pub async fn handle(&self, envelope: Envelope) -> Result<(), HandlerError> {
        let request_id = envelope.id();
        let task: LlmTask = serde_json::from_value(envelope.payload)?;

        let existing = self
            .chat
            .find_reply(request_id)
            .await
            .map_err(|e| HandlerError::new(e.to_string()))?;
        if existing.is_some() {
            debug!(request_id = %request_id, "Request already answered");
            return Ok(());
        }

        let started = Instant::now();
        let mut reply = self.responder.respond(&task).await?;
        reply
            .processing_time
            .get_or_insert_with(|| started.elapsed().as_secs_f64());

        match self
            .chat
            .add_assistant_message(task.conversation_id, Some(request_id), reply)
            .await
        {
            Ok(message) => {
                info!(
                    request_id = %request_id,
                    conversation_id = %task.conversation_id,
                    message_id = %message.id,
                    "Stored assistant reply"
                );
                Ok(())
            }
            Err(ChatError::ConversationNotFound(id)) => {
                warn!(request_id = %request_id, conversation_id = %id, "Conversation deleted, dropping reply");
                Ok(())
            }
            Err(e) => Err(HandlerError::new(e.to_string())),
        }
    }

    /// Adapt this worker to the consumer's handler signature
    pub fn into_handler(
        self: Arc<Self>,
    ) -> impl Fn(Envelope) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send>>
           + Send
           + Sync
           + 'static {
        move |envelope| -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send>> {
            let worker = Arc::clone(&self);
            Box::pin(async move { worker.handle(envelope).await })
        }
    }
}
