use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::cache::{Cache, CacheStore};
use crate::chat::error::ChatError;
use crate::chat::store::ConversationStore;
use crate::models::{
    AssistantReply, Conversation, ConversationUpdate, LlmTask, MessageRecord, NewConversation,
    SendMessageRequest,
};
use crate::task_queue::publisher::Publisher;

/// Conversation and message operations over the primary store, with
/// cache-aside reads and queue hand-off for LLM processing
///
/// Every write to a conversation record is followed by a cache delete, never
/// a cache update.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use chatq::cache::MemoryStore;
/// use chatq::chat::{ChatService, MemoryConversationStore};
/// use chatq::models::{NewConversation, SendMessageRequest};
/// use chatq::task_queue::{MemoryBroker, Publisher};
/// use uuid::Uuid;
///
/// # tokio_test::block_on(async {
/// let broker = Arc::new(MemoryBroker::new());
/// let chat = ChatService::new(
///     Arc::new(MemoryConversationStore::new()),
///     Arc::new(MemoryStore::new()),
///     Publisher::new(broker.clone(), "llm_requests"),
/// );
///
/// let user_id = Uuid::new_v4();
/// let conversation = chat
///     .create_conversation(user_id, NewConversation { title: "Hello".into(), system_prompt: None })
///     .await
///     .unwrap();
///
/// let (message, request_id) = chat
///     .add_user_message(conversation.id, user_id, SendMessageRequest {
///         content: "hi".into(),
///         llm_params: None,
///         idempotency_key: None,
///     })
///     .await
///     .unwrap();
///
/// assert_eq!(message.content, "hi");
/// assert_eq!(broker.messages("llm_requests")[0].message_id, request_id);
/// # });
/// ```
pub struct ChatService {
    store: Arc<dyn ConversationStore>,
    conversations: Cache<Conversation>,
    messages: Cache<MessageRecord>,
    publisher: Publisher,
}

impl ChatService {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        cache_store: Arc<dyn CacheStore>,
        publisher: Publisher,
    ) -> Self {
        Self {
            store,
            conversations: Cache::new(Arc::clone(&cache_store), "conversation"),
            messages: Cache::new(cache_store, "message"),
            publisher,
        }
    }

    /// Set the TTL of cached conversations and messages (builder pattern)
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.conversations = self.conversations.with_default_ttl(ttl);
        self.messages = self.messages.with_default_ttl(ttl);
        self
    }

    pub async fn create_conversation(
        &self,
        user_id: Uuid,
        request: NewConversation,
    ) -> Result<Conversation, ChatError> {
        if request.title.trim().is_empty() {
            return Err(ChatError::Validation("Conversation title cannot be empty".to_string()));
        }

        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            user_id,
            title: request.title,
            system_prompt: request.system_prompt,
            created_at: now,
            updated_at: now,
        };
        self.store.save_conversation(&conversation).await?;

        if let Some(prompt) = &conversation.system_prompt {
            self.store.set_system_message(conversation.id, prompt).await?;
        }

        info!(conversation_id = %conversation.id, user_id = %user_id, "Created conversation");
        Ok(conversation)
    }

    /// Cache first, then the primary store; repopulates the cache on a miss
    ///
    /// A cached record owned by someone else is not trusted: the primary
    /// store decides between `Forbidden` and a stale entry.
    pub async fn get_conversation(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<Conversation, ChatError> {
        if let Some(cached) = self.conversations.get(conversation_id).await {
            if cached.user_id == user_id {
                return Ok(cached);
            }
            debug!(conversation_id = %conversation_id, "Cached owner differs, checking primary store");
        }

        let conversation = self
            .store
            .get_conversation(conversation_id)
            .await?
            .ok_or(ChatError::ConversationNotFound(conversation_id))?;

        if conversation.user_id != user_id {
            return Err(ChatError::Forbidden);
        }

        self.conversations.set(conversation_id, &conversation).await;
        Ok(conversation)
    }

    /// Primary-store read with the ownership check; write paths start here
    async fn load_owned(&self, conversation_id: Uuid, user_id: Uuid) -> Result<Conversation, ChatError> {
        let conversation = self
            .store
            .get_conversation(conversation_id)
            .await?
            .ok_or(ChatError::ConversationNotFound(conversation_id))?;

        if conversation.user_id != user_id {
            return Err(ChatError::Forbidden);
        }
        Ok(conversation)
    }

    pub async fn update_conversation(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        update: ConversationUpdate,
    ) -> Result<Conversation, ChatError> {
        let mut conversation = self.load_owned(conversation_id, user_id).await?;

        if let Some(title) = update.title {
            if title.trim().is_empty() {
                return Err(ChatError::Validation("Conversation title cannot be empty".to_string()));
            }
            conversation.title = title;
        }

        if let Some(prompt) = update.system_prompt {
            self.store.set_system_message(conversation_id, &prompt).await?;
            conversation.system_prompt = Some(prompt);
        }

        conversation.updated_at = Utc::now();
        self.store.save_conversation(&conversation).await?;
        self.conversations.delete(conversation_id).await;

        Ok(conversation)
    }

    pub async fn delete_conversation(&self, conversation_id: Uuid, user_id: Uuid) -> Result<(), ChatError> {
        self.load_owned(conversation_id, user_id).await?;

        let messages = self.store.list_messages(conversation_id).await?;
        self.store.delete_conversation(conversation_id).await?;

        self.conversations.delete(conversation_id).await;
        for message in &messages {
            self.messages.delete(message.id).await;
        }

        info!(conversation_id = %conversation_id, "Deleted conversation");
        Ok(())
    }

    /// Store a user message and queue it for the LLM worker
    ///
    /// Returns the stored record and the request id, which is the queue
    /// message id. If queueing fails the message stays stored and the error
    /// is returned; nothing is dropped silently.
    pub async fn add_user_message(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        request: SendMessageRequest,
    ) -> Result<(MessageRecord, Uuid), ChatError> {
        if request.content.trim().is_empty() {
            return Err(ChatError::Validation("Message content cannot be empty".to_string()));
        }
        if let Some(params) = &request.llm_params {
            params.validate().map_err(ChatError::Validation)?;
        }

        self.get_conversation(conversation_id, user_id).await?;

        let message = MessageRecord::user(conversation_id, user_id, request.content);
        self.store.insert_message(&message).await?;
        self.store.touch_conversation(conversation_id, message.created_at).await?;
        self.conversations.delete(conversation_id).await;

        let task = LlmTask {
            message_id: message.id,
            conversation_id,
            user_id,
            content: message.content.clone(),
            llm_params: request.llm_params,
            idempotency_key: request.idempotency_key,
        };

        let request_id = self.publisher.publish(&task).await.map_err(|e| {
            error!(message_id = %message.id, error = %e, "Failed to queue message");
            ChatError::from(e)
        })?;

        info!(
            conversation_id = %conversation_id,
            message_id = %message.id,
            request_id = %request_id,
            "Queued message for processing"
        );
        Ok((message, request_id))
    }

    /// Store a generated reply. Used by the LLM worker.
    pub async fn add_assistant_message(
        &self,
        conversation_id: Uuid,
        request_id: Option<Uuid>,
        reply: AssistantReply,
    ) -> Result<MessageRecord, ChatError> {
        if self.store.get_conversation(conversation_id).await?.is_none() {
            return Err(ChatError::ConversationNotFound(conversation_id));
        }

        let message = MessageRecord::assistant(conversation_id, request_id, reply);
        self.store.insert_message(&message).await?;
        self.store.touch_conversation(conversation_id, message.created_at).await?;
        self.conversations.delete(conversation_id).await;

        Ok(message)
    }

    /// Reply already written for a queued request, if any
    pub async fn find_reply(&self, request_id: Uuid) -> Result<Option<MessageRecord>, ChatError> {
        Ok(self.store.find_reply(request_id).await?)
    }

    /// Messages of a conversation in creation order; warms the message cache
    pub async fn list_messages(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<MessageRecord>, ChatError> {
        self.get_conversation(conversation_id, user_id).await?;

        let messages = self.store.list_messages(conversation_id).await?;
        let cached = self
            .messages
            .set_many(messages.iter().map(|m| (m.id, m)))
            .await;
        debug!(conversation_id = %conversation_id, total = messages.len(), cached, "Listed messages");

        Ok(messages)
    }

    /// Single message, read through the message cache
    pub async fn get_message(&self, message_id: Uuid, user_id: Uuid) -> Result<MessageRecord, ChatError> {
        let store = Arc::clone(&self.store);
        let message = self
            .messages
            .get_or_load(message_id, || async move { store.get_message(message_id).await })
            .await?
            .ok_or(ChatError::MessageNotFound(message_id))?;

        // Ownership is checked on every read, cached or not
        self.get_conversation(message.conversation_id, user_id).await?;
        Ok(message)
    }
}

impl std::fmt::Debug for ChatService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatService")
            .field("conversations", &self.conversations)
            .field("messages", &self.messages)
            .field("publisher", &self.publisher)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::chat::MemoryConversationStore;
    use crate::models::LlmParameters;
    use crate::task_queue::MemoryBroker;

    struct Fixture {
        store: Arc<MemoryConversationStore>,
        cache: Arc<MemoryStore>,
        broker: Arc<MemoryBroker>,
        chat: ChatService,
        user_id: Uuid,
        conversation: Conversation,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryConversationStore::new());
        let cache = Arc::new(MemoryStore::new());
        let broker = Arc::new(MemoryBroker::new());
        let chat = ChatService::new(
            store.clone(),
            cache.clone(),
            Publisher::new(broker.clone(), "llm_requests"),
        );
        let user_id = Uuid::new_v4();
        let conversation = chat
            .create_conversation(
                user_id,
                NewConversation {
                    title: "Notes".to_string(),
                    system_prompt: None,
                },
            )
            .await
            .unwrap();

        Fixture {
            store,
            cache,
            broker,
            chat,
            user_id,
            conversation,
        }
    }

    fn request(content: &str) -> SendMessageRequest {
        SendMessageRequest {
            content: content.to_string(),
            llm_params: None,
            idempotency_key: None,
        }
    }

    #[tokio::test]
    async fn test_create_rejects_blank_title() {
        let f = fixture().await;
        let err = f
            .chat
            .create_conversation(
                f.user_id,
                NewConversation {
                    title: "  ".to_string(),
                    system_prompt: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
    }

    #[tokio::test]
    async fn test_invalid_llm_params_are_not_queued() {
        let f = fixture().await;
        let mut req = request("hi");
        req.llm_params = Some(LlmParameters {
            temperature: 3.5,
            ..Default::default()
        });

        let err = f
            .chat
            .add_user_message(f.conversation.id, f.user_id, req)
            .await
            .unwrap_err();

        assert!(matches!(err, ChatError::Validation(_)));
        assert_eq!(f.broker.queue_len("llm_requests"), 0);
        assert!(f.store.list_messages(f.conversation.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_queued_task_carries_message() {
        let f = fixture().await;
        let mut req = request("summarize this");
        req.idempotency_key = Some("abc".to_string());

        let (message, _) = f
            .chat
            .add_user_message(f.conversation.id, f.user_id, req)
            .await
            .unwrap();

        let body = &f.broker.messages("llm_requests")[0].body;
        let envelope = crate::task_queue::decode(body).unwrap();
        let task: LlmTask = serde_json::from_value(envelope.payload).unwrap();
        assert_eq!(task.message_id, message.id);
        assert_eq!(task.conversation_id, f.conversation.id);
        assert_eq!(task.content, "summarize this");
        assert_eq!(task.idempotency_key.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_get_message_reads_through_cache() {
        let f = fixture().await;
        let (message, _) = f
            .chat
            .add_user_message(f.conversation.id, f.user_id, request("hi"))
            .await
            .unwrap();

        let first = f.chat.get_message(message.id, f.user_id).await.unwrap();
        assert_eq!(first, message);

        // Both the message and its conversation are cached now
        f.store.set_available(false);
        let second = f.chat.get_message(message.id, f.user_id).await.unwrap();
        assert_eq!(second, message);
    }

    #[tokio::test]
    async fn test_get_message_checks_owner() {
        let f = fixture().await;
        let (message, _) = f
            .chat
            .add_user_message(f.conversation.id, f.user_id, request("private"))
            .await
            .unwrap();

        let err = f.chat.get_message(message.id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ChatError::Forbidden));

        let missing = Uuid::new_v4();
        let err = f.chat.get_message(missing, f.user_id).await.unwrap_err();
        assert!(matches!(err, ChatError::MessageNotFound(id) if id == missing));
    }

    #[tokio::test]
    async fn test_delete_drops_cached_messages() {
        let f = fixture().await;
        let (message, _) = f
            .chat
            .add_user_message(f.conversation.id, f.user_id, request("bye"))
            .await
            .unwrap();
        f.chat.list_messages(f.conversation.id, f.user_id).await.unwrap();
        assert!(f.cache.get(&format!("message:{}", message.id)).await.unwrap().is_some());

        f.chat
            .delete_conversation(f.conversation.id, f.user_id)
            .await
            .unwrap();

        assert!(f.cache.get(&format!("message:{}", message.id)).await.unwrap().is_none());
        assert!(f.cache.get(&format!("conversation:{}", f.conversation.id)).await.unwrap().is_none());
        assert!(matches!(
            f.chat.get_conversation(f.conversation.id, f.user_id).await,
            Err(ChatError::ConversationNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_assistant_message_needs_conversation() {
        let f = fixture().await;
        let err = f
            .chat
            .add_assistant_message(Uuid::new_v4(), None, AssistantReply::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::ConversationNotFound(_)));
    }

    #[tokio::test]
    async fn test_find_reply_by_request_id() {
        let f = fixture().await;
        let request_id = Uuid::new_v4();
        assert!(f.chat.find_reply(request_id).await.unwrap().is_none());

        let reply = f
            .chat
            .add_assistant_message(
                f.conversation.id,
                Some(request_id),
                AssistantReply {
                    content: "done".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(f.chat.find_reply(request_id).await.unwrap(), Some(reply));
    }

    #[tokio::test]
    async fn test_system_prompt_update() {
        let f = fixture().await;
        let updated = f
            .chat
            .update_conversation(
                f.conversation.id,
                f.user_id,
                ConversationUpdate {
                    title: None,
                    system_prompt: Some("Answer in French".to_string()),
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.system_prompt.as_deref(), Some("Answer in French"));
        let messages = f.store.list_messages(f.conversation.id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "Answer in French");
    }

    #[tokio::test]
    async fn test_update_ignores_stale_cache_entry() {
        let f = fixture().await;
        let id = f.conversation.id;
        f.chat.get_conversation(id, f.user_id).await.unwrap();

        // Invalidation fails, leaving the old title cached
        f.cache.set_available(false);
        f.chat
            .update_conversation(
                id,
                f.user_id,
                ConversationUpdate {
                    title: Some("Renamed".to_string()),
                    system_prompt: None,
                },
            )
            .await
            .unwrap();
        f.cache.set_available(true);

        let updated = f
            .chat
            .update_conversation(
                id,
                f.user_id,
                ConversationUpdate {
                    title: None,
                    system_prompt: Some("Be brief".to_string()),
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.title, "Renamed");
        let stored = f.store.get_conversation(id).await.unwrap().unwrap();
        assert_eq!(stored.title, "Renamed");
        assert_eq!(stored.system_prompt.as_deref(), Some("Be brief"));
    }

    #[tokio::test]
    async fn test_delete_checks_owner_in_primary_store() {
        let f = fixture().await;
        let id = f.conversation.id;

        let err = f.chat.delete_conversation(id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ChatError::Forbidden));

        f.chat.delete_conversation(id, f.user_id).await.unwrap();
        let err = f.chat.delete_conversation(id, f.user_id).await.unwrap_err();
        assert!(matches!(err, ChatError::ConversationNotFound(_)));
    }
}
