use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::chat::error::StoreError;
use crate::models::{Conversation, MessageRecord, MessageRole};

/// Authoritative storage for conversations and their messages
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>, StoreError>;

    /// Insert or replace
    async fn save_conversation(&self, conversation: &Conversation) -> Result<(), StoreError>;

    /// Delete a conversation and its messages. Returns whether it existed.
    async fn delete_conversation(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Set `updated_at`
    async fn touch_conversation(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn insert_message(&self, message: &MessageRecord) -> Result<(), StoreError>;

    async fn get_message(&self, id: Uuid) -> Result<Option<MessageRecord>, StoreError>;

    /// Replace the content of the conversation's first system message, creating one if absent
    async fn set_system_message(&self, conversation_id: Uuid, content: &str) -> Result<(), StoreError>;

    /// Messages in creation order
    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<MessageRecord>, StoreError>;

    /// Assistant message written for a queued request, if any
    async fn find_reply(&self, request_id: Uuid) -> Result<Option<MessageRecord>, StoreError>;
}

#[derive(Debug, Default)]
struct Tables {
    conversations: HashMap<Uuid, Conversation>,
    messages: Vec<MessageRecord>,
}

/// In-process primary store
///
/// Counts conversation reads so callers can verify the cache is absorbing
/// lookups.
#[derive(Debug)]
pub struct MemoryConversationStore {
    tables: Mutex<Tables>,
    conversation_reads: AtomicUsize,
    available: AtomicBool,
}

impl Default for MemoryConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            conversation_reads: AtomicUsize::new(0),
            available: AtomicBool::new(true),
        }
    }

    /// Number of `get_conversation` calls served so far
    pub fn conversation_reads(&self) -> usize {
        self.conversation_reads.load(Ordering::SeqCst)
    }

    /// Simulate the store going down (or coming back)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store marked unavailable".to_string()))
        }
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>, StoreError> {
        self.ensure_available()?;
        self.conversation_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.lock().conversations.get(&id).cloned())
    }

    async fn save_conversation(&self, conversation: &Conversation) -> Result<(), StoreError> {
        self.ensure_available()?;
        self.lock()
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok(())
    }

    async fn delete_conversation(&self, id: Uuid) -> Result<bool, StoreError> {
        self.ensure_available()?;
        let mut tables = self.lock();
        let existed = tables.conversations.remove(&id).is_some();
        tables.messages.retain(|m| m.conversation_id != id);
        Ok(existed)
    }

    async fn touch_conversation(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.ensure_available()?;
        if let Some(conversation) = self.lock().conversations.get_mut(&id) {
            conversation.updated_at = at;
        }
        Ok(())
    }

    async fn insert_message(&self, message: &MessageRecord) -> Result<(), StoreError> {
        self.ensure_available()?;
        self.lock().messages.push(message.clone());
        Ok(())
    }

    async fn get_message(&self, id: Uuid) -> Result<Option<MessageRecord>, StoreError> {
        self.ensure_available()?;
        Ok(self.lock().messages.iter().find(|m| m.id == id).cloned())
    }

    async fn set_system_message(&self, conversation_id: Uuid, content: &str) -> Result<(), StoreError> {
        self.ensure_available()?;
        let mut tables = self.lock();

        let existing = tables
            .messages
            .iter_mut()
            .find(|m| m.conversation_id == conversation_id && m.role == MessageRole::System);

        match existing {
            Some(message) => message.content = content.to_string(),
            None => tables
                .messages
                .push(MessageRecord::system(conversation_id, content)),
        }
        Ok(())
    }

    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<MessageRecord>, StoreError> {
        self.ensure_available()?;
        let mut messages: Vec<MessageRecord> = self
            .lock()
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    async fn find_reply(&self, request_id: Uuid) -> Result<Option<MessageRecord>, StoreError> {
        self.ensure_available()?;
        Ok(self
            .lock()
            .messages
            .iter()
            .find(|m| m.role == MessageRole::Assistant && m.request_id == Some(request_id))
            .cloned())
    }
}
