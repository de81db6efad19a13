//! Chat service: conversations, messages and the hand-off to the LLM queue
//!
//! - `ChatService`: business operations used by the HTTP layer and the worker
//! - `ConversationStore`: primary store seam, with an in-memory implementation
//! - `ChatError`: error taxonomy mapped to HTTP status codes

pub mod error;
pub mod service;
pub mod store;

pub use error::{ChatError, StoreError};
pub use service::ChatService;
pub use store::{ConversationStore, MemoryConversationStore};
