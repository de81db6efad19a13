// /conversations/{conversationId} handlers

use std::convert::Infallible;
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;
use warp::http::StatusCode;
use warp::Reply;

use super::{chat_error_reply, json_reply};
use crate::chat::ChatService;
use crate::models::{ConversationUpdate, NewConversation};

pub async fn create_conversation_handler(
    user_id: Uuid,
    request: NewConversation,
    chat: Arc<ChatService>,
) -> Result<impl Reply, Infallible> {
    debug!(user_id = %user_id, "POST /conversations");

    Ok(match chat.create_conversation(user_id, request).await {
        Ok(conversation) => json_reply(&conversation, StatusCode::CREATED),
        Err(e) => chat_error_reply(e),
    })
}

pub async fn get_conversation_handler(
    conversation_id: Uuid,
    user_id: Uuid,
    chat: Arc<ChatService>,
) -> Result<impl Reply, Infallible> {
    debug!(conversation_id = %conversation_id, "GET /conversations/{{id}}");

    Ok(match chat.get_conversation(conversation_id, user_id).await {
        Ok(conversation) => json_reply(&conversation, StatusCode::OK),
        Err(e) => chat_error_reply(e),
    })
}

pub async fn update_conversation_handler(
    conversation_id: Uuid,
    user_id: Uuid,
    update: ConversationUpdate,
    chat: Arc<ChatService>,
) -> Result<impl Reply, Infallible> {
    Ok(match chat.update_conversation(conversation_id, user_id, update).await {
        Ok(conversation) => json_reply(&conversation, StatusCode::OK),
        Err(e) => chat_error_reply(e),
    })
}

pub async fn delete_conversation_handler(
    conversation_id: Uuid,
    user_id: Uuid,
    chat: Arc<ChatService>,
) -> Result<impl Reply, Infallible> {
    Ok(match chat.delete_conversation(conversation_id, user_id).await {
        Ok(()) => warp::reply::with_status(warp::reply(), StatusCode::NO_CONTENT).into_response(),
        Err(e) => chat_error_reply(e),
    })
}
