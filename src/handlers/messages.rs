// /conversations/{conversationId}/messages handlers

use std::convert::Infallible;
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;
use warp::http::StatusCode;

use super::{chat_error_reply, json_reply};
use crate::chat::ChatService;
use crate::models::{SendMessageRequest, SendMessageResponse};

/// Store the message and queue it; the reply is written later by the worker
pub async fn send_message_handler(
    conversation_id: Uuid,
    user_id: Uuid,
    request: SendMessageRequest,
    chat: Arc<ChatService>,
) -> Result<impl warp::Reply, Infallible> {
    debug!(conversation_id = %conversation_id, "POST /conversations/{{id}}/messages");

    Ok(match chat.add_user_message(conversation_id, user_id, request).await {
        Ok((message, request_id)) => {
            let response = SendMessageResponse {
                message,
                request_id,
                status: "processing".to_string(),
            };
            json_reply(&response, StatusCode::ACCEPTED)
        }
        Err(e) => chat_error_reply(e),
    })
}

pub async fn list_messages_handler(
    conversation_id: Uuid,
    user_id: Uuid,
    chat: Arc<ChatService>,
) -> Result<impl warp::Reply, Infallible> {
    Ok(match chat.list_messages(conversation_id, user_id).await {
        Ok(messages) => json_reply(&messages, StatusCode::OK),
        Err(e) => chat_error_reply(e),
    })
}
