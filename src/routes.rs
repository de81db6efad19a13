// Route definitions

use std::convert::Infallible;
use std::sync::Arc;

use uuid::Uuid;
use warp::Filter;

use crate::chat::ChatService;
use crate::handlers::{self, MissingUser};

/// Largest JSON body accepted by the API
const MAX_BODY_BYTES: u64 = 64 * 1024;

pub fn configure_routes(
    chat: Arc<ChatService>,
) -> impl Filter<Extract = impl warp::Reply, Error = Infallible> + Clone {
    let api = warp::path("api").and(warp::path("v1"));
    let conversations = api.and(warp::path("conversations"));

    // POST /conversations
    let create_conversation = conversations
        .and(warp::path::end())
        .and(warp::post())
        .and(with_user())
        .and(json_body())
        .and(with_chat(chat.clone()))
        .and_then(handlers::create_conversation_handler);

    // GET /conversations/{conversationId}
    let get_conversation = conversations
        .and(warp::path::param::<Uuid>())
        .and(warp::path::end())
        .and(warp::get())
        .and(with_user())
        .and(with_chat(chat.clone()))
        .and_then(handlers::get_conversation_handler);

    // PATCH /conversations/{conversationId}
    let update_conversation = conversations
        .and(warp::path::param::<Uuid>())
        .and(warp::path::end())
        .and(warp::patch())
        .and(with_user())
        .and(json_body())
        .and(with_chat(chat.clone()))
        .and_then(handlers::update_conversation_handler);

    // DELETE /conversations/{conversationId}
    let delete_conversation = conversations
        .and(warp::path::param::<Uuid>())
        .and(warp::path::end())
        .and(warp::delete())
        .and(with_user())
        .and(with_chat(chat.clone()))
        .and_then(handlers::delete_conversation_handler);

    // POST /conversations/{conversationId}/messages
    let send_message = conversations
        .and(warp::path::param::<Uuid>())
        .and(warp::path("messages"))
        .and(warp::path::end())
        .and(warp::post())
        .and(with_user())
        .and(json_body())
        .and(with_chat(chat.clone()))
        .and_then(handlers::send_message_handler);

    // GET /conversations/{conversationId}/messages
    let list_messages = conversations
        .and(warp::path::param::<Uuid>())
        .and(warp::path("messages"))
        .and(warp::path::end())
        .and(warp::get())
        .and(with_user())
        .and(with_chat(chat))
        .and_then(handlers::list_messages_handler);

    create_conversation
        .or(get_conversation)
        .or(update_conversation)
        .or(delete_conversation)
        .or(send_message)
        .or(list_messages)
        .recover(handlers::handle_rejection)
}

fn with_chat(
    chat: Arc<ChatService>,
) -> impl Filter<Extract = (Arc<ChatService>,), Error = Infallible> + Clone {
    warp::any().map(move || chat.clone())
}

/// Caller identity from the `x-user-id` header
fn with_user() -> impl Filter<Extract = (Uuid,), Error = warp::Rejection> + Clone {
    warp::header::optional::<String>("x-user-id").and_then(|raw: Option<String>| async move {
        raw.and_then(|value| Uuid::parse_str(value.trim()).ok())
            .ok_or_else(|| warp::reject::custom(MissingUser))
    })
}

fn json_body<T>() -> impl Filter<Extract = (T,), Error = warp::Rejection> + Clone
where
    T: serde::de::DeserializeOwned + Send,
{
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::chat::MemoryConversationStore;
    use crate::models::{Conversation, ErrorResponse, NewConversation, SendMessageResponse};
    use crate::task_queue::{MemoryBroker, Publisher};
    use serde_json::json;
    use warp::http::StatusCode;

    fn service(broker: Arc<MemoryBroker>) -> Arc<ChatService> {
        Arc::new(ChatService::new(
            Arc::new(MemoryConversationStore::new()),
            Arc::new(MemoryStore::new()),
            Publisher::new(broker, "llm_requests"),
        ))
    }

    async fn create(chat: &ChatService, user_id: Uuid) -> Conversation {
        chat.create_conversation(
            user_id,
            NewConversation {
                title: "Trip planning".to_string(),
                system_prompt: None,
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_send_message_accepted() {
        let broker = Arc::new(MemoryBroker::new());
        let chat = service(broker.clone());
        let routes = configure_routes(chat.clone());
        let user_id = Uuid::new_v4();
        let conversation = create(&chat, user_id).await;

        let res = warp::test::request()
            .method("POST")
            .path(&format!("/api/v1/conversations/{}/messages", conversation.id))
            .header("x-user-id", user_id.to_string())
            .json(&json!({"content": "Where should I go?"}))
            .reply(&routes)
            .await;

        assert_eq!(res.status(), StatusCode::ACCEPTED);
        let body: SendMessageResponse = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body.status, "processing");
        assert_eq!(body.message.content, "Where should I go?");

        let queued = broker.messages("llm_requests");
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].message_id, body.request_id);
    }

    #[tokio::test]
    async fn test_create_conversation() {
        let routes = configure_routes(service(Arc::new(MemoryBroker::new())));
        let user_id = Uuid::new_v4();

        let res = warp::test::request()
            .method("POST")
            .path("/api/v1/conversations")
            .header("x-user-id", user_id.to_string())
            .json(&json!({"title": "Trip planning"}))
            .reply(&routes)
            .await;

        assert_eq!(res.status(), StatusCode::CREATED);
        let body: Conversation = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body.user_id, user_id);
        assert_eq!(body.title, "Trip planning");
    }

    #[tokio::test]
    async fn test_get_conversation() {
        let chat = service(Arc::new(MemoryBroker::new()));
        let routes = configure_routes(chat.clone());
        let user_id = Uuid::new_v4();
        let conversation = create(&chat, user_id).await;

        let res = warp::test::request()
            .path(&format!("/api/v1/conversations/{}", conversation.id))
            .header("x-user-id", user_id.to_string())
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        let body: Conversation = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body.id, conversation.id);

        let res = warp::test::request()
            .path(&format!("/api/v1/conversations/{}", conversation.id))
            .header("x-user-id", Uuid::new_v4().to_string())
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        let body: ErrorResponse = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body.code, "access_denied");
    }

    #[tokio::test]
    async fn test_unknown_conversation_is_404() {
        let routes = configure_routes(service(Arc::new(MemoryBroker::new())));

        let res = warp::test::request()
            .path(&format!("/api/v1/conversations/{}", Uuid::new_v4()))
            .header("x-user-id", Uuid::new_v4().to_string())
            .reply(&routes)
            .await;

        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        let body: ErrorResponse = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body.code, "conversation_not_found");
    }

    #[tokio::test]
    async fn test_missing_user_header() {
        let routes = configure_routes(service(Arc::new(MemoryBroker::new())));

        let res = warp::test::request()
            .path(&format!("/api/v1/conversations/{}", Uuid::new_v4()))
            .reply(&routes)
            .await;

        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_blank_message_is_400() {
        let broker = Arc::new(MemoryBroker::new());
        let chat = service(broker.clone());
        let routes = configure_routes(chat.clone());
        let user_id = Uuid::new_v4();
        let conversation = create(&chat, user_id).await;

        let res = warp::test::request()
            .method("POST")
            .path(&format!("/api/v1/conversations/{}/messages", conversation.id))
            .header("x-user-id", user_id.to_string())
            .json(&json!({"content": "   "}))
            .reply(&routes)
            .await;

        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(broker.queue_len("llm_requests"), 0);
    }

    #[tokio::test]
    async fn test_queue_down_is_503() {
        let broker = Arc::new(MemoryBroker::new());
        let chat = service(broker.clone());
        let routes = configure_routes(chat.clone());
        let user_id = Uuid::new_v4();
        let conversation = create(&chat, user_id).await;

        broker.set_available(false);
        let res = warp::test::request()
            .method("POST")
            .path(&format!("/api/v1/conversations/{}/messages", conversation.id))
            .header("x-user-id", user_id.to_string())
            .json(&json!({"content": "hello"}))
            .reply(&routes)
            .await;

        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body: ErrorResponse = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body.code, "queue_unavailable");
    }
}
