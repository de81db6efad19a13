// Handlers module

pub mod conversations;
pub mod messages;

pub use conversations::{
    create_conversation_handler, delete_conversation_handler, get_conversation_handler,
    update_conversation_handler,
};
pub use messages::{list_messages_handler, send_message_handler};

use std::convert::Infallible;

use tracing::{error, warn};
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Rejection, Reply};

use crate::chat::ChatError;
use crate::models::ErrorResponse;

/// Rejection for requests without a valid `x-user-id` header
#[derive(Debug)]
pub struct MissingUser;

impl warp::reject::Reject for MissingUser {}

pub(crate) fn json_reply<T: serde::Serialize>(body: &T, status: StatusCode) -> Response {
    warp::reply::with_status(warp::reply::json(body), status).into_response()
}

pub(crate) fn error_reply(status: StatusCode, detail: impl Into<String>, code: &str) -> Response {
    let body = ErrorResponse {
        detail: detail.into(),
        code: code.to_string(),
    };
    json_reply(&body, status)
}

pub(crate) fn chat_error_reply(err: ChatError) -> Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        error!(error = %err, code = err.code(), "Request failed");
    }
    error_reply(status, err.to_string(), err.code())
}

/// Turn filter rejections into `{detail, code}` bodies
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let reply = if err.is_not_found() {
        error_reply(StatusCode::NOT_FOUND, "Not found", "not_found")
    } else if err.find::<MissingUser>().is_some() {
        error_reply(
            StatusCode::UNAUTHORIZED,
            "x-user-id header with a valid UUID is required",
            "unauthorized",
        )
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        error_reply(StatusCode::BAD_REQUEST, e.to_string(), "validation_error")
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        error_reply(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large", "payload_too_large")
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        error_reply(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed", "method_not_allowed")
    } else {
        warn!(rejection = ?err, "Unhandled rejection");
        error_reply(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", "internal_error")
    };

    Ok(reply)
}
