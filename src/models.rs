// Conversation and message records, queue payloads, HTTP request/response bodies

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Message Roles
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

// Conversation Record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub system_prompt: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// Message Record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageRecord {
    pub id: Uuid,
    pub conversation_id: Uuid,
    /// Sender, for user messages only
    pub user_id: Option<Uuid>,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,

    /// Queue message id of the request an assistant message answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Uuid>,

    // Assistant generation metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_prompt: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_completion: Option<u32>,
    /// Seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<f64>,
}

impl MessageRecord {
    pub fn user(conversation_id: Uuid, user_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            user_id: Some(user_id),
            role: MessageRole::User,
            content: content.into(),
            created_at: Utc::now(),
            request_id: None,
            model_used: None,
            tokens_prompt: None,
            tokens_completion: None,
            processing_time: None,
        }
    }

    pub fn system(conversation_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            user_id: None,
            role: MessageRole::System,
            content: content.into(),
            created_at: Utc::now(),
            request_id: None,
            model_used: None,
            tokens_prompt: None,
            tokens_completion: None,
            processing_time: None,
        }
    }

    pub fn assistant(conversation_id: Uuid, request_id: Option<Uuid>, reply: AssistantReply) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            user_id: None,
            role: MessageRole::Assistant,
            content: reply.content,
            created_at: Utc::now(),
            request_id,
            model_used: reply.model_used,
            tokens_prompt: reply.tokens_prompt,
            tokens_completion: reply.tokens_completion,
            processing_time: reply.processing_time,
        }
    }
}

/// Generated reply written back by the LLM worker
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AssistantReply {
    pub content: String,
    pub model_used: Option<String>,
    pub tokens_prompt: Option<u32>,
    pub tokens_completion: Option<u32>,
    pub processing_time: Option<f64>,
}

/// Generation parameters forwarded to the LLM worker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmParameters {
    /// 0.0 to 2.0
    pub temperature: f64,
    pub max_tokens: Option<u32>,
    /// Greater than 0.0, at most 1.0
    pub top_p: f64,
    /// -2.0 to 2.0
    pub presence_penalty: f64,
    /// -2.0 to 2.0
    pub frequency_penalty: f64,
}

impl Default for LlmParameters {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: None,
            top_p: 1.0,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
        }
    }
}

impl LlmParameters {
    /// Check every parameter is within its accepted range
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(format!("temperature must be between 0 and 2, got {}", self.temperature));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(format!("top_p must be in (0, 1], got {}", self.top_p));
        }
        if !(-2.0..=2.0).contains(&self.presence_penalty) {
            return Err(format!(
                "presence_penalty must be between -2 and 2, got {}",
                self.presence_penalty
            ));
        }
        if !(-2.0..=2.0).contains(&self.frequency_penalty) {
            return Err(format!(
                "frequency_penalty must be between -2 and 2, got {}",
                self.frequency_penalty
            ));
        }
        if self.max_tokens == Some(0) {
            return Err("max_tokens must be positive".to_string());
        }
        Ok(())
    }
}

/// Queue payload asking the LLM worker to answer a user message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmTask {
    pub message_id: Uuid,
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_params: Option<LlmParameters>,
    /// Caller-supplied key for downstream deduplication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

// Request Types
#[derive(Debug, Clone, Deserialize)]
pub struct NewConversation {
    pub title: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConversationUpdate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default)]
    pub llm_params: Option<LlmParameters>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

// Response Types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageResponse {
    pub message: MessageRecord,
    pub request_id: Uuid,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorResponse {
    pub detail: String,
    pub code: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_role_serialization() {
        assert_eq!(serde_json::to_string(&MessageRole::User).unwrap(), r#""user""#);
        assert_eq!(
            serde_json::to_string(&MessageRole::Assistant).unwrap(),
            r#""assistant""#
        );

        let role: MessageRole = serde_json::from_str(r#""system""#).unwrap();
        assert_eq!(role, MessageRole::System);
    }

    #[test]
    fn test_llm_parameters_defaults_fill_missing_fields() {
        let params: LlmParameters = serde_json::from_value(json!({"max_tokens": 256})).unwrap();

        assert_eq!(params.temperature, 0.7);
        assert_eq!(params.top_p, 1.0);
        assert_eq!(params.max_tokens, Some(256));
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_llm_parameters_validation() {
        let too_hot = LlmParameters {
            temperature: 2.5,
            ..Default::default()
        };
        assert!(too_hot.validate().unwrap_err().contains("temperature"));

        let zero_top_p = LlmParameters {
            top_p: 0.0,
            ..Default::default()
        };
        assert!(zero_top_p.validate().is_err());

        let penalty = LlmParameters {
            frequency_penalty: -2.5,
            ..Default::default()
        };
        assert!(penalty.validate().is_err());

        let edges = LlmParameters {
            temperature: 2.0,
            top_p: 1.0,
            presence_penalty: -2.0,
            frequency_penalty: 2.0,
            max_tokens: Some(1),
        };
        assert!(edges.validate().is_ok());
    }

    #[test]
    fn test_llm_task_wire_shape() {
        let task = LlmTask {
            message_id: Uuid::nil(),
            conversation_id: Uuid::nil(),
            user_id: Uuid::nil(),
            content: "hi".to_string(),
            llm_params: None,
            idempotency_key: None,
        };

        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["content"], "hi");
        assert!(value.get("llm_params").is_none());
        assert!(value.get("idempotency_key").is_none());

        let back: LlmTask = serde_json::from_value(value).unwrap();
        assert_eq!(back, task);
    }

    #[test]
    fn test_send_message_request_deserialization() {
        let json = r#"{"content":"Hello, world!","llm_params":{"temperature":0.2}}"#;
        let request: SendMessageRequest = serde_json::from_str(json).unwrap();

        assert_eq!(request.content, "Hello, world!");
        assert_eq!(request.llm_params.unwrap().temperature, 0.2);
        assert!(request.idempotency_key.is_none());
    }

    #[test]
    fn test_assistant_record_omits_absent_metadata() {
        let record = MessageRecord::assistant(
            Uuid::new_v4(),
            None,
            AssistantReply {
                content: "hello".to_string(),
                model_used: Some("claude".to_string()),
                ..Default::default()
            },
        );

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["model_used"], "claude");
        assert!(value.get("tokens_prompt").is_none());
        assert!(value["user_id"].is_null());
    }
}
