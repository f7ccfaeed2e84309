//! Request body and SSE event types for chat streaming

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::database::models::{UiMessage, Visibility};
use crate::sse_event_enum;

/// Body of POST /api/chat. Carries either one new user message or the full
/// message list when a tool approval continues a prior generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ChatPostRequest {
    pub id: Uuid,
    #[serde(default)]
    pub message: Option<UiMessage>,
    #[serde(default)]
    pub messages: Option<Vec<UiMessage>>,
    pub selected_chat_model: String,
    pub selected_visibility_type: Visibility,
}

impl ChatPostRequest {
    pub fn is_tool_approval_flow(&self) -> bool {
        self.messages.is_some()
    }
}

// ============================================
// SSE Event Data Structures
// ============================================

/// Initial event. `resumable` reports whether this stream was registered
/// with the replay relay, so clients know reconnection is possible.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectedData {
    pub resumable: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatTitleData {
    pub title: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextStartData {
    pub message_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDeltaData {
    pub message_id: Uuid,
    pub delta: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningDeltaData {
    pub message_id: Uuid,
    pub delta: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocationData {
    pub message_id: Uuid,
    pub tool_invocation_id: String,
    pub tool_name: String,
    pub args: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultData {
    pub message_id: Uuid,
    pub tool_invocation_id: String,
    pub tool_name: String,
    pub result: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepFinishData {
    pub step: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MaxStepsReachedData {
    pub steps: usize,
}

/// Terminal event carrying the finalized set of new/updated messages.
#[derive(Debug, Clone, Serialize)]
pub struct FinishData {
    pub messages: Vec<UiMessage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamErrorData {
    pub error: String,
    pub kind: String,
}

// ============================================
// SSE Event Enum
// ============================================

sse_event_enum! {
    #[derive(Debug, Clone, Serialize)]
    pub enum ChatStreamEvent {
        Connected(ConnectedData),
        ChatTitle(ChatTitleData),
        TextStart(TextStartData),
        TextDelta(TextDeltaData),
        ReasoningDelta(ReasoningDeltaData),
        ToolInvocation(ToolInvocationData),
        ToolResult(ToolResultData),
        StepFinish(StepFinishData),
        MaxStepsReached(MaxStepsReachedData),
        Finish(FinishData),
        Error(StreamErrorData),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{MessagePart, Role};

    #[test]
    fn test_event_names_are_camel_case() {
        let event = ChatStreamEvent::TextDelta(TextDeltaData {
            message_id: Uuid::new_v4(),
            delta: "hi".to_string(),
        });
        assert_eq!(event.event_name(), "textDelta");

        let event = ChatStreamEvent::MaxStepsReached(MaxStepsReachedData { steps: 5 });
        assert_eq!(event.event_name(), "maxStepsReached");
    }

    #[test]
    fn test_request_body_parses_single_message_form() {
        let body = serde_json::json!({
            "id": "6f8d9a9c-3a39-4f0a-8a67-0b8f5e1e2d3c",
            "message": {
                "id": "2c9f1f6e-80ee-4a6f-9fc3-93a2b875d1aa",
                "role": "user",
                "parts": [{"type": "text", "text": "Hi"}]
            },
            "selectedChatModel": "google/gemini-1.5-flash",
            "selectedVisibilityType": "private"
        });

        let request: ChatPostRequest = serde_json::from_value(body).unwrap();
        assert!(!request.is_tool_approval_flow());
        let message = request.message.unwrap();
        assert_eq!(message.role, Role::User);
        assert!(matches!(message.parts[0], MessagePart::Text { .. }));
    }

    #[test]
    fn test_unknown_body_fields_rejected() {
        let body = serde_json::json!({
            "id": "6f8d9a9c-3a39-4f0a-8a67-0b8f5e1e2d3c",
            "selectedChatModel": "m",
            "selectedVisibilityType": "private",
            "unexpected": true
        });
        assert!(serde_json::from_value::<ChatPostRequest>(body).is_err());
    }
}
