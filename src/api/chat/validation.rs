//! Schema checks applied to the chat request body before any side effect.

use crate::api::errors::AppError;
use crate::database::models::{MessagePart, Role, UiMessage, KNOWN_TOOLS};

use super::types::ChatPostRequest;

const MAX_TEXT_LEN: usize = 50_000;
const MAX_REASONING_LEN: usize = 100_000;
const MAX_NAME_LEN: usize = 255;
const MAX_MODEL_LEN: usize = 200;
const MAX_INVOCATION_ID_LEN: usize = 100;

/// Media types accepted for user-uploaded file parts.
const USER_MEDIA_TYPES: &[&str] = &["image/jpeg", "image/png"];

pub fn validate(request: &ChatPostRequest) -> Result<(), AppError> {
    if request.selected_chat_model.is_empty() || request.selected_chat_model.len() > MAX_MODEL_LEN {
        return Err(AppError::bad_request("selectedChatModel length out of range"));
    }

    match (&request.message, &request.messages) {
        (Some(message), None) => validate_user_message(message),
        (None, Some(messages)) => {
            if messages.is_empty() {
                return Err(AppError::bad_request("messages must not be empty"));
            }
            for message in messages {
                validate_continuation_message(message)?;
            }
            Ok(())
        }
        _ => Err(AppError::bad_request(
            "Exactly one of message or messages must be provided",
        )),
    }
}

/// A bare new message must be a user message of text/file parts only.
fn validate_user_message(message: &UiMessage) -> Result<(), AppError> {
    if message.role != Role::User {
        return Err(AppError::bad_request("message.role must be user"));
    }
    if message.parts.is_empty() {
        return Err(AppError::bad_request("message.parts must not be empty"));
    }

    for part in &message.parts {
        match part {
            MessagePart::Text { text } => validate_text(text)?,
            MessagePart::File {
                media_type,
                name,
                url,
                ..
            } => {
                if !USER_MEDIA_TYPES.contains(&media_type.as_str()) {
                    return Err(AppError::bad_request(format!(
                        "Unsupported file media type: {}",
                        media_type
                    )));
                }
                match name {
                    Some(name) if !name.is_empty() && name.len() <= MAX_NAME_LEN => {}
                    _ => return Err(AppError::bad_request("file part requires a name")),
                }
                if url.as_deref().map(|u| u.is_empty()).unwrap_or(true) {
                    return Err(AppError::bad_request("file part requires a url"));
                }
            }
            _ => {
                return Err(AppError::bad_request(
                    "message.parts may only contain text and file parts",
                ))
            }
        }
    }
    Ok(())
}

/// Tool-approval continuations carry the full typed history; every part
/// variant is allowed but checked against its own constraints.
fn validate_continuation_message(message: &UiMessage) -> Result<(), AppError> {
    for part in &message.parts {
        match part {
            MessagePart::Text { text } => validate_text(text)?,
            MessagePart::File { media_type, .. } => {
                if media_type.is_empty() {
                    return Err(AppError::bad_request("file part requires a media type"));
                }
            }
            MessagePart::ToolInvocation {
                tool_invocation_id,
                tool_name,
                args,
                ..
            } => {
                validate_invocation_id(tool_invocation_id)?;
                validate_tool_name(tool_name)?;
                // Args are tool-specific but always keyed
                if !args.is_object() {
                    return Err(AppError::bad_request(
                        "tool invocation args must be an object",
                    ));
                }
            }
            MessagePart::ToolResult {
                tool_invocation_id,
                tool_name,
                ..
            } => {
                validate_invocation_id(tool_invocation_id)?;
                validate_tool_name(tool_name)?;
            }
            MessagePart::Reasoning { reasoning } => {
                if reasoning.len() > MAX_REASONING_LEN {
                    return Err(AppError::bad_request("reasoning part too long"));
                }
            }
            MessagePart::StepStart {} => {}
            MessagePart::StepFinish {} => {}
            MessagePart::Source { source } => {
                if source.id.is_empty() {
                    return Err(AppError::bad_request("source part requires an id"));
                }
            }
        }
    }
    Ok(())
}

fn validate_text(text: &str) -> Result<(), AppError> {
    if text.is_empty() || text.chars().count() > MAX_TEXT_LEN {
        return Err(AppError::bad_request("text part length out of range"));
    }
    Ok(())
}

fn validate_invocation_id(id: &str) -> Result<(), AppError> {
    if id.is_empty() || id.len() > MAX_INVOCATION_ID_LEN {
        return Err(AppError::bad_request("tool invocation id length out of range"));
    }
    Ok(())
}

fn validate_tool_name(name: &str) -> Result<(), AppError> {
    if !KNOWN_TOOLS.contains(&name) {
        return Err(AppError::bad_request(format!("Unknown tool: {}", name)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::errors::ErrorKind;
    use crate::database::models::{ToolState, Visibility};
    use uuid::Uuid;

    fn base_request(message: Option<UiMessage>, messages: Option<Vec<UiMessage>>) -> ChatPostRequest {
        ChatPostRequest {
            id: Uuid::new_v4(),
            message,
            messages,
            selected_chat_model: "google/gemini-1.5-flash".to_string(),
            selected_visibility_type: Visibility::Private,
        }
    }

    fn text_message(role: Role, text: &str) -> UiMessage {
        UiMessage {
            id: Uuid::new_v4(),
            role,
            parts: vec![MessagePart::Text {
                text: text.to_string(),
            }],
        }
    }

    #[test]
    fn test_valid_single_message() {
        let request = base_request(Some(text_message(Role::User, "Hi")), None);
        assert!(validate(&request).is_ok());
    }

    #[test]
    fn test_both_forms_rejected() {
        let request = base_request(
            Some(text_message(Role::User, "Hi")),
            Some(vec![text_message(Role::User, "Hi")]),
        );
        let err = validate(&request).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[test]
    fn test_neither_form_rejected() {
        assert!(validate(&base_request(None, None)).is_err());
    }

    #[test]
    fn test_oversized_text_rejected() {
        let request = base_request(Some(text_message(Role::User, &"x".repeat(50_001))), None);
        assert!(validate(&request).is_err());
    }

    #[test]
    fn test_assistant_role_rejected_for_single_message() {
        let request = base_request(Some(text_message(Role::Assistant, "Hi")), None);
        assert!(validate(&request).is_err());
    }

    #[test]
    fn test_unsupported_media_type_rejected() {
        let message = UiMessage {
            id: Uuid::new_v4(),
            role: Role::User,
            parts: vec![MessagePart::File {
                media_type: "application/pdf".to_string(),
                name: Some("doc.pdf".to_string()),
                url: Some("https://example.com/doc.pdf".to_string()),
                data: None,
            }],
        };
        assert!(validate(&base_request(Some(message), None)).is_err());
    }

    #[test]
    fn test_unknown_tool_rejected_in_continuation() {
        let message = UiMessage {
            id: Uuid::new_v4(),
            role: Role::Assistant,
            parts: vec![MessagePart::ToolInvocation {
                tool_invocation_id: "call_1".to_string(),
                tool_name: "launchRocket".to_string(),
                args: serde_json::json!({}),
                state: ToolState::Call,
                result: None,
            }],
        };
        assert!(validate(&base_request(None, Some(vec![message]))).is_err());
    }

    #[test]
    fn test_non_object_tool_args_rejected() {
        let message = UiMessage {
            id: Uuid::new_v4(),
            role: Role::Assistant,
            parts: vec![MessagePart::ToolInvocation {
                tool_invocation_id: "call_1".to_string(),
                tool_name: "getWeather".to_string(),
                args: serde_json::json!("Lima"),
                state: ToolState::Call,
                result: None,
            }],
        };
        assert!(validate(&base_request(None, Some(vec![message]))).is_err());
    }

    #[test]
    fn test_known_tool_accepted_in_continuation() {
        let message = UiMessage {
            id: Uuid::new_v4(),
            role: Role::Assistant,
            parts: vec![MessagePart::ToolInvocation {
                tool_invocation_id: "call_1".to_string(),
                tool_name: "getWeather".to_string(),
                args: serde_json::json!({"city": "Lima"}),
                state: ToolState::Result,
                result: Some(serde_json::json!({"temp": 18})),
            }],
        };
        assert!(validate(&base_request(None, Some(vec![message]))).is_ok());
    }

    #[test]
    fn test_tool_parts_rejected_in_single_message() {
        let message = UiMessage {
            id: Uuid::new_v4(),
            role: Role::User,
            parts: vec![MessagePart::ToolResult {
                tool_invocation_id: "call_1".to_string(),
                tool_name: "getWeather".to_string(),
                result: serde_json::json!({}),
            }],
        };
        assert!(validate(&base_request(Some(message), None)).is_err());
    }

    #[test]
    fn test_model_name_length_bound() {
        let mut request = base_request(Some(text_message(Role::User, "Hi")), None);
        request.selected_chat_model = "m".repeat(201);
        assert!(validate(&request).is_err());
    }
}
