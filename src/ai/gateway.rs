use async_stream::try_stream;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

use crate::database::models::{MessagePart, Role, ToolState, UiMessage};

/// Hosted model gateway endpoint (OpenAI-compatible wire format).
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub api_key: String,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let base_url = std::env::var("GATEWAY_BASE_URL")
            .unwrap_or_else(|_| "https://ai-gateway.vercel.sh/v1".to_string());
        let api_key = std::env::var("GATEWAY_API_KEY").map_err(|_| "GATEWAY_API_KEY must be set")?;
        Ok(Self { base_url, api_key })
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("gateway API error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("failed to parse gateway response: {0}")]
    Parse(#[from] serde_json::Error),
}

impl GatewayError {
    /// Billing/activation rejection from the gateway. Mapped to its own
    /// client-visible error kind instead of the generic offline error.
    pub fn is_activation_error(&self) -> bool {
        match self {
            GatewayError::Api { body, .. } => {
                body.contains("valid credit card") || body.contains("activate")
            }
            _ => false,
        }
    }
}

// ============================================
// Wire types (OpenAI-compatible)
// ============================================

#[derive(Debug, Clone, Serialize)]
pub struct WireMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<WireContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum WireContent {
    Text(String),
    Parts(Vec<WireContentPart>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireContentPart {
    Text { text: String },
    ImageUrl { image_url: WireImageUrl },
}

#[derive(Debug, Clone, Serialize)]
pub struct WireImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WireToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: WireFunctionCall,
}

#[derive(Debug, Clone, Serialize)]
pub struct WireFunctionCall {
    pub name: String,
    pub arguments: String,
}

/// Extended-reasoning budget, serialized only for thinking-capable models.
#[derive(Debug, Clone, Serialize)]
pub struct ThinkingOptions {
    #[serde(rename = "type")]
    pub mode: String,
    pub budget_tokens: u32,
}

impl ThinkingOptions {
    pub fn enabled(budget_tokens: u32) -> Self {
        Self {
            mode: "enabled".to_string(),
            budget_tokens,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewayChatRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingOptions>,
}

// ============================================
// Streaming response types
// ============================================

#[derive(Debug, Deserialize)]
struct StreamResponse {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
    #[serde(rename = "reasoning_content")]
    reasoning: Option<String>,
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

/// A complete tool call assembled from streamed deltas.
#[derive(Debug, Clone)]
pub struct ToolUse {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// One unified chunk of gateway output.
#[derive(Debug, Clone, Default)]
pub struct GatewayChunk {
    pub content: Option<String>,
    pub reasoning: Option<String>,
    pub tool_use: Option<ToolUse>,
    pub finish_reason: Option<String>,
}

pub type GatewayStream = Pin<Box<dyn Stream<Item = Result<GatewayChunk, GatewayError>> + Send>>;

// ============================================
// Client
// ============================================

#[derive(Debug, Clone)]
pub struct LanguageGateway {
    client: Client,
    config: GatewayConfig,
}

impl LanguageGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, config })
    }

    fn endpoint_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    /// Issue a streaming generation call and surface a unified chunk stream.
    pub async fn chat_stream(
        &self,
        request: GatewayChatRequest,
    ) -> Result<GatewayStream, GatewayError> {
        let response = self
            .client
            .post(self.endpoint_url())
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Api { status, body });
        }

        let mut bytes = response.bytes_stream();

        let stream = try_stream! {
            // Buffer accumulates partial SSE lines across network chunks
            let mut buffer = String::new();
            // Tool call being assembled from deltas: (id, name, arguments)
            let mut current_tool_call: Option<(String, String, String)> = None;

            while let Some(chunk) = bytes.next().await {
                let chunk = chunk?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim().to_string();
                    buffer.drain(..=line_end);

                    if line.is_empty() || line == "data: [DONE]" {
                        continue;
                    }

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };

                    let stream_response: StreamResponse = match serde_json::from_str(data) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            tracing::debug!("Skipping unparseable gateway frame: {} ({})", data, e);
                            continue;
                        }
                    };

                    let Some(choice) = stream_response.choices.into_iter().next() else {
                        continue;
                    };

                    if let Some(deltas) = &choice.delta.tool_calls {
                        for delta in deltas {
                            if delta.index != 0 {
                                continue;
                            }
                            if let Some((ref mut id, ref mut name, ref mut args)) =
                                current_tool_call
                            {
                                if let Some(delta_id) = &delta.id {
                                    id.push_str(delta_id);
                                }
                                if let Some(func) = &delta.function {
                                    if let Some(delta_name) = &func.name {
                                        name.push_str(delta_name);
                                    }
                                    if let Some(delta_args) = &func.arguments {
                                        args.push_str(delta_args);
                                    }
                                }
                            } else if let Some(delta_id) = &delta.id {
                                let name = delta
                                    .function
                                    .as_ref()
                                    .and_then(|f| f.name.clone())
                                    .unwrap_or_default();
                                let args = delta
                                    .function
                                    .as_ref()
                                    .and_then(|f| f.arguments.clone())
                                    .unwrap_or_default();
                                current_tool_call = Some((delta_id.clone(), name, args));
                            }
                        }
                    }

                    let mut tool_use = None;
                    if choice.finish_reason.as_deref() == Some("tool_calls") {
                        if let Some((id, name, args)) = current_tool_call.take() {
                            let input =
                                serde_json::from_str(&args).unwrap_or(serde_json::json!({}));
                            tool_use = Some(ToolUse { id, name, input });
                        }
                    }

                    yield GatewayChunk {
                        content: choice.delta.content,
                        reasoning: choice.delta.reasoning,
                        tool_use,
                        finish_reason: choice.finish_reason,
                    };
                }
            }
        };

        Ok(Box::pin(stream))
    }

    /// Non-streaming generation call. Used by title generation.
    pub async fn chat(&self, request: GatewayChatRequest) -> Result<String, GatewayError> {
        let response = self
            .client
            .post(self.endpoint_url())
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Api { status, body });
        }

        let completion: CompletionResponse = response.json().await?;
        Ok(completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}

// ============================================
// Message conversion
// ============================================

/// Convert client-facing messages into the gateway's wire shape.
///
/// Reasoning, step markers and citations are presentation state and are
/// dropped at the wire boundary. Tool invocations that already carry a
/// result expand into the assistant tool_calls message plus the matching
/// tool-role result message.
pub fn to_wire_messages(system_prompt: &str, messages: &[UiMessage]) -> Vec<WireMessage> {
    let mut wire = Vec::with_capacity(messages.len() + 1);

    if !system_prompt.is_empty() {
        wire.push(WireMessage {
            role: "system".to_string(),
            content: Some(WireContent::Text(system_prompt.to_string())),
            tool_calls: None,
            tool_call_id: None,
        });
    }

    for message in messages {
        let role = match message.role {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        };

        let mut content_parts: Vec<WireContentPart> = Vec::new();
        let mut tool_calls: Vec<WireToolCall> = Vec::new();
        let mut tool_results: Vec<(String, serde_json::Value)> = Vec::new();

        for part in &message.parts {
            match part {
                MessagePart::Text { text } => {
                    content_parts.push(WireContentPart::Text { text: text.clone() });
                }
                MessagePart::File { url, data, media_type, .. } => {
                    let url = url
                        .clone()
                        .or_else(|| data.as_ref().map(|d| format!("data:{};base64,{}", media_type, d)));
                    if let Some(url) = url {
                        content_parts.push(WireContentPart::ImageUrl {
                            image_url: WireImageUrl { url },
                        });
                    }
                }
                MessagePart::ToolInvocation {
                    tool_invocation_id,
                    tool_name,
                    args,
                    state,
                    result,
                } => {
                    tool_calls.push(WireToolCall {
                        id: tool_invocation_id.clone(),
                        call_type: "function".to_string(),
                        function: WireFunctionCall {
                            name: tool_name.clone(),
                            arguments: args.to_string(),
                        },
                    });
                    if *state == ToolState::Result {
                        if let Some(result) = result {
                            tool_results.push((tool_invocation_id.clone(), result.clone()));
                        }
                    }
                }
                MessagePart::ToolResult {
                    tool_invocation_id,
                    result,
                    ..
                } => {
                    tool_results.push((tool_invocation_id.clone(), result.clone()));
                }
                MessagePart::Reasoning { .. } => {}
                MessagePart::StepStart {} => {}
                MessagePart::StepFinish {} => {}
                MessagePart::Source { .. } => {}
            }
        }

        if !content_parts.is_empty() || !tool_calls.is_empty() {
            // Collapse a single text part to a plain string for providers
            // that reject the parts form on text-only messages
            let content = match content_parts.len() {
                0 => None,
                1 => match &content_parts[0] {
                    WireContentPart::Text { text } => Some(WireContent::Text(text.clone())),
                    _ => Some(WireContent::Parts(content_parts)),
                },
                _ => Some(WireContent::Parts(content_parts)),
            };

            wire.push(WireMessage {
                role: role.to_string(),
                content,
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
                tool_call_id: None,
            });
        }

        for (call_id, result) in tool_results {
            wire.push(WireMessage {
                role: "tool".to_string(),
                content: Some(WireContent::Text(result.to_string())),
                tool_calls: None,
                tool_call_id: Some(call_id),
            });
        }
    }

    wire
}

/// Models with an extended-reasoning mode get a thinking budget and skip
/// word-level output smoothing.
pub fn is_reasoning_model(model: &str) -> bool {
    model.contains("reasoning") || model.contains("thinking")
}

pub const THINKING_BUDGET_TOKENS: u32 = 10_000;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn user_text_message(text: &str) -> UiMessage {
        UiMessage {
            id: Uuid::new_v4(),
            role: Role::User,
            parts: vec![MessagePart::Text {
                text: text.to_string(),
            }],
        }
    }

    #[test]
    fn test_system_prompt_leads_wire_messages() {
        let wire = to_wire_messages("be helpful", &[user_text_message("hi")]);
        assert_eq!(wire.len(), 2);
        assert_eq!(wire[0].role, "system");
        assert_eq!(wire[1].role, "user");
    }

    #[test]
    fn test_single_text_part_collapses_to_string() {
        let wire = to_wire_messages("", &[user_text_message("hi")]);
        match &wire[0].content {
            Some(WireContent::Text(text)) => assert_eq!(text, "hi"),
            other => panic!("expected plain text content, got {:?}", other),
        }
    }

    #[test]
    fn test_tool_result_expands_to_tool_role_message() {
        let message = UiMessage {
            id: Uuid::new_v4(),
            role: Role::Assistant,
            parts: vec![MessagePart::ToolInvocation {
                tool_invocation_id: "call_1".to_string(),
                tool_name: "getWeather".to_string(),
                args: serde_json::json!({"city": "Oslo"}),
                state: ToolState::Result,
                result: Some(serde_json::json!({"temp": 4})),
            }],
        };

        let wire = to_wire_messages("", &[message]);
        assert_eq!(wire.len(), 2);
        assert_eq!(wire[0].role, "assistant");
        assert!(wire[0].tool_calls.is_some());
        assert_eq!(wire[1].role, "tool");
        assert_eq!(wire[1].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn test_reasoning_and_step_parts_dropped() {
        let message = UiMessage {
            id: Uuid::new_v4(),
            role: Role::Assistant,
            parts: vec![
                MessagePart::StepStart {},
                MessagePart::Reasoning {
                    reasoning: "thinking...".to_string(),
                },
                MessagePart::Text {
                    text: "answer".to_string(),
                },
                MessagePart::StepFinish {},
            ],
        };

        let wire = to_wire_messages("", &[message]);
        assert_eq!(wire.len(), 1);
        match &wire[0].content {
            Some(WireContent::Text(text)) => assert_eq!(text, "answer"),
            other => panic!("expected plain text content, got {:?}", other),
        }
    }

    #[test]
    fn test_reasoning_model_detection() {
        assert!(is_reasoning_model("anthropic/claude-thinking"));
        assert!(is_reasoning_model("deepseek-reasoning"));
        assert!(!is_reasoning_model("google/gemini-1.5-flash"));
    }

    #[test]
    fn test_activation_error_detection() {
        let err = GatewayError::Api {
            status: 403,
            body: "AI Gateway requires a valid credit card on file to service requests".to_string(),
        };
        assert!(err.is_activation_error());

        let err = GatewayError::Api {
            status: 500,
            body: "internal error".to_string(),
        };
        assert!(!err.is_activation_error());
    }
}
