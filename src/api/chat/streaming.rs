//! Core streaming orchestration: drives the gateway call, re-chunks output
//! into unified stream events, and persists the finalized messages once the
//! stream reaches its terminal state.

use futures_util::StreamExt;
use std::collections::HashSet;
use uuid::Uuid;

use crate::ai::{
    is_reasoning_model, prompts, smoothing::WordSmoother, to_wire_messages, GatewayChatRequest,
    ThinkingOptions, THINKING_BUDGET_TOKENS,
};
use crate::api::errors::ErrorKind;
use crate::database::models::{MessagePart, NewMessage, Role, ToolState, UiMessage};
use crate::database::queries::messages;
use crate::state::AppState;

use super::helpers::{send_error, EventSink};
use super::types::{
    ChatStreamEvent, FinishData, MaxStepsReachedData, ReasoningDeltaData, StepFinishData,
    TextDeltaData, TextStartData, ToolInvocationData, ToolResultData,
};

/// Upper bound on tool-invocation rounds for one conversation turn.
/// Prevents unbounded tool-call chains across approval continuations.
pub(super) const MAX_STEPS: usize = 5;

/// Fixed user-facing message for mid-stream provider failures. The real
/// error is logged server-side; the transport never aborts mid-frame.
const STREAM_ERROR_MESSAGE: &str = "Oops, an error occurred!";

/// What one generation works on and whether its outcome is persisted.
pub(super) struct GenerationPlan {
    pub chat_id: Uuid,
    pub model: String,
    /// Accumulated history: DB history plus the new message, or the full
    /// supplied list for a tool-approval continuation.
    pub messages: Vec<UiMessage>,
    pub is_tool_approval: bool,
    /// None on the anonymous lane; no database write happens then.
    pub persist_for_user: Option<Uuid>,
}

/// Run one generation end to end and emit the terminal event. Runs in a
/// detached task: a client disconnect drops the receiver but never this
/// future, so completion persistence is independent of the socket.
pub(super) async fn run_generation(state: AppState, sink: EventSink, plan: GenerationPlan) {
    let finalized = stream_model_response(&state, &sink, &plan).await;

    match finalized {
        Ok(finalized) => {
            sink.send(ChatStreamEvent::Finish(FinishData {
                messages: finalized.clone(),
            }));

            if plan.persist_for_user.is_some() {
                if let Err(e) = persist_finished_messages(&state, &plan, &finalized).await {
                    tracing::error!(
                        "Failed to persist finished messages for chat {}: {}",
                        plan.chat_id,
                        e
                    );
                }
            }
        }
        Err(()) => {
            // Error event already emitted by stream_model_response
        }
    }

    sink.finish();
}

/// Invoke the gateway and convert its chunk stream into unified events.
/// Returns the finalized set of new/updated messages, or Err after an
/// error event has been sent.
async fn stream_model_response(
    state: &AppState,
    sink: &EventSink,
    plan: &GenerationPlan,
) -> Result<Vec<UiMessage>, ()> {
    let reasoning_model = is_reasoning_model(&plan.model);

    let prior_rounds = tool_rounds_in_current_turn(&plan.messages);

    if prior_rounds >= MAX_STEPS {
        sink.send(ChatStreamEvent::MaxStepsReached(MaxStepsReachedData {
            steps: prior_rounds,
        }));
        return Ok(Vec::new());
    }

    let mut finalized: Vec<UiMessage> = Vec::new();

    // On a continuation, acknowledge the freshly applied tool results so a
    // reattaching client sees them in the replayed stream
    if plan.is_tool_approval {
        if let Some(updated) = last_assistant_with_tool_results(&plan.messages) {
            for part in &updated.parts {
                if let MessagePart::ToolInvocation {
                    tool_invocation_id,
                    tool_name,
                    state: ToolState::Result,
                    result: Some(result),
                    ..
                } = part
                {
                    sink.send(ChatStreamEvent::ToolResult(ToolResultData {
                        message_id: updated.id,
                        tool_invocation_id: tool_invocation_id.clone(),
                        tool_name: tool_name.clone(),
                        result: result.clone(),
                    }));
                }
            }
            finalized.push(updated.clone());
        }
    }

    let request = GatewayChatRequest {
        model: plan.model.clone(),
        messages: to_wire_messages(&prompts::system_prompt(&plan.model), &plan.messages),
        stream: true,
        thinking: reasoning_model.then(|| ThinkingOptions::enabled(THINKING_BUDGET_TOKENS)),
    };

    let mut stream = match state.gateway.chat_stream(request).await {
        Ok(stream) => stream,
        Err(e) if e.is_activation_error() => {
            tracing::error!("Gateway activation error: {}", e);
            send_error(
                sink,
                "The model gateway rejected the request. Activate billing for your gateway account"
                    .to_string(),
                ErrorKind::ActivationRequired,
            );
            return Err(());
        }
        Err(e) => {
            tracing::error!("Error calling model gateway: {}", e);
            send_error(sink, STREAM_ERROR_MESSAGE.to_string(), ErrorKind::Offline);
            return Err(());
        }
    };

    let message_id = Uuid::new_v4();
    sink.send(ChatStreamEvent::TextStart(TextStartData { message_id }));

    let mut full_content = String::new();
    let mut full_reasoning = String::new();
    let mut tool_use = None;
    let mut stream_failed = false;
    let mut smoother = (!reasoning_model).then(WordSmoother::new);

    // Drain the upstream fully, even past the finish marker or after a
    // failure, so the gateway connection is never leaked mid-body
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::error!("Mid-stream gateway error: {}", e);
                stream_failed = true;
                continue;
            }
        };

        if stream_failed {
            continue;
        }

        if let Some(content) = &chunk.content {
            full_content.push_str(content);
            match smoother.as_mut() {
                Some(smoother) => {
                    for word in smoother.push(content) {
                        sink.send(ChatStreamEvent::TextDelta(TextDeltaData {
                            message_id,
                            delta: word,
                        }));
                    }
                }
                None => {
                    sink.send(ChatStreamEvent::TextDelta(TextDeltaData {
                        message_id,
                        delta: content.clone(),
                    }));
                }
            }
        }

        if let Some(reasoning) = &chunk.reasoning {
            full_reasoning.push_str(reasoning);
            sink.send(ChatStreamEvent::ReasoningDelta(ReasoningDeltaData {
                message_id,
                delta: reasoning.clone(),
            }));
        }

        if let Some(chunk_tool_use) = chunk.tool_use {
            tool_use = Some(chunk_tool_use);
        }
    }

    if stream_failed {
        send_error(sink, STREAM_ERROR_MESSAGE.to_string(), ErrorKind::Offline);
        return Err(());
    }

    if let Some(smoother) = smoother.as_mut() {
        if let Some(rest) = smoother.flush() {
            sink.send(ChatStreamEvent::TextDelta(TextDeltaData {
                message_id,
                delta: rest,
            }));
        }
    }

    // Assemble the assistant message from what the stream produced
    let mut parts: Vec<MessagePart> = Vec::new();
    if !full_reasoning.is_empty() {
        parts.push(MessagePart::Reasoning {
            reasoning: full_reasoning,
        });
    }
    if !full_content.is_empty() {
        parts.push(MessagePart::Text { text: full_content });
    }
    if let Some(tool_use) = &tool_use {
        sink.send(ChatStreamEvent::ToolInvocation(ToolInvocationData {
            message_id,
            tool_invocation_id: tool_use.id.clone(),
            tool_name: tool_use.name.clone(),
            args: tool_use.input.clone(),
        }));
        parts.push(MessagePart::ToolInvocation {
            tool_invocation_id: tool_use.id.clone(),
            tool_name: tool_use.name.clone(),
            args: tool_use.input.clone(),
            state: ToolState::Call,
            result: None,
        });
    }

    if !parts.is_empty() {
        finalized.push(UiMessage {
            id: message_id,
            role: Role::Assistant,
            parts,
        });
    }

    sink.send(ChatStreamEvent::StepFinish(StepFinishData {
        step: prior_rounds + 1,
    }));

    Ok(finalized)
}

/// Tool rounds taken since the last user message. The bound applies to the
/// turn this request continues, never to earlier turns in the history.
fn tool_rounds_in_current_turn(messages: &[UiMessage]) -> usize {
    let turn_start = messages
        .iter()
        .rposition(|m| m.role == Role::User)
        .map(|i| i + 1)
        .unwrap_or(0);

    messages[turn_start..]
        .iter()
        .filter(|m| m.role == Role::Assistant)
        .flat_map(|m| m.parts.iter())
        .filter(|p| matches!(p, MessagePart::ToolInvocation { .. }))
        .count()
}

/// The message whose tool state the continuation changed, if any.
fn last_assistant_with_tool_results(messages: &[UiMessage]) -> Option<&UiMessage> {
    messages.iter().rev().find(|m| {
        m.role == Role::Assistant
            && m.parts.iter().any(|p| {
                matches!(
                    p,
                    MessagePart::ToolInvocation {
                        state: ToolState::Result,
                        ..
                    }
                )
            })
    })
}

/// Completion callback: runs after the terminal event, regardless of the
/// client socket. Tool-approval continuations overwrite known message ids
/// in place; everything else is appended.
async fn persist_finished_messages(
    state: &AppState,
    plan: &GenerationPlan,
    finalized: &[UiMessage],
) -> Result<(), sqlx::Error> {
    if finalized.is_empty() {
        return Ok(());
    }

    let existing_ids: HashSet<Uuid> = if plan.is_tool_approval {
        messages::get_messages_by_chat_id(&state.pool, plan.chat_id)
            .await?
            .into_iter()
            .map(|m| m.id)
            .collect()
    } else {
        HashSet::new()
    };

    let mut to_insert: Vec<&UiMessage> = Vec::new();
    for message in finalized {
        if existing_ids.contains(&message.id) {
            messages::update_message(&state.pool, message.id, &message.parts).await?;
        } else {
            to_insert.push(message);
        }
    }

    if !to_insert.is_empty() {
        let rows = to_insert_rows(plan.chat_id, chrono::Utc::now(), &to_insert);
        messages::save_messages(&state.pool, &rows).await?;
    }

    Ok(())
}

/// Rows in one batch get strictly increasing stamps so the chronological
/// read order matches emission order even within a single callback.
fn to_insert_rows(
    chat_id: Uuid,
    base: chrono::DateTime<chrono::Utc>,
    messages: &[&UiMessage],
) -> Vec<NewMessage> {
    messages
        .iter()
        .enumerate()
        .map(|(offset, message)| NewMessage {
            id: message.id,
            chat_id,
            role: message.role,
            parts: message.parts.clone(),
            created_at: base + chrono::Duration::microseconds(offset as i64),
        })
        .collect()
}
