//! Helper plumbing for chat streaming: the event sink shared between the
//! direct SSE channel and the replay relay, plus title generation.

use axum::response::sse::Event;
use std::convert::Infallible;
use uuid::Uuid;

use crate::ai::{prompts, GatewayChatRequest, LanguageGateway};
use crate::api::errors::ErrorKind;
use crate::database::queries::chats;
use crate::relay::RelayHandle;
use crate::state::AppState;

use super::types::{ChatStreamEvent, ChatTitleData, StreamErrorData};

pub(super) type EventSender = tokio::sync::mpsc::UnboundedSender<Result<Event, Infallible>>;

/// Wrap an event stream as an SSE response with buffering defeated at every
/// intermediary, so partial output reaches the client promptly.
pub(super) fn sse_response<S>(stream: S) -> axum::response::Response
where
    S: futures_util::Stream<Item = Result<Event, Infallible>> + Send + 'static,
{
    use axum::http::header::{HeaderValue, CACHE_CONTROL, CONTENT_ENCODING};
    use axum::response::sse::{KeepAlive, Sse};
    use axum::response::IntoResponse;

    let mut response = Sse::new(stream).keep_alive(KeepAlive::default()).into_response();
    let headers = response.headers_mut();
    headers.insert(CONTENT_ENCODING, HeaderValue::from_static("none"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-transform"),
    );
    response
}

/// Fan-out point for stream events. Every event goes to the live SSE
/// channel and, when the stream is resumable, into the relay's replay
/// buffer. Send failures mean the client went away; the producer keeps
/// running so persistence and replay still complete.
#[derive(Clone)]
pub(super) struct EventSink {
    tx: EventSender,
    relay: Option<RelayHandle>,
}

impl EventSink {
    pub fn new(tx: EventSender, relay: Option<RelayHandle>) -> Self {
        Self { tx, relay }
    }

    pub fn is_resumable(&self) -> bool {
        self.relay.is_some()
    }

    pub fn send(&self, event: ChatStreamEvent) {
        if let Some(relay) = &self.relay {
            relay.publish(event.event_name(), event.data().unwrap_or_default());
        }
        let _ = self.tx.send(Ok(event.into()));
    }

    /// Mark the replay channel complete. Call exactly once, after the
    /// terminal event.
    pub fn finish(&self) {
        if let Some(relay) = &self.relay {
            relay.finish();
        }
    }
}

/// Send an error event through the sink.
pub(super) fn send_error(sink: &EventSink, error_message: String, kind: ErrorKind) {
    sink.send(ChatStreamEvent::Error(StreamErrorData {
        error: error_message,
        kind: kind.as_str().to_string(),
    }));
}

/// Generate a chat title from the first user message and store it.
/// Runs as a detached task racing the main generation; its ChatTitle event
/// may arrive before or after the terminal Finish event.
pub(super) async fn generate_and_update_chat_title(
    state: AppState,
    sink: EventSink,
    chat_id: Uuid,
    model: String,
    first_user_message: String,
) {
    let title = match generate_title(&state.gateway, &model, &first_user_message).await {
        Ok(title) => title,
        Err(e) => {
            tracing::warn!("Title generation failed for chat {}: {}", chat_id, e);
            return;
        }
    };

    if let Err(e) = chats::update_chat_title_by_id(&state.pool, chat_id, &title).await {
        tracing::error!("Error updating chat title for {}: {}", chat_id, e);
        return;
    }

    sink.send(ChatStreamEvent::ChatTitle(ChatTitleData { title }));
}

async fn generate_title(
    gateway: &LanguageGateway,
    model: &str,
    first_user_message: &str,
) -> Result<String, crate::ai::GatewayError> {
    let prompt = prompts::title_prompt(first_user_message);
    let wire = crate::ai::to_wire_messages(
        "",
        &[crate::database::models::UiMessage {
            id: Uuid::new_v4(),
            role: crate::database::models::Role::User,
            parts: vec![crate::database::models::MessagePart::Text { text: prompt }],
        }],
    );

    let response = gateway
        .chat(GatewayChatRequest {
            model: model.to_string(),
            messages: wire,
            stream: false,
            thinking: None,
        })
        .await?;

    // Strip quoting and cap the length before storing
    let title = response
        .trim()
        .trim_matches('"')
        .trim_matches('\'')
        .chars()
        .take(50)
        .collect::<String>();

    Ok(title)
}
