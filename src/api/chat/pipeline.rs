//! The two chat-request strategies behind one interface, selected once
//! after identity resolution: a fast anonymous lane that never touches the
//! database, and the full authenticated pipeline.

use async_trait::async_trait;
use axum::response::Response;
use sqlx::PgPool;
use uuid::Uuid;

use crate::api::errors::{ApiResult, AppError};
use crate::auth::Identity;
use crate::database::models::{
    Chat, CreateChatRequest, Message, NewMessage, Role, UiMessage, User, UserTier,
    PLACEHOLDER_TITLE,
};
use crate::database::queries::{chats, messages, streams};
use crate::state::AppState;

use super::helpers::{generate_and_update_chat_title, sse_response, EventSink};
use super::streaming::{run_generation, GenerationPlan};
use super::types::{ChatPostRequest, ChatStreamEvent, ConnectedData};

#[async_trait]
pub(super) trait ChatPipeline: Send + Sync {
    async fn handle(&self, state: AppState, request: ChatPostRequest) -> ApiResult<Response>;
}

pub(super) fn select_pipeline(identity: Identity) -> Box<dyn ChatPipeline> {
    match identity {
        Identity::Anonymous => Box::new(AnonymousPipeline),
        Identity::Authenticated { user, tier } => {
            Box::new(AuthenticatedPipeline { user, tier })
        }
    }
}

fn request_messages(request: &ChatPostRequest) -> Vec<UiMessage> {
    match (&request.messages, &request.message) {
        (Some(messages), _) => messages.clone(),
        (None, Some(message)) => vec![message.clone()],
        (None, None) => Vec::new(), // unreachable past validation
    }
}

/// Persistence operations the authenticated lane performs before the first
/// byte streams. `PgPool` is the production implementation; tests substitute
/// an in-memory store to exercise the branching without a database.
#[async_trait]
pub(super) trait ChatStore: Send + Sync {
    async fn user_message_count(&self, user_id: Uuid, hours: i64) -> Result<i64, sqlx::Error>;
    async fn chat_by_id(&self, chat_id: Uuid) -> Result<Option<Chat>, sqlx::Error>;
    async fn create_chat(&self, request: CreateChatRequest) -> Result<Chat, sqlx::Error>;
    async fn messages_by_chat(&self, chat_id: Uuid) -> Result<Vec<Message>, sqlx::Error>;
    async fn append_messages(&self, rows: &[NewMessage]) -> Result<(), sqlx::Error>;
}

#[async_trait]
impl ChatStore for PgPool {
    async fn user_message_count(&self, user_id: Uuid, hours: i64) -> Result<i64, sqlx::Error> {
        messages::get_message_count_by_user_id(self, user_id, hours).await
    }

    async fn chat_by_id(&self, chat_id: Uuid) -> Result<Option<Chat>, sqlx::Error> {
        chats::get_chat_by_id(self, chat_id).await
    }

    async fn create_chat(&self, request: CreateChatRequest) -> Result<Chat, sqlx::Error> {
        chats::save_chat(self, request).await
    }

    async fn messages_by_chat(&self, chat_id: Uuid) -> Result<Vec<Message>, sqlx::Error> {
        messages::get_messages_by_chat_id(self, chat_id).await
    }

    async fn append_messages(&self, rows: &[NewMessage]) -> Result<(), sqlx::Error> {
        messages::save_messages(self, rows).await
    }
}

/// Outcome of the pre-stream phase: the working history handed to the
/// generation and whether a fresh chat row was created.
#[derive(Debug)]
pub(super) struct PreparedConversation {
    pub messages: Vec<UiMessage>,
    pub chat_created: bool,
}

/// Quota check, chat resolution and user-message persistence, in that
/// order. Nothing here touches the model gateway; a rejection leaves the
/// database exactly as it was apart from the persisted user message.
pub(super) async fn prepare_conversation(
    store: &dyn ChatStore,
    user: &User,
    tier: UserTier,
    request: &ChatPostRequest,
) -> ApiResult<PreparedConversation> {
    // 1. Daily quota, checked before any model invocation
    let message_count = store.user_message_count(user.id, 24).await?;
    if message_count >= tier.max_messages_per_day() {
        return Err(AppError::rate_limited());
    }

    let is_tool_approval = request.is_tool_approval_flow();

    // 2. Resolve the chat: ownership check on an existing one, or create
    //    it with a placeholder title on the first user message
    let mut history: Vec<UiMessage> = Vec::new();
    let mut chat_created = false;

    match store.chat_by_id(request.id).await? {
        Some(chat) => {
            if chat.user_id != user.id {
                return Err(AppError::forbidden("This chat belongs to another user"));
            }
            if !is_tool_approval {
                history = store
                    .messages_by_chat(request.id)
                    .await?
                    .into_iter()
                    .map(|m| m.into_ui_message())
                    .collect();
            }
        }
        None => {
            if let Some(message) = &request.message {
                if message.role == Role::User {
                    store
                        .create_chat(CreateChatRequest {
                            id: request.id,
                            user_id: user.id,
                            title: PLACEHOLDER_TITLE.to_string(),
                            visibility: request.selected_visibility_type,
                        })
                        .await?;
                    chat_created = true;
                }
            }
        }
    }

    // 3. Accumulate the working history
    let ui_messages = if is_tool_approval {
        request_messages(request)
    } else {
        let mut all = history;
        all.extend(request_messages(request));
        all
    };

    // 4. Persist the incoming user message before streaming begins
    if let Some(message) = &request.message {
        if message.role == Role::User {
            store
                .append_messages(&[NewMessage {
                    id: message.id,
                    chat_id: request.id,
                    role: Role::User,
                    parts: message.parts.clone(),
                    created_at: chrono::Utc::now(),
                }])
                .await?;
        }
    }

    Ok(PreparedConversation {
        messages: ui_messages,
        chat_created,
    })
}

/// The anonymous lane's generation plan carries no persistence target.
fn anonymous_plan(request: &ChatPostRequest) -> GenerationPlan {
    GenerationPlan {
        chat_id: request.id,
        model: request.selected_chat_model.clone(),
        messages: request_messages(request),
        is_tool_approval: request.is_tool_approval_flow(),
        persist_for_user: None,
    }
}

/// Fast lane: no persistence, no quota, no relay. The model stream goes
/// straight to the socket.
pub(super) struct AnonymousPipeline;

#[async_trait]
impl ChatPipeline for AnonymousPipeline {
    async fn handle(&self, state: AppState, request: ChatPostRequest) -> ApiResult<Response> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let sink = EventSink::new(tx, None);
        sink.send(ChatStreamEvent::Connected(ConnectedData { resumable: false }));

        tokio::spawn(run_generation(state, sink, anonymous_plan(&request)));

        Ok(sse_response(
            tokio_stream::wrappers::UnboundedReceiverStream::new(rx),
        ))
    }
}

/// Full pipeline: quota check, chat resolution, user-message persistence
/// and stream registration all happen before the first byte streams.
pub(super) struct AuthenticatedPipeline {
    pub user: User,
    pub tier: UserTier,
}

#[async_trait]
impl ChatPipeline for AuthenticatedPipeline {
    async fn handle(&self, state: AppState, request: ChatPostRequest) -> ApiResult<Response> {
        let prepared = prepare_conversation(&state.pool, &self.user, self.tier, &request).await?;

        // Register the stream id, then attach the replay relay. A missing
        // relay degrades to a direct stream.
        let stream_id = Uuid::new_v4();
        streams::create_stream_id(&state.pool, stream_id, request.id).await?;

        let relay_handle = state.relay.as_ref().map(|relay| relay.register(stream_id));
        if relay_handle.is_none() {
            tracing::warn!(
                "Replay relay unavailable, serving chat {} as a direct stream",
                request.id
            );
        }

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let sink = EventSink::new(tx, relay_handle);
        sink.send(ChatStreamEvent::Connected(ConnectedData {
            resumable: sink.is_resumable(),
        }));

        // Title generation races the main stream as a detached task
        if prepared.chat_created {
            if let Some(message) = &request.message {
                tokio::spawn(generate_and_update_chat_title(
                    state.clone(),
                    sink.clone(),
                    request.id,
                    request.selected_chat_model.clone(),
                    message.text_content(),
                ));
            }
        }

        let plan = GenerationPlan {
            chat_id: request.id,
            model: request.selected_chat_model.clone(),
            messages: prepared.messages,
            is_tool_approval: request.is_tool_approval_flow(),
            persist_for_user: Some(self.user.id),
        };
        tokio::spawn(run_generation(state, sink, plan));

        Ok(sse_response(
            tokio_stream::wrappers::UnboundedReceiverStream::new(rx),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::errors::ErrorKind;
    use crate::database::models::{MessagePart, Visibility};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct MemoryStore {
        message_count: i64,
        chat: Option<Chat>,
        history: Vec<Message>,
        chat_lookups: AtomicUsize,
        history_fetches: AtomicUsize,
        created_chats: Mutex<Vec<CreateChatRequest>>,
        appended: Mutex<Vec<NewMessage>>,
    }

    #[async_trait]
    impl ChatStore for MemoryStore {
        async fn user_message_count(&self, _user_id: Uuid, _hours: i64) -> Result<i64, sqlx::Error> {
            Ok(self.message_count)
        }

        async fn chat_by_id(&self, _chat_id: Uuid) -> Result<Option<Chat>, sqlx::Error> {
            self.chat_lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self.chat.clone())
        }

        async fn create_chat(&self, request: CreateChatRequest) -> Result<Chat, sqlx::Error> {
            let chat = Chat {
                id: request.id,
                user_id: request.user_id,
                title: request.title.clone(),
                visibility: request.visibility,
                created_at: chrono::Utc::now(),
            };
            self.created_chats.lock().push(request);
            Ok(chat)
        }

        async fn messages_by_chat(&self, _chat_id: Uuid) -> Result<Vec<Message>, sqlx::Error> {
            self.history_fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.history.clone())
        }

        async fn append_messages(&self, rows: &[NewMessage]) -> Result<(), sqlx::Error> {
            self.appended.lock().extend(rows.iter().cloned());
            Ok(())
        }
    }

    fn test_user() -> User {
        User {
            id: Uuid::new_v4(),
            email: "a@example.com".to_string(),
            password_hash: None,
            tier: UserTier::Guest,
            created_at: chrono::Utc::now(),
        }
    }

    fn user_text_message(text: &str) -> UiMessage {
        UiMessage {
            id: Uuid::new_v4(),
            role: Role::User,
            parts: vec![MessagePart::Text {
                text: text.to_string(),
            }],
        }
    }

    fn new_message_request(message: UiMessage) -> ChatPostRequest {
        ChatPostRequest {
            id: Uuid::new_v4(),
            message: Some(message),
            messages: None,
            selected_chat_model: "google/gemini-1.5-flash".to_string(),
            selected_visibility_type: Visibility::Private,
        }
    }

    fn stored_message(chat_id: Uuid, role: Role, text: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            chat_id,
            role,
            parts: vec![MessagePart::Text {
                text: text.to_string(),
            }],
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_quota_rejected_before_any_chat_access() {
        let store = MemoryStore {
            message_count: UserTier::Guest.max_messages_per_day(),
            ..MemoryStore::default()
        };
        let user = test_user();
        let request = new_message_request(user_text_message("Hi"));

        let err = prepare_conversation(&store, &user, UserTier::Guest, &request)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimit);
        assert_eq!(store.chat_lookups.load(Ordering::SeqCst), 0);
        assert!(store.appended.lock().is_empty());
    }

    #[tokio::test]
    async fn test_foreign_chat_forbidden() {
        let user = test_user();
        let request = new_message_request(user_text_message("Hi"));
        let store = MemoryStore {
            chat: Some(Chat {
                id: request.id,
                user_id: Uuid::new_v4(),
                title: "someone else's".to_string(),
                visibility: Visibility::Private,
                created_at: chrono::Utc::now(),
            }),
            ..MemoryStore::default()
        };

        let err = prepare_conversation(&store, &user, UserTier::Regular, &request)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        assert!(store.appended.lock().is_empty());
    }

    #[tokio::test]
    async fn test_first_message_creates_chat_and_persists_user_message() {
        let store = MemoryStore::default();
        let user = test_user();
        let message = user_text_message("Hi");
        let message_id = message.id;
        let request = new_message_request(message);

        let prepared = prepare_conversation(&store, &user, UserTier::Regular, &request)
            .await
            .unwrap();

        assert!(prepared.chat_created);
        let created = store.created_chats.lock();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].title, PLACEHOLDER_TITLE);
        assert_eq!(created[0].user_id, user.id);

        let appended = store.appended.lock();
        assert_eq!(appended.len(), 1);
        assert_eq!(appended[0].id, message_id);
        assert_eq!(appended[0].role, Role::User);
    }

    #[tokio::test]
    async fn test_existing_history_prepended_to_new_message() {
        let user = test_user();
        let message = user_text_message("and now?");
        let request = new_message_request(message);
        let store = MemoryStore {
            chat: Some(Chat {
                id: request.id,
                user_id: user.id,
                title: "ongoing".to_string(),
                visibility: Visibility::Private,
                created_at: chrono::Utc::now(),
            }),
            history: vec![
                stored_message(request.id, Role::User, "earlier question"),
                stored_message(request.id, Role::Assistant, "earlier answer"),
            ],
            ..MemoryStore::default()
        };

        let prepared = prepare_conversation(&store, &user, UserTier::Regular, &request)
            .await
            .unwrap();

        assert!(!prepared.chat_created);
        assert_eq!(prepared.messages.len(), 3);
        assert_eq!(prepared.messages[2].role, Role::User);
    }

    #[tokio::test]
    async fn test_tool_approval_uses_supplied_list_without_history_fetch() {
        let user = test_user();
        let supplied = vec![
            user_text_message("weather?"),
            UiMessage {
                id: Uuid::new_v4(),
                role: Role::Assistant,
                parts: vec![MessagePart::ToolInvocation {
                    tool_invocation_id: "call_1".to_string(),
                    tool_name: "getWeather".to_string(),
                    args: serde_json::json!({"city": "Oslo"}),
                    state: crate::database::models::ToolState::Result,
                    result: Some(serde_json::json!({"temp": 4})),
                }],
            },
        ];
        let request = ChatPostRequest {
            id: Uuid::new_v4(),
            message: None,
            messages: Some(supplied.clone()),
            selected_chat_model: "google/gemini-1.5-flash".to_string(),
            selected_visibility_type: Visibility::Private,
        };
        let store = MemoryStore {
            chat: Some(Chat {
                id: request.id,
                user_id: user.id,
                title: "ongoing".to_string(),
                visibility: Visibility::Private,
                created_at: chrono::Utc::now(),
            }),
            history: vec![stored_message(request.id, Role::User, "stale")],
            ..MemoryStore::default()
        };

        let prepared = prepare_conversation(&store, &user, UserTier::Regular, &request)
            .await
            .unwrap();

        assert_eq!(prepared.messages.len(), supplied.len());
        assert_eq!(store.history_fetches.load(Ordering::SeqCst), 0);
        assert!(store.appended.lock().is_empty());
    }

    #[test]
    fn test_anonymous_plan_never_persists() {
        let request = new_message_request(user_text_message("Hi"));
        let plan = anonymous_plan(&request);
        assert!(plan.persist_for_user.is_none());
        assert!(!plan.is_tool_approval);
        assert_eq!(plan.messages.len(), 1);
    }
}
