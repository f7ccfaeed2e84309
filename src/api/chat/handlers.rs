//! HTTP handlers for the chat endpoints.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap};
use axum::response::sse::Event;
use axum::response::Response;
use axum::Json;
use futures_util::StreamExt;
use serde::Deserialize;
use std::convert::Infallible;
use uuid::Uuid;

use crate::api::errors::{ApiResult, AppError, ErrorKind};
use crate::auth::Identity;
use crate::database::models::Chat;
use crate::database::queries::{chats, streams};
use crate::state::AppState;

use super::helpers::sse_response;
use super::pipeline::select_pipeline;
use super::types::ChatPostRequest;
use super::validation::validate;

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Unknown failures get a correlation id in the log and a generic offline
/// error on the wire; known kinds pass through unchanged.
fn surface(err: AppError) -> AppError {
    if err.kind() == ErrorKind::Offline {
        let correlation_id = Uuid::new_v4();
        tracing::error!(%correlation_id, "Unhandled error in chat API: {}", err);
        AppError::offline()
    } else {
        err
    }
}

/// POST /api/chat — validate, resolve identity, then hand off to the lane
/// the identity selects. No side effect happens before validation passes.
pub async fn post_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ChatPostRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(request) = payload
        .map_err(|e| AppError::bad_request(format!("Invalid request body: {}", e)))?;

    validate(&request)?;

    let identity = state
        .auth
        .resolve_identity(&state.pool, bearer_token(&headers))
        .await;

    let pipeline = select_pipeline(identity);
    pipeline.handle(state, request).await.map_err(surface)
}

#[derive(Debug, Deserialize)]
pub struct DeleteChatParams {
    pub id: Option<Uuid>,
}

/// DELETE /api/chat?id= — authenticated-only, owner-only.
pub async fn delete_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<DeleteChatParams>,
) -> ApiResult<Json<Chat>> {
    let Some(chat_id) = params.id else {
        return Err(AppError::bad_request("Missing id query parameter"));
    };

    let identity = state
        .auth
        .resolve_identity(&state.pool, bearer_token(&headers))
        .await;
    let Identity::Authenticated { user, .. } = identity else {
        return Err(AppError::unauthorized());
    };

    let chat = chats::get_chat_by_id(&state.pool, chat_id)
        .await
        .map_err(|e| surface(e.into()))?;
    match chat {
        Some(chat) if chat.user_id == user.id => {}
        _ => return Err(AppError::forbidden("This chat belongs to another user")),
    }

    let deleted = chats::delete_chat_by_id(&state.pool, chat_id)
        .await
        .map_err(|e| surface(e.into()))?
        .ok_or_else(|| AppError::not_found("Chat"))?;

    Ok(Json(deleted))
}

/// GET /api/chat/{id}/stream — reattach to the latest registered stream
/// for a chat and replay it from the start.
pub async fn resume_chat_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(chat_id): Path<Uuid>,
) -> ApiResult<Response> {
    let identity = state
        .auth
        .resolve_identity(&state.pool, bearer_token(&headers))
        .await;
    let Identity::Authenticated { user, .. } = identity else {
        return Err(AppError::unauthorized());
    };

    let chat = chats::get_chat_by_id(&state.pool, chat_id)
        .await
        .map_err(|e| surface(e.into()))?
        .ok_or_else(|| AppError::not_found("Chat"))?;
    if chat.user_id != user.id {
        return Err(AppError::forbidden("This chat belongs to another user"));
    }

    let Some(relay) = state.relay.as_ref() else {
        return Err(AppError::not_found("Resumable stream"));
    };

    let records = streams::get_stream_ids_by_chat_id(&state.pool, chat_id)
        .await
        .map_err(|e| surface(e.into()))?;
    let latest = records.first().ok_or_else(|| AppError::not_found("Resumable stream"))?;

    let frames = relay
        .resume(latest.id)
        .ok_or_else(|| AppError::not_found("Resumable stream"))?;

    let stream = frames.map(|frame| {
        Ok::<_, Infallible>(Event::default().event(frame.event).data(frame.data))
    });

    Ok(sse_response(stream))
}
