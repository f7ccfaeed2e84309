use sqlx::PgPool;
use uuid::Uuid;

use crate::database::models::{Chat, CreateChatRequest};

/// Insert a chat row. The caller decides the id (client-supplied) so a
/// retried request is a no-op rather than a duplicate.
pub async fn save_chat(pool: &PgPool, request: CreateChatRequest) -> Result<Chat, sqlx::Error> {
    let inserted = sqlx::query_as::<_, Chat>(
        "INSERT INTO chats (id, user_id, title, visibility) VALUES ($1, $2, $3, $4)
         ON CONFLICT (id) DO NOTHING
         RETURNING id, user_id, title, visibility, created_at",
    )
    .bind(request.id)
    .bind(request.user_id)
    .bind(&request.title)
    .bind(request.visibility)
    .fetch_optional(pool)
    .await?;
    match inserted {
        Some(chat) => Ok(chat),
        // Lost a race against a concurrent insert of the same id.
        None => get_chat_by_id(pool, request.id)
            .await?
            .ok_or(sqlx::Error::RowNotFound),
    }
}

pub async fn get_chat_by_id(pool: &PgPool, chat_id: Uuid) -> Result<Option<Chat>, sqlx::Error> {
    sqlx::query_as::<_, Chat>(
        "SELECT id, user_id, title, visibility, created_at FROM chats WHERE id = $1",
    )
    .bind(chat_id)
    .fetch_optional(pool)
    .await
}

/// Delete a chat and return the deleted row. Messages and stream
/// registrations cascade at the schema level.
pub async fn delete_chat_by_id(pool: &PgPool, chat_id: Uuid) -> Result<Option<Chat>, sqlx::Error> {
    sqlx::query_as::<_, Chat>(
        "DELETE FROM chats WHERE id = $1 RETURNING id, user_id, title, visibility, created_at",
    )
    .bind(chat_id)
    .fetch_optional(pool)
    .await
}

/// Replace the placeholder title once background generation finishes.
/// Owner and visibility are immutable; only the title column moves.
pub async fn update_chat_title_by_id(
    pool: &PgPool,
    chat_id: Uuid,
    title: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE chats SET title = $2 WHERE id = $1")
        .bind(chat_id)
        .bind(title)
        .execute(pool)
        .await?;
    Ok(())
}
