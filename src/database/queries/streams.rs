use sqlx::PgPool;
use uuid::Uuid;

use crate::database::models::StreamRecord;

/// Register a stream id for a chat. Registrations are append-only; a new
/// generation attempt inserts a fresh row and never touches older ones.
pub async fn create_stream_id(
    pool: &PgPool,
    stream_id: Uuid,
    chat_id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO streams (id, chat_id) VALUES ($1, $2)")
        .bind(stream_id)
        .bind(chat_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// All registrations for a chat, newest first. The head is the stream a
/// reconnecting client should resume.
pub async fn get_stream_ids_by_chat_id(
    pool: &PgPool,
    chat_id: Uuid,
) -> Result<Vec<StreamRecord>, sqlx::Error> {
    sqlx::query_as::<_, StreamRecord>(
        "SELECT id, chat_id, created_at FROM streams
         WHERE chat_id = $1 ORDER BY created_at DESC",
    )
    .bind(chat_id)
    .fetch_all(pool)
    .await
}
