use sqlx::PgPool;
use uuid::Uuid;

use crate::database::models::{Message, MessagePart, NewMessage};

pub async fn get_messages_by_chat_id(
    pool: &PgPool,
    chat_id: Uuid,
) -> Result<Vec<Message>, sqlx::Error> {
    sqlx::query_as::<_, Message>(
        "SELECT id, chat_id, role, parts, created_at
         FROM messages WHERE chat_id = $1 ORDER BY created_at ASC",
    )
    .bind(chat_id)
    .fetch_all(pool)
    .await
}

/// Append a batch of messages inside one transaction.
pub async fn save_messages(pool: &PgPool, messages: &[NewMessage]) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    for message in messages {
        let parts = serde_json::to_value(&message.parts)
            .map_err(|e| sqlx::Error::Encode(e.into()))?;

        sqlx::query(
            "INSERT INTO messages (id, chat_id, role, parts, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(message.id)
        .bind(message.chat_id)
        .bind(message.role.as_str())
        .bind(parts)
        .bind(message.created_at)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Overwrite an existing message's parts in place. Only the tool-approval
/// continuation path uses this; messages are otherwise immutable.
pub async fn update_message(
    pool: &PgPool,
    message_id: Uuid,
    parts: &[MessagePart],
) -> Result<(), sqlx::Error> {
    let parts = serde_json::to_value(parts).map_err(|e| sqlx::Error::Encode(e.into()))?;

    sqlx::query("UPDATE messages SET parts = $2 WHERE id = $1")
        .bind(message_id)
        .bind(parts)
        .execute(pool)
        .await?;
    Ok(())
}

/// Count user messages created by a user in the trailing window. Feeds the
/// entitlement-tier quota check; nothing is stored.
pub async fn get_message_count_by_user_id(
    pool: &PgPool,
    user_id: Uuid,
    difference_in_hours: i64,
) -> Result<i64, sqlx::Error> {
    let count: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM messages m
         JOIN chats c ON c.id = m.chat_id
         WHERE c.user_id = $1
           AND m.role = 'user'
           AND m.created_at >= now() - make_interval(hours => $2::int)",
    )
    .bind(user_id)
    .bind(difference_in_hours)
    .fetch_one(pool)
    .await?;

    Ok(count.0)
}
