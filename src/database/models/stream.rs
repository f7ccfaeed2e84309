use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Row};
use uuid::Uuid;

/// One generation attempt's replayable stream registration.
/// Rows are append-only; a newer registration supersedes older ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamRecord {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl FromRow<'_, sqlx::postgres::PgRow> for StreamRecord {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StreamRecord {
            id: row.try_get("id")?,
            chat_id: row.try_get("chat_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}
