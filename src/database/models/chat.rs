use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Row};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub visibility: Visibility,
    pub created_at: DateTime<Utc>,
}

impl FromRow<'_, sqlx::postgres::PgRow> for Chat {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(Chat {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            title: row.try_get("title")?,
            visibility: row.try_get("visibility")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Title a chat carries until the background generation task replaces it.
pub const PLACEHOLDER_TITLE: &str = "New chat";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateChatRequest {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub visibility: Visibility,
}
