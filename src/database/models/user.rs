use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Row};
use uuid::Uuid;

/// Entitlement tier controlling the daily message quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserTier {
    Guest,
    Regular,
}

impl UserTier {
    pub fn max_messages_per_day(&self) -> i64 {
        match self {
            UserTier::Guest => 20,
            UserTier::Regular => 100,
        }
    }

    pub fn from_str_or_default(s: &str) -> Self {
        match s {
            "guest" => UserTier::Guest,
            _ => UserTier::Regular,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub tier: UserTier,
    pub created_at: DateTime<Utc>,
}

impl FromRow<'_, sqlx::postgres::PgRow> for User {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        let tier: String = row.try_get("tier")?;
        Ok(User {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
            tier: UserTier::from_str_or_default(&tier),
            created_at: row.try_get("created_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_quotas() {
        assert_eq!(UserTier::Guest.max_messages_per_day(), 20);
        assert_eq!(UserTier::Regular.max_messages_per_day(), 100);
    }

    #[test]
    fn test_unknown_tier_defaults_to_regular() {
        assert_eq!(UserTier::from_str_or_default("vip"), UserTier::Regular);
    }
}
