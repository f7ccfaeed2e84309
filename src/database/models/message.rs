use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Row};
use uuid::Uuid;

/// Tool names the application knows how to route. Requests referencing
/// anything else are rejected at validation time.
pub const KNOWN_TOOLS: &[&str] = &[
    "getWeather",
    "createDocument",
    "updateDocument",
    "requestSuggestions",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// Lifecycle of a tool invocation as tracked inside a message part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolState {
    PartialCall,
    Call,
    Result,
}

/// One element of a message body. Closed set; every consumer matches
/// exhaustively so a new variant fails to compile until handled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MessagePart {
    Text {
        text: String,
    },
    File {
        #[serde(rename = "mediaType")]
        media_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<String>,
    },
    ToolInvocation {
        #[serde(rename = "toolInvocationId")]
        tool_invocation_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        args: serde_json::Value,
        state: ToolState,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
    },
    ToolResult {
        #[serde(rename = "toolInvocationId")]
        tool_invocation_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        result: serde_json::Value,
    },
    Reasoning {
        reasoning: String,
    },
    StepStart {},
    StepFinish {},
    Source {
        source: SourceRef,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// A message as exchanged with the client and persisted as JSONB parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiMessage {
    pub id: Uuid,
    pub role: Role,
    pub parts: Vec<MessagePart>,
}

impl UiMessage {
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            if let MessagePart::Text { text } = part {
                out.push_str(text);
            }
        }
        out
    }
}

/// A persisted message row. Parts are stored as a JSONB column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub role: Role,
    pub parts: Vec<MessagePart>,
    pub created_at: DateTime<Utc>,
}

impl FromRow<'_, sqlx::postgres::PgRow> for Message {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        let role: String = row.try_get("role")?;
        let role = match role.as_str() {
            "user" => Role::User,
            "assistant" => Role::Assistant,
            "system" => Role::System,
            other => {
                return Err(sqlx::Error::Decode(
                    format!("unknown message role: {}", other).into(),
                ))
            }
        };
        let parts: serde_json::Value = row.try_get("parts")?;
        let parts: Vec<MessagePart> =
            serde_json::from_value(parts).map_err(|e| sqlx::Error::Decode(e.into()))?;

        Ok(Message {
            id: row.try_get("id")?,
            chat_id: row.try_get("chat_id")?,
            role,
            parts,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl Message {
    pub fn into_ui_message(self) -> UiMessage {
        UiMessage {
            id: self.id,
            role: self.role,
            parts: self.parts,
        }
    }
}

/// Insert payload for `save_messages`.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub role: Role,
    pub parts: Vec<MessagePart>,
    pub created_at: DateTime<Utc>,
}
