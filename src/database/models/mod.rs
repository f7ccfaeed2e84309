mod chat;
mod message;
mod stream;
mod user;

pub use chat::{Chat, CreateChatRequest, Visibility, PLACEHOLDER_TITLE};
pub use message::{
    Message, MessagePart, NewMessage, Role, SourceRef, ToolState, UiMessage, KNOWN_TOOLS,
};
pub use stream::StreamRecord;
pub use user::{User, UserTier};
