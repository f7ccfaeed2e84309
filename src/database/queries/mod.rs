pub mod chats;
pub mod messages;
pub mod streams;
pub mod users;
