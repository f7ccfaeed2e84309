pub mod chat;
pub mod errors;
pub mod macros;
