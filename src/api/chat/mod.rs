//! Chat API module
//!
//! SSE streaming chat with anonymous and authenticated lanes, resumable
//! stream relay and the tool-approval continuation flow.
//!
//! ## Module Structure
//!
//! - `types`: request body and SSE event types
//! - `validation`: schema checks applied before any side effect
//! - `helpers`: event sink, transport headers, title generation
//! - `pipeline`: the two request strategies selected after identity resolution
//! - `streaming`: gateway orchestration and completion persistence
//! - `handlers`: HTTP handlers wired into the router

mod handlers;
mod helpers;
mod pipeline;
mod streaming;
mod types;
mod validation;

pub use handlers::{delete_chat, post_chat, resume_chat_stream};
pub use types::{ChatPostRequest, ChatStreamEvent};
