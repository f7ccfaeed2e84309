//! Model gateway integration: wire conversion, streaming client, prompts
//! and the word-level smoothing transform.

pub mod gateway;
pub mod prompts;
pub mod smoothing;

pub use gateway::{
    is_reasoning_model, to_wire_messages, GatewayChatRequest, GatewayChunk, GatewayError,
    GatewayStream, LanguageGateway, ThinkingOptions, ToolUse, THINKING_BUDGET_TOKENS,
};
