//! Completion API client
//!
//! Speaks the OpenAI-compatible tool-calling contract: the full tool schema is
//! declared on every turn and the model answers with either text or a list of
//! tool calls, each carrying an id that the matching tool result echoes back.

pub mod client;
pub mod prompts;
pub mod types;

pub use client::{ChatClient, ChatError, CompletionModel};
pub use prompts::{classify_template, system_prompt};
pub use types::{ChatMessage, FunctionCall, Tool, ToolCall, ToolFunction};
