//! Agent loop for LLM-driven project editing
//!
//! # Architecture
//!
//! ```text
//! user message → AgentController::run (per-project lock held)
//!                  ↓
//!           transcript → working history + system prompt
//!                  ↓
//!           CompletionModel::complete (tools declared)  ← up to max_turns
//!              ↓ text                    ↓ tool calls
//!       persist answer,            for each call, in order:
//!       raise restart signal         log pending → dispatch → log completed
//!                                    → tool result into history
//!                                  release batch sandbox, next turn
//! ```

pub mod controller;
pub mod locks;

pub use controller::{
    build_history, AgentConfig, AgentController, AgentError, AgentOutcome, Termination, DEFAULT_FAILURE_MESSAGE,
};
pub use locks::ProjectLocks;
