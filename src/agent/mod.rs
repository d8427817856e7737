//! Agent module - core agent logic.
//!
//! This module contains:
//! - Message types (Message, ToolCall)
//! - LLM client trait and implementations
//! - Agent loop alternating model calls and tool execution
//! - Streaming adapter turning runs into fragments
//!
//! # Adding a New LLM Provider
//!
//! See [`llm`] for instructions.

mod loop_impl;
mod message;
pub mod stream;

// LLM providers in submodule
pub mod llm;

// Re-exports for convenience
pub use llm::{BoundClient, CompletionOptions, LlmClient, LlmResponse, OpenAiClient, ToolChoice, Usage};
pub use loop_impl::{AgentEvent, AgentLoop, RunOutcome, DEFAULT_MAX_ROUNDS};
pub use message::{Message, Role, ToolCall};
pub use stream::{relay, Fragment, RelayOptions, ReplyMode};
