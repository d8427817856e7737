//! Adapters module - ways to talk to the agent.
//!
//! Each adapter implements the [`Channel`] trait for uniform handling.
//!
//! # Supported Channels
//!
//! - **WebSocket** - server speaking the browser chat protocol
//! - **CLI** - local single-shot and interactive chat
//!
//! [`remote`] holds the client side of the WebSocket protocol.

pub mod cli;
pub mod remote;
pub mod websocket;

use crate::agent::{Message, RelayOptions};
use crate::config::Config;
use crate::history::{trim_history, HistoryEntry};

/// Channel trait for chat adapters.
///
/// All channel implementations must be [`Send`] + [`Sync`] for async compatibility.
pub trait Channel: Send + Sync {
    /// Channel name (e.g., "websocket", "cli").
    fn name(&self) -> &str;

    /// Start handling messages; returns when the channel is done.
    fn start(&self) -> impl std::future::Future<Output = crate::Result<()>> + Send;

    /// Stop the channel.
    fn stop(&self) -> impl std::future::Future<Output = crate::Result<()>> + Send;
}

/// Conversation settings shared by every channel
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub welcome_message: String,
    pub history_depth: usize,
    pub relay: RelayOptions,
    pub system_prompt: Option<String>,
}

impl ChatSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            welcome_message: config.server.welcome_message.clone(),
            history_depth: config.chat.history_depth,
            relay: config.relay_options(),
            system_prompt: config.llm.system_prompt.clone(),
        }
    }

    /// System prompt, the last `history_depth` prior turns, then the new message
    pub fn build_conversation(&self, history: Vec<HistoryEntry>, content: &str) -> Vec<Message> {
        let history = trim_history(history, self.history_depth);

        let mut conversation = Vec::with_capacity(history.len() + 2);
        if let Some(prompt) = self.system_prompt.as_deref().filter(|p| !p.is_empty()) {
            conversation.push(Message::system(prompt));
        }
        conversation.extend(history.into_iter().map(Message::from));
        conversation.push(Message::user(content));
        conversation
    }
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
