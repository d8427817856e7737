//! Streaming adapter - turns agent runs into incremental fragments
//!
//! Answers go out one character at a time with a small delay (typewriter
//! mode), or as the model produces them (live mode). Tool activity is shown
//! as a status line, never as tool-call JSON.

use std::time::Duration;

use futures_util::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

use crate::tools::web::{extract_query, WebSearchTool};
use super::llm::LlmClient;
use super::loop_impl::{AgentEvent, AgentLoop};
use super::message::Message;

/// Default pause between typewriter fragments.
pub const DEFAULT_TYPING_DELAY: Duration = Duration::from_millis(5);

/// How answer text reaches the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyMode {
    /// Wait for the final answer, then replay it character by character.
    #[default]
    Typewriter,
    /// Forward model tokens as they arrive.
    Live,
}

/// One piece of output for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    /// Answer text.
    Text(String),
    /// Progress note, e.g. `searching: weather tokyo`. Not part of the answer.
    Status(String),
}

#[derive(Debug, Clone, Copy)]
pub struct RelayOptions {
    pub mode: ReplyMode,
    pub typing_delay: Duration,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            mode: ReplyMode::Typewriter,
            typing_delay: DEFAULT_TYPING_DELAY,
        }
    }
}

/// Split `text` into single-character fragments spaced by `delay`.
pub fn typewriter(text: String, delay: Duration) -> impl Stream<Item = String> {
    let chars: Vec<String> = text.chars().map(String::from).collect();
    stream::iter(chars.into_iter().enumerate()).then(move |(i, c)| async move {
        if i > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        c
    })
}

/// Status line shown while a tool runs.
pub fn status_line(tool: &str, arguments: &Value) -> String {
    if tool == WebSearchTool::NAME {
        let query = extract_query(arguments).unwrap_or_default();
        format!("searching: {}", query.trim())
    } else {
        format!("calling tool: {}", tool)
    }
}

/// Text shown to the user when a run fails.
pub fn apology(err: &crate::error::Error) -> String {
    format!("Sorry, something went wrong while processing your request: {}", err)
}

/// Run `conversation` through `agent`, emitting fragments as they become available.
///
/// Failures are turned into a single apology fragment. Returns the
/// concatenation of every [`Fragment::Text`] emitted.
pub async fn relay<C, F>(
    agent: &AgentLoop<C>,
    mut conversation: Vec<Message>,
    options: RelayOptions,
    mut emit: F,
) -> String
where
    C: LlmClient,
    F: FnMut(Fragment) + Send,
{
    let mut sent = String::new();

    let result = {
        let sent = &mut sent;
        let emit = &mut emit;
        let mut on_event = |event: AgentEvent| match event {
            AgentEvent::ToolCall { name, arguments, .. } => {
                emit(Fragment::Status(status_line(&name, &arguments)));
            }
            AgentEvent::Delta(text) => {
                sent.push_str(&text);
                emit(Fragment::Text(text));
            }
            AgentEvent::ToolResult { .. } => {}
        };
        agent.run_observed(&mut conversation, options.mode, &mut on_event).await
    };

    match result {
        Ok(outcome) if outcome.streamed => sent,
        Ok(outcome) => {
            let mut chars = Box::pin(typewriter(outcome.answer, options.typing_delay));
            while let Some(c) = chars.next().await {
                sent.push_str(&c);
                emit(Fragment::Text(c));
            }
            sent
        }
        Err(e) => {
            error!("Agent run failed: {}", e);
            let text = apology(&e);
            sent.push_str(&text);
            emit(Fragment::Text(text));
            sent
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::llm::FakeLlmClient;
    use crate::tools::{DummyTool, ToolRegistry};
    use serde_json::json;

    fn no_delay(mode: ReplyMode) -> RelayOptions {
        RelayOptions { mode, typing_delay: Duration::ZERO }
    }

    fn search_registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(DummyTool::new("search", "Summary: sunny, 22C"));
        registry
    }

    fn texts(fragments: &[Fragment]) -> String {
        fragments.iter()
            .filter_map(|f| match f {
                Fragment::Text(t) => Some(t.as_str()),
                Fragment::Status(_) => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_typewriter_splits_characters() {
        let parts: Vec<String> = typewriter("héllo".to_string(), Duration::ZERO).collect().await;
        assert_eq!(parts, vec!["h", "é", "l", "l", "o"]);
    }

    #[test]
    fn test_status_line() {
        assert_eq!(status_line("search", &json!({"query": " tokyo "})), "searching: tokyo");
        assert_eq!(status_line("search", &json!("raw text")), "searching: raw text");
        assert_eq!(status_line("clock", &json!({})), "calling tool: clock");
    }

    #[tokio::test]
    async fn test_relay_typewriter_reproduces_answer() {
        let agent = AgentLoop::new(FakeLlmClient::new(vec!["Paris."]), ToolRegistry::new(), 5);

        let mut fragments = Vec::new();
        let text = relay(&agent, vec![Message::user("capital?")], no_delay(ReplyMode::Typewriter), |f| fragments.push(f)).await;

        assert_eq!(text, "Paris.");
        assert_eq!(fragments.len(), 6);
        assert_eq!(texts(&fragments), "Paris.");
    }

    #[tokio::test]
    async fn test_relay_reports_search_status() {
        let client = FakeLlmClient::with_tool_call(
            "search",
            r#"{"query":"weather Tokyo today"}"#,
            "It's sunny.",
        );
        let agent = AgentLoop::new(client, search_registry(), 5);

        let mut fragments = Vec::new();
        let text = relay(&agent, vec![Message::user("weather?")], no_delay(ReplyMode::Typewriter), |f| fragments.push(f)).await;

        assert_eq!(fragments[0], Fragment::Status("searching: weather Tokyo today".into()));
        assert_eq!(text, "It's sunny.");
        assert_eq!(texts(&fragments), text);
    }

    #[tokio::test]
    async fn test_relay_live_mode() {
        let agent = AgentLoop::new(FakeLlmClient::new(vec!["Streaming works."]), ToolRegistry::new(), 5);

        let mut fragments = Vec::new();
        let text = relay(&agent, vec![Message::user("hi")], no_delay(ReplyMode::Live), |f| fragments.push(f)).await;

        assert_eq!(text, "Streaming works.");
        assert_eq!(texts(&fragments), text);
        // two characters per fake delta
        assert_eq!(fragments.len(), 8);
    }

    #[tokio::test]
    async fn test_relay_live_mode_short_circuit_falls_back_to_typewriter() {
        let agent = AgentLoop::new(FakeLlmClient::new(vec![]), ToolRegistry::new(), 5);

        let mut fragments = Vec::new();
        let conversation = vec![Message::user("hi"), Message::assistant("Hey")];
        let text = relay(&agent, conversation, no_delay(ReplyMode::Live), |f| fragments.push(f)).await;

        assert_eq!(text, "Hey");
        assert_eq!(fragments.len(), 3);
    }

    #[tokio::test]
    async fn test_relay_upstream_failure_is_single_apology() {
        let agent = AgentLoop::new(FakeLlmClient::failing("rate limited"), ToolRegistry::new(), 5);

        let mut fragments = Vec::new();
        let text = relay(&agent, vec![Message::user("hi")], no_delay(ReplyMode::Typewriter), |f| fragments.push(f)).await;

        assert_eq!(fragments.len(), 1);
        assert!(text.starts_with("Sorry"));
        assert!(text.contains("rate limited"));
        assert_eq!(fragments[0], Fragment::Text(text));
    }
}
