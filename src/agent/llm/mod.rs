//! LLM client abstraction layer.
//!
//! This module provides:
//! - [`LlmClient`] trait for swappable LLM providers
//! - [`BoundClient`], a client with a fixed tool set attached to every call
//! - [`DeltaAccumulator`] for folding streamed deltas back into a message
//! - [`OpenAiClient`], the OpenAI-compatible implementation
//!
//! # Adding a New Provider
//!
//! 1. Create a new file (e.g., `anthropic.rs`)
//! 2. Implement `LlmClient` trait
//! 3. Construct it in the binary's `build_agent`
//! 4. Add config fields in `config.rs`

mod types;
pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::tools::ToolDefinition;
use crate::Result;

pub use openai::OpenAiClient;

use super::message::{Message, ToolCall};

/// Default sampling temperature.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Default completion length cap, in tokens.
pub const DEFAULT_MAX_TOKENS: u32 = 1000;

/// Directive forcing (or forbidding) tool use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolChoice {
    Auto,
    None,
    Required,
    /// Force a call to the named function.
    Function(String),
}

impl ToolChoice {
    pub fn to_wire(&self) -> Value {
        match self {
            ToolChoice::Auto => json!("auto"),
            ToolChoice::None => json!("none"),
            ToolChoice::Required => json!("required"),
            ToolChoice::Function(name) => json!({
                "type": "function",
                "function": {"name": name}
            }),
        }
    }
}

/// Per-call options.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    /// Tools offered to the model. `None` lets a [`BoundClient`] fill them in.
    pub tools: Option<Vec<ToolDefinition>>,
    pub tool_choice: Option<ToolChoice>,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            tools: None,
            tool_choice: None,
        }
    }
}

/// Response from an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// Text content of the response.
    pub content: Option<String>,

    /// Tool calls requested by the LLM.
    pub tool_calls: Vec<ToolCall>,

    /// Reason the response finished.
    pub finish_reason: String,

    /// Token usage statistics.
    pub usage: Usage,
}

impl LlmResponse {
    /// Create a simple text response.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: vec![],
            finish_reason: "stop".to_string(),
            usage: Usage::default(),
        }
    }

    /// Create a response requesting tool calls.
    pub fn tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: None,
            tool_calls,
            finish_reason: "tool_calls".to_string(),
            usage: Usage::default(),
        }
    }

    /// Check if response has tool calls.
    #[inline]
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// The assistant message this response represents.
    pub fn into_message(self) -> Message {
        let content = self.content.unwrap_or_default();
        if self.tool_calls.is_empty() {
            Message::assistant(content)
        } else {
            Message::assistant_with_tools(content, self.tool_calls)
        }
    }
}

/// Token usage information.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// Incremental piece of a streamed assistant message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageDelta {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallDelta>,
    /// Set on the last delta by providers that report it.
    pub finish_reason: Option<String>,
}

impl MessageDelta {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.as_deref().map_or(true, str::is_empty)
            && self.tool_calls.is_empty()
            && self.finish_reason.is_none()
    }
}

/// Fragment of one tool call. Fragments with the same `index` are concatenated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCallDelta {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

/// Finite, ordered stream of deltas for one completion.
pub type DeltaStream = BoxStream<'static, Result<MessageDelta>>;

/// Folds [`MessageDelta`]s back into a complete assistant message.
#[derive(Debug, Default)]
pub struct DeltaAccumulator {
    content: String,
    calls: Vec<ToolCallDelta>,
    finish_reason: Option<String>,
}

impl DeltaAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, delta: &MessageDelta) {
        if let Some(text) = &delta.content {
            self.content.push_str(text);
        }
        if delta.finish_reason.is_some() {
            self.finish_reason = delta.finish_reason.clone();
        }

        for part in &delta.tool_calls {
            let pos = match self.calls.iter().position(|c| c.index == part.index) {
                Some(pos) => pos,
                None => {
                    self.calls.push(ToolCallDelta { index: part.index, ..Default::default() });
                    self.calls.len() - 1
                }
            };
            let slot = &mut self.calls[pos];

            if part.id.is_some() {
                slot.id = part.id.clone();
            }
            append(&mut slot.name, part.name.as_deref());
            append(&mut slot.arguments, part.arguments.as_deref());
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.calls.is_empty()
    }

    pub fn finish(mut self) -> LlmResponse {
        self.calls.sort_by_key(|c| c.index);
        let tool_calls: Vec<ToolCall> = self.calls
            .into_iter()
            .map(|c| ToolCall {
                id: c.id.unwrap_or_else(|| format!("call_{}", c.index)),
                name: c.name.unwrap_or_default(),
                arguments: c.arguments.unwrap_or_default(),
            })
            .collect();

        let finish_reason = self.finish_reason.unwrap_or_else(|| {
            let inferred = if tool_calls.is_empty() { "stop" } else { "tool_calls" };
            inferred.to_string()
        });

        LlmResponse {
            content: Some(self.content),
            tool_calls,
            finish_reason,
            usage: Usage::default(),
        }
    }
}

fn append(slot: &mut Option<String>, part: Option<&str>) {
    if let Some(part) = part {
        slot.get_or_insert_with(String::new).push_str(part);
    }
}

/// LLM client trait - swappable provider abstraction.
///
/// Implement this trait to add a new LLM provider.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send messages and get a single complete response.
    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<LlmResponse>;

    /// Send messages and get the response as a stream of deltas.
    ///
    /// Providers without native streaming get a one-delta stream built from
    /// [`LlmClient::complete`].
    async fn complete_streaming(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<DeltaStream> {
        let response = self.complete(messages, options).await?;
        let delta = MessageDelta {
            content: response.content,
            finish_reason: Some(response.finish_reason),
            tool_calls: response.tool_calls
                .into_iter()
                .enumerate()
                .map(|(index, call)| ToolCallDelta {
                    index,
                    id: Some(call.id),
                    name: Some(call.name),
                    arguments: Some(call.arguments),
                })
                .collect(),
        };
        Ok(stream::iter([Ok(delta)]).boxed())
    }

    /// Get the default model for this provider.
    fn default_model(&self) -> &str;

    /// Attach `tools` to every call made through the returned client.
    fn with_tools(self, tools: Vec<ToolDefinition>) -> BoundClient<Self>
    where
        Self: Sized,
    {
        BoundClient::new(self, tools)
    }
}

/// A client with a tool set bound to it.
///
/// Calls whose options leave `tools` unset get the bound set; explicit tools
/// in the options win.
pub struct BoundClient<C> {
    inner: Arc<C>,
    tools: Vec<ToolDefinition>,
}

impl<C: LlmClient> BoundClient<C> {
    pub fn new(inner: C, tools: Vec<ToolDefinition>) -> Self {
        Self {
            inner: Arc::new(inner),
            tools,
        }
    }

    /// Rebind to a new tool set. The previous set is dropped, not merged.
    pub fn with_tools(self, tools: Vec<ToolDefinition>) -> Self {
        Self {
            inner: self.inner,
            tools,
        }
    }

    pub fn tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    fn bind(&self, options: &CompletionOptions) -> CompletionOptions {
        let mut options = options.clone();
        if options.tools.is_none() {
            options.tools = Some(self.tools.clone());
        }
        options
    }
}

impl<C> Clone for BoundClient<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            tools: self.tools.clone(),
        }
    }
}

#[async_trait]
impl<C: LlmClient> LlmClient for BoundClient<C> {
    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<LlmResponse> {
        self.inner.complete(messages, &self.bind(options)).await
    }

    async fn complete_streaming(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<DeltaStream> {
        self.inner.complete_streaming(messages, &self.bind(options)).await
    }

    fn default_model(&self) -> &str {
        self.inner.default_model()
    }
}

/// A call observed by [`FakeLlmClient`].
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<Message>,
    pub options: CompletionOptions,
    pub streaming: bool,
}

/// Fake LLM client for testing.
#[cfg(test)]
pub struct FakeLlmClient {
    responses: std::sync::Mutex<std::collections::VecDeque<Result<LlmResponse>>>,
    calls: Arc<std::sync::Mutex<Vec<RecordedCall>>>,
}

#[cfg(test)]
impl FakeLlmClient {
    /// Create with predefined text responses.
    pub fn new(responses: Vec<&str>) -> Self {
        Self::scripted(responses.into_iter().map(|s| Ok(LlmResponse::text(s))).collect())
    }

    /// Create from arbitrary scripted results, replayed in order.
    pub fn scripted(responses: Vec<Result<LlmResponse>>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses.into()),
            calls: Default::default(),
        }
    }

    /// Create with a single tool call followed by a text response.
    pub fn with_tool_call(name: &str, args: &str, final_response: &str) -> Self {
        Self::scripted(vec![
            Ok(LlmResponse::tool_calls(vec![ToolCall::new("tc_1", name, args)])),
            Ok(LlmResponse::text(final_response)),
        ])
    }

    /// Create a client whose first call fails with an upstream error.
    pub fn failing(message: &str) -> Self {
        Self::scripted(vec![Err(crate::error::Error::Upstream(message.to_string()))])
    }

    /// Shared handle on the calls made so far.
    pub fn calls(&self) -> Arc<std::sync::Mutex<Vec<RecordedCall>>> {
        Arc::clone(&self.calls)
    }

    fn next(&self, messages: &[Message], options: &CompletionOptions, streaming: bool) -> Result<LlmResponse> {
        self.calls.lock().unwrap().push(RecordedCall {
            messages: messages.to_vec(),
            options: options.clone(),
            streaming,
        });
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(crate::error::Error::Upstream("No more fake responses".to_string())))
    }
}

#[cfg(test)]
#[async_trait]
impl LlmClient for FakeLlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<LlmResponse> {
        self.next(messages, options, false)
    }

    /// Streams text two characters at a time, then one delta per tool call.
    async fn complete_streaming(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<DeltaStream> {
        let response = self.next(messages, options, true)?;
        let chars: Vec<char> = response.content.unwrap_or_default().chars().collect();

        let mut deltas: Vec<Result<MessageDelta>> = chars
            .chunks(2)
            .map(|c| Ok(MessageDelta::text(c.iter().collect::<String>())))
            .collect();

        for (index, call) in response.tool_calls.into_iter().enumerate() {
            deltas.push(Ok(MessageDelta {
                content: None,
                finish_reason: None,
                tool_calls: vec![ToolCallDelta {
                    index,
                    id: Some(call.id),
                    name: Some(call.name),
                    arguments: Some(call.arguments),
                }],
            }));
        }

        Ok(stream::iter(deltas).boxed())
    }

    fn default_model(&self) -> &str {
        "fake-model"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(name: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            description: String::new(),
            parameters: json!({}),
        }
    }

    #[tokio::test]
    async fn test_fake_llm_client() {
        let client = FakeLlmClient::new(vec!["Hello!", "World!"]);
        let opts = CompletionOptions::default();

        let resp1 = client.complete(&[], &opts).await.unwrap();
        assert_eq!(resp1.content.as_deref(), Some("Hello!"));

        let resp2 = client.complete(&[], &opts).await.unwrap();
        assert_eq!(resp2.content.as_deref(), Some("World!"));

        assert!(client.complete(&[], &opts).await.is_err());
    }

    #[tokio::test]
    async fn test_bound_client_attaches_tools() {
        let fake = FakeLlmClient::new(vec!["ok"]);
        let calls = fake.calls();
        let bound = fake.with_tools(vec![def("search")]);

        bound.complete(&[Message::user("hi")], &CompletionOptions::default()).await.unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls[0].options.tools.as_deref(), Some(&[def("search")][..]));
    }

    #[tokio::test]
    async fn test_rebinding_replaces_tools() {
        let fake = FakeLlmClient::new(vec!["ok"]);
        let calls = fake.calls();
        let bound = fake
            .with_tools(vec![def("search"), def("fetch")])
            .with_tools(vec![def("clock")]);

        assert_eq!(bound.tools(), &[def("clock")]);
        bound.complete(&[], &CompletionOptions::default()).await.unwrap();
        assert_eq!(calls.lock().unwrap()[0].options.tools, Some(vec![def("clock")]));
    }

    #[tokio::test]
    async fn test_default_streaming_yields_single_delta() {
        struct OneShot;

        #[async_trait]
        impl LlmClient for OneShot {
            async fn complete(&self, _: &[Message], _: &CompletionOptions) -> Result<LlmResponse> {
                Ok(LlmResponse::tool_calls(vec![ToolCall::new("c1", "search", "{}")]))
            }
            fn default_model(&self) -> &str { "one-shot" }
        }

        let deltas: Vec<_> = OneShot
            .complete_streaming(&[], &CompletionOptions::default())
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(deltas.len(), 1);
        let delta = deltas.into_iter().next().unwrap().unwrap();
        assert_eq!(delta.tool_calls[0].name.as_deref(), Some("search"));
    }

    #[test]
    fn test_accumulator_merges_by_index() {
        let mut acc = DeltaAccumulator::new();
        acc.push(&MessageDelta::text("Let me "));
        acc.push(&MessageDelta::text("check."));
        acc.push(&MessageDelta {
            content: None,
            finish_reason: None,
            tool_calls: vec![ToolCallDelta {
                index: 0,
                id: Some("c1".into()),
                name: Some("search".into()),
                arguments: Some("{\"query\":".into()),
            }],
        });
        acc.push(&MessageDelta {
            content: None,
            finish_reason: None,
            tool_calls: vec![ToolCallDelta {
                index: 0,
                arguments: Some("\"tokyo\"}".into()),
                ..Default::default()
            }],
        });

        assert_eq!(acc.content(), "Let me check.");
        let response = acc.finish();
        assert_eq!(response.finish_reason, "tool_calls");
        assert_eq!(
            response.tool_calls,
            vec![ToolCall::new("c1", "search", r#"{"query":"tokyo"}"#)]
        );
    }

    #[test]
    fn test_accumulator_keeps_reported_finish_reason() {
        let mut acc = DeltaAccumulator::new();
        acc.push(&MessageDelta::text("cut off"));
        acc.push(&MessageDelta { finish_reason: Some("length".into()), ..Default::default() });

        let response = acc.finish();
        assert_eq!(response.finish_reason, "length");
        assert_eq!(response.content.as_deref(), Some("cut off"));
    }

    #[test]
    fn test_accumulator_orders_calls_and_fills_ids() {
        let mut acc = DeltaAccumulator::new();
        for index in [1, 0] {
            acc.push(&MessageDelta {
                content: None,
                finish_reason: None,
                tool_calls: vec![ToolCallDelta {
                    index,
                    name: Some(format!("tool{index}")),
                    ..Default::default()
                }],
            });
        }

        let calls = acc.finish().tool_calls;
        assert_eq!(calls[0].name, "tool0");
        assert_eq!(calls[0].id, "call_0");
        assert_eq!(calls[1].name, "tool1");
    }

    #[test]
    fn test_into_message() {
        let msg = LlmResponse::text("Paris.").into_message();
        assert_eq!(msg, Message::assistant("Paris."));

        let msg = LlmResponse::tool_calls(vec![ToolCall::new("c1", "search", "{}")]).into_message();
        assert!(msg.has_tool_calls());
        assert_eq!(msg.content, "");
    }

    #[test]
    fn test_tool_choice_wire() {
        assert_eq!(ToolChoice::Auto.to_wire(), json!("auto"));
        assert_eq!(
            ToolChoice::Function("search".into()).to_wire()["function"]["name"],
            "search"
        );
    }
}
