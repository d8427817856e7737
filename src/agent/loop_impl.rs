//! Agent loop - alternates model calls and tool execution

use futures_util::StreamExt;
use serde_json::Value;
use tracing::{debug, info, warn};
use crate::Result;
use crate::error::Error;
use crate::tools::ToolRegistry;
use super::llm::{BoundClient, CompletionOptions, DeltaAccumulator, LlmClient, LlmResponse};
use super::message::{Message, ToolCall};
use super::stream::ReplyMode;

/// Default cap on tool rounds per run.
pub const DEFAULT_MAX_ROUNDS: usize = 5;

/// Progress reported while a run is in flight.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// A tool is about to run.
    ToolCall { id: String, name: String, arguments: Value },
    /// A tool finished; `output` is what the model will see.
    ToolResult { id: String, name: String, output: String },
    /// A piece of the final answer, only reported in [`ReplyMode::Live`].
    Delta(String),
}

/// What a finished run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    /// Final answer text.
    pub answer: String,
    /// Number of tool rounds executed.
    pub rounds: usize,
    /// Whether answer text already went out as [`AgentEvent::Delta`]s.
    pub streamed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Deciding,
    ToolExecuting,
}

/// The agent loop processes a conversation through LLM and tool execution.
///
/// Each run starts in `Deciding`: if the conversation already ends in a
/// finished assistant answer, that answer is returned as-is. Otherwise the
/// model is asked, and any tool calls it makes are executed in order before
/// asking again.
pub struct AgentLoop<C: LlmClient> {
    client: BoundClient<C>,
    tools: ToolRegistry,
    options: CompletionOptions,
    max_rounds: usize,
}

impl<C: LlmClient> AgentLoop<C> {
    /// Create a new agent loop; the registry's tools are bound to `client`.
    pub fn new(client: C, tools: ToolRegistry, max_rounds: usize) -> Self {
        let client = client.with_tools(tools.definitions());
        Self {
            client,
            tools,
            options: CompletionOptions::default(),
            max_rounds,
        }
    }

    /// Override sampling options. Tools always come from the registry.
    pub fn with_options(mut self, options: CompletionOptions) -> Self {
        self.options = CompletionOptions { tools: None, ..options };
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn client(&self) -> &BoundClient<C> {
        &self.client
    }

    /// Run the conversation to a final answer.
    ///
    /// New messages are appended to `conversation`.
    pub async fn run(&self, conversation: &mut Vec<Message>) -> Result<String> {
        let outcome = self.run_observed(conversation, ReplyMode::Typewriter, &mut |_| {}).await?;
        Ok(outcome.answer)
    }

    /// Run the conversation, reporting progress to `on_event`.
    pub async fn run_observed(
        &self,
        conversation: &mut Vec<Message>,
        mode: ReplyMode,
        on_event: &mut (dyn FnMut(AgentEvent) + Send),
    ) -> Result<RunOutcome> {
        let mut state = LoopState::Deciding;
        let mut rounds = 0;
        let mut streamed = false;

        info!("Starting agent loop with {} messages", conversation.len());

        loop {
            match state {
                LoopState::Deciding => {
                    if let Some(last) = conversation.last() {
                        if last.role == super::Role::Assistant && !last.has_tool_calls() {
                            debug!("Conversation already answered, skipping model call");
                            return Ok(RunOutcome { answer: last.content.clone(), rounds, streamed });
                        }
                    }

                    debug!("Deciding (round {}/{})", rounds, self.max_rounds);

                    let response = match mode {
                        ReplyMode::Typewriter => {
                            self.client.complete(conversation, &self.options).await?
                        }
                        ReplyMode::Live => {
                            let (response, sent) = self.stream_response(conversation, on_event).await?;
                            streamed |= sent;
                            response
                        }
                    };

                    let message = response.into_message();
                    let wants_tools = message.has_tool_calls();
                    conversation.push(message);

                    if !wants_tools {
                        let answer = conversation.last().map(|m| m.content.clone()).unwrap_or_default();
                        info!("Agent completed with response: {} chars", answer.len());
                        return Ok(RunOutcome { answer, rounds, streamed });
                    }

                    if rounds >= self.max_rounds {
                        warn!("Model still requesting tools after {} rounds", rounds);
                        return Err(Error::MaxRounds(rounds));
                    }
                    state = LoopState::ToolExecuting;
                }

                LoopState::ToolExecuting => {
                    let calls = conversation.last()
                        .map(|m| m.pending_tool_calls().to_vec())
                        .unwrap_or_default();

                    let mut results = Vec::with_capacity(calls.len());
                    for call in &calls {
                        results.push(self.execute_tool(call, on_event).await);
                    }
                    conversation.extend(results);

                    rounds += 1;
                    state = LoopState::Deciding;
                }
            }
        }
    }

    /// Stream one completion.
    ///
    /// Text deltas are held until the response is complete and only
    /// forwarded when it requested no tools, so every forwarded delta is
    /// part of the final answer.
    async fn stream_response(
        &self,
        conversation: &[Message],
        on_event: &mut (dyn FnMut(AgentEvent) + Send),
    ) -> Result<(LlmResponse, bool)> {
        let mut stream = self.client.complete_streaming(conversation, &self.options).await?;
        let mut acc = DeltaAccumulator::new();
        let mut pending = Vec::new();

        while let Some(delta) = stream.next().await {
            let delta = delta?;
            if let Some(text) = delta.content.as_deref().filter(|t| !t.is_empty()) {
                pending.push(text.to_string());
            }
            acc.push(&delta);
        }

        let response = acc.finish();
        if response.has_tool_calls() {
            if !pending.is_empty() {
                debug!("Dropping {} text deltas from a tool-call response", pending.len());
            }
            return Ok((response, false));
        }

        let sent = !pending.is_empty();
        for text in pending {
            on_event(AgentEvent::Delta(text));
        }
        Ok((response, sent))
    }

    /// Execute one tool call. Failures become the tool message content.
    async fn execute_tool(
        &self,
        call: &ToolCall,
        on_event: &mut (dyn FnMut(AgentEvent) + Send),
    ) -> Message {
        let Some(tool) = self.tools.get(&call.name) else {
            warn!("Model requested unknown tool: {:?}", call.name);
            return Message::tool_result(&call.id, &call.name, format!("Tool \"{}\" not found.", call.name));
        };

        let arguments = call.parsed_arguments();
        debug!("Executing tool: {} with args: {}", call.name, arguments);

        on_event(AgentEvent::ToolCall {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: arguments.clone(),
        });

        let output = match tool.execute(arguments).await {
            Ok(result) => {
                debug!("Tool {} succeeded: {} chars", call.name, result.len());
                result
            }
            Err(e) => {
                warn!("Tool {} failed: {}", call.name, e);
                format!("Tool execution failed: {}", e)
            }
        };

        on_event(AgentEvent::ToolResult {
            id: call.id.clone(),
            name: call.name.clone(),
            output: output.clone(),
        });

        Message::tool_result(&call.id, &call.name, output)
    }
}
