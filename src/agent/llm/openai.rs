//! OpenAI-compatible chat-completion client

use std::future;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, trace};
use url::Url;

use crate::Result;
use crate::error::Error;
use crate::agent::message::{Message, ToolCall};
use super::types::{ChatChunk, ChatRequest, ChatResponse, WireFunction, WireMessage, WireToolCall};
use super::{CompletionOptions, DeltaStream, LlmClient, LlmResponse, MessageDelta, ToolCallDelta, Usage};

/// Client for any endpoint speaking the OpenAI chat-completion protocol
#[derive(Clone)]
pub struct OpenAiClient {
    api_key: String,
    model: String,
    endpoint: Url,
    client: Client,
}

impl OpenAiClient {
    /// Create a client for `base_url` (e.g. `https://api.openai.com/v1`)
    pub fn new(api_key: &str, model: &str, base_url: &str) -> Result<Self> {
        let mut base = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("Invalid LLM base URL {:?}: {}", base_url, e)))?;

        // Url::join drops the last path segment unless the base ends in '/'
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let endpoint = base.join("chat/completions")
            .map_err(|e| Error::Config(format!("Invalid LLM base URL {:?}: {}", base_url, e)))?;

        Ok(Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            endpoint,
            client: Client::new(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn build_request<'a>(
        &'a self,
        messages: &'a [Message],
        options: &CompletionOptions,
        stream: bool,
    ) -> ChatRequest<'a> {
        let tools = options.tools.as_ref()
            .filter(|t| !t.is_empty())
            .map(|t| t.iter().map(|d| d.to_wire()).collect::<Vec<Value>>());

        // tool_choice is meaningless without tools
        let tool_choice = tools.as_ref()
            .and(options.tool_choice.as_ref())
            .map(|c| c.to_wire());

        ChatRequest {
            model: &self.model,
            messages: convert_messages(messages),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            tools,
            tool_choice,
            stream,
        }
    }

    async fn send(&self, request: &ChatRequest<'_>) -> Result<reqwest::Response> {
        debug!(
            "POST {} (model={}, messages={}, stream={})",
            self.endpoint, self.model, request.messages.len(), request.stream
        );

        let response = self.client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::Upstream(format!("{}: {}", status, error_text)));
        }

        Ok(response)
    }
}

fn convert_messages(messages: &[Message]) -> Vec<WireMessage<'_>> {
    messages.iter()
        .map(|m| WireMessage {
            role: m.role.as_str(),
            content: &m.content,
            tool_calls: m.tool_calls.as_ref()
                .filter(|calls| !calls.is_empty())
                .map(|calls| calls.iter().map(to_wire_call).collect()),
            tool_call_id: m.tool_call_id.as_deref(),
            name: m.name.as_deref(),
        })
        .collect()
}

fn to_wire_call(call: &ToolCall) -> WireToolCall {
    WireToolCall {
        id: call.id.clone(),
        kind: "function".to_string(),
        function: WireFunction {
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        },
    }
}

fn parse_response(response: ChatResponse) -> Result<LlmResponse> {
    let choice = response.choices.into_iter().next()
        .ok_or_else(|| Error::Upstream("No choices in response".to_string()))?;

    let tool_calls = choice.message.tool_calls
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(i, tc)| ToolCall {
            id: if tc.id.is_empty() { format!("call_{}", i) } else { tc.id },
            name: tc.function.name,
            arguments: tc.function.arguments,
        })
        .collect();

    let usage = response.usage
        .map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        })
        .unwrap_or_default();

    Ok(LlmResponse {
        content: choice.message.content,
        tool_calls,
        finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
        usage,
    })
}

/// Decode one SSE `data:` payload. `Ok(None)` for keep-alive or empty chunks.
fn parse_chunk(data: &str) -> Result<Option<MessageDelta>> {
    let chunk: ChatChunk = serde_json::from_str(data)
        .map_err(|e| Error::Upstream(format!("Malformed stream chunk: {}: {}", e, data)))?;

    if let Some(error) = chunk.error {
        let message = error.get("message")
            .and_then(Value::as_str)
            .or_else(|| error.as_str())
            .unwrap_or("error during streaming");
        return Err(Error::Upstream(message.to_string()));
    }

    let Some(choice) = chunk.choices.into_iter().next() else {
        return Ok(None);
    };

    let delta = MessageDelta {
        content: choice.delta.content,
        finish_reason: choice.finish_reason,
        tool_calls: choice.delta.tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| {
                let (name, arguments) = match tc.function {
                    Some(f) => (f.name, f.arguments),
                    None => (None, None),
                };
                ToolCallDelta { index: tc.index, id: tc.id, name, arguments }
            })
            .collect(),
    };

    Ok((!delta.is_empty()).then_some(delta))
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<LlmResponse> {
        let request = self.build_request(messages, options, false);
        let response = self.send(&request).await?;

        let body: ChatResponse = response.json().await
            .map_err(|e| Error::Upstream(format!("Invalid completion response: {}", e)))?;

        let parsed = parse_response(body)?;
        debug!(
            "Completion finished ({}), {} tool calls, {} tokens",
            parsed.finish_reason, parsed.tool_calls.len(), parsed.usage.total_tokens
        );
        Ok(parsed)
    }

    async fn complete_streaming(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<DeltaStream> {
        let request = self.build_request(messages, options, true);
        let response = self.send(&request).await?;

        let stream = response
            .bytes_stream()
            .eventsource()
            .take_while(|event| {
                future::ready(!matches!(event, Ok(e) if e.data.trim() == "[DONE]"))
            })
            .filter_map(|event| {
                future::ready(match event {
                    Ok(e) => {
                        trace!("SSE: {}", e.data);
                        parse_chunk(&e.data).transpose()
                    }
                    Err(e) => Some(Err(Error::Upstream(format!("Stream error: {}", e)))),
                })
            });

        Ok(stream.boxed())
    }

    fn default_model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::llm::ToolChoice;
    use crate::tools::ToolDefinition;
    use serde_json::json;

    fn client() -> OpenAiClient {
        OpenAiClient::new("key", "test-model", "https://llm.example.com/api/v3").unwrap()
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        assert_eq!(
            client().endpoint().as_str(),
            "https://llm.example.com/api/v3/chat/completions"
        );

        let slash = OpenAiClient::new("k", "m", "https://api.openai.com/v1/").unwrap();
        assert_eq!(slash.endpoint().as_str(), "https://api.openai.com/v1/chat/completions");
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(OpenAiClient::new("k", "m", "not a url"), Err(Error::Config(_))));
    }

    #[test]
    fn test_request_shape() {
        let client = client();
        let messages = vec![
            Message::user("weather?"),
            Message::assistant_with_tools("", vec![ToolCall::new("c1", "search", "{}")]),
            Message::tool_result("c1", "search", "sunny"),
        ];
        let options = CompletionOptions {
            tools: Some(vec![ToolDefinition {
                name: "search".into(),
                description: "Find".into(),
                parameters: json!({"type": "object"}),
            }]),
            tool_choice: Some(ToolChoice::Auto),
            ..Default::default()
        };

        let body = serde_json::to_value(client.build_request(&messages, &options, false)).unwrap();

        assert_eq!(body["model"], "test-model");
        assert_eq!(body["max_tokens"], 1000);
        assert!(body.get("stream").is_none());
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "search");
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["messages"][1]["tool_calls"][0]["function"]["name"], "search");
        assert_eq!(body["messages"][2]["tool_call_id"], "c1");
        assert!(body["messages"][0].get("tool_calls").is_none());
    }

    #[test]
    fn test_request_omits_empty_tools_and_choice() {
        let client = client();
        let options = CompletionOptions {
            tools: Some(vec![]),
            tool_choice: Some(ToolChoice::Required),
            ..Default::default()
        };
        let body = serde_json::to_value(client.build_request(&[], &options, true)).unwrap();

        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn test_parse_response_with_tool_calls() {
        let body: ChatResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "c1",
                        "type": "function",
                        "function": {"name": "search", "arguments": "{\"query\":\"tokyo\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        })).unwrap();

        let parsed = parse_response(body).unwrap();
        assert!(parsed.content.is_none());
        assert_eq!(parsed.tool_calls, vec![ToolCall::new("c1", "search", "{\"query\":\"tokyo\"}")]);
        assert_eq!(parsed.usage.total_tokens, 15);
    }

    #[test]
    fn test_parse_response_without_choices() {
        let body: ChatResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(matches!(parse_response(body), Err(Error::Upstream(_))));
    }

    #[test]
    fn test_parse_chunk_content_and_tools() {
        let delta = parse_chunk(r#"{"choices":[{"delta":{"content":"Hel"}}]}"#).unwrap().unwrap();
        assert_eq!(delta.content.as_deref(), Some("Hel"));

        let delta = parse_chunk(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","function":{"name":"search","arguments":""}}]}}]}"#,
        ).unwrap().unwrap();
        assert_eq!(delta.tool_calls[0].id.as_deref(), Some("c1"));
        assert_eq!(delta.tool_calls[0].name.as_deref(), Some("search"));
    }

    #[test]
    fn test_parse_chunk_finish_reason() {
        let delta = parse_chunk(r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#)
            .unwrap()
            .unwrap();
        assert_eq!(delta.finish_reason.as_deref(), Some("tool_calls"));
        assert!(delta.content.is_none());
    }

    #[test]
    fn test_parse_chunk_skips_empty() {
        assert!(parse_chunk(r#"{"choices":[]}"#).unwrap().is_none());
        assert!(parse_chunk(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap().is_none());
    }

    #[test]
    fn test_parse_chunk_errors() {
        let err = parse_chunk(r#"{"error":{"message":"rate limited"}}"#).unwrap_err();
        assert!(err.to_string().contains("rate limited"));

        assert!(parse_chunk("not json").is_err());
    }
}
