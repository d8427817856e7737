//! Frames exchanged over the chat WebSocket

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;
use crate::agent::Fragment;
use crate::history::HistoryEntry;

/// Server → client frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    /// Sent once per connection
    Welcome { message: String },

    /// Processing of a user message began
    Start {
        #[serde(rename = "conversationId", default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<String>,
    },

    /// Piece of answer text
    Chunk { content: String },

    /// Tool activity, e.g. `searching: ...`; not part of the answer
    Status { message: String },

    /// The answer is finished
    Complete,

    Error { message: String },
}

impl From<Fragment> for ServerFrame {
    fn from(fragment: Fragment) -> Self {
        match fragment {
            Fragment::Text(content) => ServerFrame::Chunk { content },
            Fragment::Status(message) => ServerFrame::Status { message },
        }
    }
}

/// Body of a client `message` frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageFrame {
    pub content: String,

    #[serde(rename = "conversationId", default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,

    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// Client → server frame
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    Message(MessageFrame),

    /// A frame whose `type` this server does not handle
    #[serde(skip)]
    Unknown(String),
}

impl ClientFrame {
    /// Parse a text frame. Invalid JSON, or a `message` frame with a bad
    /// body, is an error; an unrecognised `type` is not.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;

        match value.get("type").and_then(Value::as_str) {
            Some("message") => Ok(ClientFrame::Message(serde_json::from_value(value)?)),
            Some(other) => Ok(ClientFrame::Unknown(other.to_string())),
            None => Ok(ClientFrame::Unknown(String::new())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Role;
    use serde_json::json;

    #[test]
    fn test_server_frame_wire_format() {
        let start = ServerFrame::Start { conversation_id: Some("42".into()) };
        assert_eq!(serde_json::to_value(&start).unwrap(), json!({"type": "start", "conversationId": "42"}));

        assert_eq!(serde_json::to_value(ServerFrame::Complete).unwrap(), json!({"type": "complete"}));

        let chunk: ServerFrame = Fragment::Text("P".into()).into();
        assert_eq!(serde_json::to_value(&chunk).unwrap(), json!({"type": "chunk", "content": "P"}));
    }

    #[test]
    fn test_parse_message_frame() {
        let frame = ClientFrame::parse(r#"{
            "type": "message",
            "content": "What is the capital of France?",
            "conversationId": "c-1",
            "history": [{"role": "user", "content": "hi"}, {"role": "assistant", "content": "hello", "timestamp": 1}]
        }"#).unwrap();

        let ClientFrame::Message(msg) = frame else { panic!("expected message frame") };
        assert_eq!(msg.content, "What is the capital of France?");
        assert_eq!(msg.conversation_id.as_deref(), Some("c-1"));
        assert_eq!(msg.history[1].role, Role::Assistant);
    }

    #[test]
    fn test_parse_message_without_history() {
        let frame = ClientFrame::parse(r#"{"type":"message","content":"hi"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::Message(MessageFrame { history, .. }) if history.is_empty()));
    }

    #[test]
    fn test_parse_unknown_types() {
        assert_eq!(ClientFrame::parse(r#"{"type":"ping"}"#).unwrap(), ClientFrame::Unknown("ping".into()));
        assert_eq!(ClientFrame::parse("[1,2]").unwrap(), ClientFrame::Unknown(String::new()));
    }

    #[test]
    fn test_parse_errors() {
        assert!(ClientFrame::parse("{not json").is_err());
        assert!(ClientFrame::parse(r#"{"type":"message"}"#).is_err());
    }

    #[test]
    fn test_client_frame_serializes_with_type() {
        let frame = ClientFrame::Message(MessageFrame {
            content: "hi".into(),
            conversation_id: None,
            history: vec![],
        });
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"type": "message", "content": "hi", "history": []})
        );
    }
}
