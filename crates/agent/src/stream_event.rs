//! Agent-level streaming events.
//!
//! `AgentStreamEvent` is what a front end renders while a turn is running.
//! Raw tool-call syntax never appears in a `chunk`.

use serde::{Deserialize, Serialize};

/// Events emitted by the agent during a streamed turn.
///
/// - `chunk`       partial assistant text, safe to display
/// - `tool_call`   the agent is invoking a tool
/// - `tool_result` tool execution completed
/// - `done`        the turn produced its final reply
/// - `error`       the turn was aborted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    /// Displayable text from the model.
    Chunk { content: String },

    /// The agent is calling a tool.
    ToolCall {
        name: String,
        input: serde_json::Value,
    },

    /// Tool execution completed; `message` is the tool's summary or its error.
    ToolResult {
        name: String,
        success: bool,
        message: String,
    },

    /// The turn is complete.
    Done { rounds: u32, tool_calls_made: usize },

    /// The turn was aborted.
    Error { message: String },
}

impl AgentStreamEvent {
    /// Wire name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serialization_chunk() {
        let event = AgentStreamEvent::Chunk {
            content: "Hello".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"chunk""#));
        assert!(json.contains(r#""content":"Hello""#));
    }

    #[test]
    fn event_serialization_tool_call() {
        let event = AgentStreamEvent::ToolCall {
            name: "quote".into(),
            input: serde_json::json!({"symbol": "AAPL"}),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"tool_call""#));
        assert!(json.contains(r#""name":"quote""#));
    }

    #[test]
    fn event_serialization_done() {
        let event = AgentStreamEvent::Done {
            rounds: 2,
            tool_calls_made: 1,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"done""#));
        assert!(json.contains(r#""rounds":2"#));
    }

    #[test]
    fn event_type_names() {
        assert_eq!(
            AgentStreamEvent::ToolResult {
                name: "a".into(),
                success: false,
                message: "b".into(),
            }
            .event_type(),
            "tool_result"
        );
        assert_eq!(
            AgentStreamEvent::Error {
                message: "x".into()
            }
            .event_type(),
            "error"
        );
    }

    #[test]
    fn event_deserialization() {
        let json = r#"{"type":"chunk","content":"hi"}"#;
        let event: AgentStreamEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            AgentStreamEvent::Chunk {
                content: "hi".into()
            }
        );
    }
}
