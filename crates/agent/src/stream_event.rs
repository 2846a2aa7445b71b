//! Agent-level streaming events.
//!
//! `AgentStreamEvent` wraps reasoning-service fragments and tool lifecycle
//! notices into the events the gateway forwards to clients over SSE or
//! WebSocket:
//! - `chunk`       — partial text from the final reply
//! - `tool_call`   — the loop is invoking a tool
//! - `tool_result` — tool execution completed
//! - `blocked`     — the guardrail stopped the turn
//! - `done`        — terminal marker, stream is complete
//! - `error`       — a turn-level failure

use serde::{Deserialize, Serialize};

/// Events emitted by the dispatch loop during streaming execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    /// Partial text of the final assistant reply.
    Chunk { content: String },

    /// The loop is dispatching a tool.
    ToolCall { name: String, arguments: String },

    /// Tool execution completed.
    ToolResult {
        name: String,
        success: bool,
        payload: serde_json::Value,
    },

    /// The guardrail blocked the turn before any reasoning call.
    Blocked { reason: String },

    /// The stream is complete.
    Done { session_id: String },

    /// An error occurred mid-turn.
    Error { message: String },
}

impl AgentStreamEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Blocked { .. } => "blocked",
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
            name: "get_student".into(),
            arguments: r#"{"student_id":"S001"}"#.into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"tool_call""#));
        assert!(json.contains("get_student"));
    }

    #[test]
    fn event_serialization_done() {
        let event = AgentStreamEvent::Done {
            session_id: "s1".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"done""#));
        assert!(json.contains(r#""session_id":"s1""#));
    }

    #[test]
    fn event_type_names() {
        assert_eq!(
            AgentStreamEvent::Blocked { reason: "x".into() }.event_type(),
            "blocked"
        );
        assert_eq!(
            AgentStreamEvent::Error {
                message: "x".into()
            }
            .event_type(),
            "error"
        );
        assert_eq!(
            AgentStreamEvent::ToolResult {
                name: "t".into(),
                success: true,
                payload: serde_json::Value::Null
            }
            .event_type(),
            "tool_result"
        );
    }

    #[test]
    fn event_deserialization() {
        let json = r#"{"type":"chunk","content":"hi"}"#;
        let event: AgentStreamEvent = serde_json::from_str(json).unwrap();
        match event {
            AgentStreamEvent::Chunk { content } => assert_eq!(content, "hi"),
            _ => panic!("Wrong variant"),
        }
    }
}
