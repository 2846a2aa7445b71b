//! Message and Session domain types.
//!
//! These are the core value objects that flow through the entire system:
//! a user sends a message → the gateway receives it → the dispatch loop
//! processes it → the reasoning service generates a reply.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a conversation session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// System instructions (preamble, rules)
    System,
    /// Tool execution result
    Tool,
}

/// A function the assistant decided to invoke.
///
/// `arguments` is the raw JSON text exactly as the reasoning service
/// produced it — it is not trusted to parse until the registry boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// The text content; absent on pure function-call messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// The tool this message reports on (set when role = tool)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// A function invocation the assistant requested (if any)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn base(role: Role) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: None,
            name: None,
            function_call: None,
            timestamp: Utc::now(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::base(Role::User)
        }
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::base(Role::Assistant)
        }
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::base(Role::System)
        }
    }

    /// Create an assistant message recording a function-call intent.
    ///
    /// Content stays null: when the reasoning service returns both text and
    /// a function call, the call wins and the text is discarded for the hop.
    pub fn function_call(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            function_call: Some(FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            }),
            ..Self::base(Role::Assistant)
        }
    }

    /// Create a tool-role message carrying a serialized tool result.
    pub fn tool_result(tool_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            name: Some(tool_name.into()),
            ..Self::base(Role::Tool)
        }
    }

    /// The text content, or the empty string for content-less messages.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}

/// A session is an ordered sequence of messages addressed by a `SessionId`.
///
/// Order is conversation chronology and must be preserved exactly when the
/// history is replayed to the reasoning service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,

    /// Ordered messages
    pub messages: Vec<Message>,

    /// When this session was created
    pub created_at: DateTime<Utc>,

    /// When the last message was appended
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a new empty session with a fresh identifier.
    pub fn new() -> Self {
        Self::with_id(SessionId::new())
    }

    /// Create a new empty session with the given identifier.
    pub fn with_id(id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            id,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a message to the session.
    pub fn push(&mut self, message: Message) {
        self.updated_at = Utc::now();
        self.messages.push(message);
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
