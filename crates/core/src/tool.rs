//! Tool trait and registry — the abstraction over callable campus operations.
//!
//! Tools are what the reasoning service can invoke against the data store:
//! student CRUD, analytics aggregates, campus info, notifications.

use crate::error::ToolError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// A tool definition sent to the reasoning service so it knows what it can call.
///
/// Immutable after registration; names are unique within a registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// A request to invoke a tool, as produced by the reasoning service.
///
/// Untrusted on arrival: the name may not exist in the registry and the
/// arguments may be malformed JSON or missing required fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Name of the tool to execute
    pub name: String,

    /// Arguments as raw JSON text
    pub arguments: String,
}

/// The normalized outcome of a tool invocation.
///
/// Always well-formed regardless of whether the underlying operation
/// succeeded — a failing tool never aborts the turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    /// Whether the tool executed successfully
    pub success: bool,

    /// The output value, or `{"error": ...}` on failure
    pub payload: serde_json::Value,
}

impl ToolCallResult {
    /// A successful result carrying the tool's output value.
    pub fn ok(payload: serde_json::Value) -> Self {
        Self {
            success: true,
            payload,
        }
    }

    /// A failed result with a human-readable description.
    pub fn failure(description: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            payload: serde_json::json!({ "error": description.to_string() }),
        }
    }

    /// Serialize for persistence in a tool-role message.
    pub fn to_message_content(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"success":false}"#.into())
    }
}

/// The core Tool trait.
///
/// Each campus operation (add_student, get_library_hours, send_email, etc.)
/// implements this trait. Tools are registered in the ToolRegistry and made
/// available to the dispatch loop.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "add_student").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the reasoning service).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with parsed arguments.
    ///
    /// Expected domain failures (missing student, duplicate key, invalid
    /// fields) come back as typed `ToolError`s; the registry converts them
    /// into failed `ToolCallResult`s at the dispatch boundary.
    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, ToolError>;

    /// Convert this tool into a ToolSpec for the reasoning service.
    fn to_spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools.
///
/// The dispatch loop uses this to:
/// 1. Get tool specs to send to the reasoning service
/// 2. Look up and execute tools when the service selects them
///
/// Backed by a `BTreeMap` so `specs()` is deterministic across calls — the
/// schema order presented to the reasoning service never depends on
/// insertion or hashing order.
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn resolve(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// All tool specs, in stable lexicographic order.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|t| t.to_spec()).collect()
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// Execute an untrusted tool selection.
    ///
    /// This is the single fault boundary for tool invocation: unknown names,
    /// malformed argument JSON, and execution failures all come back as
    /// `ToolCallResult { success: false }` — never as an error that could
    /// abort the turn.
    pub async fn dispatch(&self, request: &ToolCallRequest) -> ToolCallResult {
        let Some(tool) = self.resolve(&request.name) else {
            warn!(tool = %request.name, "Reasoner selected an unregistered tool");
            return ToolCallResult::failure(ToolError::NotFound(request.name.clone()));
        };

        // Some services emit an empty string for argument-less calls.
        let raw = if request.arguments.trim().is_empty() {
            "{}"
        } else {
            request.arguments.as_str()
        };

        let arguments: serde_json::Value = match serde_json::from_str(raw) {
            Ok(serde_json::Value::Object(map)) => serde_json::Value::Object(map),
            Ok(other) => {
                return ToolCallResult::failure(ToolError::InvalidArguments(format!(
                    "expected a JSON object, got {other}"
                )));
            }
            Err(e) => {
                return ToolCallResult::failure(ToolError::InvalidArguments(e.to_string()));
            }
        };

        match tool.execute(arguments).await {
            Ok(payload) => ToolCallResult::ok(payload),
            Err(e) => {
                warn!(tool = %request.name, error = %e, "Tool execution failed");
                ToolCallResult::failure(e)
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
