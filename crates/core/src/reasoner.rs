//! Reasoner trait — the contract with the external reasoning service.
//!
//! A Reasoner takes an ordered conversation plus the tool schema list and
//! returns either a free-text reply or a structured function selection,
//! never both meaningfully at once (the selection wins on ties).
//!
//! Implementations: OpenAI-compatible endpoints; mocks in tests.

use crate::error::ReasonerError;
use crate::message::Message;
use crate::tool::{ToolCallRequest, ToolSpec};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A reasoning-service request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasonerRequest {
    /// Ordered messages: system preamble, history, current turn
    pub messages: Vec<Message>,

    /// Schemas of the tools the service may select. Empty on the second
    /// (phrasing) call of a tool turn — the service must answer in text.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSpec>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.7
}

impl ReasonerRequest {
    pub fn new(messages: Vec<Message>, tools: Vec<ToolSpec>) -> Self {
        Self {
            messages,
            tools,
            temperature: default_temperature(),
            max_tokens: None,
        }
    }
}

/// A complete (non-streaming) reasoning-service reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasonerReply {
    /// Free-text content, if the service answered directly
    #[serde(default)]
    pub content: Option<String>,

    /// A structured function selection, if the service chose one.
    /// When both fields are set, this one takes precedence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<ToolCallRequest>,
}

impl ReasonerReply {
    /// A pure text reply.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            function_call: None,
        }
    }

    /// A function-selection reply.
    pub fn call(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            content: None,
            function_call: Some(ToolCallRequest {
                name: name.into(),
                arguments: arguments.into(),
            }),
        }
    }
}

/// A single fragment in an incremental reply.
///
/// Fragments concatenate to the full text of the synchronous reply for the
/// same input. The sequence is finite and non-restartable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamFragment {
    /// Partial content delta
    #[serde(default)]
    pub content: Option<String>,

    /// Whether this is the final fragment
    #[serde(default)]
    pub done: bool,
}

/// The core Reasoner trait.
///
/// The dispatch loop calls `complete()` for tool-selection hops (those are
/// never streamed) and `stream()` for the final natural-language phase.
#[async_trait]
pub trait Reasoner: Send + Sync {
    /// A human-readable name for this reasoner (e.g., "openai").
    fn name(&self) -> &str;

    /// Send a request and get a complete reply.
    async fn complete(
        &self,
        request: ReasonerRequest,
    ) -> std::result::Result<ReasonerReply, ReasonerError>;

    /// Send a request and get an incremental sequence of text fragments.
    ///
    /// Default implementation calls `complete()` and wraps the result as a
    /// single fragment, so concatenation trivially equals the synchronous
    /// reply.
    async fn stream(
        &self,
        request: ReasonerRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<StreamFragment, ReasonerError>>,
        ReasonerError,
    > {
        let reply = self.complete(request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(2);
        let _ = tx
            .send(Ok(StreamFragment {
                content: reply.content,
                done: false,
            }))
            .await;
        let _ = tx
            .send(Ok(StreamFragment {
                content: None,
                done: true,
            }))
            .await;
        Ok(rx)
    }
}
