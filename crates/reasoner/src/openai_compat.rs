//! OpenAI-compatible reasoning client.
//!
//! Works with any endpoint exposing the `/chat/completions` protocol with
//! legacy function calling (`functions` + `function_call: "auto"`).
//!
//! Supports:
//! - Synchronous completions with function selection
//! - Incremental SSE streaming (content fragments only — the dispatch loop
//!   never streams tool-selection hops)

use async_trait::async_trait;
use campusd_core::error::ReasonerError;
use campusd_core::message::{Message, Role};
use campusd_core::reasoner::{Reasoner, ReasonerReply, ReasonerRequest, StreamFragment};
use campusd_core::tool::{ToolCallRequest, ToolSpec};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

/// An OpenAI-compatible reasoning client.
pub struct OpenAiCompatReasoner {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiCompatReasoner {
    /// Create a new OpenAI-compatible reasoner.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .unwrap_or_default();

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: "gpt-4o-mini".into(),
            client,
        }
    }

    /// Set the model name.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the per-call HTTP timeout.
    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        if let Ok(client) = reqwest::Client::builder().timeout(timeout).build() {
            self.client = client;
        }
        self
    }

    /// Convert our Message types to the wire format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                    Role::System => "system".into(),
                    Role::Tool => "function".into(),
                },
                content: m.content.clone(),
                name: m.name.clone(),
                function_call: m.function_call.as_ref().map(|fc| ApiFunctionCall {
                    name: fc.name.clone(),
                    arguments: fc.arguments.clone(),
                }),
            })
            .collect()
    }

    /// Convert tool specs to the wire `functions` format.
    fn to_api_functions(tools: &[ToolSpec]) -> Vec<ApiFunction> {
        tools
            .iter()
            .map(|t| ApiFunction {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.parameters.clone(),
            })
            .collect()
    }

    fn build_body(&self, request: &ReasonerRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": stream,
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.tools.is_empty() {
            body["functions"] = serde_json::json!(Self::to_api_functions(&request.tools));
            body["function_call"] = serde_json::json!("auto");
        }

        body
    }

    /// Map non-200 statuses to typed errors.
    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ReasonerError> {
        let status = response.status().as_u16();

        if status == 429 {
            return Err(ReasonerError::RateLimited {
                retry_after_secs: 5,
            });
        }

        if status == 401 || status == 403 {
            return Err(ReasonerError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Reasoning service returned error");
            return Err(ReasonerError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        Ok(response)
    }

    fn map_send_error(e: reqwest::Error) -> ReasonerError {
        if e.is_timeout() {
            ReasonerError::Timeout(120)
        } else {
            ReasonerError::Network(e.to_string())
        }
    }
}

#[async_trait]
impl Reasoner for OpenAiCompatReasoner {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: ReasonerRequest) -> Result<ReasonerReply, ReasonerError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(&request, false);

        debug!(reasoner = %self.name, model = %self.model, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        let response = Self::check_status(response).await?;

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ReasonerError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ReasonerError::ApiError {
                status_code: 200,
                message: "No choices in response".into(),
            })?;

        let function_call = choice.message.function_call.map(|fc| ToolCallRequest {
            name: fc.name,
            arguments: fc.arguments,
        });

        Ok(ReasonerReply {
            content: choice.message.content,
            function_call,
        })
    }

    async fn stream(
        &self,
        request: ReasonerRequest,
    ) -> Result<
        tokio::sync::mpsc::Receiver<Result<StreamFragment, ReasonerError>>,
        ReasonerError,
    > {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(&request, true);

        debug!(reasoner = %self.name, model = %self.model, "Sending streaming request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        let response = Self::check_status(response).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let reasoner_name = self.name.clone();

        // Read the SSE byte stream and parse content deltas
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ReasonerError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&bytes));

                // Process complete lines
                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim_end_matches('\r').to_string();
                    buffer = buffer[line_end + 1..].to_string();

                    // Skip empty lines and SSE comments
                    if line.is_empty() || line.starts_with(':') {
                        continue;
                    }

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    let data = data.trim();

                    // "[DONE]" signals end of stream
                    if data == "[DONE]" {
                        let _ = tx
                            .send(Ok(StreamFragment {
                                content: None,
                                done: true,
                            }))
                            .await;
                        return;
                    }

                    match serde_json::from_str::<StreamResponse>(data) {
                        Ok(stream_resp) => {
                            let Some(choice) = stream_resp.choices.first() else {
                                continue;
                            };

                            let has_content = choice
                                .delta
                                .content
                                .as_ref()
                                .is_some_and(|c| !c.is_empty());

                            if has_content {
                                let fragment = StreamFragment {
                                    content: choice.delta.content.clone(),
                                    done: false,
                                };
                                if tx.send(Ok(fragment)).await.is_err() {
                                    return; // receiver dropped
                                }
                            }

                            if choice.finish_reason.is_some() {
                                let _ = tx
                                    .send(Ok(StreamFragment {
                                        content: None,
                                        done: true,
                                    }))
                                    .await;
                                return;
                            }
                        }
                        Err(e) => {
                            trace!(
                                reasoner = %reasoner_name,
                                data = %data,
                                error = %e,
                                "Ignoring unparseable SSE chunk"
                            );
                        }
                    }
                }
            }

            // Byte stream ended without [DONE]; close cleanly
            let _ = tx
                .send(Ok(StreamFragment {
                    content: None,
                    done: true,
                }))
                .await;
        });

        Ok(rx)
    }
}

// --- Wire types ---

#[derive(Serialize)]
struct ApiMessage {
    role: String,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<ApiFunctionCall>,
}

#[derive(Serialize, Deserialize)]
struct ApiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct ApiFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
}

#[derive(Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    function_call: Option<ApiFunctionCall>,
}

#[derive(Deserialize)]
struct StreamResponse {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}
