//! Chat-completion wire types and the retrying HTTP backend.
//!
//! The wire format is the OpenAI-compatible chat protocol: a message list
//! with optional tool-call entries, an advertised tool schema, and a
//! response that is either tool-call requests or final text. The
//! [`CompletionBackend`] trait is the seam tests use to script
//! conversations without a network.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::PipelineError;
use crate::tools::ToolDefinition;

/// Transient provider failures are retried this many times before the
/// pipeline fails.
pub const MAX_COMPLETION_RETRIES: u32 = 3;
const RETRY_BACKOFF_MS: u64 = 1000;
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// One entry in the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallMessage>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: &str) -> Self {
        Self {
            role: "system".to_string(),
            content: Some(content.to_string()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: Some(content.to_string()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant(content: Option<String>, tool_calls: Vec<ToolCallMessage>) -> Self {
        Self {
            role: "assistant".to_string(),
            content,
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: &str, content: String) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(content),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.to_string()),
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallMessage {
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,
    pub function: FunctionCallMessage,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCallMessage {
    pub name: String,
    /// JSON-encoded argument object.
    pub arguments: String,
}

/// The model's answer for one round: either tool-call requests, final
/// text, or both.
#[derive(Debug, Clone, Default)]
pub struct AssistantTurn {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallMessage>,
}

/// Provider seam for chat completions.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<AssistantTurn, PipelineError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolDefinition]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallMessage>>,
}

/// HTTP backend for OpenAI-compatible chat endpoints.
pub struct HttpCompletionBackend {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl HttpCompletionBackend {
    pub fn new(base_url: &str, model: &str, api_key: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.to_string(),
            api_key: api_key.to_string(),
        }
    }

    async fn send_once(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<AssistantTurn, SendError> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            tools: if tools.is_empty() { None } else { Some(tools) },
            tool_choice: if tools.is_empty() { None } else { Some("auto") },
        };
        let mut builder = self.client.post(&self.endpoint).json(&request);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                SendError::Transient(e.to_string())
            } else {
                SendError::Fatal(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            let body = response.text().await.unwrap_or_default();
            return Err(SendError::Transient(format!("{}: {}", status, body)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SendError::Fatal(format!("{}: {}", status, body)));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| SendError::Fatal(format!("invalid completion response: {}", e)))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| SendError::Fatal("completion had no choices".to_string()))?;
        Ok(AssistantTurn {
            content: choice.message.content,
            tool_calls: choice.message.tool_calls.unwrap_or_default(),
        })
    }
}

enum SendError {
    Transient(String),
    Fatal(String),
}

#[async_trait]
impl CompletionBackend for HttpCompletionBackend {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<AssistantTurn, PipelineError> {
        let mut attempt = 0u32;
        loop {
            match self.send_once(messages, tools).await {
                Ok(turn) => return Ok(turn),
                Err(SendError::Fatal(message)) => {
                    return Err(PipelineError::ProviderExhausted {
                        attempts: attempt + 1,
                        message,
                    })
                }
                Err(SendError::Transient(message)) => {
                    attempt += 1;
                    if attempt >= MAX_COMPLETION_RETRIES {
                        return Err(PipelineError::ProviderExhausted {
                            attempts: attempt,
                            message,
                        });
                    }
                    warn!(attempt, %message, "transient completion failure, retrying");
                    tokio::time::sleep(Duration::from_millis(
                        RETRY_BACKOFF_MS * 2u64.pow(attempt - 1),
                    ))
                    .await;
                }
            }
        }
    }
}

/// One non-agentic completion: a system instruction, a single user message,
/// no tools. Used by the structural transform and message classification.
pub async fn complete_plain(
    backend: &dyn CompletionBackend,
    system: &str,
    user: &str,
) -> Result<String, PipelineError> {
    let messages = vec![Message::system(system), Message::user(user)];
    let turn = backend.complete(&messages, &[]).await?;
    turn.content
        .filter(|c| !c.trim().is_empty())
        .ok_or(PipelineError::EmptyResponse)
}
