//! LLM port: one chat call in, typed response out.
//!
//! Every pipeline call goes through a [`ModelHandle`](crate::router::ModelHandle)
//! resolved by the capability router, so implementations stay model-agnostic.
//! When a `schema` is supplied the implementation must return parsed JSON (or a
//! schema violation); when `tools` are supplied it may return tool calls.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::IrSchema;
use crate::error::CoreError;
use crate::router::ModelHandle;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One message in a chat request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Tool declaration offered to the model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolDecl {
    pub name: String,
    pub description: String,
    /// JSON-schema-shaped parameter declaration, passed through verbatim.
    pub parameters: Value,
}

/// One tool call produced by the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawToolCall {
    pub name: String,
    pub args: Value,
}

/// Token usage for one call.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct LlmUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl LlmUsage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Response from one chat call.
///
/// `json` is present when the request declared a schema and the output parsed;
/// `tool_calls` when the model invoked tools.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TypedResponse {
    pub content: String,
    pub json: Option<Value>,
    #[serde(default)]
    pub tool_calls: Vec<RawToolCall>,
    pub usage: LlmUsage,
}

/// One incremental piece of assistant output.
#[derive(Clone, Debug)]
pub struct MessageChunk {
    pub content: String,
}

/// LLM client port.
///
/// `cancel` is the session token; implementations abort the in-flight request
/// when it fires (or let the call finish and the caller discards the result).
/// Raw provider errors never escape: they are mapped to
/// [`CoreError::ProviderUnavailable`] or [`CoreError::SchemaViolation`].
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(
        &self,
        handle: &ModelHandle,
        messages: &[ChatMessage],
        schema: Option<&IrSchema>,
        tools: Option<&[ToolDecl]>,
        cancel: &CancellationToken,
    ) -> Result<TypedResponse, CoreError>;

    /// Streaming variant: when `chunk_tx` is present, implementations send
    /// chunks through the bounded channel as they arrive, so a slow consumer
    /// applies backpressure and a fired cancel token stops the stream.
    ///
    /// Default implementation performs a plain `chat` and yields the full
    /// content as one chunk.
    async fn chat_stream(
        &self,
        handle: &ModelHandle,
        messages: &[ChatMessage],
        schema: Option<&IrSchema>,
        chunk_tx: Option<mpsc::Sender<MessageChunk>>,
        cancel: &CancellationToken,
    ) -> Result<TypedResponse, CoreError> {
        let response = self.chat(handle, messages, schema, None, cancel).await?;
        if let Some(tx) = chunk_tx {
            if !response.content.is_empty() {
                tokio::select! {
                    _ = tx.send(MessageChunk {
                        content: response.content.clone(),
                    }) => {}
                    _ = cancel.cancelled() => return Err(CoreError::Cancelled),
                }
            }
        }
        Ok(response)
    }
}
